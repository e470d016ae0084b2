use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub underlying: UnderlyingConfig,
    pub buffer: BufferConfig,
    pub detector: DetectorConfig,
    pub selector: SelectorConfig,
    pub risk: RiskConfig,
    pub sizing: SizingConfig,
    pub lifecycle: LifecycleConfig,
    pub broker: BrokerConfig,
    pub persistence: PersistenceConfig,
}

/// Instrument being traded and its contract conventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnderlyingConfig {
    pub symbol: String,
    pub lot_size: u32,
    /// Distance between listed strikes.
    pub strike_step: Decimal,
    /// Minimum price increment of option premiums.
    pub tick_size: Decimal,
    /// Bar interval in minutes fed to the detector.
    pub bar_minutes: u32,
}

impl Default for UnderlyingConfig {
    fn default() -> Self {
        Self {
            symbol: "NIFTY".to_string(),
            lot_size: 75,
            strike_step: dec!(50),
            tick_size: dec!(0.05),
            bar_minutes: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Bars retained in the rolling window.
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { capacity: 200 }
    }
}

/// Which bar field must clear the breakout trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Close,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Bars scanned for the L1 candidate.
    pub lookback: usize,
    /// A swing low confirms once a later bar closes this fraction above it.
    pub confirm_rise_pct: Decimal,
    /// A swing high confirms once price gives back this share of the
    /// preceding up-leg.
    pub retracement_ratio: Decimal,
    /// Slack below the latest confirmed low before the structure is void.
    pub invalidation_tolerance: Decimal,
    /// Points added to D to form the trigger.
    pub breakout_buffer: Decimal,
    /// Structures older than this (bars since L1) are abandoned.
    pub max_structure_bars: u64,
    pub trigger_on: TriggerSource,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            lookback: 20,
            confirm_rise_pct: dec!(0.001),
            retracement_ratio: dec!(0.3),
            invalidation_tolerance: Decimal::ZERO,
            breakout_buffer: dec!(0.05),
            max_structure_bars: 150,
            trigger_on: TriggerSource::Close,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Strikes considered below the ATM strike. The default band runs from
    /// ATM to three strikes out of the money.
    pub itm_strikes: u32,
    /// Strikes considered above the ATM strike.
    pub otm_strikes: u32,
    pub min_open_interest: u64,
    /// Widest acceptable bid-ask spread, percent of mid.
    pub max_spread_pct: Decimal,
    pub target_delta: f64,
    pub delta_weight: f64,
    pub theta_weight: f64,
    pub iv_weight: f64,
    /// Seconds an option chain snapshot stays fresh.
    pub greeks_refresh_secs: u64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            itm_strikes: 0,
            otm_strikes: 3,
            min_open_interest: 1_000,
            max_spread_pct: dec!(5),
            target_delta: 0.5,
            delta_weight: 1.0,
            theta_weight: 0.5,
            iv_weight: 0.5,
            greeks_refresh_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Multiplier on the delta-projected premium risk.
    pub slippage_buffer: Decimal,
    /// Target distance as a multiple of risk.
    pub reward_multiple: Decimal,
    /// Add gamma and theta terms to the projected premium move.
    pub include_convexity: bool,
    /// Expected holding time for the theta term, minutes.
    pub holding_minutes: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            slippage_buffer: dec!(1.0),
            reward_multiple: dec!(2),
            include_convexity: false,
            holding_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Lower edge of the target rupee risk per trade.
    pub min_risk: Decimal,
    /// Upper edge of the target rupee risk per trade.
    pub max_risk: Decimal,
    pub max_lots: u32,
    /// New entries allowed per trading day.
    pub max_signals_per_day: u32,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            min_risk: dec!(800),
            max_risk: dec!(900),
            max_lots: 50,
            max_signals_per_day: 1,
        }
    }
}

/// How the entry order is priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub poll_interval_secs: u64,
    /// Unfilled entries are cancelled after this many seconds.
    pub entry_timeout_secs: u64,
    pub entry_order_type: EntryOrderType,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            entry_timeout_secs: 60,
            entry_order_type: EntryOrderType::Market,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 5_000,
            jitter_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub requests_per_second: u32,
    pub requests_per_minute: u32,
    pub retry: RetryConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 20,
            requests_per_minute: 500,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Directory for the structure and order CSV files.
    pub output_dir: String,
    pub enabled: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            output_dir: "output".to_string(),
            enabled: true,
        }
    }
}
