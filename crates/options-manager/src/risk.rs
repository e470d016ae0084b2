//! Structural stop and 1:2 target in option-premium terms.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use swing_trade_core::config::RiskConfig;
use swing_trade_core::events::BreakoutSignal;
use swing_trade_core::orders::OptionContract;
use tracing::debug;

use crate::error::RiskError;
use crate::types::RiskLevels;

/// Divisor turning daily theta into an hourly decay rate.
const THETA_HOURS_PER_DAY: u32 = 24 * 6;

pub struct RiskCalculator {
    config: RiskConfig,
    tick_size: Decimal,
}

impl RiskCalculator {
    #[must_use]
    pub const fn new(config: RiskConfig, tick_size: Decimal) -> Self {
        Self { config, tick_size }
    }

    /// Translates the underlying distance from trigger to point C into option
    /// stop and target prices. The option entry is the contract's last price.
    ///
    /// # Errors
    ///
    /// Fails closed: any non-positive distance, stop, or out-of-order level
    /// is an error and no order should be placed.
    pub fn compute(
        &self,
        signal: &BreakoutSignal,
        contract: &OptionContract,
    ) -> Result<RiskLevels, RiskError> {
        let entry_underlying = signal.trigger_price;
        let distance = entry_underlying - signal.stop_reference;
        if distance <= Decimal::ZERO {
            return Err(RiskError::InvalidStructure {
                entry: entry_underlying,
                stop_reference: signal.stop_reference,
            });
        }

        let entry = contract.last_price;
        let premium_risk = self.premium_risk(distance, contract)?;

        let stop = self.round_down(entry - premium_risk);
        if stop <= Decimal::ZERO {
            return Err(RiskError::NonPositiveStop { stop });
        }
        let target = self.round_up(entry + self.config.reward_multiple * (entry - stop));

        if !(stop < entry && entry < target) {
            return Err(RiskError::OrderingViolated {
                stop,
                entry,
                target,
            });
        }

        debug!(
            contract = %contract.symbol,
            distance = %distance,
            premium_risk = %premium_risk,
            entry = %entry,
            stop = %stop,
            target = %target,
            "Risk levels computed"
        );
        Ok(RiskLevels {
            underlying_entry: entry_underlying,
            underlying_stop_distance: distance,
            entry_price: entry,
            stop_loss: stop,
            target,
        })
    }

    /// Expected premium drop if the underlying falls back to point C.
    fn premium_risk(&self, distance: Decimal, contract: &OptionContract) -> Result<Decimal, RiskError> {
        let delta = greek("delta", contract.delta)?;
        let mut risk = distance * delta * self.config.slippage_buffer;

        if self.config.include_convexity {
            let gamma = greek("gamma", contract.gamma)?;
            let theta = greek("theta", contract.theta)?;
            let convexity = Decimal::new(5, 1) * gamma * distance * distance;
            let decay = theta.abs() / Decimal::from(THETA_HOURS_PER_DAY)
                * (Decimal::from(self.config.holding_minutes) / Decimal::from(60));
            risk += convexity + decay;
        }
        Ok(risk)
    }

    fn round_down(&self, price: Decimal) -> Decimal {
        self.round(price, RoundingStrategy::ToNegativeInfinity)
    }

    fn round_up(&self, price: Decimal) -> Decimal {
        self.round(price, RoundingStrategy::ToPositiveInfinity)
    }

    fn round(&self, price: Decimal, strategy: RoundingStrategy) -> Decimal {
        if self.tick_size <= Decimal::ZERO {
            return price;
        }
        (price / self.tick_size).round_dp_with_strategy(0, strategy) * self.tick_size
    }
}

fn greek(name: &'static str, value: f64) -> Result<Decimal, RiskError> {
    if !value.is_finite() {
        return Err(RiskError::InvalidGreek {
            name,
            value: value.to_string(),
        });
    }
    Decimal::from_f64(value).ok_or_else(|| RiskError::InvalidGreek {
        name,
        value: value.to_string(),
    })
}
