//! L1→H1→A→B→C→D swing structure scanner.
//!
//! The detector is a pure function of the bars it is shown: feeding the same
//! bar sequence into a fresh detector reproduces the same pivots and the same
//! breakout. It performs at most one state transition per bar.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use swing_trade_core::config::{DetectorConfig, TriggerSource};
use swing_trade_core::events::{Bar, BreakoutSignal, Pivot, PivotRole, SwingStructure};
use thiserror::Error;
use tracing::{debug, info};

use crate::price_buffer::PriceSeriesBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectorState {
    Idle,
    SeekingL1,
    SeekingH1,
    SeekingA,
    SeekingB,
    SeekingC,
    SeekingD,
    BreakoutArmed,
    Triggered,
    Invalidated,
}

impl DetectorState {
    const fn seeking(role: PivotRole) -> Self {
        match role {
            PivotRole::L1 => Self::SeekingL1,
            PivotRole::H1 => Self::SeekingH1,
            PivotRole::A => Self::SeekingA,
            PivotRole::B => Self::SeekingB,
            PivotRole::C => Self::SeekingC,
            PivotRole::D => Self::SeekingD,
        }
    }

    /// Pivot role this state is looking for.
    #[must_use]
    pub const fn expected_role(self) -> Option<PivotRole> {
        match self {
            Self::SeekingL1 => Some(PivotRole::L1),
            Self::SeekingH1 => Some(PivotRole::H1),
            Self::SeekingA => Some(PivotRole::A),
            Self::SeekingB => Some(PivotRole::B),
            Self::SeekingC => Some(PivotRole::C),
            Self::SeekingD => Some(PivotRole::D),
            _ => None,
        }
    }
}

/// Why a partial structure was abandoned.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureInvalid {
    #[error("{role} at {price} does not clear {floor_role} at {floor}")]
    StaircaseBroken {
        role: PivotRole,
        price: Decimal,
        floor_role: PivotRole,
        floor: Decimal,
    },

    #[error("close {close} below {role} {level} minus tolerance")]
    ClosedBelowPivot {
        close: Decimal,
        role: PivotRole,
        level: Decimal,
    },

    #[error("no breakout within {bars} bars of L1")]
    TimedOut { bars: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorEvent {
    PivotConfirmed(Pivot),
    /// D confirmed; the structure waits for price to clear the trigger.
    Armed(SwingStructure),
    Breakout(BreakoutSignal),
    Invalidated(StructureInvalid),
}

/// Detector progress: confirmed pivots plus the role expected next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureState {
    pub state: DetectorState,
    pub pivots: Vec<Pivot>,
    pub provisional: Option<Pivot>,
    pub trigger_price: Option<Decimal>,
}

impl StructureState {
    #[must_use]
    pub const fn expected_role(&self) -> Option<PivotRole> {
        self.state.expected_role()
    }
}

pub struct SwingStructureDetector {
    underlying: String,
    config: DetectorConfig,
    state: DetectorState,
    pivots: Vec<Pivot>,
    provisional: Option<Pivot>,
    trigger_price: Option<Decimal>,
    /// Bars before this index never take part in the current structure.
    scan_start: u64,
}

impl SwingStructureDetector {
    #[must_use]
    pub fn new(underlying: impl Into<String>, config: DetectorConfig) -> Self {
        Self {
            underlying: underlying.into(),
            config,
            state: DetectorState::Idle,
            pivots: Vec::with_capacity(PivotRole::SEQUENCE.len()),
            provisional: None,
            trigger_price: None,
            scan_start: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }

    #[must_use]
    pub fn snapshot(&self) -> StructureState {
        StructureState {
            state: self.state,
            pivots: self.pivots.clone(),
            provisional: self.provisional.clone(),
            trigger_price: self.trigger_price,
        }
    }

    /// Drops any partial structure. Bars up to `from_index` are ignored by the
    /// next structure.
    pub fn reset(&mut self, from_index: u64) {
        self.state = DetectorState::Idle;
        self.pivots.clear();
        self.provisional = None;
        self.trigger_price = None;
        self.scan_start = from_index;
    }

    /// Processes the newest bar in `buffer`.
    pub fn on_bar(&mut self, buffer: &PriceSeriesBuffer) -> Option<DetectorEvent> {
        let (index, bar) = buffer.latest()?;

        if matches!(
            self.state,
            DetectorState::Triggered | DetectorState::Invalidated
        ) {
            self.reset(index);
        }

        if self.state == DetectorState::Idle {
            self.scan_start = self.scan_start.max(index);
            self.state = DetectorState::SeekingL1;
            self.provisional = self.lowest_low(buffer, index);
            return None;
        }

        if let Some(reason) = self.check_invalidation(index, bar) {
            return Some(self.invalidate(reason));
        }

        match self.state {
            DetectorState::SeekingL1 => {
                self.provisional = self.lowest_low(buffer, index);
                self.try_confirm_low(buffer, index, bar)
            }
            DetectorState::SeekingA | DetectorState::SeekingC => {
                self.extend_low(index, bar);
                if let Some(reason) = self.staircase_violation() {
                    return Some(self.invalidate(reason));
                }
                self.try_confirm_low(buffer, index, bar)
            }
            DetectorState::SeekingH1 | DetectorState::SeekingB | DetectorState::SeekingD => {
                self.extend_high(index, bar);
                self.try_confirm_high(buffer, index, bar)
            }
            DetectorState::BreakoutArmed => self.check_breakout(index, bar),
            DetectorState::Idle | DetectorState::Triggered | DetectorState::Invalidated => None,
        }
    }

    /// Lowest low over the lookback window, not reaching before `scan_start`.
    fn lowest_low(&self, buffer: &PriceSeriesBuffer, index: u64) -> Option<Pivot> {
        let lookback = self.config.lookback.max(1) as u64;
        let from = self.scan_start.max((index + 1).saturating_sub(lookback));
        let mut best: Option<Pivot> = None;
        for (i, bar) in buffer.range(from, index) {
            if best.as_ref().map_or(true, |p| bar.low < p.price) {
                best = Some(pivot(PivotRole::L1, i, bar.low, bar));
            }
        }
        best
    }

    fn extend_low(&mut self, index: u64, bar: &Bar) {
        let Some(role) = self.state.expected_role() else {
            return;
        };
        if self.provisional.as_ref().map_or(true, |p| bar.low < p.price) {
            self.provisional = Some(pivot(role, index, bar.low, bar));
        }
    }

    fn extend_high(&mut self, index: u64, bar: &Bar) {
        let Some(role) = self.state.expected_role() else {
            return;
        };
        if self.provisional.as_ref().map_or(true, |p| bar.high > p.price) {
            self.provisional = Some(pivot(role, index, bar.high, bar));
        }
    }

    /// Seeds the next provisional pivot from bars after the one just confirmed.
    fn seed(&self, buffer: &PriceSeriesBuffer, role: PivotRole, after: u64, index: u64) -> Option<Pivot> {
        let mut best: Option<Pivot> = None;
        for (i, bar) in buffer.range(after + 1, index) {
            let price = if role.is_low() { bar.low } else { bar.high };
            let better = best.as_ref().map_or(true, |p| {
                if role.is_low() {
                    price < p.price
                } else {
                    price > p.price
                }
            });
            if better {
                best = Some(pivot(role, i, price, bar));
            }
        }
        best
    }

    fn last_confirmed_low(&self) -> Option<&Pivot> {
        self.pivots.iter().rev().find(|p| p.role.is_low())
    }

    fn confirmed(&self, role: PivotRole) -> Option<&Pivot> {
        self.pivots.iter().find(|p| p.role == role)
    }

    fn check_invalidation(&self, index: u64, bar: &Bar) -> Option<StructureInvalid> {
        let l1 = self.confirmed(PivotRole::L1)?;
        let age = index.saturating_sub(l1.bar_index);
        if age > self.config.max_structure_bars {
            return Some(StructureInvalid::TimedOut { bars: age });
        }
        let low = self.last_confirmed_low()?;
        if bar.close < low.price - self.config.invalidation_tolerance {
            return Some(StructureInvalid::ClosedBelowPivot {
                close: bar.close,
                role: low.role,
                level: low.price,
            });
        }
        None
    }

    /// A provisional A or C at or below the previous confirmed low.
    fn staircase_violation(&self) -> Option<StructureInvalid> {
        let candidate = self.provisional.as_ref()?;
        let floor = self.last_confirmed_low()?;
        (candidate.price <= floor.price).then(|| StructureInvalid::StaircaseBroken {
            role: candidate.role,
            price: candidate.price,
            floor_role: floor.role,
            floor: floor.price,
        })
    }

    fn try_confirm_low(
        &mut self,
        buffer: &PriceSeriesBuffer,
        index: u64,
        bar: &Bar,
    ) -> Option<DetectorEvent> {
        let candidate = self.provisional.as_ref()?;
        let threshold = candidate.price * (Decimal::ONE + self.config.confirm_rise_pct);
        if bar.close < threshold {
            return None;
        }
        let mut confirmed = candidate.clone();
        if let Some(role) = self.state.expected_role() {
            confirmed.role = role;
        }
        Some(self.confirm(buffer, confirmed, index))
    }

    fn try_confirm_high(
        &mut self,
        buffer: &PriceSeriesBuffer,
        index: u64,
        bar: &Bar,
    ) -> Option<DetectorEvent> {
        let candidate = self.provisional.as_ref()?;
        let base = self.last_confirmed_low()?.price;
        let threshold =
            candidate.price - self.config.retracement_ratio * (candidate.price - base);
        if bar.close > threshold {
            return None;
        }

        let confirmed = candidate.clone();
        let h1 = self.confirmed(PivotRole::H1).map(|p| p.price);
        if let (PivotRole::B, Some(h1)) = (confirmed.role, h1) {
            if confirmed.price <= h1 {
                let reason = StructureInvalid::StaircaseBroken {
                    role: PivotRole::B,
                    price: confirmed.price,
                    floor_role: PivotRole::H1,
                    floor: h1,
                };
                return Some(self.invalidate(reason));
            }
        }

        Some(self.confirm(buffer, confirmed, index))
    }

    fn confirm(&mut self, buffer: &PriceSeriesBuffer, pivot: Pivot, index: u64) -> DetectorEvent {
        debug!(
            underlying = %self.underlying,
            role = %pivot.role,
            price = %pivot.price,
            bar_index = pivot.bar_index,
            "Pivot confirmed"
        );
        self.pivots.push(pivot.clone());

        match pivot.role.next() {
            Some(next) => {
                self.state = DetectorState::seeking(next);
                self.provisional = self.seed(buffer, next, pivot.bar_index, index);
                DetectorEvent::PivotConfirmed(pivot)
            }
            None => {
                let trigger = pivot.price + self.config.breakout_buffer;
                self.state = DetectorState::BreakoutArmed;
                self.provisional = None;
                self.trigger_price = Some(trigger);
                let structure = self.structure(trigger);
                info!(structure = %structure, "Breakout armed");
                DetectorEvent::Armed(structure)
            }
        }
    }

    fn check_breakout(&mut self, index: u64, bar: &Bar) -> Option<DetectorEvent> {
        let trigger = self.trigger_price?;
        let price = match self.config.trigger_on {
            TriggerSource::Close => bar.close,
            TriggerSource::High => bar.high,
        };
        if price <= trigger {
            return None;
        }

        let structure = self.structure(trigger);
        let stop_reference = structure.stop_reference()?;
        self.state = DetectorState::Triggered;
        let signal = BreakoutSignal {
            structure,
            trigger_price: trigger,
            stop_reference,
            bar_index: index,
            timestamp: bar.timestamp,
        };
        info!(
            underlying = %self.underlying,
            trigger = %trigger,
            price = %price,
            stop_reference = %stop_reference,
            bar_index = index,
            "Breakout triggered"
        );
        Some(DetectorEvent::Breakout(signal))
    }

    fn invalidate(&mut self, reason: StructureInvalid) -> DetectorEvent {
        info!(
            underlying = %self.underlying,
            pivots = self.pivots.len(),
            reason = %reason,
            "Structure invalidated"
        );
        self.state = DetectorState::Invalidated;
        DetectorEvent::Invalidated(reason)
    }

    fn structure(&self, trigger_price: Decimal) -> SwingStructure {
        SwingStructure {
            underlying: self.underlying.clone(),
            pivots: self.pivots.clone(),
            trigger_price,
        }
    }
}

fn pivot(role: PivotRole, bar_index: u64, price: Decimal, bar: &Bar) -> Pivot {
    Pivot {
        role,
        bar_index,
        price,
        timestamp: bar.timestamp,
    }
}
