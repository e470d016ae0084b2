//! Whole-lot position sizing against a rupee risk band.

use rust_decimal::Decimal;
use swing_trade_core::config::SizingConfig;
use tracing::debug;

use crate::error::SizingError;
use crate::types::LotSize;

pub struct LotSizer {
    config: SizingConfig,
    lot_size: u32,
}

impl LotSizer {
    #[must_use]
    pub const fn new(config: SizingConfig, lot_size: u32) -> Self {
        Self { config, lot_size }
    }

    /// Picks the lot count whose total risk sits inside `[min_risk, max_risk]`
    /// closest to the band's midpoint. Below the band, takes as many lots as
    /// fit under `max_risk`.
    ///
    /// # Errors
    ///
    /// `RiskTooLarge` if one lot alone exceeds `max_risk`.
    pub fn size(&self, risk_per_unit: Decimal) -> Result<LotSize, SizingError> {
        if self.lot_size == 0 {
            return Err(SizingError::InvalidLotSize);
        }
        if risk_per_unit <= Decimal::ZERO {
            return Err(SizingError::NonPositiveRisk(risk_per_unit));
        }

        let lot_risk = risk_per_unit * Decimal::from(self.lot_size);
        if lot_risk > self.config.max_risk {
            return Err(SizingError::RiskTooLarge {
                lot_risk,
                max_risk: self.config.max_risk,
            });
        }

        let midpoint = (self.config.min_risk + self.config.max_risk) / Decimal::TWO;
        let mut in_band: Option<(u32, Decimal)> = None;
        let mut under_max = 1;

        for lots in 1..=self.config.max_lots.max(1) {
            let risk = lot_risk * Decimal::from(lots);
            if risk > self.config.max_risk {
                break;
            }
            under_max = lots;
            if risk >= self.config.min_risk {
                let gap = (risk - midpoint).abs();
                if in_band.map_or(true, |(_, best)| gap < best) {
                    in_band = Some((lots, gap));
                }
            }
        }

        let lots = in_band.map_or(under_max, |(lots, _)| lots);
        let quantity = lots * self.lot_size;
        let sized = LotSize {
            lots,
            quantity,
            total_risk: risk_per_unit * Decimal::from(quantity),
        };
        debug!(
            lots,
            quantity,
            risk_per_unit = %risk_per_unit,
            total_risk = %sized.total_risk,
            in_band = in_band.is_some(),
            "Position sized"
        );
        Ok(sized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sizer() -> LotSizer {
        LotSizer::new(SizingConfig::default(), 75)
    }

    #[test]
    fn picks_lot_count_nearest_band_midpoint() {
        // 75 * 2 = 150 per lot: 6 lots = 900, 5 lots = 750 (below band)
        let sized = sizer().size(dec!(2)).unwrap();
        assert_eq!(sized.lots, 6);
        assert_eq!(sized.quantity, 450);
        assert_eq!(sized.total_risk, dec!(900));

        // 75 * 0.5 = 37.5 per lot: 22 lots = 825, 23 lots = 862.5; midpoint 850
        let sized = sizer().size(dec!(0.5)).unwrap();
        assert_eq!(sized.lots, 23);
    }

    #[test]
    fn below_band_takes_largest_fit() {
        // 75 * 7 = 525 per lot: one lot fits under 900, two do not
        let sized = sizer().size(dec!(7)).unwrap();
        assert_eq!(sized.lots, 1);
        assert_eq!(sized.total_risk, dec!(525));
    }

    #[test]
    fn lot_cap_applies() {
        // 75 * 0.1 = 7.5 per lot: band needs 107+ lots, capped at 50
        let sized = sizer().size(dec!(0.1)).unwrap();
        assert_eq!(sized.lots, 50);
        assert_eq!(sized.quantity, 3750);
    }

    #[test]
    fn single_lot_over_maximum_is_refused() {
        assert!(matches!(
            sizer().size(dec!(12.5)),
            Err(SizingError::RiskTooLarge { .. })
        ));
    }

    #[test]
    fn invalid_inputs() {
        assert!(matches!(sizer().size(dec!(0)), Err(SizingError::NonPositiveRisk(_))));
        assert!(matches!(
            LotSizer::new(SizingConfig::default(), 0).size(dec!(1)),
            Err(SizingError::InvalidLotSize)
        ));
    }
}
