//! Call selection by Greeks ranking, expiry choice and chain caching.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use swing_trade_core::config::SelectorConfig;
use swing_trade_core::events::BreakoutSignal;
use swing_trade_core::orders::{OptionContract, OptionType};
use swing_trade_core::traits::MarketDataFeed;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{RejectionCounts, SelectionError};

/// Selected contract and its ranking score.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub contract: OptionContract,
    pub score: f64,
    pub atm_strike: Decimal,
    pub median_iv: f64,
}

pub struct OptionSelector {
    config: SelectorConfig,
    strike_step: Decimal,
}

impl OptionSelector {
    #[must_use]
    pub const fn new(config: SelectorConfig, strike_step: Decimal) -> Self {
        Self {
            config,
            strike_step,
        }
    }

    /// Strike nearest to spot on the listed grid.
    #[must_use]
    pub fn atm_strike(&self, spot: Decimal) -> Decimal {
        if self.strike_step <= Decimal::ZERO {
            return spot;
        }
        (spot / self.strike_step).round() * self.strike_step
    }

    /// Filters the chain and returns the best-scoring call.
    ///
    /// # Errors
    ///
    /// `EmptyChain` for an empty snapshot, `NoEligibleContract` when every
    /// contract fails a filter.
    pub fn select(
        &self,
        signal: &BreakoutSignal,
        spot: Decimal,
        chain: &[OptionContract],
    ) -> Result<Selection, SelectionError> {
        if chain.is_empty() {
            return Err(SelectionError::EmptyChain {
                underlying: signal.structure.underlying.clone(),
            });
        }

        let atm = self.atm_strike(spot);
        let lower = atm - self.strike_step * Decimal::from(self.config.itm_strikes);
        let upper = atm + self.strike_step * Decimal::from(self.config.otm_strikes);
        let median_iv = median_iv(chain);

        let mut rejected = RejectionCounts::default();
        let mut best: Option<(f64, &OptionContract)> = None;

        for contract in chain {
            if contract.option_type != OptionType::Call {
                rejected.not_call += 1;
                continue;
            }
            if contract.strike < lower || contract.strike > upper {
                rejected.outside_band += 1;
                continue;
            }
            if contract.open_interest < self.config.min_open_interest {
                rejected.low_open_interest += 1;
                continue;
            }
            match contract.spread_pct() {
                Some(spread) if spread <= self.config.max_spread_pct => {}
                _ => {
                    rejected.wide_spread += 1;
                    continue;
                }
            }
            let Some(score) = self.score(contract, median_iv) else {
                rejected.bad_greeks += 1;
                continue;
            };

            let better = best.map_or(true, |(best_score, current)| {
                match score.total_cmp(&best_score) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => {
                        (contract.open_interest, std::cmp::Reverse(contract.strike))
                            > (current.open_interest, std::cmp::Reverse(current.strike))
                    }
                }
            });
            if better {
                best = Some((score, contract));
            }
        }

        let Some((score, contract)) = best else {
            warn!(
                underlying = %signal.structure.underlying,
                contracts = chain.len(),
                rejected = %rejected,
                "No eligible contract"
            );
            return Err(SelectionError::NoEligibleContract { rejected });
        };

        info!(
            contract = %contract.display_name(),
            delta = contract.delta,
            iv = contract.implied_volatility,
            score,
            atm = %atm,
            "Contract selected"
        );
        Ok(Selection {
            contract: contract.clone(),
            score,
            atm_strike: atm,
            median_iv,
        })
    }

    /// `None` when the Greeks cannot be ranked.
    fn score(&self, contract: &OptionContract, median_iv: f64) -> Option<f64> {
        let premium = contract.last_price.to_f64()?;
        let greeks_ok = contract.delta.is_finite()
            && contract.delta > 0.0
            && contract.delta <= 1.0
            && contract.theta.is_finite()
            && contract.implied_volatility.is_finite()
            && contract.implied_volatility > 0.0
            && premium > 0.0;
        if !greeks_ok {
            return None;
        }

        let delta_fit =
            1.0 - ((contract.delta - self.config.target_delta).abs() / 0.5).min(1.0);
        let decay = contract.theta.abs() / premium;
        let iv_dev = if median_iv > 0.0 {
            (contract.implied_volatility - median_iv).abs() / median_iv
        } else {
            0.0
        };

        Some(
            self.config.delta_weight * delta_fit
                - self.config.theta_weight * decay
                - self.config.iv_weight * iv_dev,
        )
    }
}

/// Median IV over the chain's calls with a usable IV.
fn median_iv(chain: &[OptionContract]) -> f64 {
    let mut ivs: Vec<f64> = chain
        .iter()
        .filter(|c| c.option_type == OptionType::Call)
        .map(|c| c.implied_volatility)
        .filter(|iv| iv.is_finite() && *iv > 0.0)
        .collect();
    if ivs.is_empty() {
        return 0.0;
    }
    ivs.sort_by(f64::total_cmp);
    let mid = ivs.len() / 2;
    if ivs.len() % 2 == 0 {
        (ivs[mid - 1] + ivs[mid]) / 2.0
    } else {
        ivs[mid]
    }
}

/// Nearest expiry that is still tradable for the whole session: on expiry
/// day the contract rolls to the next listed expiry.
///
/// # Errors
///
/// `NoExpiry` when nothing is listed after `today`.
pub fn nearest_expiry(expiries: &[NaiveDate], today: NaiveDate) -> Result<NaiveDate, SelectionError> {
    expiries
        .iter()
        .copied()
        .filter(|e| *e > today)
        .min()
        .ok_or(SelectionError::NoExpiry { date: today })
}

struct CachedChain {
    underlying: String,
    expiry: NaiveDate,
    fetched_at: Instant,
    contracts: Vec<OptionContract>,
}

/// Reuses option chain snapshots for a refresh window. A failed refresh
/// falls back to the last snapshot for the same underlying and expiry.
pub struct ChainCache {
    refresh: Duration,
    cached: Option<CachedChain>,
}

impl ChainCache {
    #[must_use]
    pub const fn new(refresh: Duration) -> Self {
        Self {
            refresh,
            cached: None,
        }
    }

    fn matching(&self, underlying: &str, expiry: NaiveDate) -> Option<&CachedChain> {
        self.cached
            .as_ref()
            .filter(|c| c.underlying == underlying && c.expiry == expiry)
    }

    /// Returns a fresh or cached snapshot.
    ///
    /// # Errors
    ///
    /// `ChainUnavailable` if the fetch fails and nothing is cached.
    pub async fn get<F>(
        &mut self,
        feed: &F,
        underlying: &str,
        expiry: NaiveDate,
    ) -> Result<Vec<OptionContract>, SelectionError>
    where
        F: MarketDataFeed + ?Sized,
    {
        if let Some(hit) = self.matching(underlying, expiry) {
            if hit.fetched_at.elapsed() < self.refresh {
                return Ok(hit.contracts.clone());
            }
        }

        match feed.option_chain_snapshot(underlying, expiry).await {
            Ok(contracts) => {
                debug!(underlying, %expiry, contracts = contracts.len(), "Option chain refreshed");
                self.cached = Some(CachedChain {
                    underlying: underlying.to_string(),
                    expiry,
                    fetched_at: Instant::now(),
                    contracts: contracts.clone(),
                });
                Ok(contracts)
            }
            Err(e) => match self.matching(underlying, expiry) {
                Some(stale) => {
                    warn!(
                        underlying,
                        %expiry,
                        age_secs = stale.fetched_at.elapsed().as_secs(),
                        error = %e,
                        "Chain refresh failed, using cached snapshot"
                    );
                    Ok(stale.contracts.clone())
                }
                None => Err(SelectionError::ChainUnavailable(e.to_string())),
            },
        }
    }
}
