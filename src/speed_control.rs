//! Speed control: throttle how much of a desired rebalance executes per
//! cycle.
//!
//! Small deviations from the prior portfolio are left alone to save costs;
//! deviations beyond the tracking-error buffer are corrected in proportion
//! to how far they overshoot it. The trade itself (not the position) is
//! discretized with a two-tier rule: dust is dropped, and any economically
//! meaningful adjustment is bumped up to the venue's minimum size.

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::covariance::CovarianceMatrix;
use crate::rounding::round2;
use crate::types::{InstrumentCode, WeightMap};

/// Damping curve parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SpeedControl {
    /// Tracking error below which no rebalance happens at all.
    pub tracking_error_buffer: f64,
    /// Cap on the fraction of the desired rebalance executed in one cycle.
    pub max_adjustment_fraction: f64,
}

impl Default for SpeedControl {
    fn default() -> Self {
        Self {
            tracking_error_buffer: 0.0,
            max_adjustment_fraction: 1.0,
        }
    }
}

/// Fraction of the desired rebalance to execute this cycle.
///
/// Zero while the tracking error sits inside the buffer, rising toward one
/// as it grows beyond it. The correction aims to land the post-trade
/// tracking error back on the buffer.
pub fn adjustment_factor(tracking_error: f64, cfg: &SpeedControl) -> f64 {
    if !(tracking_error > cfg.tracking_error_buffer) || tracking_error <= 0.0 {
        return 0.0;
    }
    ((tracking_error - cfg.tracking_error_buffer) / tracking_error)
        .clamp(0.0, cfg.max_adjustment_fraction.clamp(0.0, 1.0))
}

/// Two-tier discretization of a trade, in unit space.
///
/// Below half a unit the trade isn't worth doing; between half a unit and a
/// full unit it must clear the venue minimum, so it rounds up to exactly
/// one unit in the trade's direction; beyond that only floating noise is
/// clipped. Snapping to the unit grid happens later at position level.
pub fn round_trade(trade_units: f64, min_unit: f64) -> f64 {
    if !trade_units.is_finite() {
        return 0.0;
    }
    let magnitude = trade_units.abs();
    if magnitude < min_unit / 2.0 {
        0.0
    } else if magnitude < min_unit {
        min_unit * trade_units.signum()
    } else {
        round2(trade_units)
    }
}

/// Apply speed control to an optimized weight vector.
///
/// With no prior position (cold start) there is nothing to damp against and
/// the optimized weights pass through unchanged.
pub fn dampen(
    optimized: &WeightMap,
    prior: Option<&WeightMap>,
    per_unit_values: &FxHashMap<InstrumentCode, f64>,
    min_units: &FxHashMap<InstrumentCode, f64>,
    covariance: &CovarianceMatrix,
    cfg: &SpeedControl,
) -> WeightMap {
    let Some(prior) = prior else {
        return optimized.clone();
    };

    let tracking_error = covariance.tracking_error(optimized, prior);
    let adj_factor = adjustment_factor(tracking_error, cfg);
    if adj_factor <= 0.0 {
        return prior.clone();
    }

    optimized
        .iter()
        .map(|(code, &target)| {
            let prior_weight = prior.get(code).copied().unwrap_or(0.0);
            let per_unit_value = per_unit_values.get(code).copied().unwrap_or(0.0);
            if per_unit_value <= 0.0 {
                return (code.clone(), prior_weight);
            }
            let min_unit = min_units.get(code).copied().unwrap_or(1.0);

            let trade_units = adj_factor * (target - prior_weight) / per_unit_value;
            let rounded = round_trade(trade_units, min_unit);
            (code.clone(), prior_weight + rounded * per_unit_value)
        })
        .collect()
}
