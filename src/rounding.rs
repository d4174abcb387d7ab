//! Discretization policies: map continuous positions to tradable units.
//!
//! Two discretizing policies exist: whole-contract futures round to the
//! nearest integer, spread-bet style instruments snap to the nearest
//! multiple of a per-instrument minimum bet. Both use round-half-to-even
//! tie-breaking so repeated cycles don't drift in one direction, and both
//! round non-finite candidates to a flat position.

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::types::{InstrumentCode, PositionMap};

/// Tolerance used when comparing discretized values.
const TOL: f64 = 1e-9;

/// How candidate positions are snapped to tradable units.
///
/// A closed set of variants resolved once from configuration; there is no
/// runtime registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingPolicy {
    /// Identity. Used when discretization is disabled globally.
    NoRounding,
    /// Whole-contract futures: nearest integer, ties to even.
    WholeUnit,
    /// Minimum-bet instruments: nearest multiple of `min_unit`, then
    /// clipped to 2 decimal places to suppress floating noise.
    MinimumIncrement,
}

/// Resolve the configured policy name.
///
/// Returns `NoRounding` when discretization is disabled, otherwise maps the
/// name through a fixed registry. Unknown names fail here, at selection
/// time, never mid-cycle.
pub fn select_rounding_policy(strategy: &str, enabled: bool) -> Result<RoundingPolicy> {
    if !enabled {
        return Ok(RoundingPolicy::NoRounding);
    }
    match strategy {
        "whole_unit" => Ok(RoundingPolicy::WholeUnit),
        "minimum_increment" => Ok(RoundingPolicy::MinimumIncrement),
        "none" => Ok(RoundingPolicy::NoRounding),
        other => Err(Error::Config(format!(
            "unknown rounding strategy '{other}' (expected whole_unit, minimum_increment or none)"
        ))),
    }
}

/// Round to the nearest integer with ties to even (2.5 -> 2, 3.5 -> 4).
pub fn round_half_even(x: f64) -> f64 {
    let rounded = x.round();
    if (x - x.trunc()).abs() == 0.5 && rounded % 2.0 != 0.0 {
        rounded - x.signum()
    } else {
        rounded
    }
}

/// Clip to 2 decimal places.
pub(crate) fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Snap a value to the nearest multiple of `min_unit`.
///
/// `min_unit` must be positive; the snapshot loader enforces this before
/// any value reaches here.
pub fn snap_to_unit(x: f64, min_unit: f64) -> f64 {
    round2(round_half_even(x / min_unit) * min_unit)
}

impl RoundingPolicy {
    /// Discretize a single candidate position.
    ///
    /// Non-finite candidates discretize to flat under both discretizing
    /// variants.
    pub fn round_position(&self, x: f64, min_unit: f64) -> f64 {
        match self {
            RoundingPolicy::NoRounding => x,
            RoundingPolicy::WholeUnit => {
                if !x.is_finite() {
                    0.0
                } else {
                    round_half_even(x)
                }
            }
            RoundingPolicy::MinimumIncrement => {
                if !x.is_finite() {
                    0.0
                } else {
                    snap_to_unit(x, min_unit)
                }
            }
        }
    }

    /// Discretize a whole series with one instrument's minimum unit.
    pub fn round_series(&self, series: &[f64], min_unit: f64) -> Vec<f64> {
        series
            .iter()
            .map(|&x| self.round_position(x, min_unit))
            .collect()
    }

    /// Discretize one candidate position per instrument.
    ///
    /// The prior position is accepted for parity with the trade-level
    /// damper but does not influence the snap: nearest-multiple rounding is
    /// prior-independent by policy. Instruments without a minimum unit fall
    /// back to whole units.
    pub fn round_positions(
        &self,
        candidates: &PositionMap,
        previous: &PositionMap,
        min_units: &FxHashMap<InstrumentCode, f64>,
    ) -> PositionMap {
        let _ = previous;
        candidates
            .iter()
            .map(|(code, &x)| {
                let min_unit = min_units.get(code).copied().unwrap_or(1.0);
                (code.clone(), self.round_position(x, min_unit))
            })
            .collect()
    }
}

/// Check that one committed position step is a whole number of units.
///
/// Unchanged and non-finite values pass; a finite change smaller than
/// `min_unit` fails.
pub fn validate_step(prev: f64, next: f64, min_unit: f64) -> bool {
    if !prev.is_finite() || !next.is_finite() {
        return true;
    }
    let diff = (next - prev).abs();
    diff < TOL || diff >= min_unit - TOL
}

/// Check every consecutive step of a discretized series.
pub fn validate_series(series: &[f64], min_unit: f64) -> bool {
    series
        .windows(2)
        .all(|w| validate_step(w[0], w[1], min_unit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_series(got: &[f64], expected: &[f64]) {
        assert_eq!(got.len(), expected.len());
        for (g, e) in got.iter().zip(expected) {
            assert!((g - e).abs() < 1e-9, "got={g} expected={e}");
        }
    }

    #[test]
    fn ties_round_to_even() {
        assert_eq!(round_half_even(2.5), 2.0);
        assert_eq!(round_half_even(3.5), 4.0);
        assert_eq!(round_half_even(-2.5), -2.0);
        assert_eq!(round_half_even(-3.5), -4.0);
        assert_eq!(round_half_even(0.5), 0.0);
        assert_eq!(round_half_even(1.2), 1.0);
    }

    #[test]
    fn whole_unit_nan_rounds_to_flat() {
        let policy = RoundingPolicy::WholeUnit;
        assert_eq!(policy.round_position(f64::NAN, 1.0), 0.0);
        assert_eq!(policy.round_position(f64::INFINITY, 1.0), 0.0);
    }

    #[test]
    fn minimum_increment_nan_rounds_to_flat() {
        let policy = RoundingPolicy::MinimumIncrement;
        assert_eq!(policy.round_position(f64::NAN, 0.5), 0.0);
    }

    #[test]
    fn no_rounding_is_identity() {
        let policy = RoundingPolicy::NoRounding;
        assert_eq!(policy.round_position(1.2345, 1.0), 1.2345);
    }

    #[test]
    fn snap_series_whole_units() {
        let policy = RoundingPolicy::MinimumIncrement;
        assert_series(&policy.round_series(&[0.0, 0.4, 0.89], 1.0), &[0.0, 0.0, 1.0]);
        assert_series(&policy.round_series(&[0.0, 0.6, 1.2], 1.0), &[0.0, 1.0, 1.0]);
    }

    #[test]
    fn snap_series_half_units() {
        let policy = RoundingPolicy::MinimumIncrement;
        assert_series(&policy.round_series(&[0.0, 0.5, 0.75], 0.5), &[0.0, 0.5, 1.0]);
    }

    #[test]
    fn snap_series_fractional_units() {
        let policy = RoundingPolicy::MinimumIncrement;
        assert_series(
            &policy.round_series(&[0.11, 0.6, 1.31], 0.2),
            &[0.2, 0.6, 1.4],
        );
    }

    #[test]
    fn snap_series_coarse_units() {
        let policy = RoundingPolicy::MinimumIncrement;
        assert_series(
            &policy.round_series(&[8.0, -5.4, 25.01], 10.0),
            &[10.0, -10.0, 30.0],
        );
    }

    #[test]
    fn snap_is_idempotent() {
        let policy = RoundingPolicy::MinimumIncrement;
        for &min_unit in &[0.1, 0.2, 0.5, 1.0, 2.0, 10.0] {
            for &x in &[-7.3, -0.49, 0.0, 0.26, 1.999, 123.45] {
                let once = policy.round_position(x, min_unit);
                let twice = policy.round_position(once, min_unit);
                assert!((once - twice).abs() < 1e-9, "min_unit={min_unit} x={x}");
            }
        }
    }

    #[test]
    fn whole_unit_round_positions_defaults_nan_to_flat() {
        let policy = RoundingPolicy::WholeUnit;
        let candidates: PositionMap = [
            (InstrumentCode::new("SP500"), 2.5),
            (InstrumentCode::new("GOLD"), f64::NAN),
        ]
        .into_iter()
        .collect();
        let previous = PositionMap::default();
        let min_units: FxHashMap<InstrumentCode, f64> = FxHashMap::default();

        let rounded = policy.round_positions(&candidates, &previous, &min_units);
        assert_eq!(rounded[&InstrumentCode::new("SP500")], 2.0);
        assert_eq!(rounded[&InstrumentCode::new("GOLD")], 0.0);
    }

    #[test]
    fn round_positions_uses_per_instrument_units() {
        let policy = RoundingPolicy::MinimumIncrement;
        let candidates: PositionMap = [
            (InstrumentCode::new("GOLD_fsb"), 0.74),
            (InstrumentCode::new("DAX_fsb"), 0.74),
        ]
        .into_iter()
        .collect();
        let min_units: FxHashMap<InstrumentCode, f64> = [
            (InstrumentCode::new("GOLD_fsb"), 0.5),
            (InstrumentCode::new("DAX_fsb"), 0.2),
        ]
        .into_iter()
        .collect();

        let rounded = policy.round_positions(&candidates, &PositionMap::default(), &min_units);
        assert!((rounded[&InstrumentCode::new("GOLD_fsb")] - 0.5).abs() < 1e-9);
        assert!((rounded[&InstrumentCode::new("DAX_fsb")] - 0.8).abs() < 1e-9);
    }

    #[test]
    fn validate_series_accepts_unit_steps() {
        assert!(validate_series(&[0.0, 1.0, 2.0], 1.0));
        assert!(validate_series(&[0.0, 0.5, 0.5, 1.5], 0.5));
    }

    #[test]
    fn validate_series_rejects_sub_unit_steps() {
        assert!(!validate_series(&[0.0, 0.05, 0.14], 0.1));
    }

    #[test]
    fn validate_series_skips_undefined_values() {
        assert!(validate_series(&[0.0, f64::NAN, 0.05], 0.1));
    }

    #[test]
    fn validate_rounded_output() {
        let policy = RoundingPolicy::MinimumIncrement;
        for &min_unit in &[0.1, 0.2, 0.5, 1.0, 10.0] {
            let rounded = policy.round_series(&[0.11, -3.7, 8.0, 25.01, 0.0], min_unit);
            assert!(validate_series(&rounded, min_unit), "min_unit={min_unit}");
        }
    }

    #[test]
    fn policy_selection() {
        assert_eq!(
            select_rounding_policy("whole_unit", true).unwrap(),
            RoundingPolicy::WholeUnit
        );
        assert_eq!(
            select_rounding_policy("minimum_increment", true).unwrap(),
            RoundingPolicy::MinimumIncrement
        );
        assert_eq!(
            select_rounding_policy("whole_unit", false).unwrap(),
            RoundingPolicy::NoRounding
        );
        assert!(select_rounding_policy("fancy", true).is_err());
    }
}
