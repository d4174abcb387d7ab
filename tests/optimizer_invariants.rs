//! Property-based tests for optimizer constraint contracts.
//!
//! The constraints are hard guarantees on the committed positions, so they
//! are verified across randomly generated ideal weights and priors, not
//! just on hand-picked fixtures.

use lotsizer::config::Config;
use lotsizer::optimizer::GreedyOptimizer;
use lotsizer::rounding::RoundingPolicy;
use lotsizer::snapshot::Snapshot;
use lotsizer::speed_control::SpeedControl;
use lotsizer::types::InstrumentCode;
use lotsizer::universe::{CycleInputs, build_universe};
use proptest::prelude::*;

fn inputs(ideal: f64, prior: i64, flags: &str) -> CycleInputs {
    let json = format!(
        r#"{{
        "date": "2026-08-07",
        "strategy": "prop",
        "instruments": {{
            "ALPHA": {{
                "ideal_weight": {ideal},
                "per_unit_value": 0.02,
                "cost": 0.0001,
                "min_unit": 1.0,
                "previous_position": {prior}{flags}
            }},
            "BETA": {{
                "ideal_weight": 0.05,
                "per_unit_value": 0.01,
                "cost": 0.0001,
                "min_unit": 1.0,
                "previous_position": 0
            }}
        }},
        "covariance": {{
            "instruments": ["ALPHA", "BETA"],
            "values": [[0.0004, 0.0001], [0.0001, 0.0002]]
        }}
    }}"#
    );
    let snapshot = Snapshot::from_json(&json).unwrap();
    build_universe(&snapshot, &Config::default()).unwrap().0
}

fn optimise(inputs: &CycleInputs, buffer: f64) -> lotsizer::types::PositionMap {
    let speed_control = SpeedControl {
        tracking_error_buffer: buffer,
        max_adjustment_fraction: 1.0,
    };
    GreedyOptimizer::new(inputs, RoundingPolicy::WholeUnit, speed_control)
        .optimise_positions()
        .unwrap()
        .positions
}

fn alpha() -> InstrumentCode {
    InstrumentCode::new("ALPHA")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// A no-trade instrument never moves, whatever upstream wants.
    #[test]
    fn no_trade_never_moves(
        ideal in -0.5..0.5f64,
        prior in -10i64..10i64,
    ) {
        let inputs = inputs(ideal, prior, ",\n\"no_trade\": true");
        let positions = optimise(&inputs, 0.0);
        prop_assert_eq!(positions[&alpha()], prior as f64);
    }

    /// A reduce-only instrument never grows and never flips sign.
    #[test]
    fn reduce_only_shrinks_toward_zero(
        ideal in -0.5..0.5f64,
        prior in -10i64..10i64,
    ) {
        let inputs = inputs(ideal, prior, ",\n\"reduce_only\": true");
        let positions = optimise(&inputs, 0.0);
        let position = positions[&alpha()];
        prop_assert!(position.abs() <= prior.abs() as f64 + 1e-9);
        prop_assert!(position * prior as f64 >= 0.0);
    }

    /// The position limit caps the committed weight.
    #[test]
    fn position_limit_holds(
        ideal in -0.5..0.5f64,
        prior in -5i64..5i64,
    ) {
        let inputs = inputs(ideal, prior, ",\n\"position_limit\": 0.1");
        let positions = optimise(&inputs, 0.0);
        let weight = positions[&alpha()] * 0.02;
        prop_assert!(weight.abs() <= 0.1 + 1e-9, "weight={}", weight);
    }

    /// Inside the tracking-error buffer nothing trades at all.
    #[test]
    fn within_buffer_means_zero_turnover(
        ideal in -0.5..0.5f64,
        prior in -10i64..10i64,
    ) {
        let inputs = inputs(ideal, prior, "");
        // Buffer far above any achievable tracking error for these scales.
        let positions = optimise(&inputs, 100.0);
        prop_assert_eq!(positions[&alpha()], prior as f64);
        prop_assert_eq!(positions[&InstrumentCode::new("BETA")], 0.0);
    }

    /// Committed positions always sit on the whole-unit grid.
    #[test]
    fn committed_positions_are_whole_units(
        ideal in -0.5..0.5f64,
        prior in -10i64..10i64,
    ) {
        let inputs = inputs(ideal, prior, "");
        let positions = optimise(&inputs, 0.0);
        for (_, position) in positions.iter() {
            prop_assert_eq!(position.fract(), 0.0);
        }
    }
}
