//! Universe assembly: turn a raw snapshot into validated cycle inputs.
//!
//! An instrument lacking covariance, cost, per-unit value or minimum-unit
//! data is excluded from the cycle and logged, not defaulted to zero and
//! not fatal. Excluded instruments keep their prior positions downstream.

use chrono::NaiveDate;
use log::warn;
use rustc_hash::FxHashMap;

use crate::config::Config;
use crate::constraints::{Constraint, ConstraintSet};
use crate::covariance::CovarianceMatrix;
use crate::error::Result;
use crate::snapshot::Snapshot;
use crate::types::{InstrumentCode, PositionMap, WeightMap};

/// Reference data carried through to the audit record and order tags.
#[derive(Debug, Clone, Default)]
pub struct Reference {
    pub price: Option<f64>,
    pub contract: Option<String>,
}

/// Everything the engine needs for one cycle, immutable once built.
#[derive(Debug, Clone)]
pub struct CycleInputs {
    pub date: NaiveDate,
    pub strategy: String,
    /// Universe in deterministic (sorted) order; every map below is keyed
    /// by exactly these codes, and the covariance rows follow this order.
    pub instruments: Vec<InstrumentCode>,
    pub ideal_weights: WeightMap,
    pub per_unit_values: FxHashMap<InstrumentCode, f64>,
    pub costs: FxHashMap<InstrumentCode, f64>,
    pub min_units: FxHashMap<InstrumentCode, f64>,
    pub constraints: ConstraintSet,
    /// Prior committed positions, zero-filled for universe members.
    pub previous_positions: PositionMap,
    /// False on a cold start: no instrument carried a prior position.
    pub has_prior: bool,
    /// Currently held live positions; falls back to the prior when the
    /// snapshot carries no live value.
    pub live_positions: PositionMap,
    pub average_positions: PositionMap,
    pub reference: FxHashMap<InstrumentCode, Reference>,
    pub covariance: CovarianceMatrix,
}

impl CycleInputs {
    pub fn prior_weight(&self, code: &InstrumentCode) -> f64 {
        let position = self.previous_positions.get(code).copied().unwrap_or(0.0);
        let per_unit_value = self.per_unit_values.get(code).copied().unwrap_or(0.0);
        position * per_unit_value
    }

    /// Prior positions expressed in weight space.
    pub fn prior_weights(&self) -> WeightMap {
        self.instruments
            .iter()
            .map(|code| (code.clone(), self.prior_weight(code)))
            .collect()
    }
}

/// Why an instrument was left out of the cycle.
#[derive(Debug, Clone)]
pub struct Exclusion {
    pub instrument: InstrumentCode,
    pub reason: &'static str,
}

/// Build the cycle universe, excluding instruments with missing data.
pub fn build_universe(
    snapshot: &Snapshot,
    config: &Config,
) -> Result<(CycleInputs, Vec<Exclusion>)> {
    let full_covariance = snapshot.covariance_matrix()?;

    let mut codes: Vec<InstrumentCode> = snapshot.instruments.keys().cloned().collect();
    codes.sort();

    let mut instruments = Vec::with_capacity(codes.len());
    let mut exclusions = Vec::new();
    let mut ideal_weights = WeightMap::default();
    let mut per_unit_values = FxHashMap::default();
    let mut costs = FxHashMap::default();
    let mut min_units = FxHashMap::default();
    let mut constraints = ConstraintSet::default();
    let mut previous_positions = PositionMap::default();
    let mut live_positions = PositionMap::default();
    let mut average_positions = PositionMap::default();
    let mut reference = FxHashMap::default();
    let mut has_prior = false;

    for code in codes {
        let entry = &snapshot.instruments[&code];

        let min_unit = config
            .min_unit_override(code.as_str())
            .or(entry.min_unit);

        let reason = if !full_covariance.contains(&code) {
            Some("no covariance")
        } else if entry.per_unit_value.is_none() {
            Some("no per-unit value")
        } else if entry.cost.is_none() {
            Some("no cost")
        } else if min_unit.is_none() {
            Some("no minimum unit")
        } else {
            None
        };

        if let Some(reason) = reason {
            warn!("excluding {code} from {} cycle: {reason}", snapshot.date);
            exclusions.push(Exclusion {
                instrument: code,
                reason,
            });
            continue;
        }

        let per_unit_value = entry.per_unit_value.unwrap_or(0.0);
        ideal_weights.insert(code.clone(), entry.ideal_weight);
        per_unit_values.insert(code.clone(), per_unit_value);
        costs.insert(code.clone(), entry.cost.unwrap_or(0.0));
        min_units.insert(code.clone(), min_unit.unwrap_or(1.0));
        constraints.insert(
            code.clone(),
            Constraint {
                reduce_only: entry.reduce_only,
                no_trade: entry.no_trade,
                position_limit: entry.position_limit.unwrap_or(f64::INFINITY),
            },
        );

        has_prior |= entry.previous_position.is_some();
        let previous = entry.previous_position.unwrap_or(0.0);
        previous_positions.insert(code.clone(), previous);
        live_positions.insert(
            code.clone(),
            entry.live_position.or(entry.previous_position).unwrap_or(0.0),
        );
        if let Some(average) = entry.average_position {
            average_positions.insert(code.clone(), average);
        }
        reference.insert(
            code.clone(),
            Reference {
                price: entry.reference_price,
                contract: entry.reference_contract.clone(),
            },
        );
        instruments.push(code);
    }

    let covariance = full_covariance.subset(&instruments)?;

    Ok((
        CycleInputs {
            date: snapshot.date,
            strategy: snapshot.strategy.clone(),
            instruments,
            ideal_weights,
            per_unit_values,
            costs,
            min_units,
            constraints,
            previous_positions,
            has_prior,
            live_positions,
            average_positions,
            reference,
            covariance,
        },
        exclusions,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        Snapshot::from_json(
            r#"{
            "date": "2026-08-07",
            "strategy": "macro_trend",
            "instruments": {
                "SP500": {
                    "ideal_weight": 0.25,
                    "per_unit_value": 0.031,
                    "cost": 0.0002,
                    "min_unit": 1.0,
                    "previous_position": 8.0
                },
                "GOLD_fsb": {
                    "ideal_weight": -0.10,
                    "per_unit_value": 0.012,
                    "cost": 0.0005,
                    "min_unit": 0.5
                },
                "COPPER": {
                    "ideal_weight": 0.05,
                    "per_unit_value": 0.02,
                    "min_unit": 1.0
                }
            },
            "covariance": {
                "instruments": ["SP500", "GOLD_fsb", "COPPER"],
                "values": [
                    [0.0004, 0.0001, 0.0],
                    [0.0001, 0.0009, 0.0],
                    [0.0, 0.0, 0.0006]
                ]
            }
        }"#,
        )
        .unwrap()
    }

    #[test]
    fn missing_cost_is_excluded_not_fatal() {
        let (inputs, exclusions) = build_universe(&snapshot(), &Config::default()).unwrap();
        assert_eq!(
            inputs.instruments,
            vec![InstrumentCode::new("GOLD_fsb"), InstrumentCode::new("SP500")]
        );
        assert_eq!(exclusions.len(), 1);
        assert_eq!(exclusions[0].instrument, InstrumentCode::new("COPPER"));
        assert_eq!(exclusions[0].reason, "no cost");
    }

    #[test]
    fn covariance_follows_universe_order() {
        let (inputs, _) = build_universe(&snapshot(), &Config::default()).unwrap();
        assert_eq!(inputs.covariance.instruments(), inputs.instruments.as_slice());
        // GOLD_fsb first after sorting
        assert_eq!(inputs.covariance.at(0, 0), 0.0009);
        assert_eq!(inputs.covariance.at(1, 1), 0.0004);
    }

    #[test]
    fn missing_covariance_label_is_excluded() {
        let raw = r#"{
            "date": "2026-08-07",
            "strategy": "s",
            "instruments": {
                "SP500": {
                    "ideal_weight": 0.25,
                    "per_unit_value": 0.031,
                    "cost": 0.0002,
                    "min_unit": 1.0
                },
                "US10": {
                    "ideal_weight": 0.10,
                    "per_unit_value": 0.02,
                    "cost": 0.0001,
                    "min_unit": 1.0
                }
            },
            "covariance": { "instruments": ["SP500"], "values": [[0.0004]] }
        }"#;
        let snapshot = Snapshot::from_json(raw).unwrap();
        let (inputs, exclusions) = build_universe(&snapshot, &Config::default()).unwrap();
        assert_eq!(inputs.instruments, vec![InstrumentCode::new("SP500")]);
        assert_eq!(exclusions[0].reason, "no covariance");
    }

    #[test]
    fn min_unit_override_applies() {
        let mut config = Config::default();
        let mut table = FxHashMap::default();
        table.insert("GOLD_fsb".to_string(), 2.5);
        config.min_unit_overrides.insert("live".to_string(), table);

        let (inputs, _) = build_universe(&snapshot(), &config).unwrap();
        assert_eq!(inputs.min_units[&InstrumentCode::new("GOLD_fsb")], 2.5);
        assert_eq!(inputs.min_units[&InstrumentCode::new("SP500")], 1.0);
    }

    #[test]
    fn prior_flag_and_weights() {
        let (inputs, _) = build_universe(&snapshot(), &Config::default()).unwrap();
        assert!(inputs.has_prior);
        let sp500 = InstrumentCode::new("SP500");
        assert!((inputs.prior_weight(&sp500) - 8.0 * 0.031).abs() < 1e-12);
        // GOLD_fsb had no prior: zero-filled.
        assert_eq!(inputs.previous_positions[&InstrumentCode::new("GOLD_fsb")], 0.0);
    }

    #[test]
    fn cold_start_when_no_priors() {
        let raw = r#"{
            "date": "2026-08-07",
            "strategy": "s",
            "instruments": {
                "SP500": {
                    "ideal_weight": 0.25,
                    "per_unit_value": 0.031,
                    "cost": 0.0002,
                    "min_unit": 1.0
                }
            },
            "covariance": { "instruments": ["SP500"], "values": [[0.0004]] }
        }"#;
        let snapshot = Snapshot::from_json(raw).unwrap();
        let (inputs, _) = build_universe(&snapshot, &Config::default()).unwrap();
        assert!(!inputs.has_prior);
        assert_eq!(inputs.live_positions[&InstrumentCode::new("SP500")], 0.0);
    }
}
