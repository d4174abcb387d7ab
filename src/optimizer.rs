//! Greedy position optimizer: one cycle's ideal weights in, one
//! discretized position set out.
//!
//! The weight search is a greedy coordinate descent over continuous weight
//! space: each step moves the single instrument whose constrained 1-D
//! optimum most improves the objective, where the objective is the
//! quadratic tracking error against the ideal weights plus a linear cost
//! penalty on turnover away from the prior. Constraint bounds are applied
//! to every candidate, so no intermediate state is ever infeasible.
//!
//! Failures here are recoverable: the orchestrator falls back to the prior
//! positions rather than emitting a possibly-wrong order.

use serde::Serialize;

use crate::rounding::{RoundingPolicy, validate_step};
use crate::speed_control::{self, SpeedControl};
use crate::types::{InstrumentCode, PositionMap, WeightMap};
use crate::universe::CycleInputs;

/// Stop when the best available objective improvement falls below this.
const CONVERGENCE_TOL: f64 = 1e-12;

/// Moves smaller than this are treated as no move at all.
const STEP_TOL: f64 = 1e-14;

/// Recoverable failures of one optimization run.
#[derive(Debug, thiserror::Error)]
pub enum OptimizationError {
    #[error("degenerate covariance matrix: {0}")]
    SingularCovariance(String),

    #[error("infeasible constraints for {instrument}: lower {lower} > upper {upper}")]
    InfeasibleConstraints {
        instrument: InstrumentCode,
        lower: f64,
        upper: f64,
    },

    #[error("numeric failure during weight search: {0}")]
    NumericFailure(String),

    #[error(
        "discretized position for {instrument} stepped {from} -> {to}, \
         not a whole number of {min_unit} units"
    )]
    UnitViolation {
        instrument: InstrumentCode,
        from: f64,
        to: f64,
        min_unit: f64,
    },
}

/// Per-instrument audit record of one optimization run.
#[derive(Debug, Clone, Serialize)]
pub struct OptimisedPosition {
    pub instrument: InstrumentCode,
    pub start_weight: f64,
    pub minimum_weight: f64,
    pub maximum_weight: f64,
    /// The unconstrained ideal weight from upstream.
    pub optimum_weight: f64,
    /// The searched, damped weight actually committed.
    pub optimised_weight: f64,
    pub optimised_position: f64,
    pub min_unit: f64,
    pub position_limit: Option<f64>,
    pub reduce_only: bool,
    pub no_trade: bool,
    pub reference_price: Option<f64>,
    pub reference_contract: Option<String>,
}

/// Result of one optimization run.
#[derive(Debug, Clone)]
pub struct OptimisedPositions {
    pub positions: PositionMap,
    pub records: Vec<OptimisedPosition>,
}

/// Discretize candidate positions and enforce the commit-time contracts.
///
/// The constraint guarantees hold exactly on the committed positions, not
/// just on the continuous values that produced them, and every committed
/// step must be a whole number of units when discretization is on.
pub(crate) fn commit_positions(
    inputs: &CycleInputs,
    policy: RoundingPolicy,
    candidates: &PositionMap,
) -> Result<PositionMap, OptimizationError> {
    let mut positions =
        policy.round_positions(candidates, &inputs.previous_positions, &inputs.min_units);

    for code in &inputs.instruments {
        let previous = inputs.previous_positions[code];
        let constraint = inputs.constraints.get(code);
        let Some(position) = positions.get_mut(code) else {
            continue;
        };
        if constraint.no_trade {
            *position = previous;
            continue;
        }
        if constraint.reduce_only {
            *position = if previous >= 0.0 {
                position.clamp(0.0, previous)
            } else {
                position.clamp(previous, 0.0)
            };
        }
        if constraint.position_limit.is_finite() {
            // Rounding may overshoot the limit by up to half a unit; cap at
            // the largest on-grid position inside it.
            let per_unit_value = inputs.per_unit_values[code];
            let raw_limit = constraint.position_limit.max(0.0) / per_unit_value;
            let unit_limit = if policy == RoundingPolicy::NoRounding {
                raw_limit
            } else {
                let min_unit = inputs.min_units[code];
                (raw_limit / min_unit + 1e-9).floor() * min_unit
            };
            if position.abs() > unit_limit {
                *position = position.signum() * unit_limit;
            }
        }
    }

    if policy != RoundingPolicy::NoRounding {
        for code in &inputs.instruments {
            let from = inputs.previous_positions[code];
            let to = positions[code];
            let min_unit = inputs.min_units[code];
            if !validate_step(from, to, min_unit) {
                return Err(OptimizationError::UnitViolation {
                    instrument: code.clone(),
                    from,
                    to,
                    min_unit,
                });
            }
        }
    }

    Ok(positions)
}

/// One-shot optimizer over a cycle's inputs.
pub struct GreedyOptimizer<'a> {
    inputs: &'a CycleInputs,
    policy: RoundingPolicy,
    speed_control: SpeedControl,
}

struct SearchOutcome {
    start: Vec<f64>,
    weights: Vec<f64>,
    bounds: Vec<(f64, f64)>,
}

impl<'a> GreedyOptimizer<'a> {
    pub fn new(inputs: &'a CycleInputs, policy: RoundingPolicy, speed_control: SpeedControl) -> Self {
        Self {
            inputs,
            policy,
            speed_control,
        }
    }

    /// Produce the cycle's discretized positions plus audit records.
    pub fn optimise_positions(&self) -> Result<OptimisedPositions, OptimizationError> {
        let inputs = self.inputs;
        let codes = &inputs.instruments;

        let search = self.optimise_weights()?;

        let searched: WeightMap = codes
            .iter()
            .cloned()
            .zip(search.weights.iter().copied())
            .collect();

        let prior_weights = inputs.prior_weights();
        let damped = speed_control::dampen(
            &searched,
            inputs.has_prior.then_some(&prior_weights),
            &inputs.per_unit_values,
            &inputs.min_units,
            &inputs.covariance,
            &self.speed_control,
        );

        // Weight space -> raw units, then snap to the tradable grid.
        let candidates: PositionMap = codes
            .iter()
            .map(|code| {
                let per_unit_value = inputs.per_unit_values[code];
                (code.clone(), damped[code] / per_unit_value)
            })
            .collect();
        let positions = commit_positions(inputs, self.policy, &candidates)?;

        let records = codes
            .iter()
            .enumerate()
            .map(|(i, code)| {
                let constraint = inputs.constraints.get(code);
                let reference = inputs.reference.get(code);
                OptimisedPosition {
                    instrument: code.clone(),
                    start_weight: search.start[i],
                    minimum_weight: search.bounds[i].0,
                    maximum_weight: search.bounds[i].1,
                    optimum_weight: inputs.ideal_weights[code],
                    optimised_weight: damped[code],
                    optimised_position: positions[code],
                    min_unit: inputs.min_units[code],
                    position_limit: constraint
                        .position_limit
                        .is_finite()
                        .then_some(constraint.position_limit),
                    reduce_only: constraint.reduce_only,
                    no_trade: constraint.no_trade,
                    reference_price: reference.and_then(|r| r.price),
                    reference_contract: reference.and_then(|r| r.contract.clone()),
                }
            })
            .collect();

        Ok(OptimisedPositions { positions, records })
    }

    /// Constrained weight search. Weight space is continuous here;
    /// discretization happens afterwards.
    fn optimise_weights(&self) -> Result<SearchOutcome, OptimizationError> {
        let inputs = self.inputs;
        let codes = &inputs.instruments;
        let cov = &inputs.covariance;
        let n = codes.len();

        if n == 0 {
            return Ok(SearchOutcome {
                start: Vec::new(),
                weights: Vec::new(),
                bounds: Vec::new(),
            });
        }

        for (i, code) in codes.iter().enumerate() {
            let variance = cov.at(i, i);
            if !(variance.is_finite() && variance > 0.0) {
                return Err(OptimizationError::SingularCovariance(format!(
                    "non-positive variance {variance} for {code}"
                )));
            }
        }

        let ideal: Vec<f64> = codes.iter().map(|c| inputs.ideal_weights[c]).collect();
        let prior: Vec<f64> = codes.iter().map(|c| inputs.prior_weight(c)).collect();
        let costs: Vec<f64> = codes.iter().map(|c| inputs.costs[c]).collect();

        let mut bounds = Vec::with_capacity(n);
        for (code, &prior_weight) in codes.iter().zip(&prior) {
            let (lower, upper) = inputs.constraints.weight_bounds(code, prior_weight);
            if lower > upper {
                return Err(OptimizationError::InfeasibleConstraints {
                    instrument: code.clone(),
                    lower,
                    upper,
                });
            }
            bounds.push((lower, upper));
        }

        // Turnover is priced against the prior portfolio; on a cold start
        // the whole position is turnover.
        let trade_ref: Vec<f64> = if inputs.has_prior {
            prior.clone()
        } else {
            vec![0.0; n]
        };

        let seed: &[f64] = if inputs.has_prior { &prior } else { &ideal };
        let start: Vec<f64> = seed
            .iter()
            .zip(&bounds)
            .map(|(&x, &(lower, upper))| x.clamp(lower, upper))
            .collect();

        let mut weights = start.clone();
        // sigma_d tracks S (w - ideal), updated incrementally per move.
        let mut sigma_d: Vec<f64> = (0..n)
            .map(|j| (0..n).map(|k| cov.at(j, k) * (weights[k] - ideal[k])).sum())
            .collect();

        let max_steps = 200 * n;
        for _ in 0..max_steps {
            let mut best: Option<(usize, f64, f64)> = None;

            for i in 0..n {
                let variance = cov.at(i, i);
                let quad_min = weights[i] - sigma_d[i] / variance;
                let reference = trade_ref[i];
                let cost = costs[i];

                // 1-D minimum of the quadratic-plus-L1 objective, then clip.
                let candidate = if 2.0 * variance * (quad_min - reference).abs() <= cost {
                    reference
                } else {
                    quad_min - (quad_min - reference).signum() * cost / (2.0 * variance)
                };
                let candidate = candidate.clamp(bounds[i].0, bounds[i].1);

                let delta = candidate - weights[i];
                if delta.abs() < STEP_TOL {
                    continue;
                }

                let quad_change = 2.0 * delta * sigma_d[i] + delta * delta * variance;
                let cost_change =
                    cost * ((candidate - reference).abs() - (weights[i] - reference).abs());
                let improvement = -(quad_change + cost_change);
                if !improvement.is_finite() {
                    return Err(OptimizationError::NumericFailure(format!(
                        "non-finite objective change for {}",
                        codes[i]
                    )));
                }

                let best_so_far = best.map(|(_, _, imp)| imp).unwrap_or(CONVERGENCE_TOL);
                if improvement > best_so_far {
                    best = Some((i, candidate, improvement));
                }
            }

            let Some((i, value, _)) = best else { break };
            let delta = value - weights[i];
            weights[i] = value;
            for (j, entry) in sigma_d.iter_mut().enumerate() {
                *entry += delta * cov.at(j, i);
            }
        }

        if weights.iter().any(|w| !w.is_finite()) {
            return Err(OptimizationError::NumericFailure(
                "weight search produced a non-finite weight".into(),
            ));
        }

        Ok(SearchOutcome {
            start,
            weights,
            bounds,
        })
    }
}
