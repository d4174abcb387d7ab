//! Band-based rebalancing: the simpler alternative to the greedy optimizer.
//!
//! Instead of searching weight space, each instrument gets a no-trade band
//! around its ideal position. A prior inside the band stays put; a prior
//! outside moves to the nearer band edge. Turnover control comes entirely
//! from the band width.

use serde::Deserialize;

use crate::optimizer::{OptimisedPosition, OptimisedPositions, OptimizationError, commit_positions};
use crate::rounding::RoundingPolicy;
use crate::types::PositionMap;
use crate::universe::CycleInputs;

/// How the band half-width is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferMethod {
    /// Buffering disabled; the greedy optimizer runs instead.
    #[default]
    None,
    /// Half-width proportional to the ideal position.
    Position,
    /// Half-width proportional to the typical position magnitude.
    Forecast,
}

/// Compute buffered positions for one cycle.
pub fn buffered_positions(
    inputs: &CycleInputs,
    method: BufferMethod,
    buffer_size: f64,
    policy: RoundingPolicy,
) -> Result<OptimisedPositions, OptimizationError> {
    let mut candidates = PositionMap::default();
    let mut band_edges = Vec::with_capacity(inputs.instruments.len());

    for code in &inputs.instruments {
        let per_unit_value = inputs.per_unit_values[code];
        let ideal_position = inputs.ideal_weights[code] / per_unit_value;
        let prior_position = inputs.previous_positions[code];

        let scale = match method {
            BufferMethod::Position => ideal_position.abs(),
            BufferMethod::Forecast => inputs
                .average_positions
                .get(code)
                .map(|p| p.abs())
                .unwrap_or_else(|| ideal_position.abs()),
            BufferMethod::None => 0.0,
        };
        let half_width = buffer_size * scale;
        let lower = ideal_position - half_width;
        let upper = ideal_position + half_width;

        if !(lower.is_finite() && upper.is_finite()) {
            return Err(OptimizationError::NumericFailure(format!(
                "non-finite buffer band for {code}"
            )));
        }

        // Inside the band: stay. Outside: move to the nearer edge.
        let mut target = prior_position.clamp(lower, upper);

        let constraint = inputs.constraints.get(code);
        if constraint.no_trade {
            target = prior_position;
        } else {
            if constraint.reduce_only {
                target = if prior_position >= 0.0 {
                    target.clamp(0.0, prior_position)
                } else {
                    target.clamp(prior_position, 0.0)
                };
            }
            if constraint.position_limit.is_finite() {
                let unit_limit = constraint.position_limit.max(0.0) / per_unit_value;
                target = target.clamp(-unit_limit, unit_limit);
            }
        }

        candidates.insert(code.clone(), target);
        band_edges.push((lower * per_unit_value, upper * per_unit_value));
    }

    let positions = commit_positions(inputs, policy, &candidates)?;

    let records = inputs
        .instruments
        .iter()
        .enumerate()
        .map(|(i, code)| {
            let constraint = inputs.constraints.get(code);
            let reference = inputs.reference.get(code);
            OptimisedPosition {
                instrument: code.clone(),
                start_weight: inputs.prior_weight(code),
                minimum_weight: band_edges[i].0,
                maximum_weight: band_edges[i].1,
                optimum_weight: inputs.ideal_weights[code],
                optimised_weight: candidates[code] * inputs.per_unit_values[code],
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
