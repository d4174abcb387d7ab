//! Per-instrument trading constraints.
//!
//! Supplied by an external collaborator per cycle; the optimizer consumes
//! them as weight-space bounds on every candidate it evaluates.

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::types::InstrumentCode;

/// One instrument's trading constraints for the cycle.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Constraint {
    /// Position may only move toward zero this cycle.
    pub reduce_only: bool,
    /// Position is frozen at its current value this cycle.
    pub no_trade: bool,
    /// Maximum absolute weight.
    pub position_limit: f64,
}

impl Default for Constraint {
    fn default() -> Self {
        Self {
            reduce_only: false,
            no_trade: false,
            position_limit: f64::INFINITY,
        }
    }
}

/// Constraints for the whole universe, keyed by instrument.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    map: FxHashMap<InstrumentCode, Constraint>,
}

impl ConstraintSet {
    pub fn new(map: FxHashMap<InstrumentCode, Constraint>) -> Self {
        Self { map }
    }

    pub fn insert(&mut self, code: InstrumentCode, constraint: Constraint) {
        self.map.insert(code, constraint);
    }

    /// Constraints for one instrument; unconstrained when absent.
    pub fn get(&self, code: &InstrumentCode) -> Constraint {
        self.map.get(code).copied().unwrap_or_default()
    }

    /// Weight-space interval `[lower, upper]` admissible for one instrument.
    ///
    /// A no_trade pin wins over the position limit: the output must equal
    /// the prior exactly even if the prior itself violates the limit.
    /// Reduce-only bounds the weight between zero and the prior, then
    /// intersects with the limit band.
    pub fn weight_bounds(&self, code: &InstrumentCode, prior_weight: f64) -> (f64, f64) {
        let c = self.get(code);
        if c.no_trade {
            return (prior_weight, prior_weight);
        }

        let limit = c.position_limit.max(0.0);
        if c.reduce_only {
            if prior_weight >= 0.0 {
                (0.0, prior_weight.min(limit))
            } else {
                (prior_weight.max(-limit), 0.0)
            }
        } else {
            (-limit, limit)
        }
    }
}
