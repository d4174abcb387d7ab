//! lotsizer: position discretization and greedy rebalancing engine.
//!
//! Turns a continuous per-instrument "ideal" portfolio weight into a
//! concrete, tradable order while respecting discreteness of tradable
//! units, per-instrument trading constraints, transaction costs, and a
//! speed-control policy that limits how much of a rebalance executes in
//! one cycle.
//!
//! The engine is synchronous and stateless: every cycle consumes a
//! point-in-time snapshot (ideal weights, covariance, costs, minimum
//! units, constraints, prior positions) and produces a discretized
//! position set plus a JSONL audit trail. Continuity across cycles flows
//! only through the previous positions supplied by the caller. A failed
//! cycle falls back to the prior positions with zero trades, never a
//! partial or malformed order.

pub mod audit;
pub mod buffering;
pub mod config;
pub mod constraints;
pub mod covariance;
pub mod error;
pub mod optimizer;
pub mod orchestrator;
pub mod rounding;
pub mod snapshot;
pub mod speed_control;
pub mod trades;
pub mod types;
pub mod universe;
