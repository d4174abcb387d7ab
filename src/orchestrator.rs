//! Cycle orchestrator: snapshot in, audited positions and trades out.
//!
//! This is the once-per-cycle glue. Optimization failures stop here: the
//! fallback arm returns the previous positions unchanged with zero trades,
//! so a failed cycle can never emit a partial or malformed order.

use log::{error, info};

use crate::audit::{self, AuditLog};
use crate::buffering::{self, BufferMethod};
use crate::config::Config;
use crate::error::Result;
use crate::optimizer::{GreedyOptimizer, OptimisedPositions, OptimizationError};
use crate::snapshot::Snapshot;
use crate::trades::{self, TradeOrder};
use crate::types::PositionMap;
use crate::universe::{self, CycleInputs};

/// Options for one rebalancing run.
pub struct RunOptions {
    pub dry_run: bool,
    pub force: bool,
    pub snapshot_file: String,
}

/// What one cycle produced.
pub struct CycleOutcome {
    /// Final committed positions: optimised for the universe, carried
    /// priors for excluded instruments.
    pub positions: PositionMap,
    pub trades: Vec<TradeOrder>,
    /// True when the optimizer failed and the cycle fell back to priors.
    pub fell_back: bool,
    /// True when the order list was written for order generation.
    pub orders_written: bool,
}

/// Execute a full rebalancing cycle.
pub fn run_cycle(config: &Config, snapshot: &Snapshot, opts: &RunOptions) -> Result<CycleOutcome> {
    let mut audit = AuditLog::open(&config.audit_path())?;
    audit::log_cycle_started(&mut audit, snapshot.date, &snapshot.strategy, &opts.snapshot_file)?;

    let (inputs, exclusions) = universe::build_universe(snapshot, config)?;
    audit::log_universe(&mut audit, &inputs.instruments, &exclusions)?;

    let policy = config.rounding_policy()?;

    let result = if config.buffering.method != BufferMethod::None {
        buffering::buffered_positions(
            &inputs,
            config.buffering.method,
            config.buffering.buffer_size,
            policy,
        )
    } else {
        GreedyOptimizer::new(&inputs, policy, config.speed_control).optimise_positions()
    };

    match result {
        Ok(optimised) => {
            on_success(config, snapshot, &inputs, optimised, opts, &mut audit)
        }
        Err(e) => on_failure(snapshot, e, &mut audit),
    }
}

fn on_success(
    config: &Config,
    snapshot: &Snapshot,
    inputs: &CycleInputs,
    optimised: OptimisedPositions,
    opts: &RunOptions,
    audit: &mut AuditLog,
) -> Result<CycleOutcome> {
    audit::log_optimised(audit, &optimised.records)?;

    // Excluded instruments keep their prior positions and never trade.
    let mut positions = snapshot.previous_positions();
    for (code, position) in &optimised.positions {
        positions.insert(code.clone(), *position);
    }

    display_positions(inputs, &optimised.positions);

    let orders = trades::compute_trades(inputs, &optimised.positions, config.execution.order_type);
    if orders.is_empty() {
        println!("\nNo rebalancing needed — positions already on target.");
        audit.log_simple("no_rebalance_needed")?;
        audit::log_cycle_completed(audit, 0, false)?;
        return Ok(CycleOutcome {
            positions,
            trades: orders,
            fell_back: false,
            orders_written: false,
        });
    }

    print!("\n{}", trades::format_plan(&orders));
    let estimated_cost = trades::estimate_cost(inputs, &orders);
    println!("\nEst. cost: {estimated_cost:.6} (weight-space turnover)");

    if opts.dry_run {
        println!("\n[DRY RUN] No order list written.");
        audit::log_cycle_completed(audit, orders.len(), false)?;
        return Ok(CycleOutcome {
            positions,
            trades: orders,
            fell_back: false,
            orders_written: false,
        });
    }

    if !opts.force {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt("Write order list?")
            .default(false)
            .interact()
            .map_err(|e| crate::error::Error::Aborted(format!("confirmation prompt failed: {e}")))?;

        audit.log("user_confirmed", serde_json::json!({ "approved": confirmed }))?;
        if !confirmed {
            println!("Aborted.");
            return Ok(CycleOutcome {
                positions,
                trades: orders,
                fell_back: false,
                orders_written: false,
            });
        }
    }

    let orders_path = config.orders_path();
    trades::write_orders(&orders_path, &orders)?;
    audit::log_trades(audit, &orders, estimated_cost)?;
    audit::log_cycle_completed(audit, orders.len(), false)?;

    info!(
        "cycle {} complete: {} trades written to {}",
        snapshot.date,
        orders.len(),
        orders_path.display()
    );
    println!(
        "\n{} trades written to {}. Audit logged to {}",
        orders.len(),
        orders_path.display(),
        config.audit_path().display()
    );

    Ok(CycleOutcome {
        positions,
        trades: orders,
        fell_back: false,
        orders_written: true,
    })
}

fn on_failure(
    snapshot: &Snapshot,
    e: OptimizationError,
    audit: &mut AuditLog,
) -> Result<CycleOutcome> {
    let positions = snapshot.previous_positions();

    error!(
        "optimization failed for {} on {}: {e}; keeping previous positions",
        snapshot.strategy, snapshot.date
    );
    audit::log_fallback(audit, snapshot.date, &e.to_string(), &positions)?;
    audit::log_cycle_completed(audit, 0, true)?;

    println!("\nOptimization failed: {e}");
    println!("Falling back to previous positions — no trades this cycle.");

    Ok(CycleOutcome {
        positions,
        trades: Vec::new(),
        fell_back: true,
        orders_written: false,
    })
}

/// Print the universe with prior, live and optimised positions.
fn display_positions(inputs: &CycleInputs, optimised: &PositionMap) {
    if inputs.instruments.is_empty() {
        println!("Universe is empty — nothing to optimise.");
        return;
    }

    println!("OPTIMISED POSITIONS:");
    println!(
        "  {:12} {:>10} {:>10} {:>10} {:>9}",
        "Instrument", "Prior", "Live", "Optimised", "Min unit"
    );
    for code in &inputs.instruments {
        println!(
            "  {:12} {:>10.2} {:>10.2} {:>10.2} {:>9.2}",
            code.as_str(),
            inputs.previous_positions[code],
            inputs.live_positions[code],
            optimised.get(code).copied().unwrap_or(0.0),
            inputs.min_units[code],
        );
    }
}

/// Print the filtered universe for the `universe` subcommand.
pub fn show_universe(config: &Config, snapshot: &Snapshot) -> Result<()> {
    let (inputs, exclusions) = universe::build_universe(snapshot, config)?;

    println!(
        "Universe for {} on {}: {} instruments",
        inputs.strategy,
        inputs.date,
        inputs.instruments.len()
    );
    println!(
        "  {:12} {:>10} {:>10} {:>9} {:>12} {:>8} {:>8}",
        "Instrument", "Ideal wt", "Prior", "Min unit", "Limit", "Reduce", "Frozen"
    );
    for code in &inputs.instruments {
        let constraint = inputs.constraints.get(code);
        let limit = if constraint.position_limit.is_finite() {
            format!("{:.2}", constraint.position_limit)
        } else {
            "-".into()
        };
        println!(
            "  {:12} {:>10.4} {:>10.2} {:>9.2} {:>12} {:>8} {:>8}",
            code.as_str(),
            inputs.ideal_weights[code],
            inputs.previous_positions[code],
            inputs.min_units[code],
            limit,
            if constraint.reduce_only { "yes" } else { "no" },
            if constraint.no_trade { "yes" } else { "no" },
        );
    }

    if !exclusions.is_empty() {
        println!("\nExcluded this cycle:");
        for exclusion in &exclusions {
            println!("  {:12} {}", exclusion.instrument.as_str(), exclusion.reason);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InstrumentCode;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.logging.dir = dir.join("logs").display().to_string();
        config.execution.orders_file = dir.join("orders.json").display().to_string();
        config
    }

    fn snapshot(covariance_values: &str) -> Snapshot {
        Snapshot::from_json(&format!(
            r#"{{
            "date": "2026-08-07",
            "strategy": "macro_trend",
            "instruments": {{
                "SP500": {{
                    "ideal_weight": 0.20,
                    "per_unit_value": 0.02,
                    "cost": 0.0,
                    "min_unit": 1.0,
                    "previous_position": 4.0,
                    "live_position": 4.0
                }},
                "ORPHAN": {{
                    "ideal_weight": 0.05,
                    "previous_position": 2.0
                }}
            }},
            "covariance": {{
                "instruments": ["SP500"],
                "values": [{covariance_values}]
            }}
        }}"#
        ))
        .unwrap()
    }

    fn opts() -> RunOptions {
        RunOptions {
            dry_run: false,
            force: true,
            snapshot_file: "snapshot.json".into(),
        }
    }

    #[test]
    fn successful_cycle_writes_orders_and_audit() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let outcome = run_cycle(&config, &snapshot("[0.0004]"), &opts()).unwrap();

        assert!(!outcome.fell_back);
        assert!(outcome.orders_written);
        assert_eq!(outcome.positions[&InstrumentCode::new("SP500")], 10.0);
        // Excluded instrument carries its prior.
        assert_eq!(outcome.positions[&InstrumentCode::new("ORPHAN")], 2.0);
        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].trade, 6.0);

        assert!(config.orders_path().exists());
        let audit = std::fs::read_to_string(config.audit_path()).unwrap();
        assert!(audit.contains("\"event\":\"cycle_started\""));
        assert!(audit.contains("\"event\":\"optimised\""));
        assert!(audit.contains("\"event\":\"trades_computed\""));
    }

    #[test]
    fn dry_run_writes_no_orders() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let options = RunOptions {
            dry_run: true,
            ..opts()
        };
        let outcome = run_cycle(&config, &snapshot("[0.0004]"), &options).unwrap();

        assert!(!outcome.orders_written);
        assert!(!outcome.trades.is_empty());
        assert!(!config.orders_path().exists());
    }

    #[test]
    fn failed_cycle_falls_back_to_previous_positions() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        // Zero variance makes the weight search refuse to run.
        let outcome = run_cycle(&config, &snapshot("[0.0]"), &opts()).unwrap();

        assert!(outcome.fell_back);
        assert!(outcome.trades.is_empty());
        assert!(!outcome.orders_written);
        assert_eq!(outcome.positions[&InstrumentCode::new("SP500")], 4.0);
        assert_eq!(outcome.positions[&InstrumentCode::new("ORPHAN")], 2.0);

        let audit = std::fs::read_to_string(config.audit_path()).unwrap();
        assert!(audit.contains("\"event\":\"fallback_no_trade\""));
        assert!(!config.orders_path().exists());
    }

    #[test]
    fn on_target_cycle_emits_no_trades() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let json = r#"{
            "date": "2026-08-07",
            "strategy": "s",
            "instruments": {
                "SP500": {
                    "ideal_weight": 0.08,
                    "per_unit_value": 0.02,
                    "cost": 0.0,
                    "min_unit": 1.0,
                    "previous_position": 4.0,
                    "live_position": 4.0
                }
            },
            "covariance": { "instruments": ["SP500"], "values": [[0.0004]] }
        }"#;
        let snapshot = Snapshot::from_json(json).unwrap();
        let outcome = run_cycle(&config, &snapshot, &opts()).unwrap();

        assert!(outcome.trades.is_empty());
        assert!(!outcome.orders_written);
        let audit = std::fs::read_to_string(config.audit_path()).unwrap();
        assert!(audit.contains("no_rebalance_needed"));
    }
}
