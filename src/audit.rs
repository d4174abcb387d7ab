//! JSONL audit trail.
//!
//! Every cycle appends events to an audit.jsonl file, one JSON object per
//! line. The per-instrument optimization records written here are the
//! reproducibility contract: together with the input snapshot they pin
//! down exactly what the engine decided and why.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::optimizer::OptimisedPosition;
use crate::trades::TradeOrder;
use crate::types::{InstrumentCode, PositionMap};
use crate::universe::Exclusion;

/// An audit event written to the JSONL trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event: &'static str,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

/// Append-only audit logger.
pub struct AuditLog {
    writer: BufWriter<std::fs::File>,
}

impl AuditLog {
    /// Open (or create) the audit log file for appending.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Log an event with arbitrary JSON data.
    pub fn log(&mut self, event: &'static str, data: serde_json::Value) -> Result<()> {
        let entry = AuditEvent {
            event,
            ts: Utc::now(),
            data,
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(self.writer, "{json}")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Log a simple event with no additional data.
    pub fn log_simple(&mut self, event: &'static str) -> Result<()> {
        self.log(event, serde_json::json!({}))
    }
}

/// Convenience: log a cycle start event.
pub fn log_cycle_started(
    audit: &mut AuditLog,
    date: NaiveDate,
    strategy: &str,
    snapshot_file: &str,
) -> Result<()> {
    audit.log(
        "cycle_started",
        serde_json::json!({
            "date": date,
            "strategy": strategy,
            "snapshot_file": snapshot_file,
        }),
    )
}

/// Convenience: log the filtered universe and its exclusions.
pub fn log_universe(
    audit: &mut AuditLog,
    included: &[InstrumentCode],
    exclusions: &[Exclusion],
) -> Result<()> {
    let excluded: Vec<_> = exclusions
        .iter()
        .map(|e| {
            serde_json::json!({
                "instrument": e.instrument.as_str(),
                "reason": e.reason,
            })
        })
        .collect();

    audit.log(
        "universe_built",
        serde_json::json!({
            "included": included.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            "excluded": excluded,
        }),
    )
}

/// Convenience: log the per-instrument optimization records.
pub fn log_optimised(audit: &mut AuditLog, records: &[OptimisedPosition]) -> Result<()> {
    let value = serde_json::to_value(records)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    audit.log("optimised", serde_json::json!({ "records": value }))
}

/// Convenience: log a fail-safe fallback to the prior positions.
pub fn log_fallback(
    audit: &mut AuditLog,
    date: NaiveDate,
    error: &str,
    previous: &PositionMap,
) -> Result<()> {
    let mut positions: Vec<_> = previous
        .iter()
        .map(|(code, pos)| (code.as_str(), *pos))
        .collect();
    positions.sort_by(|a, b| a.0.cmp(b.0));

    audit.log(
        "fallback_no_trade",
        serde_json::json!({
            "date": date,
            "error": error,
            "previous_positions": positions,
        }),
    )
}

/// Convenience: log the computed trade list.
pub fn log_trades(
    audit: &mut AuditLog,
    orders: &[TradeOrder],
    estimated_cost: f64,
) -> Result<()> {
    let order_data: Vec<_> = orders
        .iter()
        .map(|o| {
            serde_json::json!({
                "instrument": o.instrument.as_str(),
                "trade": o.trade,
                "order_type": format!("{}", o.order_type),
                "reference_price": o.reference_price,
                "reference_contract": o.reference_contract,
            })
        })
        .collect();

    audit.log(
        "trades_computed",
        serde_json::json!({
            "orders": order_data,
            "estimated_cost": estimated_cost,
        }),
    )
}

/// Convenience: log cycle completion.
pub fn log_cycle_completed(audit: &mut AuditLog, trades: usize, fell_back: bool) -> Result<()> {
    audit.log(
        "cycle_completed",
        serde_json::json!({
            "trades": trades,
            "fell_back": fell_back,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_log_writes_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_audit.jsonl");

        {
            let mut log = AuditLog::open(&path).unwrap();
            log.log_simple("test_event").unwrap();
            log.log("test_data", serde_json::json!({"key": "value"}))
                .unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        for line in &lines {
            let _: serde_json::Value = serde_json::from_str(line).unwrap();
        }

        assert!(lines[0].contains("\"event\":\"test_event\""));
    }

    #[test]
    fn audit_log_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subdir").join("deep").join("audit.jsonl");

        let mut log = AuditLog::open(&path).unwrap();
        log.log_simple("test").unwrap();

        assert!(path.exists());
    }

    #[test]
    fn fallback_event_lists_prior_positions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let previous: PositionMap = [
            (crate::types::InstrumentCode::new("SP500"), 8.0),
            (crate::types::InstrumentCode::new("GOLD"), -3.0),
        ]
        .into_iter()
        .collect();

        {
            let mut log = AuditLog::open(&path).unwrap();
            log_fallback(
                &mut log,
                NaiveDate::from_ymd_opt(2026, 8, 7).unwrap(),
                "degenerate covariance matrix: non-positive variance",
                &previous,
            )
            .unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(value["event"], "fallback_no_trade");
        assert_eq!(value["previous_positions"][0][0], "GOLD");
    }
}
