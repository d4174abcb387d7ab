//! Required-trade computation and hand-off to order generation.
//!
//! The engine's output is a signed trade per instrument plus the audit
//! metadata an external order-generation stage needs to build a broker
//! order. Nothing here talks to a broker.

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{InstrumentCode, PositionMap};
use crate::universe::CycleInputs;

/// Trades smaller than this are treated as zero.
const TRADE_TOL: f64 = 1e-9;

/// Order-type tag attached to each emitted trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    #[default]
    BestExecution,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::BestExecution => write!(f, "BEST EXEC"),
        }
    }
}

/// One required trade, in tradable units, with its audit metadata.
#[derive(Debug, Clone, Serialize)]
pub struct TradeOrder {
    pub instrument: InstrumentCode,
    pub strategy: String,
    pub date: NaiveDate,
    /// Signed quantity in tradable units.
    pub trade: f64,
    pub order_type: OrderType,
    pub reference_price: Option<f64>,
    pub reference_contract: Option<String>,
}

/// Trades needed to move the live book onto the optimised positions.
pub fn compute_trades(
    inputs: &CycleInputs,
    optimised: &PositionMap,
    order_type: OrderType,
) -> Vec<TradeOrder> {
    let mut orders = Vec::new();

    for code in &inputs.instruments {
        let live = inputs.live_positions.get(code).copied().unwrap_or(0.0);
        let target = optimised.get(code).copied().unwrap_or(live);
        let trade = target - live;
        if trade.abs() < TRADE_TOL {
            continue;
        }

        let reference = inputs.reference.get(code);
        orders.push(TradeOrder {
            instrument: code.clone(),
            strategy: inputs.strategy.clone(),
            date: inputs.date,
            trade,
            order_type,
            reference_price: reference.and_then(|r| r.price),
            reference_contract: reference.and_then(|r| r.contract.clone()),
        });
    }

    orders
}

/// Expected cost of a trade list, in weight-space units of turnover.
pub fn estimate_cost(inputs: &CycleInputs, orders: &[TradeOrder]) -> f64 {
    orders
        .iter()
        .map(|order| {
            let cost = inputs.costs.get(&order.instrument).copied().unwrap_or(0.0);
            let per_unit_value = inputs
                .per_unit_values
                .get(&order.instrument)
                .copied()
                .unwrap_or(0.0);
            cost * (order.trade * per_unit_value).abs()
        })
        .sum()
}

/// Render the trade plan as a table.
pub fn format_plan(orders: &[TradeOrder]) -> String {
    use std::fmt::Write;

    let mut out = String::from("REQUIRED TRADES:\n");
    let _ = writeln!(
        out,
        "  {:>3}  {:12} {:>10} {:10} {:>12} {:>10}",
        "#", "Instrument", "Trade", "Type", "Ref price", "Contract"
    );
    for (i, order) in orders.iter().enumerate() {
        let _ = writeln!(
            out,
            "  {:>3}  {:12} {:>+10.2} {:10} {:>12} {:>10}",
            i + 1,
            order.instrument.as_str(),
            order.trade,
            format!("{}", order.order_type),
            order
                .reference_price
                .map(|p| format!("{p:.2}"))
                .unwrap_or_else(|| "-".into()),
            order.reference_contract.as_deref().unwrap_or("-"),
        );
    }
    out
}

/// Write the order list as JSON for the order-generation stage.
pub fn write_orders(path: &Path, orders: &[TradeOrder]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| Error::OrderWrite {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
    }
    let json = serde_json::to_string_pretty(orders)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        .map_err(|e| Error::OrderWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
    std::fs::write(path, json).map_err(|e| Error::OrderWrite {
        path: path.to_path_buf(),
        source: e,
    })
}
