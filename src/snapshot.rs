//! Point-in-time cycle snapshot loading and validation.
//!
//! One JSON file carries everything the engine needs for a cycle: ideal
//! weights, instrument reference data, costs, constraints, prior and live
//! positions, and the covariance estimate. The engine never re-reads
//! external state mid-computation.

use std::path::Path;

use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::covariance::CovarianceMatrix;
use crate::error::{Error, Result};
use crate::types::InstrumentCode;

/// A full cycle snapshot as supplied by the upstream collaborators.
#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    pub date: NaiveDate,
    pub strategy: String,
    pub instruments: FxHashMap<InstrumentCode, InstrumentEntry>,
    pub covariance: CovarianceSpec,
}

/// Per-instrument inputs. Everything beyond the ideal weight is optional;
/// a missing optimization input excludes the instrument at universe-build
/// time rather than failing the cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentEntry {
    pub ideal_weight: f64,
    pub per_unit_value: Option<f64>,
    pub cost: Option<f64>,
    pub min_unit: Option<f64>,
    pub previous_position: Option<f64>,
    pub live_position: Option<f64>,
    pub reference_price: Option<f64>,
    pub reference_contract: Option<String>,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub no_trade: bool,
    pub position_limit: Option<f64>,
    /// Typical position magnitude, used by forecast-method buffering.
    pub average_position: Option<f64>,
}

/// Raw covariance block, validated into a [`CovarianceMatrix`].
#[derive(Debug, Clone, Deserialize)]
pub struct CovarianceSpec {
    pub instruments: Vec<InstrumentCode>,
    pub values: Vec<Vec<f64>>,
}

impl Snapshot {
    /// Load and validate a snapshot file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::SnapshotRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&contents)
    }

    /// Parse from a JSON string (useful for testing).
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Validate the snapshot.
    fn validate(&self) -> Result<()> {
        if self.strategy.is_empty() {
            return Err(Error::Snapshot("strategy must not be empty".into()));
        }
        if self.instruments.is_empty() {
            return Err(Error::Snapshot("instrument map is empty".into()));
        }

        for (code, entry) in &self.instruments {
            entry.validate(code)?;
        }

        // Reuse the matrix validation (square, finite, symmetric, unique
        // labels); the constructed matrix is rebuilt at universe time.
        self.covariance_matrix()?;

        Ok(())
    }

    /// The validated covariance matrix over the snapshot's own labels.
    pub fn covariance_matrix(&self) -> Result<CovarianceMatrix> {
        CovarianceMatrix::new(
            self.covariance.instruments.clone(),
            self.covariance.values.clone(),
        )
    }

    /// Prior positions for every instrument that has one.
    pub fn previous_positions(&self) -> FxHashMap<InstrumentCode, f64> {
        self.instruments
            .iter()
            .filter_map(|(code, e)| e.previous_position.map(|p| (code.clone(), p)))
            .collect()
    }
}

impl InstrumentEntry {
    fn validate(&self, code: &InstrumentCode) -> Result<()> {
        let finite = |name: &str, value: Option<f64>| -> Result<()> {
            match value {
                Some(v) if !v.is_finite() => Err(Error::Snapshot(format!(
                    "{code}: {name} is not finite"
                ))),
                _ => Ok(()),
            }
        };

        if !self.ideal_weight.is_finite() {
            return Err(Error::Snapshot(format!("{code}: ideal_weight is not finite")));
        }
        finite("per_unit_value", self.per_unit_value)?;
        finite("cost", self.cost)?;
        finite("min_unit", self.min_unit)?;
        finite("previous_position", self.previous_position)?;
        finite("live_position", self.live_position)?;
        finite("reference_price", self.reference_price)?;
        finite("position_limit", self.position_limit)?;
        finite("average_position", self.average_position)?;

        if let Some(min_unit) = self.min_unit {
            if min_unit <= 0.0 {
                return Err(Error::Snapshot(format!("{code}: min_unit must be > 0")));
            }
        }
        if let Some(per_unit_value) = self.per_unit_value {
            if per_unit_value <= 0.0 {
                return Err(Error::Snapshot(format!(
                    "{code}: per_unit_value must be > 0"
                )));
            }
        }
        if let Some(cost) = self.cost {
            if cost < 0.0 {
                return Err(Error::Snapshot(format!("{code}: cost must be >= 0")));
            }
        }
        if let Some(limit) = self.position_limit {
            if limit < 0.0 {
                return Err(Error::Snapshot(format!(
                    "{code}: position_limit must be >= 0"
                )));
            }
        }

        Ok(())
    }
}
