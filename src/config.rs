//! TOML configuration loading and validation.
//!
//! All configuration is resolved once at startup into an immutable value
//! passed by reference into each cycle; there are no process-wide caches.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::buffering::BufferMethod;
use crate::error::{Error, Result};
use crate::rounding::{RoundingPolicy, select_rounding_policy};
use crate::speed_control::SpeedControl;
use crate::trades::OrderType;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rounding: RoundingConfig,
    pub speed_control: SpeedControl,
    pub buffering: BufferingConfig,
    pub execution: ExecutionConfig,
    pub environment: EnvironmentConfig,
    /// Per-instrument minimum-unit overrides, keyed by deployment
    /// environment then instrument code.
    pub min_unit_overrides: FxHashMap<String, FxHashMap<String, f64>>,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rounding: RoundingConfig::default(),
            speed_control: SpeedControl::default(),
            buffering: BufferingConfig::default(),
            execution: ExecutionConfig::default(),
            environment: EnvironmentConfig::default(),
            min_unit_overrides: FxHashMap::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoundingConfig {
    /// Enable position discretization (`roundpositions`).
    pub enabled: bool,
    /// Which policy to use when enabled.
    pub strategy: String,
}

impl Default for RoundingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: "whole_unit".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferingConfig {
    /// Band-based alternative to the greedy optimizer.
    pub method: BufferMethod,
    pub buffer_size: f64,
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            method: BufferMethod::None,
            buffer_size: 0.10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Order-type tag attached to every emitted trade.
    pub order_type: OrderType,
    /// Where the order list for the order-generation stage is written.
    pub orders_file: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            order_type: OrderType::BestExecution,
            orders_file: "orders.json".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Selects the min-unit override table (e.g. "live" vs "demo").
    pub name: String,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self { name: "live".into() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: String,
    pub audit_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: "./logs".into(),
            audit_file: "audit.jsonl".into(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config invariants. Runs at load, before any cycle.
    pub fn validate(&self) -> Result<()> {
        // Resolving the policy name here makes an unknown name fail fast.
        select_rounding_policy(&self.rounding.strategy, self.rounding.enabled)?;

        let sc = &self.speed_control;
        if !sc.tracking_error_buffer.is_finite() || sc.tracking_error_buffer < 0.0 {
            return Err(Error::Config(
                "speed_control.tracking_error_buffer must be >= 0".into(),
            ));
        }
        if !(sc.max_adjustment_fraction > 0.0 && sc.max_adjustment_fraction <= 1.0) {
            return Err(Error::Config(
                "speed_control.max_adjustment_fraction must be in (0.0, 1.0]".into(),
            ));
        }

        if self.buffering.method != BufferMethod::None
            && !(self.buffering.buffer_size > 0.0 && self.buffering.buffer_size.is_finite())
        {
            return Err(Error::Config("buffering.buffer_size must be > 0".into()));
        }

        if self.environment.name.is_empty() {
            return Err(Error::Config("environment.name must not be empty".into()));
        }

        for (env, table) in &self.min_unit_overrides {
            for (code, min_unit) in table {
                if !(min_unit.is_finite() && *min_unit > 0.0) {
                    return Err(Error::Config(format!(
                        "min_unit_overrides.{env}.{code} must be > 0"
                    )));
                }
            }
        }

        Ok(())
    }

    /// The active rounding policy. `validate()` guarantees this resolves.
    pub fn rounding_policy(&self) -> Result<RoundingPolicy> {
        select_rounding_policy(&self.rounding.strategy, self.rounding.enabled)
    }

    /// Minimum-unit override for one instrument in the active environment.
    pub fn min_unit_override(&self, instrument: &str) -> Option<f64> {
        self.min_unit_overrides
            .get(&self.environment.name)
            .and_then(|table| table.get(instrument))
            .copied()
    }

    /// Full path to the audit log file.
    pub fn audit_path(&self) -> PathBuf {
        Path::new(&self.logging.dir).join(&self.logging.audit_file)
    }

    /// Path the emitted order list is written to.
    pub fn orders_path(&self) -> PathBuf {
        PathBuf::from(&self.execution.orders_file)
    }
}
