//! Core identifier and map types shared across the engine.

use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Opaque instrument identifier.
///
/// Every per-instrument mapping in the engine is keyed by this type, and one
/// optimization run uses a single universe of codes throughout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentCode(String);

impl InstrumentCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstrumentCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Per-instrument weight vector (fraction of capital, dimensionless).
pub type WeightMap = FxHashMap<InstrumentCode, f64>;

/// Per-instrument position vector (tradable units).
pub type PositionMap = FxHashMap<InstrumentCode, f64>;
