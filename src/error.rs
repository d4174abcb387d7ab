//! Error types for the engine.

use std::path::PathBuf;

use crate::optimizer::OptimizationError;

/// All errors that can occur during a rebalancing cycle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("failed to read snapshot file {path}: {source}")]
    SnapshotRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse snapshot JSON: {0}")]
    SnapshotParse(#[from] serde_json::Error),

    #[error("optimization failed: {0}")]
    Optimization(#[from] OptimizationError),

    #[error("run aborted: {0}")]
    Aborted(String),

    #[error("failed to write order list {path}: {source}")]
    OrderWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("audit log error: {0}")]
    Audit(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
