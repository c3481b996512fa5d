use std::path::PathBuf;

use thiserror::Error;

/// Preintegration error types
#[derive(Error, Debug)]
pub enum PreintegrationError {
    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    #[error("Invalid interval: dt = {dt} (must be finite and > 0)")]
    InvalidInterval { dt: f64 },

    #[error("Invalid measurement: {0}")]
    InvalidMeasurement(String),

    #[error(
        "Stale linearization: bias drift accel {accel_drift:.3e}, gyro {gyro_drift:.3e} exceeds tolerance; replay recommended"
    )]
    StaleLinearization { accel_drift: f64, gyro_drift: f64 },

    #[error("Measurement history discarded after exceeding {capacity} samples; replay unavailable")]
    HistoryDiscarded { capacity: usize },

    #[error("Covariance is not positive definite")]
    NotPositiveDefinite,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for preintegration operations
pub type Result<T> = std::result::Result<T, PreintegrationError>;
