//! IMU preintegration between keyframes.
//!
//! Accumulates accelerometer/gyroscope samples into relative position,
//! velocity and orientation increments with a propagated 15×15 covariance and
//! bias Jacobian, and evaluates the 15-dim residual between two navigation
//! states. Small bias updates use a first-order correction; larger ones call
//! for `ImuPreintegration::replay`.

pub mod config;
pub mod error;
pub mod factors;
pub mod types;

pub use config::{BiasTolerance, HistoryPolicy, NoiseDensities, PreintegrationConfig};
pub use error::{ConfigError, PreintegrationError, Result};
pub use factors::{ImuFactor, ImuPreintegration, ResidualJacobians};
pub use types::{BiasDelta, BiasEstimate, ImuSample, NavState, NominalState};
