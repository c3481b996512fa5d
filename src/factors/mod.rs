//! Preintegration factor modules
//!
//! Mid-point integration, error-state propagation, the sample accumulator
//! and the residual used by filters and optimizers.

pub mod imu_factor;
pub mod imu_preintegration;
pub mod midpoint;
pub mod rotation;

pub use imu_factor::{ImuFactor, ResidualJacobians};
pub use imu_preintegration::{BiasJacobians, ImuPreintegration};
pub use midpoint::{integrate_midpoint, MidpointStep, Propagation, StepInput};
