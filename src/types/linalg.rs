//! Linear algebra type system for IMU preintegration
//!
//! Provides compile-time dimension checking and clean type aliases
//! for the error-state propagation and residual evaluation.

use nalgebra::{SMatrix, SVector};

// ===== Error-State Dimensions =====
pub const STATE_DIM_15: usize = 15;
pub const NOISE_DIM_18: usize = 18;

// ===== Error-State Block Offsets =====
// Fixed order: position, orientation, velocity, accel bias, gyro bias
pub const O_P: usize = 0;
pub const O_R: usize = 3;
pub const O_V: usize = 6;
pub const O_BA: usize = 9;
pub const O_BG: usize = 12;

// ===== Noise Source Offsets =====
pub const N_ACC_0: usize = 0; // accel noise at k
pub const N_GYR_0: usize = 3; // gyro noise at k
pub const N_ACC_1: usize = 6; // accel noise at k+1
pub const N_GYR_1: usize = 9; // gyro noise at k+1
pub const N_BA_WALK: usize = 12;
pub const N_BG_WALK: usize = 15;

// ===== 15-State Types =====
pub type StateVec15 = SVector<f64, STATE_DIM_15>;
pub type StateMat15 = SMatrix<f64, STATE_DIM_15, STATE_DIM_15>;

// Noise input Jacobian (15×18) and diagonal noise model (18×18)
pub type NoiseInputMat = SMatrix<f64, STATE_DIM_15, NOISE_DIM_18>;
pub type NoiseMat18 = SMatrix<f64, NOISE_DIM_18, NOISE_DIM_18>;

// ===== Residual Jacobian Types =====
pub type PoseJacobian = SMatrix<f64, STATE_DIM_15, 6>; // 15×6 (p, θ)
pub type SpeedBiasJacobian = SMatrix<f64, STATE_DIM_15, 9>; // 15×9 (v, ba, bg)
