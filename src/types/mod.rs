pub mod linalg;

pub use linalg::*;

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccelData {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GyroData {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelData {
    pub fn vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
}

impl GyroData {
    pub fn vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
}

/// One recorded IMU sample: time since the previous sample plus raw readings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImuSample {
    /// Interval since the previous sample [seconds]
    pub dt: f64,

    /// Raw specific force [m/s²]
    pub accel: Vector3<f64>,

    /// Raw angular rate [rad/s]
    pub gyro: Vector3<f64>,
}

/// Accelerometer and gyroscope bias linearization point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BiasEstimate {
    /// Accelerometer bias [m/s²]
    pub ba: Vector3<f64>,

    /// Gyroscope bias [rad/s]
    pub bg: Vector3<f64>,
}

impl BiasEstimate {
    pub fn new(ba: Vector3<f64>, bg: Vector3<f64>) -> Self {
        Self { ba, bg }
    }

    pub fn zeros() -> Self {
        Self {
            ba: Vector3::zeros(),
            bg: Vector3::zeros(),
        }
    }

    pub fn is_finite(&self) -> bool {
        is_finite(&self.ba) && is_finite(&self.bg)
    }

    /// Deviation of `self` from the anchor `other`.
    pub fn delta_from(&self, other: &BiasEstimate) -> BiasDelta {
        BiasDelta {
            dba: self.ba - other.ba,
            dbg: self.bg - other.bg,
        }
    }
}

impl Default for BiasEstimate {
    fn default() -> Self {
        Self::zeros()
    }
}

/// Bias deviation from the linearization point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BiasDelta {
    pub dba: Vector3<f64>,
    pub dbg: Vector3<f64>,
}

impl BiasDelta {
    pub fn accel_norm(&self) -> f64 {
        self.dba.norm()
    }

    pub fn gyro_norm(&self) -> f64 {
        self.dbg.norm()
    }
}

/// Accumulated motion increments since the window began.
///
/// All quantities are expressed in the body frame at the start of the window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NominalState {
    /// Position increment (alpha)
    pub delta_p: Vector3<f64>,

    /// Velocity increment (beta)
    pub delta_v: Vector3<f64>,

    /// Orientation increment (gamma), kept at unit norm
    pub delta_q: UnitQuaternion<f64>,

    /// Elapsed time in the window [seconds]
    pub sum_dt: f64,
}

impl NominalState {
    pub fn identity() -> Self {
        Self {
            delta_p: Vector3::zeros(),
            delta_v: Vector3::zeros(),
            delta_q: UnitQuaternion::identity(),
            sum_dt: 0.0,
        }
    }
}

impl Default for NominalState {
    fn default() -> Self {
        Self::identity()
    }
}

/// Absolute navigation state of a keyframe in the world frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NavState {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub velocity: Vector3<f64>,
    pub bias: BiasEstimate,
}

impl NavState {
    pub fn new(
        position: Vector3<f64>,
        orientation: UnitQuaternion<f64>,
        velocity: Vector3<f64>,
        bias: BiasEstimate,
    ) -> Self {
        Self {
            position,
            orientation,
            velocity,
            bias,
        }
    }

    /// Origin at rest with identity attitude and zero bias
    pub fn origin() -> Self {
        Self::new(
            Vector3::zeros(),
            UnitQuaternion::identity(),
            Vector3::zeros(),
            BiasEstimate::zeros(),
        )
    }
}

pub(crate) fn is_finite(v: &Vector3<f64>) -> bool {
    v.iter().all(|c| c.is_finite())
}
