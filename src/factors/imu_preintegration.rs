/// IMU Preintegration between two keyframes
///
/// Accumulates raw accel/gyro samples into position, velocity and orientation
/// increments expressed in the body frame of the first keyframe, together with
/// the 15×15 bias Jacobian and covariance of those increments.
///
/// Every recorded sample is kept so the whole window can be re-integrated
/// around a new bias linearization point (`replay`).
///
/// References:
/// - Forster et al., "On-Manifold Preintegration for Real-Time Visual-Inertial Odometry"
/// - Qin et al., "VINS-Mono: A Robust and Versatile Monocular Visual-Inertial State Estimator"
use log::{debug, trace, warn};
use nalgebra::{Matrix3, Vector3};

use super::midpoint::{integrate_midpoint, MidpointStep, Propagation, StepInput};
use crate::config::{HistoryPolicy, PreintegrationConfig};
use crate::error::{PreintegrationError, Result};
use crate::types::{
    is_finite, BiasDelta, BiasEstimate, ImuSample, NoiseMat18, NominalState, StateMat15, O_BA,
    O_BG, O_P, O_R, O_V,
};

/// Bias Jacobian blocks used by the first-order correction
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BiasJacobians {
    pub dp_dba: Matrix3<f64>,
    pub dp_dbg: Matrix3<f64>,
    pub dq_dbg: Matrix3<f64>,
    pub dv_dba: Matrix3<f64>,
    pub dv_dbg: Matrix3<f64>,
}

/// Preintegrated IMU measurements for one keyframe interval
#[derive(Clone, Debug)]
pub struct ImuPreintegration {
    config: PreintegrationConfig,

    /// Diagonal noise model [18x18]
    noise: NoiseMat18,

    /// Seed readings; replay restarts from here
    seed_acc: Vector3<f64>,
    seed_gyr: Vector3<f64>,

    /// Most recent readings, the k endpoint of the next step
    acc_0: Vector3<f64>,
    gyr_0: Vector3<f64>,

    /// Bias linearization point
    bias: BiasEstimate,

    state: NominalState,
    propagation: Propagation,

    /// F and V of the most recent step
    last_step: Option<MidpointStep>,

    history: Vec<ImuSample>,

    /// Set once a capped history has been dropped
    history_discarded: bool,

    /// Total samples recorded, including discarded ones
    sample_count: usize,
}

impl ImuPreintegration {
    /// Seed a new integration window
    ///
    /// `accel0`/`gyro0` are the readings at the first keyframe.
    pub fn new(
        accel0: Vector3<f64>,
        gyro0: Vector3<f64>,
        bias: BiasEstimate,
        config: PreintegrationConfig,
    ) -> Result<Self> {
        if !is_finite(&accel0) || !is_finite(&gyro0) {
            return Err(PreintegrationError::InvalidSeed(format!(
                "non-finite seed readings accel={accel0:?} gyro={gyro0:?}"
            )));
        }
        if !bias.is_finite() {
            return Err(PreintegrationError::InvalidSeed(format!(
                "non-finite bias {bias:?}"
            )));
        }
        config.validate()?;

        debug!(
            "preintegration seeded: ba={:?} bg={:?} history={:?}",
            bias.ba.as_slice(),
            bias.bg.as_slice(),
            config.history
        );

        let noise = config.noise.noise_matrix();
        Ok(Self {
            config,
            noise,
            seed_acc: accel0,
            seed_gyr: gyro0,
            acc_0: accel0,
            gyr_0: gyro0,
            bias,
            state: NominalState::identity(),
            propagation: Propagation::identity(),
            last_step: None,
            history: Vec::new(),
            history_discarded: false,
            sample_count: 0,
        })
    }

    /// Append a sample and integrate it against the previous one
    pub fn record(&mut self, dt: f64, accel: Vector3<f64>, gyro: Vector3<f64>) -> Result<()> {
        self.record_sample(ImuSample { dt, accel, gyro })
    }

    pub fn record_sample(&mut self, sample: ImuSample) -> Result<()> {
        validate_sample(&sample)?;

        self.retain(sample);
        self.sample_count += 1;
        self.propagate(&sample);

        trace!(
            "sample {} dt={:.6} sum_dt={:.6}",
            self.sample_count,
            sample.dt,
            self.state.sum_dt
        );
        Ok(())
    }

    /// Re-integrate the whole history around a new bias linearization point
    ///
    /// With an empty history only the anchor changes.
    pub fn replay(&mut self, bias: BiasEstimate) -> Result<()> {
        if !bias.is_finite() {
            return Err(PreintegrationError::InvalidMeasurement(format!(
                "non-finite replay bias {bias:?}"
            )));
        }
        if self.history_discarded {
            let capacity = match self.config.history {
                HistoryPolicy::Capped { max_samples } => max_samples,
                HistoryPolicy::Unbounded => self.sample_count,
            };
            return Err(PreintegrationError::HistoryDiscarded { capacity });
        }

        debug!(
            "replaying {} samples: ba={:?} bg={:?}",
            self.history.len(),
            bias.ba.as_slice(),
            bias.bg.as_slice()
        );

        self.acc_0 = self.seed_acc;
        self.gyr_0 = self.seed_gyr;
        self.bias = bias;
        self.state = NominalState::identity();
        self.propagation = Propagation::identity();
        self.last_step = None;

        // Temporarily take the buffer so propagate can borrow self mutably
        let history = std::mem::take(&mut self.history);
        for sample in &history {
            self.propagate(sample);
        }
        self.history = history;
        Ok(())
    }

    fn propagate(&mut self, sample: &ImuSample) {
        let input = StepInput {
            dt: sample.dt,
            acc_0: self.acc_0,
            gyr_0: self.gyr_0,
            acc_1: sample.accel,
            gyr_1: sample.gyro,
        };
        let step = integrate_midpoint(&input, &self.state, &self.bias);

        self.propagation = self.propagation.advance(&step, &self.noise);
        self.state = step.state;
        self.acc_0 = sample.accel;
        self.gyr_0 = sample.gyro;
        self.last_step = Some(step);
    }

    fn retain(&mut self, sample: ImuSample) {
        if self.history_discarded {
            return;
        }
        if let HistoryPolicy::Capped { max_samples } = self.config.history {
            if self.history.len() >= max_samples {
                warn!(
                    "history exceeded {} samples; dropping buffer, replay disabled for this window",
                    max_samples
                );
                self.history = Vec::new();
                self.history_discarded = true;
                return;
            }
        }
        self.history.push(sample);
    }

    pub fn state(&self) -> &NominalState {
        &self.state
    }

    pub fn jacobian(&self) -> &StateMat15 {
        &self.propagation.jacobian
    }

    pub fn covariance(&self) -> &StateMat15 {
        &self.propagation.covariance
    }

    pub fn sum_dt(&self) -> f64 {
        self.state.sum_dt
    }

    pub fn bias(&self) -> &BiasEstimate {
        &self.bias
    }

    pub fn config(&self) -> &PreintegrationConfig {
        &self.config
    }

    pub fn gravity(&self) -> Vector3<f64> {
        self.config.gravity()
    }

    pub fn noise(&self) -> &NoiseMat18 {
        &self.noise
    }

    /// Recorded samples, in order; empty once a capped history was dropped
    pub fn samples(&self) -> &[ImuSample] {
        &self.history
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// True until the first sample is recorded
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    pub fn can_replay(&self) -> bool {
        !self.history_discarded
    }

    pub fn last_step(&self) -> Option<&MidpointStep> {
        self.last_step.as_ref()
    }

    pub fn bias_jacobians(&self) -> BiasJacobians {
        let j = &self.propagation.jacobian;
        let block = |row: usize, col: usize| j.fixed_view::<3, 3>(row, col).into_owned();
        BiasJacobians {
            dp_dba: block(O_P, O_BA),
            dp_dbg: block(O_P, O_BG),
            dq_dbg: block(O_R, O_BG),
            dv_dba: block(O_V, O_BA),
            dv_dbg: block(O_V, O_BG),
        }
    }

    /// Deviation of `bias` from the linearization point
    pub fn bias_drift(&self, bias: &BiasEstimate) -> BiasDelta {
        bias.delta_from(&self.bias)
    }

    /// Fails with `StaleLinearization` when the first-order correction is
    /// outside the configured tolerance. Informational only.
    pub fn check_linearization(&self, bias: &BiasEstimate) -> Result<()> {
        let drift = self.bias_drift(bias);
        let tol = &self.config.bias_tolerance;
        if drift.accel_norm() > tol.accel || drift.gyro_norm() > tol.gyro {
            return Err(PreintegrationError::StaleLinearization {
                accel_drift: drift.accel_norm(),
                gyro_drift: drift.gyro_norm(),
            });
        }
        Ok(())
    }
}

fn validate_sample(sample: &ImuSample) -> Result<()> {
    if !sample.dt.is_finite() || sample.dt <= 0.0 {
        return Err(PreintegrationError::InvalidInterval { dt: sample.dt });
    }
    if !is_finite(&sample.accel) || !is_finite(&sample.gyro) {
        return Err(PreintegrationError::InvalidMeasurement(format!(
            "non-finite readings accel={:?} gyro={:?}",
            sample.accel, sample.gyro
        )));
    }
    Ok(())
}
