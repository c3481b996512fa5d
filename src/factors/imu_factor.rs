/// IMU Preintegration Factor for Factor Graph Optimization
///
/// Constrains two consecutive navigation states (pose, velocity, bias) with a
/// preintegrated window. The residual applies a first-order bias correction so
/// small bias updates do not require a replay.
///
/// Residual layout: [position (0:3), rotation (3:6), velocity (6:9),
/// accel bias (9:12), gyro bias (12:15)].
use log::debug;
use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};

use super::imu_preintegration::ImuPreintegration;
use super::rotation::{delta_q, quat_left, quat_right, skew_symmetric, vector_block};
use crate::error::{PreintegrationError, Result};
use crate::types::{
    NavState, PoseJacobian, SpeedBiasJacobian, StateMat15, StateVec15, O_BA, O_BG, O_P, O_R, O_V,
};

/// Bias-corrected increments for a given start bias
#[derive(Clone, Copy, Debug)]
struct CorrectedDelta {
    delta_p: Vector3<f64>,
    delta_v: Vector3<f64>,

    /// First-order corrected rotation; close to, but not exactly, unit norm
    delta_q: Quaternion<f64>,
}

impl CorrectedDelta {
    fn delta_q_inverse(&self) -> Quaternion<f64> {
        // |dq'| >= 1, never singular
        self.delta_q.conjugate() / self.delta_q.norm_squared()
    }
}

impl ImuPreintegration {
    fn corrected_delta(&self, state_i: &NavState) -> CorrectedDelta {
        let jac = self.bias_jacobians();
        let drift = self.bias_drift(&state_i.bias);
        let state = self.state();

        // dq' = dq ⊗ [1, ½ ∂q/∂bg · δbg]
        let correction = delta_q(&(jac.dq_dbg * drift.dbg));
        let corrected_q = state.delta_q.into_inner() * correction;

        CorrectedDelta {
            delta_p: state.delta_p + jac.dp_dba * drift.dba + jac.dp_dbg * drift.dbg,
            delta_v: state.delta_v + jac.dv_dba * drift.dba + jac.dv_dbg * drift.dbg,
            delta_q: corrected_q,
        }
    }

    /// 15-dim residual between two navigation states
    ///
    /// Near zero when `state_j` is what the preintegrated motion predicts from
    /// `state_i`. Does not mutate the window.
    pub fn evaluate(&self, state_i: &NavState, state_j: &NavState) -> StateVec15 {
        // Reported at warn level only through check_linearization
        if let Err(err) = self.check_linearization(&state_i.bias) {
            debug!("{err}");
        }

        let corrected = self.corrected_delta(state_i);
        let g = self.gravity();
        let sum_dt = self.sum_dt();
        let qi_inv = state_i.orientation.inverse();

        let pos_error = qi_inv
            * (0.5 * g * sum_dt * sum_dt + state_j.position
                - state_i.position
                - state_i.velocity * sum_dt)
            - corrected.delta_p;

        // 2 · vec(dq'⁻¹ ⊗ Qi⁻¹ ⊗ Qj)
        let rot_error_q =
            corrected.delta_q_inverse() * (qi_inv * state_j.orientation).into_inner();
        let rot_error = 2.0 * rot_error_q.imag();

        let vel_error = qi_inv * (g * sum_dt + state_j.velocity - state_i.velocity)
            - corrected.delta_v;

        let mut residual = StateVec15::zeros();
        residual.fixed_rows_mut::<3>(O_P).copy_from(&pos_error);
        residual.fixed_rows_mut::<3>(O_R).copy_from(&rot_error);
        residual.fixed_rows_mut::<3>(O_V).copy_from(&vel_error);
        residual
            .fixed_rows_mut::<3>(O_BA)
            .copy_from(&(state_j.bias.ba - state_i.bias.ba));
        residual
            .fixed_rows_mut::<3>(O_BG)
            .copy_from(&(state_j.bias.bg - state_i.bias.bg));
        residual
    }

    /// Predict the end state of the window from `state_i`
    ///
    /// The bias is carried over unchanged.
    pub fn predict(&self, state_i: &NavState) -> NavState {
        let corrected = self.corrected_delta(state_i);
        let g = self.gravity();
        let sum_dt = self.sum_dt();
        let qi = state_i.orientation;

        NavState {
            position: state_i.position + state_i.velocity * sum_dt - 0.5 * g * sum_dt * sum_dt
                + qi * corrected.delta_p,
            orientation: qi * UnitQuaternion::new_normalize(corrected.delta_q),
            velocity: state_i.velocity - g * sum_dt + qi * corrected.delta_v,
            bias: state_i.bias,
        }
    }
}

/// Residual Jacobians with respect to the error states of both keyframes
///
/// Orientation perturbations are applied on the right: Q ⊗ [1, δθ/2].
#[derive(Clone, Debug, PartialEq)]
pub struct ResidualJacobians {
    /// ∂r / ∂[δp_i, δθ_i]
    pub pose_i: PoseJacobian,

    /// ∂r / ∂[δv_i, δba_i, δbg_i]
    pub speed_bias_i: SpeedBiasJacobian,

    /// ∂r / ∂[δp_j, δθ_j]
    pub pose_j: PoseJacobian,

    /// ∂r / ∂[δv_j, δba_j, δbg_j]
    pub speed_bias_j: SpeedBiasJacobian,
}

/// IMU factor: preintegrated window plus its square-root information
#[derive(Clone, Debug)]
pub struct ImuFactor {
    /// Preintegrated measurements between keyframes
    pub preintegration: ImuPreintegration,

    /// Lower-triangular S = L⁻¹ where Covariance = L Lᵀ, so Sᵀ S = Covariance⁻¹
    pub sqrt_information: StateMat15,
}

impl ImuFactor {
    /// Create a new IMU factor; fails unless the covariance is positive definite
    pub fn new(preintegration: ImuPreintegration) -> Result<Self> {
        let covariance = *preintegration.covariance();
        // Symmetrize before factoring
        let covariance = 0.5 * (covariance + covariance.transpose());
        let cholesky = covariance
            .cholesky()
            .ok_or(PreintegrationError::NotPositiveDefinite)?;
        let sqrt_information = cholesky
            .l()
            .solve_lower_triangular(&StateMat15::identity())
            .ok_or(PreintegrationError::NotPositiveDefinite)?;

        Ok(Self {
            preintegration,
            sqrt_information,
        })
    }

    pub fn residual(&self, state_i: &NavState, state_j: &NavState) -> StateVec15 {
        self.preintegration.evaluate(state_i, state_j)
    }

    pub fn weighted_residual(&self, state_i: &NavState, state_j: &NavState) -> StateVec15 {
        self.sqrt_information * self.residual(state_i, state_j)
    }

    /// ½ rᵀ Σ⁻¹ r
    pub fn cost(&self, state_i: &NavState, state_j: &NavState) -> f64 {
        0.5 * self.weighted_residual(state_i, state_j).norm_squared()
    }

    /// Unweighted residual and its Jacobians
    pub fn evaluate_with_jacobians(
        &self,
        state_i: &NavState,
        state_j: &NavState,
    ) -> (StateVec15, ResidualJacobians) {
        let preint = &self.preintegration;
        let residual = preint.evaluate(state_i, state_j);
        let corrected = preint.corrected_delta(state_i);
        let jac = preint.bias_jacobians();

        let g = preint.gravity();
        let sum_dt = preint.sum_dt();
        let qi = state_i.orientation.into_inner();
        let qj = state_j.orientation.into_inner();
        let qi_inv = state_i.orientation.inverse();
        let ri_inv = qi_inv.to_rotation_matrix().into_inner();
        let identity = Matrix3::<f64>::identity();

        let mut pose_i = PoseJacobian::zeros();
        pose_i
            .fixed_view_mut::<3, 3>(O_P, O_P)
            .copy_from(&(-ri_inv));
        pose_i.fixed_view_mut::<3, 3>(O_P, O_R).copy_from(&skew_symmetric(
            &(qi_inv
                * (0.5 * g * sum_dt * sum_dt + state_j.position
                    - state_i.position
                    - state_i.velocity * sum_dt)),
        ));
        pose_i.fixed_view_mut::<3, 3>(O_R, O_R).copy_from(&(-vector_block(
            &(quat_left(&(qj.conjugate() * qi)) * quat_right(&corrected.delta_q)),
        )));
        pose_i
            .fixed_view_mut::<3, 3>(O_V, O_R)
            .copy_from(&skew_symmetric(
                &(qi_inv * (g * sum_dt + state_j.velocity - state_i.velocity)),
            ));

        let mut speed_bias_i = SpeedBiasJacobian::zeros();
        speed_bias_i
            .fixed_view_mut::<3, 3>(O_P, 0)
            .copy_from(&(-ri_inv * sum_dt));
        speed_bias_i.fixed_view_mut::<3, 3>(O_P, 3).copy_from(&(-jac.dp_dba));
        speed_bias_i.fixed_view_mut::<3, 3>(O_P, 6).copy_from(&(-jac.dp_dbg));
        speed_bias_i.fixed_view_mut::<3, 3>(O_R, 6).copy_from(
            &(-vector_block(&quat_left(
                &(qj.conjugate() * qi * preint.state().delta_q.into_inner()),
            )) * jac.dq_dbg),
        );
        speed_bias_i.fixed_view_mut::<3, 3>(O_V, 0).copy_from(&(-ri_inv));
        speed_bias_i.fixed_view_mut::<3, 3>(O_V, 3).copy_from(&(-jac.dv_dba));
        speed_bias_i.fixed_view_mut::<3, 3>(O_V, 6).copy_from(&(-jac.dv_dbg));
        speed_bias_i.fixed_view_mut::<3, 3>(O_BA, 3).copy_from(&(-identity));
        speed_bias_i.fixed_view_mut::<3, 3>(O_BG, 6).copy_from(&(-identity));

        let mut pose_j = PoseJacobian::zeros();
        pose_j.fixed_view_mut::<3, 3>(O_P, O_P).copy_from(&ri_inv);
        pose_j.fixed_view_mut::<3, 3>(O_R, O_R).copy_from(&vector_block(&quat_left(
            &(corrected.delta_q_inverse() * qi.conjugate() * qj),
        )));

        let mut speed_bias_j = SpeedBiasJacobian::zeros();
        speed_bias_j.fixed_view_mut::<3, 3>(O_V, 0).copy_from(&ri_inv);
        speed_bias_j.fixed_view_mut::<3, 3>(O_BA, 3).copy_from(&identity);
        speed_bias_j.fixed_view_mut::<3, 3>(O_BG, 6).copy_from(&identity);

        (
            residual,
            ResidualJacobians {
                pose_i,
                speed_bias_i,
                pose_j,
                speed_bias_j,
            },
        )
    }
}
