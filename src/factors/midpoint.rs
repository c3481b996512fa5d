/// Mid-point discretization of the preintegration dynamics
///
/// One step advances the nominal increments from sample k to k+1 using the
/// average of the endpoint derivatives, and linearizes the same step into the
/// discrete error-state transition F (15×15) and noise input V (15×18).
///
/// Error-state order: [δp, δθ, δv, δba, δbg].
/// Noise order: [n_a(k), n_g(k), n_a(k+1), n_g(k+1), n_ba, n_bg].
use nalgebra::{Matrix3, UnitQuaternion, Vector3};

use super::rotation::skew_symmetric;
use crate::types::{
    BiasEstimate, NoiseInputMat, NoiseMat18, NominalState, StateMat15, N_ACC_0, N_ACC_1,
    N_BA_WALK, N_BG_WALK, N_GYR_0, N_GYR_1, O_BA, O_BG, O_P, O_R, O_V,
};

/// Raw endpoint readings for one step
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepInput {
    pub dt: f64,
    pub acc_0: Vector3<f64>,
    pub gyr_0: Vector3<f64>,
    pub acc_1: Vector3<f64>,
    pub gyr_1: Vector3<f64>,
}

/// Result of one mid-point step
#[derive(Clone, Debug, PartialEq)]
pub struct MidpointStep {
    /// Nominal increments after the step
    pub state: NominalState,

    /// Discrete error-state transition F
    pub transition: StateMat15,

    /// Discrete noise input Jacobian V
    pub noise_input: NoiseInputMat,
}

/// Integrate one step and linearize it around the nominal trajectory
pub fn integrate_midpoint(
    input: &StepInput,
    state: &NominalState,
    bias: &BiasEstimate,
) -> MidpointStep {
    let dt = input.dt;
    let dt2 = dt * dt;

    // Bias-compensated endpoint readings
    let a_0 = input.acc_0 - bias.ba;
    let a_1 = input.acc_1 - bias.ba;
    let w = 0.5 * (input.gyr_0 + input.gyr_1) - bias.bg;

    // a(k) rotated with the orientation before the step
    let un_acc_0 = state.delta_q * a_0;

    // gamma(k+1) = gamma(k) ⊗ [1, w*dt/2]
    let half = w * dt * 0.5;
    let increment = nalgebra::Quaternion::new(1.0, half.x, half.y, half.z);
    let delta_q = UnitQuaternion::new_normalize(state.delta_q.into_inner() * increment);

    // a(k+1) rotated with the orientation after the step
    let un_acc_1 = delta_q * a_1;
    let un_acc = 0.5 * (un_acc_0 + un_acc_1);

    let next = NominalState {
        delta_p: state.delta_p + state.delta_v * dt + 0.5 * un_acc * dt2,
        delta_v: state.delta_v + un_acc * dt,
        delta_q,
        sum_dt: state.sum_dt + dt,
    };

    let r_0 = state.delta_q.to_rotation_matrix().into_inner();
    let r_1 = delta_q.to_rotation_matrix().into_inner();
    let w_x = skew_symmetric(&w);
    let a_0_x = skew_symmetric(&a_0);
    let a_1_x = skew_symmetric(&a_1);
    let identity = Matrix3::<f64>::identity();
    let rot_step = identity - w_x * dt;

    let mut f = StateMat15::zeros();
    set_block(&mut f, O_P, O_P, &identity);
    set_block(
        &mut f,
        O_P,
        O_R,
        &(-0.25 * r_0 * a_0_x * dt2 - 0.25 * r_1 * a_1_x * rot_step * dt2),
    );
    set_block(&mut f, O_P, O_V, &(identity * dt));
    set_block(&mut f, O_P, O_BA, &(-0.25 * (r_0 + r_1) * dt2));
    set_block(&mut f, O_P, O_BG, &(0.25 * r_1 * a_1_x * dt2 * dt));
    set_block(&mut f, O_R, O_R, &rot_step);
    set_block(&mut f, O_R, O_BG, &(-identity * dt));
    set_block(
        &mut f,
        O_V,
        O_R,
        &(-0.5 * r_0 * a_0_x * dt - 0.5 * r_1 * a_1_x * rot_step * dt),
    );
    set_block(&mut f, O_V, O_V, &identity);
    set_block(&mut f, O_V, O_BA, &(-0.5 * (r_0 + r_1) * dt));
    set_block(&mut f, O_V, O_BG, &(0.5 * r_1 * a_1_x * dt2));
    set_block(&mut f, O_BA, O_BA, &identity);
    set_block(&mut f, O_BG, O_BG, &identity);

    // Gyro noise enters position/velocity through the rotated a(k+1)
    let p_gyr = -0.125 * r_1 * a_1_x * dt2 * dt;
    let v_gyr = -0.25 * r_1 * a_1_x * dt2;

    let mut v = NoiseInputMat::zeros();
    set_block(&mut v, O_P, N_ACC_0, &(0.25 * r_0 * dt2));
    set_block(&mut v, O_P, N_GYR_0, &p_gyr);
    set_block(&mut v, O_P, N_ACC_1, &(0.25 * r_1 * dt2));
    set_block(&mut v, O_P, N_GYR_1, &p_gyr);
    set_block(&mut v, O_R, N_GYR_0, &(0.5 * identity * dt));
    set_block(&mut v, O_R, N_GYR_1, &(0.5 * identity * dt));
    set_block(&mut v, O_V, N_ACC_0, &(0.5 * r_0 * dt));
    set_block(&mut v, O_V, N_GYR_0, &v_gyr);
    set_block(&mut v, O_V, N_ACC_1, &(0.5 * r_1 * dt));
    set_block(&mut v, O_V, N_GYR_1, &v_gyr);
    set_block(&mut v, O_BA, N_BA_WALK, &(identity * dt));
    set_block(&mut v, O_BG, N_BG_WALK, &(identity * dt));

    MidpointStep {
        state: next,
        transition: f,
        noise_input: v,
    }
}

/// Cumulative bias Jacobian and covariance of the window
#[derive(Clone, Debug, PartialEq)]
pub struct Propagation {
    pub jacobian: StateMat15,
    pub covariance: StateMat15,
}

impl Propagation {
    /// Identity Jacobian, zero covariance
    pub fn identity() -> Self {
        Self {
            jacobian: StateMat15::identity(),
            covariance: StateMat15::zeros(),
        }
    }

    /// J' = F J,  P' = F P Fᵀ + V Q Vᵀ
    pub fn advance(&self, step: &MidpointStep, noise: &NoiseMat18) -> Self {
        let f = &step.transition;
        let v = &step.noise_input;
        Self {
            jacobian: f * self.jacobian,
            covariance: f * self.covariance * f.transpose() + v * noise * v.transpose(),
        }
    }
}

impl Default for Propagation {
    fn default() -> Self {
        Self::identity()
    }
}

fn set_block<const C: usize>(
    m: &mut nalgebra::SMatrix<f64, 15, C>,
    row: usize,
    col: usize,
    block: &Matrix3<f64>,
) {
    m.fixed_view_mut::<3, 3>(row, col).copy_from(block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NoiseDensities;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn input(dt: f64, acc: Vector3<f64>, gyr: Vector3<f64>) -> StepInput {
        StepInput {
            dt,
            acc_0: acc,
            gyr_0: gyr,
            acc_1: acc,
            gyr_1: gyr,
        }
    }

    #[test]
    fn test_static_step_integrates_gravity() {
        let step = integrate_midpoint(
            &input(0.1, Vector3::new(0.0, 0.0, 9.81), Vector3::zeros()),
            &NominalState::identity(),
            &BiasEstimate::zeros(),
        );

        assert_abs_diff_eq!(step.state.delta_v, Vector3::new(0.0, 0.0, 0.981), epsilon = 1e-12);
        assert_abs_diff_eq!(step.state.delta_p, Vector3::new(0.0, 0.0, 0.04905), epsilon = 1e-12);
        assert_relative_eq!(step.state.delta_q.angle(), 0.0);
        assert_relative_eq!(step.state.sum_dt, 0.1);
    }

    #[test]
    fn test_constant_rate_rotation() {
        // 0.5 rad/s about z for 0.02 s -> angle 2*atan(0.005)
        let step = integrate_midpoint(
            &input(0.02, Vector3::zeros(), Vector3::new(0.0, 0.0, 0.5)),
            &NominalState::identity(),
            &BiasEstimate::zeros(),
        );

        let expected = 2.0 * (0.005_f64).atan();
        assert_relative_eq!(step.state.delta_q.angle(), expected, epsilon = 1e-12);
        assert_relative_eq!(step.state.delta_q.quaternion().norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_bias_compensation() {
        let bias = BiasEstimate::new(Vector3::new(0.1, 0.0, 0.0), Vector3::new(0.0, 0.0, 0.2));
        let step = integrate_midpoint(
            &input(0.01, Vector3::new(0.1, 0.0, 0.0), Vector3::new(0.0, 0.0, 0.2)),
            &NominalState::identity(),
            &bias,
        );

        assert_abs_diff_eq!(step.state.delta_v, Vector3::zeros(), epsilon = 1e-15);
        assert_abs_diff_eq!(step.state.delta_p, Vector3::zeros(), epsilon = 1e-15);
        assert_relative_eq!(step.state.delta_q.angle(), 0.0);
    }

    #[test]
    fn test_transition_structure() {
        let dt = 0.005;
        let step = integrate_midpoint(
            &input(dt, Vector3::new(0.2, -0.1, 9.7), Vector3::new(0.01, 0.02, -0.03)),
            &NominalState::identity(),
            &BiasEstimate::zeros(),
        );
        let f = &step.transition;

        assert_abs_diff_eq!(
            f.fixed_view::<3, 3>(O_P, O_V).into_owned(),
            Matrix3::identity() * dt,
            epsilon = 1e-15
        );
        assert_abs_diff_eq!(
            f.fixed_view::<3, 3>(O_R, O_BG).into_owned(),
            -Matrix3::identity() * dt,
            epsilon = 1e-15
        );
        assert_eq!(f.fixed_view::<3, 3>(O_BA, O_BA).into_owned(), Matrix3::identity());
        assert_eq!(f.fixed_view::<3, 3>(O_BG, O_BG).into_owned(), Matrix3::identity());
        // Biases are not coupled to the motion states within a step
        assert_eq!(f.fixed_view::<6, 9>(O_BA, O_P).into_owned().norm(), 0.0);

        let v = &step.noise_input;
        assert_abs_diff_eq!(
            v.fixed_view::<3, 3>(O_BG, N_BG_WALK).into_owned(),
            Matrix3::identity() * dt,
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_advance_keeps_covariance_symmetric() {
        let noise = NoiseDensities::default().noise_matrix();
        let mut propagation = Propagation::identity();
        let mut state = NominalState::identity();
        for k in 0..50 {
            let t = k as f64 * 0.005;
            let step = integrate_midpoint(
                &input(
                    0.005,
                    Vector3::new(t.sin(), 0.3, 9.81),
                    Vector3::new(0.1, -0.2 * t, 0.3),
                ),
                &state,
                &BiasEstimate::zeros(),
            );
            propagation = propagation.advance(&step, &noise);
            state = step.state;
        }

        let asym = (propagation.covariance - propagation.covariance.transpose()).norm();
        assert!(asym < 1e-12 * propagation.covariance.norm().max(1e-30));
        assert!((0..15).all(|i| propagation.covariance[(i, i)] > 0.0));
    }
}
