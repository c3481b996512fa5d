//! Small rotation helpers shared by the integrator and the residual.
use nalgebra::{Matrix3, Matrix4, Quaternion, Vector3};

/// Create a skew-symmetric matrix from a 3D vector
pub fn skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v[2], v[1], v[2], 0.0, -v[0], -v[1], v[0], 0.0)
}

/// First-order quaternion for a small rotation vector: [1, θ/2]
///
/// Not normalized. Callers needing a unit quaternion must normalize.
pub fn delta_q(theta: &Vector3<f64>) -> Quaternion<f64> {
    let half = theta * 0.5;
    Quaternion::new(1.0, half.x, half.y, half.z)
}

/// Left-multiplication matrix: q ⊗ p = L(q) [p.w, p.xyz]
pub fn quat_left(q: &Quaternion<f64>) -> Matrix4<f64> {
    let v = q.imag();
    let mut m = Matrix4::zeros();
    m[(0, 0)] = q.w;
    m.fixed_view_mut::<1, 3>(0, 1).copy_from(&(-v.transpose()));
    m.fixed_view_mut::<3, 1>(1, 0).copy_from(&v);
    m.fixed_view_mut::<3, 3>(1, 1)
        .copy_from(&(Matrix3::identity() * q.w + skew_symmetric(&v)));
    m
}

/// Right-multiplication matrix: p ⊗ q = R(q) [p.w, p.xyz]
pub fn quat_right(q: &Quaternion<f64>) -> Matrix4<f64> {
    let v = q.imag();
    let mut m = Matrix4::zeros();
    m[(0, 0)] = q.w;
    m.fixed_view_mut::<1, 3>(0, 1).copy_from(&(-v.transpose()));
    m.fixed_view_mut::<3, 1>(1, 0).copy_from(&v);
    m.fixed_view_mut::<3, 3>(1, 1)
        .copy_from(&(Matrix3::identity() * q.w - skew_symmetric(&v)));
    m
}

/// Bottom-right 3×3 block of a quaternion product matrix
pub(crate) fn vector_block(m: &Matrix4<f64>) -> Matrix3<f64> {
    m.fixed_view::<3, 3>(1, 1).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn as_wxyz(q: &Quaternion<f64>) -> nalgebra::Vector4<f64> {
        nalgebra::Vector4::new(q.w, q.i, q.j, q.k)
    }

    #[test]
    fn test_skew_matches_cross_product() {
        let a = Vector3::new(0.3, -1.2, 2.0);
        let b = Vector3::new(-0.7, 0.4, 1.1);
        assert_abs_diff_eq!(skew_symmetric(&a) * b, a.cross(&b), epsilon = 1e-12);
    }

    #[test]
    fn test_delta_q_small_angle() {
        let theta = Vector3::new(0.002, -0.004, 0.006);
        let q = delta_q(&theta);
        assert_eq!(q.w, 1.0);
        assert_abs_diff_eq!(q.imag(), theta * 0.5, epsilon = 1e-15);
    }

    #[test]
    fn test_product_matrices() {
        let q = Quaternion::new(0.9, 0.1, -0.3, 0.2);
        let p = Quaternion::new(0.5, -0.4, 0.6, 0.1);

        assert_abs_diff_eq!(quat_left(&q) * as_wxyz(&p), as_wxyz(&(q * p)), epsilon = 1e-12);
        assert_abs_diff_eq!(quat_right(&q) * as_wxyz(&p), as_wxyz(&(p * q)), epsilon = 1e-12);
    }
}
