//! SO(3) - the special orthogonal group in 3D (rotations).
//!
//! Elements are stored as unit quaternions; tangent elements are axis-angle
//! vectors in R³ where the direction gives the rotation axis and the
//! magnitude the angle. Jacobian conventions are described in the
//! [module docs](crate::manifold).

use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};
use std::fmt;

/// SO(3) group element, internally a unit quaternion.
#[derive(Clone, Debug, PartialEq)]
pub struct SO3 {
    quaternion: UnitQuaternion<f64>,
}

impl fmt::Display for SO3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = self.quaternion.quaternion();
        write!(
            f,
            "SO3(quaternion: [w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4}])",
            q.w, q.i, q.j, q.k
        )
    }
}

/// SO(3) tangent element: an axis-angle vector in so(3).
#[derive(Clone, Debug, PartialEq)]
pub struct SO3Tangent {
    data: Vector3<f64>,
}

impl fmt::Display for SO3Tangent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "so3(axis-angle: [{:.4}, {:.4}, {:.4}])",
            self.data.x, self.data.y, self.data.z
        )
    }
}

impl SO3 {
    /// Create a new SO(3) element from a unit quaternion.
    pub fn new(quaternion: UnitQuaternion<f64>) -> Self {
        SO3 { quaternion }
    }

    /// Identity rotation.
    pub fn identity() -> Self {
        SO3 {
            quaternion: UnitQuaternion::identity(),
        }
    }

    /// Create SO(3) from Euler angles (roll, pitch, yaw).
    pub fn from_euler_angles(roll: f64, pitch: f64, yaw: f64) -> Self {
        SO3::new(UnitQuaternion::from_euler_angles(roll, pitch, yaw))
    }

    /// Create SO(3) from a scaled-axis (axis-angle) vector.
    pub fn from_scaled_axis(axis_angle: Vector3<f64>) -> Self {
        SO3::new(UnitQuaternion::from_scaled_axis(axis_angle))
    }

    /// The quaternion representation.
    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        self.quaternion
    }

    /// The rotation matrix (3x3).
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.quaternion.to_rotation_matrix().into_inner()
    }

    /// Inverse rotation: `R⁻¹ = Rᵀ` (quaternion conjugate).
    ///
    /// Right Jacobian of the inverse: `J_R⁻¹_R = -Ad(R) = -R`.
    pub fn inverse(&self, jacobian: Option<&mut Matrix3<f64>>) -> SO3 {
        if let Some(jac) = jacobian {
            *jac = -self.rotation_matrix();
        }
        SO3 {
            quaternion: self.quaternion.inverse(),
        }
    }

    /// Composition `R1 * R2`.
    ///
    /// Right Jacobians: `J_R1R2_R1 = R2ᵀ`, `J_R1R2_R2 = I`.
    pub fn compose(
        &self,
        other: &SO3,
        jacobian_self: Option<&mut Matrix3<f64>>,
        jacobian_other: Option<&mut Matrix3<f64>>,
    ) -> SO3 {
        if let Some(jac_self) = jacobian_self {
            *jac_self = other.rotation_matrix().transpose();
        }
        if let Some(jac_other) = jacobian_other {
            *jac_other = Matrix3::identity();
        }
        SO3 {
            quaternion: self.quaternion * other.quaternion,
        }
    }

    /// Relative rotation `R1⁻¹ * R2`.
    ///
    /// Right Jacobians, with `C = R1⁻¹ R2`: `J_C_R1 = -Cᵀ`, `J_C_R2 = I`.
    pub fn between(
        &self,
        other: &SO3,
        jacobian_self: Option<&mut Matrix3<f64>>,
        jacobian_other: Option<&mut Matrix3<f64>>,
    ) -> SO3 {
        let result = SO3 {
            quaternion: self.quaternion.inverse() * other.quaternion,
        };
        if let Some(jac_self) = jacobian_self {
            *jac_self = -result.rotation_matrix().transpose();
        }
        if let Some(jac_other) = jacobian_other {
            *jac_other = Matrix3::identity();
        }
        result
    }

    /// Rotate a vector: `R * v`.
    ///
    /// Right Jacobians: `J_Rv_R = -R [v]ₓ`, `J_Rv_v = R`.
    pub fn act(
        &self,
        vector: &Vector3<f64>,
        jacobian_self: Option<&mut Matrix3<f64>>,
        jacobian_vector: Option<&mut Matrix3<f64>>,
    ) -> Vector3<f64> {
        if let Some(jac_self) = jacobian_self {
            *jac_self = -self.rotation_matrix() * SO3Tangent::new(*vector).hat();
        }
        if let Some(jac_vector) = jacobian_vector {
            *jac_vector = self.rotation_matrix();
        }
        self.quaternion * vector
    }

    /// Logarithmic map: the axis-angle vector `Log(R)`.
    ///
    /// For unit quaternions: `θu = 2 atan2(||v||, w) v / ||v||`.
    /// Right Jacobian of the log: `J_Log(R)_R = Jr⁻¹(θ)`.
    pub fn log(&self, jacobian: Option<&mut Matrix3<f64>>) -> SO3Tangent {
        let q = self.quaternion.quaternion();
        let sin_angle_squared = q.i * q.i + q.j * q.j + q.k * q.k;

        let log_coeff = if sin_angle_squared > f64::EPSILON {
            let sin_angle = sin_angle_squared.sqrt();
            // Keep the returned angle in (-pi, pi] when w < 0.
            let two_angle = 2.0
                * if q.w < 0.0 {
                    f64::atan2(-sin_angle, -q.w)
                } else {
                    f64::atan2(sin_angle, q.w)
                };
            two_angle / sin_angle
        } else {
            2.0
        };

        let result = SO3Tangent::new(Vector3::new(
            q.i * log_coeff,
            q.j * log_coeff,
            q.k * log_coeff,
        ));

        if let Some(jac) = jacobian {
            *jac = result.right_jacobian_inv();
        }

        result
    }

    /// Adjoint matrix: for SO(3) this is the rotation matrix itself.
    pub fn adjoint(&self) -> Matrix3<f64> {
        self.rotation_matrix()
    }

    /// A uniformly random rotation, for tests.
    pub fn random() -> SO3 {
        use rand::Rng;
        let mut rng = rand::rng();
        SO3::from_scaled_axis(Vector3::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
        ))
    }
}

impl SO3Tangent {
    /// Create a tangent element from an axis-angle vector.
    pub fn new(axis_angle: Vector3<f64>) -> Self {
        SO3Tangent { data: axis_angle }
    }

    /// Zero tangent vector.
    pub fn zero() -> Self {
        SO3Tangent::new(Vector3::zeros())
    }

    /// The axis-angle coefficients.
    pub fn coeffs(&self) -> Vector3<f64> {
        self.data
    }

    /// The rotation angle (vector norm).
    pub fn angle(&self) -> f64 {
        self.data.norm()
    }

    /// Hat operator: the skew-symmetric matrix `[θ]ₓ`.
    pub fn hat(&self) -> Matrix3<f64> {
        Matrix3::new(
            0.0,
            -self.data.z,
            self.data.y,
            self.data.z,
            0.0,
            -self.data.x,
            -self.data.y,
            self.data.x,
            0.0,
        )
    }

    /// Exponential map: `Exp(θ)` as an SO(3) element.
    ///
    /// Right Jacobian of the exp: `J_Exp(θ)_θ = Jr(θ)`.
    pub fn exp(&self, jacobian: Option<&mut Matrix3<f64>>) -> SO3 {
        if let Some(jac) = jacobian {
            *jac = self.right_jacobian();
        }
        SO3::from_scaled_axis(self.data)
    }

    /// Right Jacobian `Jr(θ) = Jl(-θ)`.
    ///
    /// `Jr(θ) = I - (1 - cos θ)/θ² [θ]ₓ + (θ - sin θ)/θ³ [θ]ₓ²`
    pub fn right_jacobian(&self) -> Matrix3<f64> {
        SO3Tangent::new(-self.data).left_jacobian()
    }

    /// Left Jacobian of the SO(3) exponential.
    ///
    /// `Jl(θ) = I + (1 - cos θ)/θ² [θ]ₓ + (θ - sin θ)/θ³ [θ]ₓ²`
    pub fn left_jacobian(&self) -> Matrix3<f64> {
        let theta_sq = self.data.norm_squared();
        let skew = self.hat();

        if theta_sq <= f64::EPSILON {
            Matrix3::identity() + 0.5 * skew
        } else {
            let theta = theta_sq.sqrt();
            Matrix3::identity()
                + (1.0 - theta.cos()) / theta_sq * skew
                + (theta - theta.sin()) / (theta_sq * theta) * skew * skew
        }
    }

    /// Inverse right Jacobian `Jr⁻¹(θ) = Jl⁻¹(-θ)`.
    pub fn right_jacobian_inv(&self) -> Matrix3<f64> {
        SO3Tangent::new(-self.data).left_jacobian_inv()
    }

    /// Inverse left Jacobian.
    ///
    /// `Jl⁻¹(θ) = I - (1/2) [θ]ₓ + (1/θ² - (1 + cos θ)/(2θ sin θ)) [θ]ₓ²`
    pub fn left_jacobian_inv(&self) -> Matrix3<f64> {
        let theta_sq = self.data.norm_squared();
        let skew = self.hat();

        if theta_sq <= f64::EPSILON {
            Matrix3::identity() - 0.5 * skew
        } else {
            let theta = theta_sq.sqrt();
            Matrix3::identity() - 0.5 * skew
                + (1.0 / theta_sq - (1.0 + theta.cos()) / (2.0 * theta * theta.sin()))
                    * skew
                    * skew
        }
    }

    /// Whether the tangent vector is approximately zero.
    pub fn is_zero(&self, tolerance: f64) -> bool {
        self.data.norm() < tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const TOLERANCE: f64 = 1e-9;
    const FD_EPSILON: f64 = 1e-7;

    #[test]
    fn test_identity_log_is_zero() {
        let so3 = SO3::identity();
        let tangent = so3.log(None);
        assert!(tangent.is_zero(TOLERANCE));
    }

    #[test]
    fn test_exp_log_roundtrip() {
        let theta = SO3Tangent::new(Vector3::new(0.3, -0.2, 0.7));
        let so3 = theta.exp(None);
        let back = so3.log(None);
        assert!((back.coeffs() - theta.coeffs()).norm() < TOLERANCE);
    }

    #[test]
    fn test_log_near_pi() {
        let theta = SO3Tangent::new(Vector3::new(0.0, 0.0, PI - 1e-6));
        let so3 = theta.exp(None);
        let back = so3.log(None);
        assert!((back.coeffs() - theta.coeffs()).norm() < 1e-6);
    }

    #[test]
    fn test_compose_with_inverse_is_identity() {
        let so3 = SO3::from_euler_angles(0.1, -0.4, 1.2);
        let inv = so3.inverse(None);
        let result = so3.compose(&inv, None, None);
        assert!(result.log(None).is_zero(TOLERANCE));
    }

    #[test]
    fn test_between_matches_inverse_compose() {
        let a = SO3::from_euler_angles(0.2, 0.1, -0.3);
        let b = SO3::from_euler_angles(-0.1, 0.5, 0.2);
        let between = a.between(&b, None, None);
        let manual = a.inverse(None).compose(&b, None, None);
        assert!((between.rotation_matrix() - manual.rotation_matrix()).norm() < TOLERANCE);
    }

    #[test]
    fn test_jacobian_left_times_left_inv_is_identity() {
        let theta = SO3Tangent::new(Vector3::new(0.4, -0.1, 0.8));
        let product = theta.left_jacobian() * theta.left_jacobian_inv();
        assert!((product - Matrix3::identity()).norm() < TOLERANCE);
    }

    #[test]
    fn test_log_jacobian_numerical() {
        // f(R) = Log(R); perturb R on the right, compare against Jr^{-1}.
        let so3 = SO3::from_euler_angles(0.3, -0.2, 0.5);
        let mut jacobian = Matrix3::zeros();
        let tangent = so3.log(Some(&mut jacobian));

        let mut jacobian_fd = Matrix3::zeros();
        for i in 0..3 {
            let mut delta = Vector3::zeros();
            delta[i] = FD_EPSILON;
            let perturbed = so3.compose(&SO3Tangent::new(delta).exp(None), None, None);
            let diff = (perturbed.log(None).coeffs() - tangent.coeffs()) / FD_EPSILON;
            jacobian_fd.set_column(i, &diff);
        }
        assert!(
            (jacobian - jacobian_fd).norm() < 1e-6,
            "difference norm: {}",
            (jacobian - jacobian_fd).norm()
        );
    }

    #[test]
    fn test_act_jacobian_numerical() {
        let so3 = SO3::from_euler_angles(-0.2, 0.4, 0.1);
        let v = Vector3::new(1.0, -2.0, 0.5);

        let mut jac_self = Matrix3::zeros();
        let mut jac_vector = Matrix3::zeros();
        let rotated = so3.act(&v, Some(&mut jac_self), Some(&mut jac_vector));

        let mut jac_fd = Matrix3::zeros();
        for i in 0..3 {
            let mut delta = Vector3::zeros();
            delta[i] = FD_EPSILON;
            let perturbed = so3.compose(&SO3Tangent::new(delta).exp(None), None, None);
            let diff = (perturbed.act(&v, None, None) - rotated) / FD_EPSILON;
            jac_fd.set_column(i, &diff);
        }
        assert!((jac_self - jac_fd).norm() < 1e-6);
        assert!((jac_vector - so3.rotation_matrix()).norm() < TOLERANCE);
    }

    #[test]
    fn test_random_is_normalized() {
        let so3 = SO3::random();
        assert!((so3.quaternion().norm() - 1.0).abs() < TOLERANCE);
    }
}
