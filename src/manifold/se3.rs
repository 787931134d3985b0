//! SE(3) - the special Euclidean group in 3D (rigid-body transformations).
//!
//! Elements are stored as an SO(3) rotation plus a translation vector.
//! Tangent elements are ordered `[rho(3), theta(3)]` with the translational
//! component first. Jacobian conventions are described in the
//! [module docs](crate::manifold); the SE(3) left/right Jacobians use the
//! Q(ρ, θ) block of Barfoot, "State Estimation for Robotics", eq. 7.86.

use nalgebra::{Isometry3, Matrix3, Matrix6, Translation3, UnitQuaternion, Vector3, Vector6};
use std::fmt;

use crate::manifold::so3::{SO3, SO3Tangent};

/// SE(3) group element: a rotation and a translation.
#[derive(Clone, Debug, PartialEq)]
pub struct SE3 {
    rotation: SO3,
    translation: Vector3<f64>,
}

impl fmt::Display for SE3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.translation;
        let q = self.rotation.quaternion();
        write!(
            f,
            "SE3(translation: [{:.4}, {:.4}, {:.4}], rotation: [w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4}])",
            t.x, t.y, t.z, q.w, q.i, q.j, q.k
        )
    }
}

/// SE(3) tangent element `[rho, theta]` in se(3).
#[derive(Clone, Debug, PartialEq)]
pub struct SE3Tangent {
    data: Vector6<f64>,
}

impl fmt::Display for SE3Tangent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rho = self.rho();
        let theta = self.theta();
        write!(
            f,
            "se3(rho: [{:.4}, {:.4}, {:.4}], theta: [{:.4}, {:.4}, {:.4}])",
            rho.x, rho.y, rho.z, theta.x, theta.y, theta.z
        )
    }
}

impl SE3 {
    /// Create a new SE(3) element from translation and rotation.
    pub fn new(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        SE3 {
            rotation: SO3::new(rotation),
            translation,
        }
    }

    /// Identity transformation.
    pub fn identity() -> Self {
        SE3 {
            rotation: SO3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Create SE(3) from SO(3) and translation components.
    pub fn from_translation_so3(translation: Vector3<f64>, rotation: SO3) -> Self {
        SE3 {
            rotation,
            translation,
        }
    }

    /// Create SE(3) from translation components and Euler angles.
    pub fn from_translation_euler(x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Self {
        SE3::new(
            Vector3::new(x, y, z),
            UnitQuaternion::from_euler_angles(roll, pitch, yaw),
        )
    }

    /// A pure translation (identity rotation).
    pub fn from_translation(translation: Vector3<f64>) -> Self {
        SE3::from_translation_so3(translation, SO3::identity())
    }

    /// The translation part.
    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    /// The rotation part as SO(3).
    pub fn rotation(&self) -> SO3 {
        self.rotation.clone()
    }

    /// The rotation matrix (3x3).
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.rotation_matrix()
    }

    /// As an `Isometry3` (convenience for interop).
    pub fn isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.translation),
            self.rotation.quaternion(),
        )
    }

    /// Inverse transformation `M⁻¹ = [Rᵀ, -Rᵀt]`.
    ///
    /// Right Jacobian of the inverse: `J_M⁻¹_M = -Ad(M)`.
    pub fn inverse(&self, jacobian: Option<&mut Matrix6<f64>>) -> SE3 {
        if let Some(jac) = jacobian {
            *jac = -self.adjoint();
        }
        let rot_inv = self.rotation.inverse(None);
        let trans_inv = -rot_inv.act(&self.translation, None, None);
        SE3::from_translation_so3(trans_inv, rot_inv)
    }

    /// Composition `M_a * M_b = [R_a R_b, R_a t_b + t_a]`.
    ///
    /// Right Jacobians: `J_MaMb_Ma = Ad(M_b⁻¹)`, `J_MaMb_Mb = I`.
    pub fn compose(
        &self,
        other: &SE3,
        jacobian_self: Option<&mut Matrix6<f64>>,
        jacobian_other: Option<&mut Matrix6<f64>>,
    ) -> SE3 {
        if let Some(jac_self) = jacobian_self {
            *jac_self = other.inverse(None).adjoint();
        }
        if let Some(jac_other) = jacobian_other {
            *jac_other = Matrix6::identity();
        }
        let rotation = self.rotation.compose(&other.rotation, None, None);
        let translation = self.rotation.act(&other.translation, None, None) + self.translation;
        SE3::from_translation_so3(translation, rotation)
    }

    /// Relative transformation `M_a⁻¹ * M_b`.
    ///
    /// Right Jacobians, with `D = M_a⁻¹ M_b`: `J_D_Ma = -Ad(D⁻¹)`, `J_D_Mb = I`.
    pub fn between(
        &self,
        other: &SE3,
        jacobian_self: Option<&mut Matrix6<f64>>,
        jacobian_other: Option<&mut Matrix6<f64>>,
    ) -> SE3 {
        let result = self.inverse(None).compose(other, None, None);
        if let Some(jac_self) = jacobian_self {
            *jac_self = -result.inverse(None).adjoint();
        }
        if let Some(jac_other) = jacobian_other {
            *jac_other = Matrix6::identity();
        }
        result
    }

    /// Transform a point: `R v + t`.
    ///
    /// Right Jacobians: `J_Mv_M = [R | -R [v]ₓ]` (3x6), `J_Mv_v = R`.
    pub fn act(
        &self,
        vector: &Vector3<f64>,
        jacobian_self: Option<&mut nalgebra::Matrix3x6<f64>>,
        jacobian_vector: Option<&mut Matrix3<f64>>,
    ) -> Vector3<f64> {
        let rotation_matrix = self.rotation.rotation_matrix();
        if let Some(jac_self) = jacobian_self {
            jac_self
                .fixed_view_mut::<3, 3>(0, 0)
                .copy_from(&rotation_matrix);
            jac_self
                .fixed_view_mut::<3, 3>(0, 3)
                .copy_from(&(-rotation_matrix * SO3Tangent::new(*vector).hat()));
        }
        if let Some(jac_vector) = jacobian_vector {
            *jac_vector = rotation_matrix;
        }
        self.rotation.act(vector, None, None) + self.translation
    }

    /// Logarithmic map: `τ = [Jl⁻¹(θ) t, Log(R)]`.
    ///
    /// Right Jacobian of the log: `J_Log(M)_M = Jr⁻¹(τ)`.
    pub fn log(&self, jacobian: Option<&mut Matrix6<f64>>) -> SE3Tangent {
        let theta = self.rotation.log(None);
        let rho = theta.left_jacobian_inv() * self.translation;
        let result = SE3Tangent::new(rho, theta.coeffs());
        if let Some(jac) = jacobian {
            *jac = result.right_jacobian_inv();
        }
        result
    }

    /// Adjoint matrix `Ad(M) = [[R, [t]ₓ R], [0, R]]`.
    pub fn adjoint(&self) -> Matrix6<f64> {
        let rotation_matrix = self.rotation.rotation_matrix();
        let mut adjoint = Matrix6::zeros();
        adjoint
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&rotation_matrix);
        adjoint
            .fixed_view_mut::<3, 3>(3, 3)
            .copy_from(&rotation_matrix);
        adjoint
            .fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(SO3Tangent::new(self.translation).hat() * rotation_matrix));
        adjoint
    }

    /// A random transformation with translation in [-1, 1]³, for tests.
    pub fn random() -> SE3 {
        use rand::Rng;
        let mut rng = rand::rng();
        let translation = Vector3::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
        );
        SE3::from_translation_so3(translation, SO3::random())
    }
}

impl SE3Tangent {
    /// Create a tangent element from rho (translational) and theta
    /// (rotational) components.
    pub fn new(rho: Vector3<f64>, theta: Vector3<f64>) -> Self {
        let mut data = Vector6::zeros();
        data.fixed_rows_mut::<3>(0).copy_from(&rho);
        data.fixed_rows_mut::<3>(3).copy_from(&theta);
        SE3Tangent { data }
    }

    /// Create a tangent element from a stacked 6-vector `[rho, theta]`.
    pub fn from_vector(data: Vector6<f64>) -> Self {
        SE3Tangent { data }
    }

    /// Zero tangent vector.
    pub fn zero() -> Self {
        SE3Tangent {
            data: Vector6::zeros(),
        }
    }

    /// The translational component.
    pub fn rho(&self) -> Vector3<f64> {
        self.data.fixed_rows::<3>(0).into_owned()
    }

    /// The rotational component.
    pub fn theta(&self) -> Vector3<f64> {
        self.data.fixed_rows::<3>(3).into_owned()
    }

    /// The stacked coefficient vector `[rho, theta]`.
    pub fn vector(&self) -> Vector6<f64> {
        self.data
    }

    /// Exponential map: `Exp(τ) = [Exp(θ), Jl(θ) ρ]`.
    ///
    /// Right Jacobian of the exp: `J_Exp(τ)_τ = Jr(τ)`.
    pub fn exp(&self, jacobian: Option<&mut Matrix6<f64>>) -> SE3 {
        let theta = SO3Tangent::new(self.theta());
        let rotation = theta.exp(None);
        let translation = theta.left_jacobian() * self.rho();
        if let Some(jac) = jacobian {
            *jac = self.right_jacobian();
        }
        SE3::from_translation_so3(translation, rotation)
    }

    /// Right Jacobian `Jr(τ) = Jl(-τ)`.
    pub fn right_jacobian(&self) -> Matrix6<f64> {
        SE3Tangent::new(-self.rho(), -self.theta()).left_jacobian()
    }

    /// Left Jacobian `Jl(τ) = [[Jl(θ), Q(ρ, θ)], [0, Jl(θ)]]`.
    pub fn left_jacobian(&self) -> Matrix6<f64> {
        let theta_left = SO3Tangent::new(self.theta()).left_jacobian();
        let mut jac = Matrix6::zeros();
        jac.fixed_view_mut::<3, 3>(0, 0).copy_from(&theta_left);
        jac.fixed_view_mut::<3, 3>(3, 3).copy_from(&theta_left);
        jac.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&Self::q_matrix(&self.rho(), &self.theta()));
        jac
    }

    /// Inverse right Jacobian `Jr⁻¹(τ) = Jl⁻¹(-τ)`.
    pub fn right_jacobian_inv(&self) -> Matrix6<f64> {
        SE3Tangent::new(-self.rho(), -self.theta()).left_jacobian_inv()
    }

    /// Inverse left Jacobian
    /// `Jl⁻¹(τ) = [[Jl⁻¹(θ), -Jl⁻¹(θ) Q Jl⁻¹(θ)], [0, Jl⁻¹(θ)]]`.
    pub fn left_jacobian_inv(&self) -> Matrix6<f64> {
        let theta_left_inv = SO3Tangent::new(self.theta()).left_jacobian_inv();
        let q = Self::q_matrix(&self.rho(), &self.theta());
        let mut jac = Matrix6::zeros();
        jac.fixed_view_mut::<3, 3>(0, 0).copy_from(&theta_left_inv);
        jac.fixed_view_mut::<3, 3>(3, 3).copy_from(&theta_left_inv);
        jac.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(-theta_left_inv * q * theta_left_inv));
        jac
    }

    /// The Q(ρ, θ) block of the SE(3) left Jacobian (Barfoot eq. 7.86):
    ///
    /// ```text
    /// Q = 1/2 ρₓ
    ///   + (θ - sin θ)/θ³ (θₓρₓ + ρₓθₓ + θₓρₓθₓ)
    ///   - (1 - θ²/2 - cos θ)/θ⁴ (θₓ²ρₓ + ρₓθₓ² - 3 θₓρₓθₓ)
    ///   - 1/2 ((1 - θ²/2 - cos θ)/θ⁴ - 3 (θ - sin θ - θ³/6)/θ⁵)
    ///         (θₓρₓθₓ² + θₓ²ρₓθₓ)
    /// ```
    fn q_matrix(rho: &Vector3<f64>, theta: &Vector3<f64>) -> Matrix3<f64> {
        let rho_skew = SO3Tangent::new(*rho).hat();
        let theta_skew = SO3Tangent::new(*theta).hat();
        let theta_sq = theta.norm_squared();

        let (b, c, e) = if theta_sq <= f64::EPSILON {
            // Taylor expansions of the three coefficients around zero.
            (
                1.0 / 6.0 - theta_sq / 120.0,
                -1.0 / 24.0 + theta_sq / 720.0,
                -1.0 / 60.0,
            )
        } else {
            let theta_norm = theta_sq.sqrt();
            let theta_cube = theta_sq * theta_norm;
            let sin_theta = theta_norm.sin();
            let cos_theta = theta_norm.cos();
            let b = (theta_norm - sin_theta) / theta_cube;
            let c = (1.0 - 0.5 * theta_sq - cos_theta) / (theta_sq * theta_sq);
            let e = c - 3.0 * (theta_norm - sin_theta - theta_cube / 6.0)
                / (theta_sq * theta_cube);
            (b, c, e)
        };

        let ts_rs = theta_skew * rho_skew;
        let rs_ts = rho_skew * theta_skew;
        let ts_rs_ts = ts_rs * theta_skew;

        let m2 = ts_rs + rs_ts + ts_rs_ts;
        let m3 = theta_skew * ts_rs + rs_ts * theta_skew - 3.0 * ts_rs_ts;
        let m4 = ts_rs_ts * theta_skew + theta_skew * ts_rs_ts;

        0.5 * rho_skew + b * m2 - c * m3 - 0.5 * e * m4
    }

    /// Whether the tangent vector is approximately zero.
    pub fn is_zero(&self, tolerance: f64) -> bool {
        self.data.norm() < tolerance
    }
}
