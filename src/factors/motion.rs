//! Motion-model soft constraints between pose variables.
//!
//! Both factors here whiten a geodesic SE(3) residual with a fixed noise
//! model supplied at construction. There is no hypothesis selection; they
//! share the factor abstraction and data model with the detection factor but
//! are otherwise plain Gaussian constraints.
//!
//! - [`ConstantVelocityFactor`]: `r = Log(prev⁻¹ ∘ next)` — a soft prior
//!   that consecutive poses should not change much, standing in for an
//!   unmodeled constant-velocity assumption.
//! - [`StablePoseFactor`]: `r = Log((prev ∘ velocity)⁻¹ ∘ next)` — makes the
//!   velocity a variable the solver may adjust to keep the motion model
//!   consistent with the independently estimated trajectory.

use std::fmt;

use nalgebra::{DMatrix, DVector, Matrix6};

use crate::error::{FactorError, FactorResult};
use crate::factors::{Factor, LinearFactor};
use crate::manifold::se3::SE3Tangent;
use crate::noise;
use crate::values::{default_key_formatter, Key, KeyFormatter, Values};

fn dynamic(matrix: &Matrix6<f64>) -> DMatrix<f64> {
    DMatrix::from_column_slice(6, 6, matrix.as_slice())
}

fn dynamic_vector(tangent: &SE3Tangent) -> DVector<f64> {
    DVector::from_column_slice(tangent.vector().as_slice())
}

/// Soft constraint penalizing relative motion between two consecutive poses.
///
/// The residual is the geodesic difference between the identity transform
/// and `prev⁻¹ ∘ next`, whitened by the factor's noise model; it vanishes
/// exactly when the two poses coincide.
#[derive(Clone, Debug)]
pub struct ConstantVelocityFactor {
    keys: [Key; 2],
    noise: noise::Gaussian,
}

impl ConstantVelocityFactor {
    /// Construct between two pose keys with a 6-dimensional noise model.
    pub fn new(
        previous_pose_key: Key,
        next_pose_key: Key,
        noise: noise::Gaussian,
    ) -> FactorResult<Self> {
        if noise.dim() != 6 {
            return Err(FactorError::InvalidCovariance(format!(
                "constant-velocity noise must be 6-dimensional, got {}",
                noise.dim()
            )));
        }
        Ok(ConstantVelocityFactor {
            keys: [previous_pose_key, next_pose_key],
            noise,
        })
    }

    pub fn previous_pose_key(&self) -> Key {
        self.keys[0]
    }

    pub fn next_pose_key(&self) -> Key {
        self.keys[1]
    }

    pub fn noise(&self) -> &noise::Gaussian {
        &self.noise
    }

    /// Compare keys and noise model within a tolerance.
    pub fn equals(&self, other: &ConstantVelocityFactor, tol: f64) -> bool {
        self.keys == other.keys && self.noise.equals(&other.noise, tol)
    }

    /// Log a human-readable description through `tracing`.
    pub fn print(&self, label: &str, key_formatter: KeyFormatter) {
        tracing::info!("{label}{}", self.describe(key_formatter));
    }

    fn describe(&self, key_formatter: KeyFormatter) -> String {
        format!(
            "ConstantVelocityFactor({}, {})",
            key_formatter(self.keys[0]),
            key_formatter(self.keys[1]),
        )
    }

    fn unwhitened_residual(&self, values: &Values) -> FactorResult<SE3Tangent> {
        let previous = values.pose(self.keys[0])?;
        let next = values.pose(self.keys[1])?;
        Ok(previous.between(next, None, None).log(None))
    }
}

impl Factor for ConstantVelocityFactor {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        6
    }

    fn error(&self, values: &Values) -> FactorResult<f64> {
        let residual = self.noise.whiten(&dynamic_vector(&self.unwhitened_residual(values)?));
        Ok(residual.norm_squared())
    }

    fn linearize(&self, values: &Values) -> FactorResult<LinearFactor> {
        let previous = values.pose(self.keys[0])?;
        let next = values.pose(self.keys[1])?;

        let mut j_diff_previous = Matrix6::zeros();
        let mut j_diff_next = Matrix6::zeros();
        let diff = previous.between(next, Some(&mut j_diff_previous), Some(&mut j_diff_next));

        let mut j_log_diff = Matrix6::zeros();
        let residual = diff.log(Some(&mut j_log_diff));

        let h_previous = j_log_diff * j_diff_previous;
        let h_next = j_log_diff * j_diff_next;

        Ok(LinearFactor {
            keys: self.keys.to_vec(),
            jacobians: vec![
                self.noise.whiten_jacobian(&dynamic(&h_previous)),
                self.noise.whiten_jacobian(&dynamic(&h_next)),
            ],
            residual: self.noise.whiten(&dynamic_vector(&residual)),
        })
    }
}

impl fmt::Display for ConstantVelocityFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe(default_key_formatter))
    }
}

/// Three-variable consistency constraint over `(previous, velocity, next)`.
///
/// The residual is the geodesic difference between `next` and the pose
/// obtained by composing `previous` with `velocity`; it vanishes exactly
/// when `next = previous ∘ velocity`.
#[derive(Clone, Debug)]
pub struct StablePoseFactor {
    keys: [Key; 3],
    noise: noise::Gaussian,
}

impl StablePoseFactor {
    /// Construct over `(previous_pose, velocity, next_pose)` keys with a
    /// 6-dimensional noise model.
    pub fn new(
        previous_pose_key: Key,
        velocity_key: Key,
        next_pose_key: Key,
        noise: noise::Gaussian,
    ) -> FactorResult<Self> {
        if noise.dim() != 6 {
            return Err(FactorError::InvalidCovariance(format!(
                "stable-pose noise must be 6-dimensional, got {}",
                noise.dim()
            )));
        }
        Ok(StablePoseFactor {
            keys: [previous_pose_key, velocity_key, next_pose_key],
            noise,
        })
    }

    pub fn previous_pose_key(&self) -> Key {
        self.keys[0]
    }

    pub fn velocity_key(&self) -> Key {
        self.keys[1]
    }

    pub fn next_pose_key(&self) -> Key {
        self.keys[2]
    }

    pub fn noise(&self) -> &noise::Gaussian {
        &self.noise
    }

    /// Compare keys and noise model within a tolerance.
    pub fn equals(&self, other: &StablePoseFactor, tol: f64) -> bool {
        self.keys == other.keys && self.noise.equals(&other.noise, tol)
    }

    /// Log a human-readable description through `tracing`.
    pub fn print(&self, label: &str, key_formatter: KeyFormatter) {
        tracing::info!("{label}{}", self.describe(key_formatter));
    }

    fn describe(&self, key_formatter: KeyFormatter) -> String {
        format!(
            "StablePoseFactor({}, {}, {})",
            key_formatter(self.keys[0]),
            key_formatter(self.keys[1]),
            key_formatter(self.keys[2]),
        )
    }
}

impl Factor for StablePoseFactor {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        6
    }

    fn error(&self, values: &Values) -> FactorResult<f64> {
        let previous = values.pose(self.keys[0])?;
        let velocity = values.pose(self.keys[1])?;
        let next = values.pose(self.keys[2])?;
        let predicted = previous.compose(velocity, None, None);
        let residual = self
            .noise
            .whiten(&dynamic_vector(&predicted.between(next, None, None).log(None)));
        Ok(residual.norm_squared())
    }

    fn linearize(&self, values: &Values) -> FactorResult<LinearFactor> {
        let previous = values.pose(self.keys[0])?;
        let velocity = values.pose(self.keys[1])?;
        let next = values.pose(self.keys[2])?;

        // Step 1: predicted = previous ∘ velocity
        let mut j_predicted_previous = Matrix6::zeros();
        let mut j_predicted_velocity = Matrix6::zeros();
        let predicted = previous.compose(
            velocity,
            Some(&mut j_predicted_previous),
            Some(&mut j_predicted_velocity),
        );

        // Step 2: diff = predicted⁻¹ ∘ next
        let mut j_diff_predicted = Matrix6::zeros();
        let mut j_diff_next = Matrix6::zeros();
        let diff = predicted.between(next, Some(&mut j_diff_predicted), Some(&mut j_diff_next));

        // Step 3: residual = Log(diff)
        let mut j_log_diff = Matrix6::zeros();
        let residual = diff.log(Some(&mut j_log_diff));

        let j_log_predicted = j_log_diff * j_diff_predicted;
        let h_previous = j_log_predicted * j_predicted_previous;
        let h_velocity = j_log_predicted * j_predicted_velocity;
        let h_next = j_log_diff * j_diff_next;

        Ok(LinearFactor {
            keys: self.keys.to_vec(),
            jacobians: vec![
                self.noise.whiten_jacobian(&dynamic(&h_previous)),
                self.noise.whiten_jacobian(&dynamic(&h_velocity)),
                self.noise.whiten_jacobian(&dynamic(&h_next)),
            ],
            residual: self.noise.whiten(&dynamic_vector(&residual)),
        })
    }
}

impl fmt::Display for StablePoseFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe(default_key_formatter))
    }
}
