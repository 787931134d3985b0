//! Max-mixture detection observation model and factor.
//!
//! A [`Detection`] wraps one bounding-box-derived 3D measurement into a
//! Gaussian hypothesis; a [`DetectionFactor`] holds a set of such hypotheses
//! competing to explain the relationship between a detection variable and a
//! robot-pose variable. On every evaluation the factor selects the
//! maximum-likelihood hypothesis and linearizes around it, treating the
//! mixture as locally unimodal at the current iterate (Olson & Agarwal,
//! "Inference on networks of mixtures for robust robot mapping", 2013).
//!
//! # Mathematical Formulation
//!
//! Each hypothesis `i` contributes the energy (negative log-likelihood up to
//! a constant shared by all components):
//!
//! ```text
//! energy_i(x) = 0.5 (x - mu_i)ᵀ Σ_i⁻¹ (x - mu_i) + gamma_i
//! gamma_i     = -log(w_i) + 0.5 log(det(2π Σ_i))
//! ```
//!
//! The normalization offset `gamma_i` is what makes energies comparable
//! across components of different weight and covariance: without it, a
//! component with tighter covariance would always win regardless of true
//! likelihood. The winning component is `argmin_i energy_i(x)`, ties broken
//! by lowest index.
//!
//! The comparison coordinate is
//!
//! ```text
//! x = translation(robot_pose⁻¹ ∘ detection_pose)
//! ```
//!
//! the detection variable's position expressed in the robot body frame — the
//! frame in which bounding-box measurements arrive. `error`,
//! `detection_index_and_error`, and `linearize` all share this derivation.

use std::f64::consts::PI;
use std::fmt;

use nalgebra::{DMatrix, DVector, Matrix3, Matrix3x6, Matrix6, Vector3};
use tracing::{debug, trace};

use crate::error::{FactorError, FactorResult};
use crate::factors::{Factor, LinearFactor};
use crate::manifold::se3::SE3;
use crate::noise;
use crate::values::{default_key_formatter, Key, KeyFormatter, Values};

/// Default isotropic sigma for detections constructed without an explicit
/// uncertainty.
pub const DEFAULT_SIGMA: f64 = 1e-2;

/// A 3D bounding-box observation, as extracted from an upstream detector.
///
/// The factor only consumes the center (and keeps the rest for bookkeeping);
/// parsing and validation of the detector's wire format happen upstream.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundingBox {
    /// Box center in the observation frame.
    pub center: Vector3<f64>,
    /// Box size along each axis.
    pub extent: Vector3<f64>,
    /// Frame the observation was made in.
    pub frame_id: String,
    /// Observation timestamp in seconds.
    pub stamp: f64,
    /// Detector class label.
    pub label: u32,
    /// Detector confidence score.
    pub score: f64,
}

impl BoundingBox {
    /// Create a bounding box with neutral metadata.
    pub fn new(center: Vector3<f64>, extent: Vector3<f64>) -> Self {
        BoundingBox {
            center,
            extent,
            frame_id: String::new(),
            stamp: 0.0,
            label: 0,
            score: 0.0,
        }
    }
}

/// One candidate observation hypothesis: a Gaussian over the measurement
/// coordinate, plus a mixture weight.
///
/// Immutable value object. The information matrix, its square root, and the
/// diagonal descriptor are derived once at construction and cached; no
/// accessor recomputes.
#[derive(Clone, Debug)]
pub struct Detection {
    mean: Vector3<f64>,
    variances: Vector3<f64>,
    covariance: Matrix3<f64>,
    information: Matrix3<f64>,
    sqrt_information: Matrix3<f64>,
    noise: noise::Diagonal,
    weight: f64,
    bounding_box: BoundingBox,
}

impl Detection {
    /// Construct from per-axis standard deviations.
    ///
    /// The hypothesis mean is the bounding-box center. Fails with
    /// [`FactorError::InvalidCovariance`] if any sigma is non-positive or
    /// the weight is negative; construction is atomic.
    pub fn from_sigmas(
        bounding_box: BoundingBox,
        sigmas: Vector3<f64>,
        weight: f64,
    ) -> FactorResult<Self> {
        if weight < 0.0 {
            return Err(FactorError::InvalidCovariance(format!(
                "mixture weight {weight} must be non-negative"
            )));
        }
        let noise = noise::Diagonal::from_sigmas(DVector::from_column_slice(sigmas.as_slice()))?;
        let variances = sigmas.component_mul(&sigmas);
        let covariance = Matrix3::from_diagonal(&variances);
        let information = Matrix3::from_diagonal(&variances.map(|v| 1.0 / v));
        let sqrt_information = Matrix3::from_diagonal(&sigmas.map(|s| 1.0 / s));
        Ok(Detection {
            mean: bounding_box.center,
            variances,
            covariance,
            information,
            sqrt_information,
            noise,
            weight,
            bounding_box,
        })
    }

    /// Construct with an isotropic sigma broadcast to all three axes.
    pub fn isotropic(bounding_box: BoundingBox, sigma: f64, weight: f64) -> FactorResult<Self> {
        Self::from_sigmas(bounding_box, Vector3::from_element(sigma), weight)
    }

    /// Construct with [`DEFAULT_SIGMA`] and unit weight.
    pub fn from_bounding_box(bounding_box: BoundingBox) -> FactorResult<Self> {
        Self::isotropic(bounding_box, DEFAULT_SIGMA, 1.0)
    }

    /// Construct from a full symmetric positive-definite covariance matrix.
    ///
    /// The diagonal descriptor then captures only the per-axis marginal
    /// sigmas. Fails with [`FactorError::InvalidCovariance`] if the matrix
    /// is not positive-definite.
    pub fn from_covariance(
        bounding_box: BoundingBox,
        covariance: Matrix3<f64>,
        weight: f64,
    ) -> FactorResult<Self> {
        if weight < 0.0 {
            return Err(FactorError::InvalidCovariance(format!(
                "mixture weight {weight} must be non-negative"
            )));
        }
        let chol = covariance.cholesky().ok_or_else(|| {
            FactorError::InvalidCovariance(
                "detection covariance is not positive-definite".to_string(),
            )
        })?;
        let information = chol.inverse();
        let sqrt_information = information
            .cholesky()
            .ok_or_else(|| {
                FactorError::InvalidCovariance(
                    "detection information matrix is not positive-definite".to_string(),
                )
            })?
            .l()
            .transpose();
        let variances = covariance.diagonal();
        let noise = noise::Diagonal::from_sigmas(DVector::from_column_slice(
            variances.map(f64::sqrt).as_slice(),
        ))?;
        Ok(Detection {
            mean: bounding_box.center,
            variances,
            covariance,
            information,
            sqrt_information,
            noise,
            weight,
            bounding_box,
        })
    }

    /// The hypothesis mean.
    pub fn mean(&self) -> Vector3<f64> {
        self.mean
    }

    /// Per-axis variances.
    pub fn variances(&self) -> Vector3<f64> {
        self.variances
    }

    /// The 3x3 covariance matrix.
    pub fn covariance(&self) -> Matrix3<f64> {
        self.covariance
    }

    /// The information matrix `Σ⁻¹`.
    pub fn information(&self) -> Matrix3<f64> {
        self.information
    }

    /// Square-root information `U` with `Uᵀ·U = Σ⁻¹`.
    pub fn sqrt_information(&self) -> Matrix3<f64> {
        self.sqrt_information
    }

    /// The diagonal noise descriptor.
    pub fn noise(&self) -> &noise::Diagonal {
        &self.noise
    }

    /// The mixture weight.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// The originating bounding-box observation.
    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bounding_box
    }

    /// The max-mixture energy of point `x` under this hypothesis:
    /// `0.5 (x - mean)ᵀ Σ⁻¹ (x - mean) + gamma`.
    ///
    /// `gamma` is the normalization offset that makes energies comparable
    /// across the detections of one mixture; [`DetectionFactor`] precomputes
    /// it per hypothesis.
    pub fn error(&self, x: &Vector3<f64>, gamma: f64) -> f64 {
        let diff = x - self.mean;
        0.5 * (self.information * diff).dot(&diff) + gamma
    }

    /// The covariance part of the normalization offset:
    /// `0.5 log(det(2π Σ))`.
    pub fn normalization_constant(&self) -> f64 {
        0.5 * (3.0 * (2.0 * PI).ln() + self.covariance.determinant().ln())
    }

    /// The mean reinterpreted as a full pose (identity rotation), for
    /// interfacing with pose-valued variables.
    pub fn pose(&self) -> SE3 {
        SE3::from_translation(self.mean)
    }

    /// Compare the Gaussian model and weight within an absolute tolerance.
    /// The source bounding box is bookkeeping and does not participate.
    pub fn equals(&self, other: &Detection, tol: f64) -> bool {
        (self.mean - other.mean).abs().max() <= tol
            && (self.covariance - other.covariance).abs().max() <= tol
            && (self.weight - other.weight).abs() <= tol
    }
}

/// Which variables participate in the residual of a [`DetectionFactor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CouplingMode {
    /// Both the detection variable and the robot pose receive non-zero
    /// Jacobian blocks: the factor jointly refines object state and robot
    /// pose through the same residual.
    TightlyCoupled,
    /// Only the robot pose participates; the detection variable's current
    /// estimate is treated as a fixed external measurement and its Jacobian
    /// block is zero.
    LooselyCoupled,
}

/// Max-mixture multi-hypothesis constraint between a detection variable and
/// a robot-pose variable.
///
/// The detection list, the per-hypothesis normalization offsets `gamma_i`,
/// and the precomputed measurement vectors `z_i` are parallel arrays fixed
/// at construction; the factor is otherwise immutable. The winning
/// hypothesis can change between solver iterations as the estimates move, so
/// every evaluation recomputes the argmin — the winner is never cached.
#[derive(Clone, Debug)]
pub struct DetectionFactor {
    /// `[detection_key, robot_pose_key]`.
    keys: [Key; 2],
    detections: Vec<Detection>,
    gammas: Vec<f64>,
    zs: Vec<Vector3<f64>>,
    mode: CouplingMode,
}

impl DetectionFactor {
    /// Construct from a non-empty, ordered set of competing hypotheses.
    ///
    /// Fails with [`FactorError::DegenerateMixture`] on an empty detection
    /// list: there is no meaningful "no hypothesis" case for this model.
    pub fn new(
        detections: Vec<Detection>,
        detection_key: Key,
        robot_pose_key: Key,
        mode: CouplingMode,
    ) -> FactorResult<Self> {
        if detections.is_empty() {
            return Err(FactorError::DegenerateMixture(
                "detection factor requires at least one hypothesis".to_string(),
            ));
        }
        let gammas = detections
            .iter()
            .map(|d| -d.weight().ln() + d.normalization_constant())
            .collect();
        let zs = detections.iter().map(Detection::mean).collect();
        debug!(
            hypotheses = detections.len(),
            detection_key, robot_pose_key, ?mode,
            "constructed detection factor"
        );
        Ok(DetectionFactor {
            keys: [detection_key, robot_pose_key],
            detections,
            gammas,
            zs,
            mode,
        })
    }

    /// Key of the detection variable.
    pub fn detection_key(&self) -> Key {
        self.keys[0]
    }

    /// Key of the robot-pose variable.
    pub fn robot_pose_key(&self) -> Key {
        self.keys[1]
    }

    /// The hypothesis set, in construction order.
    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    /// The per-hypothesis normalization offsets.
    pub fn gammas(&self) -> &[f64] {
        &self.gammas
    }

    /// The coupling mode.
    pub fn mode(&self) -> CouplingMode {
        self.mode
    }

    /// The detection variable's current estimate.
    pub fn detection_value<'a>(&self, values: &'a Values) -> FactorResult<&'a SE3> {
        values.pose(self.keys[0])
    }

    /// The robot-pose variable's current estimate.
    pub fn robot_pose_value<'a>(&self, values: &'a Values) -> FactorResult<&'a SE3> {
        values.pose(self.keys[1])
    }

    /// Select the maximum-likelihood hypothesis for a given relative
    /// transform `robot_pose⁻¹ ∘ detection_pose`.
    ///
    /// Evaluates every hypothesis energy at `x = translation(relative_pose)`
    /// and returns `(argmin, min)`. Ties resolve to the lowest index, which
    /// guarantees reproducibility since the detections are in a fixed order.
    pub fn detection_index_and_error(&self, relative_pose: &SE3) -> (usize, f64) {
        let x = relative_pose.translation();
        let mut best_index = 0;
        let mut best_energy = self.detections[0].error(&x, self.gammas[0]);
        for (i, detection) in self.detections.iter().enumerate().skip(1) {
            let energy = detection.error(&x, self.gammas[i]);
            if energy < best_energy {
                best_index = i;
                best_energy = energy;
            }
        }
        (best_index, best_energy)
    }

    /// Select the maximum-likelihood hypothesis at the current estimates.
    ///
    /// Extracts both variables from `values`, forms the relative transform
    /// under the factor's coordinate convention, and delegates to
    /// [`Self::detection_index_and_error`].
    pub fn detection_index_and_error_in(&self, values: &Values) -> FactorResult<(usize, f64)> {
        let relative = self.relative_transform(values)?;
        Ok(self.detection_index_and_error(&relative))
    }

    /// Compare keys, mode, and the hypothesis sets within a tolerance.
    pub fn equals(&self, other: &DetectionFactor, tol: f64) -> bool {
        self.keys == other.keys
            && self.mode == other.mode
            && self.detections.len() == other.detections.len()
            && self
                .detections
                .iter()
                .zip(other.detections.iter())
                .all(|(a, b)| a.equals(b, tol))
    }

    /// Log a human-readable description through `tracing`.
    pub fn print(&self, label: &str, key_formatter: KeyFormatter) {
        tracing::info!("{label}{}", self.describe(key_formatter));
    }

    fn describe(&self, key_formatter: KeyFormatter) -> String {
        format!(
            "DetectionFactor({}, {}, {} hypotheses, {:?})",
            key_formatter(self.keys[0]),
            key_formatter(self.keys[1]),
            self.detections.len(),
            self.mode,
        )
    }

    fn relative_transform(&self, values: &Values) -> FactorResult<SE3> {
        let robot = self.robot_pose_value(values)?;
        let detection = self.detection_value(values)?;
        Ok(robot.between(detection, None, None))
    }
}

impl Factor for DetectionFactor {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        3
    }

    /// Twice the winning hypothesis's energy, so that a solver accumulating
    /// `0.5 × error` recovers exactly the winning Mahalanobis term plus its
    /// normalization offset.
    fn error(&self, values: &Values) -> FactorResult<f64> {
        let (_, energy) = self.detection_index_and_error_in(values)?;
        Ok(2.0 * energy)
    }

    /// Linearize around the currently winning hypothesis.
    ///
    /// The chain runs through the relative transform and the translation
    /// extraction: with `D = robot⁻¹ ∘ detection` and `x = translation(D)`,
    ///
    /// ```text
    /// r = U_w (x - z_w)
    /// ∂x/∂δ_D = [R_D | 0]
    /// H_k = U_w · [R_D | 0] · ∂D/∂δ_k      k ∈ {detection, robot}
    /// ```
    ///
    /// Under [`CouplingMode::LooselyCoupled`] the detection block is zero.
    fn linearize(&self, values: &Values) -> FactorResult<LinearFactor> {
        let robot = self.robot_pose_value(values)?;
        let detection_pose = self.detection_value(values)?;

        let mut j_rel_robot = Matrix6::zeros();
        let mut j_rel_detection = Matrix6::zeros();
        let relative = robot.between(
            detection_pose,
            Some(&mut j_rel_robot),
            Some(&mut j_rel_detection),
        );

        let (winner, _) = self.detection_index_and_error(&relative);
        trace!(winner, mode = ?self.mode, "selected max-mixture hypothesis");

        let x = relative.translation();
        let sqrt_information = self.detections[winner].sqrt_information();
        let residual = sqrt_information * (x - self.zs[winner]);

        let mut j_translation = Matrix3x6::zeros();
        j_translation
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&relative.rotation_matrix());
        let whitened_translation = sqrt_information * j_translation;

        let h_robot = whitened_translation * j_rel_robot;
        let h_detection = match self.mode {
            CouplingMode::TightlyCoupled => whitened_translation * j_rel_detection,
            CouplingMode::LooselyCoupled => Matrix3x6::zeros(),
        };

        Ok(LinearFactor {
            keys: self.keys.to_vec(),
            jacobians: vec![
                DMatrix::from_column_slice(3, 6, h_detection.as_slice()),
                DMatrix::from_column_slice(3, 6, h_robot.as_slice()),
            ],
            residual: DVector::from_column_slice(residual.as_slice()),
        })
    }
}

impl fmt::Display for DetectionFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe(default_key_formatter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::UnitQuaternion;

    const TOLERANCE: f64 = 1e-9;
    const FD_EPSILON: f64 = 1e-7;

    fn bbox_at(x: f64, y: f64, z: f64) -> BoundingBox {
        BoundingBox::new(Vector3::new(x, y, z), Vector3::new(0.5, 0.5, 0.5))
    }

    fn detection_at(x: f64, y: f64, z: f64, sigma: f64, weight: f64) -> Detection {
        Detection::isotropic(bbox_at(x, y, z), sigma, weight).unwrap()
    }

    const DETECTION_KEY: Key = 0;
    const ROBOT_KEY: Key = 1;

    fn values_with(robot: SE3, detection: SE3) -> Values {
        let mut values = Values::new();
        values.insert_pose(DETECTION_KEY, detection);
        values.insert_pose(ROBOT_KEY, robot);
        values
    }

    #[test]
    fn test_detection_cached_matrices_are_consistent() {
        let detection =
            Detection::from_sigmas(bbox_at(1.0, 2.0, 3.0), Vector3::new(0.1, 0.2, 0.5), 1.0)
                .unwrap();
        let identity_check = detection.information() * detection.covariance();
        assert!((identity_check - Matrix3::identity()).abs().max() < TOLERANCE);
        let info_check =
            detection.sqrt_information().transpose() * detection.sqrt_information();
        assert!((info_check - detection.information()).abs().max() < TOLERANCE);
        assert!((detection.variances() - Vector3::new(0.01, 0.04, 0.25)).abs().max() < TOLERANCE);
    }

    #[test]
    fn test_detection_full_covariance_consistent() {
        let covariance = Matrix3::new(0.04, 0.01, 0.0, 0.01, 0.09, 0.02, 0.0, 0.02, 0.25);
        let detection = Detection::from_covariance(bbox_at(0.0, 0.0, 0.0), covariance, 2.0).unwrap();
        let identity_check = detection.information() * detection.covariance();
        assert!((identity_check - Matrix3::identity()).abs().max() < 1e-9);
        let info_check =
            detection.sqrt_information().transpose() * detection.sqrt_information();
        assert!((info_check - detection.information()).abs().max() < 1e-9);
    }

    #[test]
    fn test_detection_rejects_bad_inputs() {
        assert!(matches!(
            Detection::from_sigmas(bbox_at(0.0, 0.0, 0.0), Vector3::new(0.1, 0.0, 0.1), 1.0),
            Err(FactorError::InvalidCovariance(_))
        ));
        assert!(matches!(
            Detection::isotropic(bbox_at(0.0, 0.0, 0.0), -0.1, 1.0),
            Err(FactorError::InvalidCovariance(_))
        ));
        assert!(matches!(
            Detection::isotropic(bbox_at(0.0, 0.0, 0.0), 0.1, -1.0),
            Err(FactorError::InvalidCovariance(_))
        ));
        let indefinite = Matrix3::new(1.0, 2.0, 0.0, 2.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        assert!(matches!(
            Detection::from_covariance(bbox_at(0.0, 0.0, 0.0), indefinite, 1.0),
            Err(FactorError::InvalidCovariance(_))
        ));
    }

    #[test]
    fn test_default_construction() {
        let detection = Detection::from_bounding_box(bbox_at(0.5, 0.5, 0.0)).unwrap();
        assert_eq!(detection.weight(), 1.0);
        assert!(
            (detection.variances() - Vector3::from_element(DEFAULT_SIGMA * DEFAULT_SIGMA))
                .abs()
                .max()
                < TOLERANCE
        );
    }

    #[test]
    fn test_detection_pose_carries_mean() {
        let detection = detection_at(1.0, -2.0, 0.5, 0.1, 1.0);
        let pose = detection.pose();
        assert!((pose.translation() - detection.mean()).norm() < TOLERANCE);
        assert!(pose.rotation().log(None).is_zero(TOLERANCE));
    }

    #[test]
    fn test_empty_mixture_is_degenerate() {
        assert!(matches!(
            DetectionFactor::new(vec![], DETECTION_KEY, ROBOT_KEY, CouplingMode::TightlyCoupled),
            Err(FactorError::DegenerateMixture(_))
        ));
    }

    #[test]
    fn test_missing_key_propagates() {
        let factor = DetectionFactor::new(
            vec![detection_at(0.0, 0.0, 0.0, 0.1, 1.0)],
            DETECTION_KEY,
            ROBOT_KEY,
            CouplingMode::TightlyCoupled,
        )
        .unwrap();
        let mut values = Values::new();
        values.insert_pose(DETECTION_KEY, SE3::identity());
        assert_eq!(factor.error(&values), Err(FactorError::UnknownKey(ROBOT_KEY)));
        assert!(matches!(
            factor.linearize(&values),
            Err(FactorError::UnknownKey(ROBOT_KEY))
        ));
    }

    #[test]
    fn test_index_within_bounds_and_minimal() {
        // Brute-force cross-check of the winner over a sweep of estimates.
        let detections = vec![
            detection_at(0.0, 0.0, 0.0, 0.2, 1.0),
            detection_at(4.0, 0.0, 0.0, 0.8, 3.0),
            detection_at(0.0, 5.0, 1.0, 0.1, 0.5),
        ];
        let factor = DetectionFactor::new(
            detections.clone(),
            DETECTION_KEY,
            ROBOT_KEY,
            CouplingMode::TightlyCoupled,
        )
        .unwrap();

        for step in 0..30 {
            let x = Vector3::new(-2.0 + 0.3 * step as f64, 0.1 * step as f64, 0.5);
            let relative = SE3::from_translation(x);
            let (index, energy) = factor.detection_index_and_error(&relative);
            assert!(index < detections.len());
            let brute_force = detections
                .iter()
                .zip(factor.gammas())
                .map(|(d, &gamma)| d.error(&x, gamma))
                .fold(f64::INFINITY, f64::min);
            assert!((energy - brute_force).abs() < TOLERANCE);
        }
    }

    #[test]
    fn test_values_overload_matches_pose_overload() {
        let factor = DetectionFactor::new(
            vec![
                detection_at(0.0, 0.0, 0.0, 0.2, 1.0),
                detection_at(2.0, 1.0, 0.0, 0.3, 2.0),
            ],
            DETECTION_KEY,
            ROBOT_KEY,
            CouplingMode::TightlyCoupled,
        )
        .unwrap();

        let robot = SE3::from_translation_euler(0.5, -0.2, 0.1, 0.0, 0.0, 0.4);
        let detection_pose = SE3::from_translation(Vector3::new(2.2, 0.8, 0.1));
        let values = values_with(robot.clone(), detection_pose.clone());

        let relative = robot.between(&detection_pose, None, None);
        let direct = factor.detection_index_and_error(&relative);
        let via_values = factor.detection_index_and_error_in(&values).unwrap();
        assert_eq!(direct.0, via_values.0);
        assert!((direct.1 - via_values.1).abs() < TOLERANCE);
    }

    #[test]
    fn test_error_and_linearize_agree_on_winner() {
        let factor = DetectionFactor::new(
            vec![
                detection_at(0.0, 0.0, 0.0, 0.2, 1.0),
                detection_at(3.0, 0.0, 0.0, 0.4, 1.0),
                detection_at(0.0, 3.0, 0.0, 0.3, 2.0),
            ],
            DETECTION_KEY,
            ROBOT_KEY,
            CouplingMode::TightlyCoupled,
        )
        .unwrap();

        let values = values_with(
            SE3::from_translation_euler(0.2, 0.1, 0.0, 0.0, 0.0, 0.1),
            SE3::from_translation(Vector3::new(2.8, 0.4, 0.0)),
        );

        let (winner, energy) = factor.detection_index_and_error_in(&values).unwrap();
        assert!((factor.error(&values).unwrap() - 2.0 * energy).abs() < TOLERANCE);

        // The linearized residual must be the winner's whitened innovation.
        let linear = factor.linearize(&values).unwrap();
        let relative = factor
            .robot_pose_value(&values)
            .unwrap()
            .between(factor.detection_value(&values).unwrap(), None, None);
        let x = relative.translation();
        let expected = factor.detections()[winner].sqrt_information()
            * (x - factor.detections()[winner].mean());
        for i in 0..3 {
            assert!((linear.residual[i] - expected[i]).abs() < TOLERANCE);
        }
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let factor = DetectionFactor::new(
            vec![
                detection_at(1.0, 0.0, 0.0, 0.1, 1.0),
                detection_at(-1.0, 0.5, 0.0, 0.2, 0.7),
            ],
            DETECTION_KEY,
            ROBOT_KEY,
            CouplingMode::TightlyCoupled,
        )
        .unwrap();
        let values = values_with(
            SE3::from_translation_euler(0.1, 0.0, 0.0, 0.0, 0.1, 0.0),
            SE3::from_translation(Vector3::new(0.9, 0.1, 0.0)),
        );

        assert_eq!(factor.error(&values).unwrap(), factor.error(&values).unwrap());
        let first = factor.linearize(&values).unwrap();
        let second = factor.linearize(&values).unwrap();
        assert_eq!(first.residual, second.residual);
        assert_eq!(first.jacobians, second.jacobians);
    }

    #[test]
    fn test_tie_breaks_to_lowest_index() {
        let duplicate = detection_at(1.0, 1.0, 0.0, 0.3, 1.0);
        let factor = DetectionFactor::new(
            vec![duplicate.clone(), duplicate],
            DETECTION_KEY,
            ROBOT_KEY,
            CouplingMode::TightlyCoupled,
        )
        .unwrap();
        let relative = SE3::from_translation(Vector3::new(5.0, -2.0, 1.0));
        let (index, _) = factor.detection_index_and_error(&relative);
        assert_eq!(index, 0);
    }

    #[test]
    fn test_single_detection_degenerates_to_gaussian() {
        let factor = DetectionFactor::new(
            vec![detection_at(1.0, 0.0, 0.0, 0.1, 1.0)],
            DETECTION_KEY,
            ROBOT_KEY,
            CouplingMode::TightlyCoupled,
        )
        .unwrap();
        let values = values_with(SE3::identity(), SE3::from_translation(Vector3::new(1.0, 0.0, 0.0)));

        // Mahalanobis term vanishes; only the fixed normalization remains.
        let error = factor.error(&values).unwrap();
        assert!((error - 2.0 * factor.gammas()[0]).abs() < TOLERANCE);

        let linear = factor.linearize(&values).unwrap();
        assert!(linear.residual.norm() < TOLERANCE);
    }

    #[test]
    fn test_nearer_hypothesis_wins() {
        let sigma = 1.0;
        let factor = DetectionFactor::new(
            vec![
                detection_at(0.0, 0.0, 0.0, sigma, 1.0),
                detection_at(10.0, 0.0, 0.0, sigma, 1.0),
            ],
            DETECTION_KEY,
            ROBOT_KEY,
            CouplingMode::TightlyCoupled,
        )
        .unwrap();
        let values = values_with(SE3::identity(), SE3::from_translation(Vector3::new(9.0, 0.0, 0.0)));

        let (index, _) = factor.detection_index_and_error_in(&values).unwrap();
        assert_eq!(index, 1);

        let linear = factor.linearize(&values).unwrap();
        let expected = Vector3::new(-1.0 / sigma, 0.0, 0.0);
        for i in 0..3 {
            assert!((linear.residual[i] - expected[i]).abs() < TOLERANCE);
        }
    }

    #[test]
    fn test_weight_breaks_a_near_tie() {
        // Equidistant hypotheses with equal covariance: the heavier weight
        // must win through its gamma, despite the lowest-index tie-break
        // preferring the lighter one.
        let factor = DetectionFactor::new(
            vec![
                detection_at(0.0, 0.0, 0.0, 0.5, 1.0),
                detection_at(2.0, 0.0, 0.0, 0.5, 100.0),
            ],
            DETECTION_KEY,
            ROBOT_KEY,
            CouplingMode::TightlyCoupled,
        )
        .unwrap();
        let relative = SE3::from_translation(Vector3::new(1.0, 0.0, 0.0));
        let (index, _) = factor.detection_index_and_error(&relative);
        assert_eq!(index, 1);
    }

    #[test]
    fn test_loosely_coupled_detection_block_is_zero() {
        let detections = vec![
            detection_at(1.0, 0.5, 0.0, 0.2, 1.0),
            detection_at(-2.0, 0.0, 1.0, 0.4, 2.0),
        ];
        let values = values_with(
            SE3::from_translation_euler(0.3, -0.1, 0.2, 0.1, -0.2, 0.3),
            SE3::from_translation(Vector3::new(1.1, 0.4, 0.1)),
        );

        let loose = DetectionFactor::new(
            detections.clone(),
            DETECTION_KEY,
            ROBOT_KEY,
            CouplingMode::LooselyCoupled,
        )
        .unwrap();
        let linear = loose.linearize(&values).unwrap();
        assert!(linear.jacobian_for(DETECTION_KEY).unwrap().abs().max() == 0.0);
        assert!(linear.jacobian_for(ROBOT_KEY).unwrap().abs().max() > 0.0);

        let tight = DetectionFactor::new(
            detections,
            DETECTION_KEY,
            ROBOT_KEY,
            CouplingMode::TightlyCoupled,
        )
        .unwrap();
        let linear = tight.linearize(&values).unwrap();
        assert!(linear.jacobian_for(DETECTION_KEY).unwrap().abs().max() > 0.0);
    }

    #[test]
    fn test_linearize_jacobians_numerical() {
        // Single hypothesis so the winner cannot flip under perturbation.
        let factor = DetectionFactor::new(
            vec![detection_at(1.5, -0.5, 0.8, 0.2, 1.0)],
            DETECTION_KEY,
            ROBOT_KEY,
            CouplingMode::TightlyCoupled,
        )
        .unwrap();
        let robot = SE3::from_translation_euler(0.4, 0.2, -0.1, 0.2, -0.1, 0.3);
        let detection_pose = SE3::new(
            Vector3::new(1.2, -0.3, 0.9),
            UnitQuaternion::from_euler_angles(0.1, 0.0, -0.2),
        );
        let values = values_with(robot.clone(), detection_pose.clone());

        let linear = factor.linearize(&values).unwrap();
        let residual_at = |values: &Values| {
            factor.linearize(values).unwrap().residual
        };
        let base = residual_at(&values);

        for (key, pose, block) in [
            (ROBOT_KEY, &robot, linear.jacobian_for(ROBOT_KEY).unwrap()),
            (
                DETECTION_KEY,
                &detection_pose,
                linear.jacobian_for(DETECTION_KEY).unwrap(),
            ),
        ] {
            let mut fd = DMatrix::zeros(3, 6);
            for i in 0..6 {
                let mut tangent = nalgebra::Vector6::zeros();
                tangent[i] = FD_EPSILON;
                let perturbed_pose = pose.compose(
                    &crate::manifold::se3::SE3Tangent::from_vector(tangent).exp(None),
                    None,
                    None,
                );
                let mut perturbed_values = values.clone();
                perturbed_values.insert_pose(key, perturbed_pose);
                let diff = (residual_at(&perturbed_values) - &base) / FD_EPSILON;
                fd.set_column(i, &diff);
            }
            assert!(
                (block - &fd).abs().max() < 1e-5,
                "jacobian mismatch for key {key}: {}",
                (block - &fd).abs().max()
            );
        }
    }

    #[test]
    fn test_equals_and_clone() {
        let make = |mode| {
            DetectionFactor::new(
                vec![
                    detection_at(0.0, 0.0, 0.0, 0.2, 1.0),
                    detection_at(1.0, 1.0, 0.0, 0.3, 2.0),
                ],
                DETECTION_KEY,
                ROBOT_KEY,
                mode,
            )
            .unwrap()
        };
        let factor = make(CouplingMode::TightlyCoupled);
        assert!(factor.equals(&make(CouplingMode::TightlyCoupled), 1e-9));
        assert!(!factor.equals(&make(CouplingMode::LooselyCoupled), 1e-9));

        let clone = factor.clone();
        let values = values_with(
            SE3::identity(),
            SE3::from_translation(Vector3::new(0.9, 0.9, 0.0)),
        );
        assert_eq!(
            factor.error(&values).unwrap(),
            clone.error(&values).unwrap()
        );
    }

    #[test]
    fn test_display() {
        let factor = DetectionFactor::new(
            vec![detection_at(0.0, 0.0, 0.0, 0.2, 1.0)],
            7,
            8,
            CouplingMode::LooselyCoupled,
        )
        .unwrap();
        let rendered = format!("{factor}");
        assert!(rendered.contains("DetectionFactor(7, 8, 1 hypotheses"));
    }
}
