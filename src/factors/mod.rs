//! Factor implementations for the pose-graph estimator.
//!
//! # Module Structure
//!
//! - `detection`: the max-mixture detection observation model
//!   ([`Detection`], [`DetectionFactor`])
//! - `motion`: fixed-residual motion-model constraints
//!   ([`ConstantVelocityFactor`], [`StablePoseFactor`])
//!
//! The solver-facing surface is deliberately closed: every factor variant is
//! a case of [`FactorKind`], and the five capabilities the solver needs
//! (error, linearize, clone, equals, print) are available uniformly on it.

use std::fmt;

use nalgebra::{DMatrix, DVector};

use crate::error::FactorResult;
use crate::values::{Key, KeyFormatter, Values};

pub mod detection;
pub mod motion;

pub use detection::{BoundingBox, CouplingMode, Detection, DetectionFactor};
pub use motion::{ConstantVelocityFactor, StablePoseFactor};

/// The linearization of a factor at the current estimates.
///
/// Carries one whitened Jacobian block per involved variable and the
/// whitened residual `r`, such that the factor's local quadratic model is
/// `0.5 · ‖Σ_k J_k · δ_k + r‖²`. The external solver folds these blocks into
/// its normal equations.
#[derive(Clone, Debug)]
pub struct LinearFactor {
    /// Involved variable keys, in the same order as `jacobians`.
    pub keys: Vec<Key>,
    /// One whitened Jacobian block per key.
    pub jacobians: Vec<DMatrix<f64>>,
    /// Whitened residual at the linearization point.
    pub residual: DVector<f64>,
}

impl LinearFactor {
    /// The Jacobian block for a given key, if the key participates.
    pub fn jacobian_for(&self, key: Key) -> Option<&DMatrix<f64>> {
        self.keys
            .iter()
            .position(|&k| k == key)
            .map(|i| &self.jacobians[i])
    }
}

/// Capability interface shared by every factor variant.
///
/// `error` and `linearize` are pure functions of `(factor state, current
/// estimates)`: no internal caches, no locks. Factors are immutable after
/// construction, so a solver may invoke these from multiple worker threads
/// across the factors of one graph.
pub trait Factor: fmt::Debug + Send + Sync {
    /// Keys of the variables this factor constrains, in a fixed order.
    fn keys(&self) -> &[Key];

    /// Residual dimension.
    fn dim(&self) -> usize;

    /// Twice the factor's negative log-likelihood contribution at the
    /// current estimates. A solver accumulating `0.5 × error` over all
    /// factors recovers its sum-of-squares objective.
    fn error(&self, values: &Values) -> FactorResult<f64>;

    /// Linearize at the current estimates.
    fn linearize(&self, values: &Values) -> FactorResult<LinearFactor>;
}

/// Closed set of factor variants handed to the external solver.
///
/// Replaces a virtual factor hierarchy with a tagged enum: the solver
/// iterates over a sequence of `FactorKind` without knowing the concrete
/// variant, and the set of variants is fixed at compile time.
#[derive(Clone, Debug)]
pub enum FactorKind {
    Detection(DetectionFactor),
    ConstantVelocity(ConstantVelocityFactor),
    StablePose(StablePoseFactor),
}

impl FactorKind {
    /// Compare with another factor within a numeric tolerance.
    ///
    /// Factors of different variants are never equal.
    pub fn equals(&self, other: &FactorKind, tol: f64) -> bool {
        match (self, other) {
            (FactorKind::Detection(a), FactorKind::Detection(b)) => a.equals(b, tol),
            (FactorKind::ConstantVelocity(a), FactorKind::ConstantVelocity(b)) => a.equals(b, tol),
            (FactorKind::StablePose(a), FactorKind::StablePose(b)) => a.equals(b, tol),
            _ => false,
        }
    }

    /// Log a human-readable description through `tracing`.
    pub fn print(&self, label: &str, key_formatter: KeyFormatter) {
        match self {
            FactorKind::Detection(f) => f.print(label, key_formatter),
            FactorKind::ConstantVelocity(f) => f.print(label, key_formatter),
            FactorKind::StablePose(f) => f.print(label, key_formatter),
        }
    }
}

impl Factor for FactorKind {
    fn keys(&self) -> &[Key] {
        match self {
            FactorKind::Detection(f) => f.keys(),
            FactorKind::ConstantVelocity(f) => f.keys(),
            FactorKind::StablePose(f) => f.keys(),
        }
    }

    fn dim(&self) -> usize {
        match self {
            FactorKind::Detection(f) => f.dim(),
            FactorKind::ConstantVelocity(f) => f.dim(),
            FactorKind::StablePose(f) => f.dim(),
        }
    }

    fn error(&self, values: &Values) -> FactorResult<f64> {
        match self {
            FactorKind::Detection(f) => f.error(values),
            FactorKind::ConstantVelocity(f) => f.error(values),
            FactorKind::StablePose(f) => f.error(values),
        }
    }

    fn linearize(&self, values: &Values) -> FactorResult<LinearFactor> {
        match self {
            FactorKind::Detection(f) => f.linearize(values),
            FactorKind::ConstantVelocity(f) => f.linearize(values),
            FactorKind::StablePose(f) => f.linearize(values),
        }
    }
}

impl fmt::Display for FactorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactorKind::Detection(factor) => fmt::Display::fmt(factor, f),
            FactorKind::ConstantVelocity(factor) => fmt::Display::fmt(factor, f),
            FactorKind::StablePose(factor) => fmt::Display::fmt(factor, f),
        }
    }
}
