//! Max-mixture detection factors for pose-graph optimization.
//!
//! This crate provides the data-association core of a pose-graph estimator for
//! robots observing ambiguous, multi-hypothesis object detections:
//!
//! - [`factors::Detection`]: a Gaussian observation model wrapping one
//!   bounding-box-derived 3D measurement hypothesis.
//! - [`factors::DetectionFactor`]: a max-mixture factor that, at every
//!   evaluation, selects the maximum-likelihood hypothesis and linearizes
//!   around it (Olson & Agarwal 2013 model).
//! - [`factors::ConstantVelocityFactor`] and [`factors::StablePoseFactor`]:
//!   fixed-residual motion-model soft constraints.
//!
//! The nonlinear solver itself is an external collaborator: it owns the
//! variable estimates in a [`values::Values`] container, asks each factor for
//! its error and [`factors::LinearFactor`] at the current estimates, and
//! folds the results into its normal equations. Everything in this crate is
//! immutable after construction and evaluation is pure, so a solver may
//! linearize factors from multiple worker threads.

pub mod error;
pub mod factors;
pub mod logger;
pub mod manifold;
pub mod noise;
pub mod values;

pub use error::{FactorError, FactorResult};
pub use logger::{init_logger, init_logger_with_level};
