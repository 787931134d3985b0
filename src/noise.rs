//! Gaussian noise models owned by factors.
//!
//! A noise model carries the square-root information matrix `U` of a
//! measurement (with `Uᵀ·U = Σ⁻¹`), precomputed once at construction so that
//! whitening a residual or a Jacobian block is a single matrix product per
//! evaluation. Models are immutable value data owned per factor; the 3x3 and
//! 6x6 matrices used here are small enough that sharing buys nothing.

use nalgebra::{Cholesky, DMatrix, DVector};

use crate::error::{FactorError, FactorResult};

/// Diagonal Gaussian noise, described by per-axis standard deviations.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagonal {
    sigmas: DVector<f64>,
}

impl Diagonal {
    /// Create from per-axis standard deviations.
    ///
    /// Fails with [`FactorError::InvalidCovariance`] if any sigma is
    /// non-positive.
    pub fn from_sigmas(sigmas: DVector<f64>) -> FactorResult<Self> {
        for (i, &sigma) in sigmas.iter().enumerate() {
            if sigma <= 0.0 {
                return Err(FactorError::InvalidCovariance(format!(
                    "sigma[{i}] = {sigma} must be positive"
                )));
            }
        }
        Ok(Diagonal { sigmas })
    }

    /// Create an isotropic model: the same sigma on every axis.
    pub fn isotropic(dim: usize, sigma: f64) -> FactorResult<Self> {
        Self::from_sigmas(DVector::from_element(dim, sigma))
    }

    /// Residual dimension.
    pub fn dim(&self) -> usize {
        self.sigmas.len()
    }

    /// Per-axis standard deviations.
    pub fn sigmas(&self) -> &DVector<f64> {
        &self.sigmas
    }

    /// Per-axis variances.
    pub fn variances(&self) -> DVector<f64> {
        self.sigmas.component_mul(&self.sigmas)
    }

    /// Information matrix `Σ⁻¹`.
    pub fn information(&self) -> DMatrix<f64> {
        DMatrix::from_diagonal(&self.sigmas.map(|s| 1.0 / (s * s)))
    }

    /// Square-root information matrix `U` with `Uᵀ·U = Σ⁻¹`.
    pub fn sqrt_information(&self) -> DMatrix<f64> {
        DMatrix::from_diagonal(&self.sigmas.map(|s| 1.0 / s))
    }

    /// Whiten a residual: `U·r`.
    pub fn whiten(&self, residual: &DVector<f64>) -> DVector<f64> {
        residual.component_div(&self.sigmas)
    }

    /// Compare within an absolute per-sigma tolerance.
    pub fn equals(&self, other: &Diagonal, tol: f64) -> bool {
        self.dim() == other.dim()
            && self
                .sigmas
                .iter()
                .zip(other.sigmas.iter())
                .all(|(a, b)| (a - b).abs() <= tol)
    }
}

/// General Gaussian noise with a full (possibly correlated) covariance.
#[derive(Clone, Debug, PartialEq)]
pub struct Gaussian {
    sqrt_information: DMatrix<f64>,
}

impl Gaussian {
    /// Create from a symmetric positive-definite covariance matrix.
    ///
    /// Fails with [`FactorError::InvalidCovariance`] if the matrix is not
    /// square or its Cholesky factorization does not exist.
    pub fn from_covariance(covariance: DMatrix<f64>) -> FactorResult<Self> {
        if !covariance.is_square() {
            return Err(FactorError::InvalidCovariance(format!(
                "covariance must be square, got {}x{}",
                covariance.nrows(),
                covariance.ncols()
            )));
        }
        let information = Cholesky::new(covariance)
            .ok_or_else(|| {
                FactorError::InvalidCovariance(
                    "covariance matrix is not positive-definite".to_string(),
                )
            })?
            .inverse();
        Self::from_information(information)
    }

    /// Create from an information matrix `Σ⁻¹`.
    pub fn from_information(information: DMatrix<f64>) -> FactorResult<Self> {
        let sqrt_information = Cholesky::new(information)
            .ok_or_else(|| {
                FactorError::InvalidCovariance(
                    "information matrix is not positive-definite".to_string(),
                )
            })?
            .l()
            .transpose();
        Ok(Gaussian { sqrt_information })
    }

    /// Create directly from a square-root information matrix.
    pub fn from_sqrt_information(sqrt_information: DMatrix<f64>) -> Self {
        Gaussian { sqrt_information }
    }

    /// Create an isotropic model with the given sigma on every axis.
    pub fn isotropic(dim: usize, sigma: f64) -> FactorResult<Self> {
        Ok(Self::from_diagonal(&Diagonal::isotropic(dim, sigma)?))
    }

    /// Lift a diagonal model into a full one.
    pub fn from_diagonal(diagonal: &Diagonal) -> Self {
        Gaussian {
            sqrt_information: diagonal.sqrt_information(),
        }
    }

    /// Residual dimension.
    pub fn dim(&self) -> usize {
        self.sqrt_information.nrows()
    }

    /// Square-root information matrix `U` with `Uᵀ·U = Σ⁻¹`.
    pub fn sqrt_information(&self) -> &DMatrix<f64> {
        &self.sqrt_information
    }

    /// Whiten a residual: `U·r`, so `‖U·r‖²` is the Mahalanobis distance.
    pub fn whiten(&self, residual: &DVector<f64>) -> DVector<f64> {
        &self.sqrt_information * residual
    }

    /// Whiten a Jacobian block: `U·J`.
    pub fn whiten_jacobian(&self, jacobian: &DMatrix<f64>) -> DMatrix<f64> {
        &self.sqrt_information * jacobian
    }

    /// Compare within an absolute per-entry tolerance.
    pub fn equals(&self, other: &Gaussian, tol: f64) -> bool {
        self.sqrt_information.shape() == other.sqrt_information.shape()
            && (&self.sqrt_information - &other.sqrt_information).abs().max() <= tol
    }
}
