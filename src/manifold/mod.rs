//! Lie-group representations for optimization on non-Euclidean spaces.
//!
//! Factors in this crate express residuals through rigid-body transformations,
//! so the crate carries small SO(3)/SE(3) implementations with analytic
//! Jacobians for every operation appearing in a factor's chain rule:
//! `inverse`, `compose`, `between`, `act`, `log`, and `exp`.
//!
//! Conventions follow the [manif](https://github.com/artivis/manif) C++
//! library and Sola et al., "A micro Lie theory for state estimation in
//! robotics":
//!
//! - SE(3) tangent vectors are ordered `[rho(3), theta(3)]` (translational
//!   part first).
//! - All Jacobians are right Jacobians: for an operation `f`,
//!   `f(X ∘ Exp(δ)) ≈ f(X) ∘ Exp(J δ)` for small `δ`.
//! - Jacobians are returned through `Option<&mut Matrix>` out-parameters so
//!   that pure evaluations skip the extra work.

pub mod se3;
pub mod so3;

pub use se3::{SE3, SE3Tangent};
pub use so3::{SO3, SO3Tangent};
