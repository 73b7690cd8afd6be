//! Solvers for optimization problems, minimizing or maximizing an objective.
//!
//! An [`OptimizationProblem`] maps solver variables `x: [f64; N]` to model
//! inputs, calls the model, and extracts a scalar objective. Solvers in this
//! module search for the `x` that minimizes or maximizes that objective.
//!
//! # Solvers
//!
//! - [`trust_region`]: interpolation-based trust-region search for smooth
//!   objectives of several variables, unconstrained, bound-constrained, or
//!   subject to linear inequalities
//!
//! [`OptimizationProblem`]: tregion_core::OptimizationProblem

mod evaluate;
mod negate;

pub use evaluate::{EvalError, EvaluateResult, Evaluation, evaluate};
pub use negate::NegateObjective;

pub mod trust_region;
