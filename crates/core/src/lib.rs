//! Core traits and types for defining derivative-free optimization problems.
//!
//! This crate defines the shared abstractions that solvers build on:
//!
//! - [`Model`]: a callable that maps a typed input to a typed output
//! - [`Snapshot`]: a captured input/output pair from a model call
//! - [`Observer`]: receives solver events and optionally returns control actions
//! - [`OptimizationProblem`]: adapts solver variables to model inputs and
//!   extracts a scalar objective from outputs

mod model;
mod observer;
mod problems;

pub use model::{Model, Snapshot};
pub use observer::Observer;
pub use problems::OptimizationProblem;
