//! Approximate minimization of the model inside the trust region.

mod active_set;
mod box_step;
mod linear_step;

use ndarray::Array1;

use super::{model::ModelStore, region::Domain};

use box_step::box_step;
use linear_step::linear_step;

/// A trust-region step from `xopt`.
#[derive(Debug, Clone)]
pub(super) struct Step {
    pub(super) d: Array1<f64>,

    /// Least curvature seen along a search direction, or zero when the step
    /// reached the trust-region boundary.
    pub(super) crvmin: f64,

    /// Whether the active set changed while the step was being built.
    pub(super) active_changed: bool,
}

/// Solves the subproblem over the region `domain` with radius `delta`.
pub(super) fn solve(model: &ModelStore, domain: &Domain, delta: f64) -> Step {
    match domain {
        Domain::Box { sl, su, .. } => box_step(model, sl, su, delta),
        Domain::Linear { normals, rhs, .. } => linear_step(model, normals, rhs, delta),
    }
}
