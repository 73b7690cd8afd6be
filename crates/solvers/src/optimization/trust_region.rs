//! Interpolation-based trust-region search for objectives of several variables.
//!
//! # Algorithm
//!
//! The solver keeps a quadratic model of the objective that interpolates `m`
//! sampled points, with `n+2 ≤ m ≤ (n+1)(n+2)/2`. Curvature the points do not
//! determine is fixed by keeping the change in the model Hessian as small as
//! possible. Each cycle minimizes the model inside a trust region of radius
//! `δ` around the best point, evaluates the objective there, and swaps the
//! new point into the interpolation set. The model and the factored inverse
//! of the interpolation system are revised in `O(m·n)` operations per swap.
//!
//! When steps stop paying off the solver either moves a distant point to
//! improve the geometry of the set or reduces the resolution `ρ`, a lower
//! bound on `δ`. The search ends once `ρ` reaches
//! [`Config::final_radius`] and the model can no longer make progress.
//!
//! # Regions
//!
//! - [`Region::Unconstrained`]
//! - [`Region::Bounds`]: every sample stays inside the bounds
//! - [`Region::Linear`]: trust-region steps stay feasible; interpolation
//!   points built along coordinates may not
//!
//! # Objective values
//!
//! A non-finite objective at the starting point ends the search with
//! [`Status::NonFiniteAtStart`]. Later non-finite values are reported to the
//! observer and history as-is, never become the best point, and are replaced
//! for modeling by a value above every finite value seen so far.
//!
//! # Observer Events
//!
//! - [`Event::Evaluated`] after every objective evaluation
//! - [`Event::RadiusReduced`] when the resolution shrinks
//! - [`Event::Rescued`] after the interpolation set is rebuilt
//! - [`Event::ModelReplaced`] when the model is refit from the cached values
//!
//! Observers cannot steer the search; the action type is [`Infallible`].
//!
//! # Logging
//!
//! Progress is reported through the [`log`] facade; no logger is installed.

mod config;
mod error;
mod event;
mod factorization;
mod geometry;
mod history;
mod init;
mod model;
mod region;
mod rescue;
mod sampler;
mod search;
mod solution;
mod state;
mod subproblem;


pub use config::{Config, ConfigError};
pub use error::Error;
pub use event::{EvalKind, Event};
pub use history::HistoryEntry;
pub use region::{LinearConstraint, Region, RegionError};
pub use solution::{Solution, Status};

use std::convert::Infallible;

use tregion_core::{Model, Observer, OptimizationProblem};

use crate::optimization::NegateObjective;

use search::search;

/// Finds a minimum of the objective over `region`, starting from `x0`.
///
/// # Errors
///
/// Returns an error if the config or region is invalid, or if the model or
/// problem fails during evaluation.
pub fn minimize<M, P, Obs, const N: usize>(
    model: &M,
    problem: &P,
    x0: [f64; N],
    region: &Region<N>,
    config: &Config,
    observer: Obs,
) -> Result<Solution<M::Input, M::Output, N>, Error>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
    Obs: for<'a> Observer<Event<'a, M, N>, Infallible>,
{
    search(model, problem, x0, region, config, observer, |v| v)
}

/// Finds a minimum of the objective without observer support.
///
/// # Errors
///
/// Returns an error if the config or region is invalid, or if the model or
/// problem fails during evaluation.
pub fn minimize_unobserved<M, P, const N: usize>(
    model: &M,
    problem: &P,
    x0: [f64; N],
    region: &Region<N>,
    config: &Config,
) -> Result<Solution<M::Input, M::Output, N>, Error>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
{
    minimize(model, problem, x0, region, config, ())
}

/// Finds a maximum of the objective over `region`, starting from `x0`.
///
/// Objective values in events, history, and the solution keep the problem's
/// sign. A finite [`Config::target_objective`] stops the search once an
/// objective at or above it is seen.
///
/// # Errors
///
/// Returns an error if the config or region is invalid, or if the model or
/// problem fails during evaluation.
pub fn maximize<M, P, Obs, const N: usize>(
    model: &M,
    problem: &P,
    x0: [f64; N],
    region: &Region<N>,
    config: &Config,
    observer: Obs,
) -> Result<Solution<M::Input, M::Output, N>, Error>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
    Obs: for<'a> Observer<Event<'a, M, N>, Infallible>,
{
    let config = Config {
        target_objective: -config.target_objective,
        ..*config
    };
    let negated = NegateObjective(problem);
    search(model, &negated, x0, region, &config, observer, |v| -v)
}

/// Finds a maximum of the objective without observer support.
///
/// # Errors
///
/// Returns an error if the config or region is invalid, or if the model or
/// problem fails during evaluation.
pub fn maximize_unobserved<M, P, const N: usize>(
    model: &M,
    problem: &P,
    x0: [f64; N],
    region: &Region<N>,
    config: &Config,
) -> Result<Solution<M::Input, M::Output, N>, Error>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
{
    maximize(model, problem, x0, region, config, ())
}
