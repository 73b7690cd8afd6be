use std::convert::Infallible;

use ndarray::Array1;
use tregion_core::{Model, Observer, OptimizationProblem};

use super::{
    Config, Error, Event, Region, Solution, Status,
    event::EvalKind,
    factorization::Factorization,
    geometry::{choose_drop_for_geometry, choose_drop_for_trial, geometry_step},
    init::initialize,
    model::ModelStore,
    region::Domain,
    rescue::rescue,
    sampler::{Control, SampleLimits, Sampler},
    state::TrustRegionState,
    subproblem,
};

/// Outcome of starting a search: a running engine, or a finished solution
/// when the search stopped during initialization.
pub(super) enum Startup<E, S> {
    Ready(E),
    Done(S),
}

/// The trust-region iteration over one problem.
pub(super) struct Engine<'a, M, P, Obs, F, const N: usize>
where
    M: Model,
{
    pub(super) sampler: Sampler<'a, M, P, Obs, F, N>,
    pub(super) store: ModelStore,
    pub(super) fact: Factorization,
    pub(super) domain: Domain,
    pub(super) state: TrustRegionState,

    /// Evaluation count right after the most recent rescue.
    last_rescue: Option<usize>,

    /// The last step if it was too short to evaluate.
    pub(super) pending_short: Option<Array1<f64>>,

    max_cycles: usize,
}

/// Runs the trust-region search.
///
/// `report` maps internal objective values to the caller's sign convention
/// before they reach observers, history, or the solution.
pub(super) fn search<M, P, Obs, F, const N: usize>(
    model: &M,
    problem: &P,
    x0: [f64; N],
    region: &Region<N>,
    config: &Config,
    observer: Obs,
    report: F,
) -> Result<Solution<M::Input, M::Output, N>, Error>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
    Obs: for<'e> Observer<Event<'e, M, N>, Infallible>,
    F: Fn(f64) -> f64,
{
    match Engine::start(model, problem, x0, region, config, observer, report)? {
        Startup::Ready(engine) => engine.run(),
        Startup::Done(solution) => Ok(solution),
    }
}

impl<'a, M, P, Obs, F, const N: usize> Engine<'a, M, P, Obs, F, N>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
    Obs: for<'e> Observer<Event<'e, M, N>, Infallible>,
    F: Fn(f64) -> f64,
{
    /// Validates the inputs, evaluates the start, and builds the first model.
    pub(super) fn start(
        model: &'a M,
        problem: &'a P,
        x0: [f64; N],
        region: &Region<N>,
        config: &Config,
        observer: Obs,
        report: F,
    ) -> Result<Startup<Self, Solution<M::Input, M::Output, N>>, Error> {
        let limits = config.limits(N)?;
        let rho = config.initial_radius;
        let (domain, xbase) = Domain::new(region, &x0, rho)?;

        let sample_limits = SampleLimits {
            max_evals: limits.max_evals,
            target: config.target_objective,
            history: config.history_capacity::<N>(limits.max_evals),
        };
        let (mut sampler, control) =
            Sampler::start(model, problem, observer, report, sample_limits, &xbase)?;
        let f0 = match control {
            Control::Continue(f) => f,
            Control::Stop(status) => return Ok(Startup::Done(sampler.into_solution(status, rho))),
        };

        let (store, fact) = match initialize(&mut sampler, &domain, xbase, f0, limits.npt, rho)? {
            Control::Continue(built) => built,
            Control::Stop(status) => return Ok(Startup::Done(sampler.into_solution(status, rho))),
        };

        Ok(Startup::Ready(Self {
            sampler,
            store,
            fact,
            domain,
            state: TrustRegionState::new(rho, config.final_radius),
            last_rescue: None,
            pending_short: None,
            max_cycles: 10 * limits.max_evals,
        }))
    }

    /// Iterates until a stopping condition is met.
    pub(super) fn run(mut self) -> Result<Solution<M::Input, M::Output, N>, Error> {
        let mut cycles = 0;
        let status = loop {
            if cycles >= self.max_cycles {
                break Status::BudgetExhausted;
            }
            cycles += 1;

            #[cfg(any(test, feature = "invariant-checks"))]
            let previous_rho = self.state.rho;

            match self.cycle()? {
                Control::Continue(()) => {}
                Control::Stop(status) => break status,
            }

            #[cfg(any(test, feature = "invariant-checks"))]
            self.check_invariants(previous_rho);
        };

        let status = match status {
            Status::ResolutionReached => self.finish_short_step()?,
            other => other,
        };
        log::info!(
            "trust-region search stopped: {status:?} after {} evaluations, best {}",
            self.sampler.evals(),
            self.sampler.best_objective()
        );
        Ok(self.sampler.into_solution(status, self.state.rho))
    }

    /// One trust-region iteration: a trial step, possibly followed by a
    /// geometry step or a resolution reduction.
    fn cycle(&mut self) -> Result<Control<()>, Error> {
        let rho = self.state.rho;
        log::trace!(
            "cycle: rho {rho:e}, delta {:e}, fopt {}, evals {}",
            self.state.delta,
            self.store.fopt(),
            self.sampler.evals()
        );

        let step = subproblem::solve(&self.store, &self.domain, self.state.delta);
        let d = self.clipped(&step.d);
        let dnorm = d.dot(&d).sqrt().min(self.state.delta);
        let short = (dnorm < 0.5 * rho && !step.active_changed) || dnorm < 0.1 * rho;
        self.state.record_step(dnorm);
        let qred = -self.store.quad_inc(&d);

        let mut ratio = f64::NEG_INFINITY;
        let mut replaced = false;
        if short || !(qred > 0.0) {
            self.state.shrink();
            self.pending_short = short.then_some(d);
        } else {
            self.pending_short = None;
            match self.trial_step(d, qred, dnorm)? {
                Control::Continue(Some(r)) => {
                    ratio = r;
                    replaced = true;
                }
                Control::Continue(None) => return Ok(Control::Continue(())),
                Control::Stop(status) => return Ok(Control::Stop(status)),
            }
        }

        let accurate = self.state.accurate_model(step.crvmin);
        let close = self.state.is_close(self.store.distsq());
        let adequate_geo = (short && accurate) || close;
        let bad_step = |eta: f64| short || !(qred > 0.0) || ratio <= eta || !replaced;
        let improve_geo = bad_step(0.1) && !adequate_geo;
        let reduce_rho = bad_step(0.0) && adequate_geo && self.state.delta.max(dnorm) <= rho;

        if improve_geo && let Control::Stop(status) = self.geometry_step()? {
            return Ok(Control::Stop(status));
        }

        if reduce_rho {
            if self.state.at_final_resolution() {
                return Ok(Control::Stop(Status::ResolutionReached));
            }
            self.state.reduce();
            log::debug!(
                "resolution reduced to {:e} (delta {:e}) after {} evaluations",
                self.state.rho,
                self.state.delta,
                self.sampler.evals()
            );
            self.sampler.notify(&Event::RadiusReduced {
                rho: self.state.rho,
                delta: self.state.delta,
            });
        }

        Ok(Control::Continue(()))
    }

    /// Evaluates the trial step `d` and folds it into the model.
    ///
    /// Returns the reduction ratio, or `None` when a rescue replaced the
    /// interpolation set instead.
    fn trial_step(
        &mut self,
        d: Array1<f64>,
        qred: f64,
        dnorm: f64,
    ) -> Result<Control<Option<f64>>, Error> {
        let xopt = self.store.xopt();
        if d.dot(&d) <= 1e-3 * xopt.dot(&xopt) {
            self.store.shift_base(&mut self.fact, &mut self.domain);
            log::debug!("base point moved to the current center");
        }
        let xopt = self.store.xopt();

        let (vlag, beta) = self.fact.lagrange(&self.store.xpt, self.store.kopt, &d);
        let delta = self.state.delta;
        let Some(knew) =
            choose_drop_for_trial(&self.store, &self.fact, &vlag, beta, &xopt, delta, true)
        else {
            return Ok(self.rescue()?.map(|()| None));
        };

        let ynew = &xopt + &d;
        let (f, feasible) = match self.sample(&ynew, EvalKind::Trial)? {
            Control::Continue(sampled) => sampled,
            Control::Stop(status) => return Ok(Control::Stop(status)),
        };

        let fopt = self.store.fopt();
        let moderr = f - fopt + qred;
        let moderr_alt = f - fopt - self.store.alternative_change(&vlag);
        let ratio = (fopt - f) / qred;
        let ratio = if ratio.is_finite() {
            ratio
        } else {
            f64::NEG_INFINITY
        };
        self.state.update_radius(ratio, dnorm);
        self.state.record_model_error(moderr);

        let improved = feasible && f < fopt;
        let knew = if improved {
            let delta = self.state.delta;
            choose_drop_for_trial(&self.store, &self.fact, &vlag, beta, &ynew, delta, false)
                .unwrap_or(knew)
        } else {
            knew
        };

        if let Err(err) = self.fact.update(knew, beta, &vlag) {
            log::debug!("trial update failed: {err}");
            return Ok(self.rescue()?.map(|()| None));
        }
        self.store.absorb(&self.fact, knew, moderr, &ynew, f, feasible);
        if improved {
            self.store.recenter_by(knew, &d);
        }

        let alternative_better = moderr_alt.abs() <= 0.1 * moderr.abs();
        if self.state.record_alternative(alternative_better) {
            self.store.replace_with_alternative(&self.fact);
            log::debug!("model replaced by the minimum-norm interpolant");
            let evals = self.sampler.evals();
            self.sampler.notify(&Event::ModelReplaced { evals });
        }

        Ok(Control::Continue(Some(ratio)))
    }

    /// Moves the farthest point to where its Lagrange function is large.
    fn geometry_step(&mut self) -> Result<Control<()>, Error> {
        let (rho, delta) = (self.state.rho, self.state.delta);
        let Some((knew, dist)) = choose_drop_for_geometry(&self.store, delta, rho) else {
            return Ok(Control::Continue(()));
        };
        let adelt = (0.1 * dist).min(delta).max(rho);

        let step = geometry_step(&self.store, &self.fact, &self.domain, knew, adelt);
        if step.is_degenerate(knew) {
            return self.rescue();
        }

        let xopt = self.store.xopt();
        let d = self.clipped(&step.d);
        let ynew = &xopt + &d;
        let (f, feasible) = match self.sample(&ynew, EvalKind::Geometry)? {
            Control::Continue(sampled) => sampled,
            Control::Stop(status) => return Ok(Control::Stop(status)),
        };

        let fopt = self.store.fopt();
        let moderr = f - fopt - self.store.quad_inc(&d);
        self.state.record_step(d.dot(&d).sqrt().min(adelt));
        self.state.record_model_error(moderr);

        if let Err(err) = self.fact.update(knew, step.beta, &step.vlag) {
            log::debug!("geometry update failed: {err}");
            return self.rescue();
        }
        self.store.absorb(&self.fact, knew, moderr, &ynew, f, feasible);
        if feasible && f < fopt {
            self.store.recenter_by(knew, &d);
        }
        Ok(Control::Continue(()))
    }

    /// Rebuilds the interpolation set, unless nothing was evaluated since the
    /// previous rebuild.
    pub(super) fn rescue(&mut self) -> Result<Control<()>, Error> {
        if self.last_rescue == Some(self.sampler.evals()) {
            log::debug!("rescue requested twice without progress");
            return Ok(Control::Stop(Status::SubproblemDegenerate));
        }
        let control = rescue(
            &mut self.sampler,
            &mut self.store,
            &mut self.fact,
            &mut self.domain,
            self.state.rho,
        )?;
        self.last_rescue = Some(self.sampler.evals());
        Ok(control)
    }

    /// Evaluates the step left pending by a final short cycle.
    pub(super) fn finish_short_step(&mut self) -> Result<Status, Error> {
        let Some(d) = self.pending_short.take() else {
            return Ok(Status::ResolutionReached);
        };
        if d.dot(&d).sqrt() < 0.1 * self.state.rho || !self.sampler.has_budget() {
            return Ok(Status::ResolutionReached);
        }
        let ynew = &self.store.xopt() + &self.clipped(&d);
        Ok(match self.sample(&ynew, EvalKind::Final)? {
            Control::Continue(_) => Status::ResolutionReached,
            Control::Stop(status) => status,
        })
    }

    /// The step `d` from `xopt` after clipping its end point into the region.
    fn clipped(&self, d: &Array1<f64>) -> Array1<f64> {
        let xopt = self.store.xopt();
        let mut y = &xopt + d;
        self.domain.clip(&mut y);
        y - &xopt
    }

    /// Samples the relative point `y`, returning its modeling value and
    /// feasibility.
    fn sample(&mut self, y: &Array1<f64>, kind: EvalKind) -> Result<Control<(f64, bool)>, Error> {
        let x = self.domain.absolute(&self.store.xbase, y);
        let feasible = self.domain.is_feasible(y);
        Ok(self.sampler.sample(&x, feasible, kind)?.map(|f| (f, feasible)))
    }

    #[cfg(any(test, feature = "invariant-checks"))]
    fn check_invariants(&self, previous_rho: f64) {
        self.state.check_invariants(previous_rho);
        assert!(
            self.fact.idz <= self.fact.zmat.ncols(),
            "split index {} out of range",
            self.fact.idz
        );
        let best = self.store.best_feasible();
        assert!(
            self.store.fopt() <= self.store.fval[best],
            "center value {} above best feasible value {}",
            self.store.fopt(),
            self.store.fval[best]
        );
    }
}
