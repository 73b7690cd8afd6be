use std::convert::Infallible;

use ndarray::Array1;
use tregion_core::{Model, Observer, OptimizationProblem, Snapshot};

use crate::optimization::evaluate::evaluate;

use super::{
    Error, Event, Solution, Status,
    event::EvalKind,
    history::History,
};

/// Whether the search continues with a value or stops with a status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) enum Control<T> {
    Continue(T),
    Stop(Status),
}

impl<T> Control<T> {
    pub(super) fn map<U>(self, f: impl FnOnce(T) -> U) -> Control<U> {
        match self {
            Self::Continue(v) => Control::Continue(f(v)),
            Self::Stop(status) => Control::Stop(status),
        }
    }
}

struct Best<I, O, const N: usize> {
    x: [f64; N],
    objective: f64,
    snapshot: Snapshot<I, O>,
}

/// Evaluates points and keeps the bookkeeping every evaluation shares.
///
/// The sampler enforces the budget and the target, records history, reports
/// each evaluation to the observer, tracks the best feasible point, and
/// replaces non-finite values before they reach the model.
pub(super) struct Sampler<'a, M, P, Obs, F, const N: usize>
where
    M: Model,
{
    model: &'a M,
    problem: &'a P,
    observer: Obs,
    report: F,
    max_evals: usize,
    target: f64,
    evals: usize,
    history: History<N>,
    best: Best<M::Input, M::Output, N>,
    finite_range: Option<(f64, f64)>,
}

impl<'a, M, P, Obs, F, const N: usize> Sampler<'a, M, P, Obs, F, N>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
    Obs: for<'e> Observer<Event<'e, M, N>, Infallible>,
    F: Fn(f64) -> f64,
{
    /// Evaluates the starting point and returns a sampler tracking it.
    ///
    /// The start is always kept as the initial best so a solution exists
    /// even when its value is not finite.
    pub(super) fn start(
        model: &'a M,
        problem: &'a P,
        mut observer: Obs,
        report: F,
        limits: SampleLimits,
        x0: &Array1<f64>,
    ) -> Result<(Self, Control<f64>), Error> {
        let point = to_point(x0);
        let eval = evaluate(model, problem, point)?;
        let finite = eval.is_finite();
        let f = eval.objective;
        emit::<M, _, _, N>(
            &mut observer,
            &report,
            point,
            f,
            true,
            &eval.snapshot,
            EvalKind::Initial,
            1,
        );

        let mut history = History::with_capacity(limits.history);
        history.push(point, f);

        let mut sampler = Self {
            model,
            problem,
            observer,
            report,
            max_evals: limits.max_evals,
            target: limits.target,
            evals: 1,
            history,
            best: Best {
                x: point,
                objective: f,
                snapshot: eval.snapshot,
            },
            finite_range: None,
        };

        if !finite {
            log::info!("objective is not finite at the initial point");
            return Ok((sampler, Control::Stop(Status::NonFiniteAtStart)));
        }
        let control = sampler.screen(f, true);
        Ok((sampler, control))
    }

    pub(super) fn evals(&self) -> usize {
        self.evals
    }

    pub(super) fn has_budget(&self) -> bool {
        self.evals < self.max_evals
    }

    /// Evaluates the objective at absolute point `x`.
    ///
    /// Returns the value to use for modeling: the objective itself when it
    /// is finite, otherwise a value above every finite value seen so far.
    pub(super) fn sample(
        &mut self,
        x: &Array1<f64>,
        feasible: bool,
        kind: EvalKind,
    ) -> Result<Control<f64>, Error> {
        if !self.has_budget() {
            return Ok(Control::Stop(Status::BudgetExhausted));
        }

        let point = to_point(x);
        let eval = evaluate(self.model, self.problem, point)?;
        self.evals += 1;
        let f = eval.objective;
        self.history.push(point, f);
        emit::<M, _, _, N>(
            &mut self.observer,
            &self.report,
            point,
            f,
            feasible,
            &eval.snapshot,
            kind,
            self.evals,
        );

        let best = &self.best;
        if f.is_finite() && feasible && (!best.objective.is_finite() || f < best.objective) {
            self.best = Best {
                x: point,
                objective: f,
                snapshot: eval.snapshot,
            };
        }

        Ok(self.screen(f, feasible))
    }

    /// Applies the target test and moderates non-finite values.
    fn screen(&mut self, f: f64, feasible: bool) -> Control<f64> {
        if !f.is_finite() {
            log::debug!("non-finite objective at evaluation {}", self.evals);
            let (fmin, fmax) = self.finite_range.unwrap_or((0.0, 0.0));
            return Control::Continue(fmax + (fmax - fmin).max(1.0));
        }

        self.finite_range = Some(match self.finite_range {
            None => (f, f),
            Some((lo, hi)) => (lo.min(f), hi.max(f)),
        });

        if feasible && self.target.is_finite() && f <= self.target {
            return Control::Stop(Status::TargetReached);
        }
        Control::Continue(f)
    }

    /// Forwards a non-evaluation event to the observer.
    pub(super) fn notify(&mut self, event: &Event<'_, M, N>) {
        if let Some(never) = self.observer.observe(event) {
            match never {}
        }
    }

    /// Objective of the best point so far, before reporting.
    pub(super) fn best_objective(&self) -> f64 {
        self.best.objective
    }

    pub(super) fn into_solution(
        self,
        status: Status,
        rho: f64,
    ) -> Solution<M::Input, M::Output, N> {
        let report = self.report;
        Solution {
            status,
            x: self.best.x,
            objective: report(self.best.objective),
            snapshot: self.best.snapshot,
            evals: self.evals,
            rho,
            history: self.history.into_vec(report),
        }
    }
}

/// Evaluation limits shared by every sample.
#[derive(Debug, Clone, Copy)]
pub(super) struct SampleLimits {
    pub(super) max_evals: usize,
    pub(super) target: f64,
    pub(super) history: usize,
}

fn to_point<const N: usize>(x: &Array1<f64>) -> [f64; N] {
    let mut point = [0.0; N];
    for (p, v) in point.iter_mut().zip(x) {
        *p = *v;
    }
    point
}

#[allow(clippy::too_many_arguments)]
fn emit<M, Obs, F, const N: usize>(
    observer: &mut Obs,
    report: &F,
    x: [f64; N],
    objective: f64,
    feasible: bool,
    snapshot: &Snapshot<M::Input, M::Output>,
    kind: EvalKind,
    evals: usize,
) where
    M: Model,
    Obs: for<'e> Observer<Event<'e, M, N>, Infallible>,
    F: Fn(f64) -> f64,
{
    let event = Event::Evaluated {
        x,
        objective: report(objective),
        feasible,
        input: &snapshot.input,
        output: &snapshot.output,
        kind,
        evals,
    };
    if let Some(never) = observer.observe(&event) {
        match never {}
    }
}
