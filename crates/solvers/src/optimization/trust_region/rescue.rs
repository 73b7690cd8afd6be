use std::convert::Infallible;

use ndarray::{Array1, Array2, Axis, s};
use tregion_core::{Model, Observer, OptimizationProblem};

use super::{
    Error, Event,
    event::EvalKind,
    factorization::Factorization,
    init::coordinate_design,
    model::ModelStore,
    region::{Domain, ProbeSteps},
    sampler::{Control, Sampler},
};

/// Old points closer than this multiple of `rho` to a point already in the
/// new design are not re-admitted.
const MIN_SEPARATION: f64 = 0.01;

/// A fresh design around the best point with as many old points as could be
/// kept, and the rows still waiting for an evaluation.
struct Redesign {
    xpt: Array2<f64>,
    fval: Array1<f64>,
    feasible: Vec<bool>,
    fact: Factorization,
    pending: Vec<usize>,
}

/// Rebuilds the interpolation set and factorization around the best point.
///
/// The current model is kept as a baseline: after the new points are
/// evaluated it is corrected by the minimum-norm interpolant of its residuals.
/// Stops with the sampler's status if the budget runs out mid-way.
pub(super) fn rescue<M, P, Obs, F, const N: usize>(
    sampler: &mut Sampler<'_, M, P, Obs, F, N>,
    store: &mut ModelStore,
    fact: &mut Factorization,
    domain: &mut Domain,
    rho: f64,
) -> Result<Control<()>, Error>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
    Obs: for<'e> Observer<Event<'e, M, N>, Infallible>,
    F: Fn(f64) -> f64,
{
    let mut redesign = redesign(store, domain, rho);
    log::debug!(
        "rescue at rho {rho}: kept {} of {} points",
        store.npt() - 1 - redesign.pending.len(),
        store.npt() - 1
    );

    for &k in &redesign.pending {
        let y = redesign.xpt.row(k).to_owned();
        let x = domain.absolute(&store.xbase, &y);
        match sampler.sample(&x, domain.is_feasible(&y), EvalKind::Rescue)? {
            Control::Continue(f) => redesign.fval[k] = f,
            Control::Stop(status) => return Ok(Control::Stop(status)),
        }
    }

    refit(store, redesign, fact);
    let evals = sampler.evals();
    sampler.notify(&Event::Rescued { evals });
    Ok(Control::Continue(()))
}

/// Moves the origin to `xopt` and lays out a coordinate design there.
///
/// The implicit Hessian is made explicit first so the model survives the
/// change of points. Old points are offered to the design nearest first and
/// take over a provisional row when the update denominator is safe and they
/// do not nearly coincide with a point already placed.
fn redesign(store: &mut ModelStore, domain: &mut Domain, rho: f64) -> Redesign {
    let (m, n) = store.xpt.dim();
    store.absorb_implicit_hessian();

    let xopt = store.xopt();
    for mut row in store.xpt.axis_iter_mut(Axis(0)) {
        row -= &xopt;
    }
    store.xbase += &xopt;
    domain.shift(&xopt);

    let steps: Vec<ProbeSteps> = (0..n).map(|c| domain.probe_steps(c, rho)).collect();
    let (mut xpt, mut fact) = coordinate_design(n, m, &steps);
    let mut fval = Array1::zeros(m);
    let mut feasible = vec![true; m];
    fval[0] = store.fopt();
    feasible[0] = store.feasible[store.kopt];
    for k in 1..m {
        feasible[k] = domain.is_feasible(&xpt.row(k).to_owned());
    }
    let mut pending: Vec<usize> = (1..m).collect();

    let distsq = store.distsq();
    let mut order: Vec<usize> = (0..m).filter(|&k| k != store.kopt).collect();
    order.sort_by(|&a, &b| distsq[a].total_cmp(&distsq[b]));

    for k in order {
        if pending.is_empty() {
            break;
        }
        let y = store.xpt.row(k).to_owned();
        let crowded = (0..m).filter(|r| !pending.contains(r)).any(|r| {
            let gap = &xpt.row(r) - &y;
            gap.dot(&gap).sqrt() < MIN_SEPARATION * rho
        });
        if crowded {
            continue;
        }
        let (vlag, beta) = fact.lagrange(&xpt, 0, &y);

        let Some((pos, den)) = pending
            .iter()
            .map(|&j| beta * fact.omega_diag(j) + vlag[j] * vlag[j])
            .enumerate()
            .filter(|(_, den)| den.is_finite())
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            continue;
        };
        let row = pending[pos];
        if den <= 0.5 * vlag[row] * vlag[row] || fact.update(row, beta, &vlag).is_err() {
            continue;
        }
        xpt.row_mut(row).assign(&y);
        fval[row] = store.fval[k];
        feasible[row] = store.feasible[k];
        pending.remove(pos);
    }

    Redesign {
        xpt,
        fval,
        feasible,
        fact,
        pending,
    }
}

/// Installs the new points and corrects the model by the minimum-norm
/// interpolant of its residuals, then centers on the best feasible point.
fn refit(store: &mut ModelStore, redesign: Redesign, fact: &mut Factorization) {
    let m = store.npt();
    let fopt = store.fopt();
    let residuals: Array1<f64> = redesign
        .xpt
        .rows()
        .into_iter()
        .zip(&redesign.fval)
        .map(|(y, f)| {
            let y = y.to_owned();
            f - (fopt + store.quad_inc(&y))
        })
        .collect();

    *fact = redesign.fact;
    store.xpt = redesign.xpt;
    store.fval = redesign.fval;
    store.feasible = redesign.feasible;
    store.kopt = 0;

    store.pq = fact.omega_mul(&residuals);
    store.gopt += &fact.bmat.slice(s![..m, ..]).t().dot(&residuals);

    let best = store.best_feasible();
    store.recenter(best);
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::array;

    use crate::optimization::trust_region::Region;

    fn quadratic(x: &Array1<f64>) -> f64 {
        (x[0] - 1.0).powi(2) + 10.0 * (x[1] - 2.0).powi(2) + 0.5 * x[0] * x[1]
    }

    fn fixture(m: usize) -> (ModelStore, Factorization, Domain) {
        let (domain, xbase) = Domain::new(&Region::<2>::Unconstrained, &[0.0, 0.0], 0.5).unwrap();
        let steps: Vec<ProbeSteps> = (0..2).map(|c| domain.probe_steps(c, 0.5)).collect();
        let (xpt, fact) = coordinate_design(2, m, &steps);
        let fval = xpt
            .rows()
            .into_iter()
            .map(|y| quadratic(&(&xbase + &y)))
            .collect();
        let store = ModelStore::from_design(xbase, xpt, fval, vec![true; m], &fact);
        (store, fact, domain)
    }

    fn fill_pending(store: &ModelStore, redesign: &mut Redesign) {
        for &k in &redesign.pending {
            let x = &store.xbase + &redesign.xpt.row(k);
            redesign.fval[k] = quadratic(&x);
        }
    }

    #[test]
    fn redesign_keeps_nearby_points_and_the_center() {
        let (mut store, _, mut domain) = fixture(6);
        let fopt = store.fopt();
        let xopt_abs = &store.xbase + &store.xopt();

        let redesign = redesign(&mut store, &mut domain, 0.5);

        assert_eq!(redesign.fval[0], fopt);
        assert_relative_eq!(store.xbase[0], xopt_abs[0]);
        assert_relative_eq!(store.xbase[1], xopt_abs[1]);
        assert!(redesign.pending.len() < 5);
        for k in (1..6).filter(|k| !redesign.pending.contains(k)) {
            let x = &store.xbase + &redesign.xpt.row(k);
            assert_relative_eq!(redesign.fval[k], quadratic(&x), epsilon = 1e-9);
        }
    }

    #[test]
    fn coincident_old_points_are_admitted_once() {
        let (mut store, _, mut domain) = fixture(6);
        let mut others = (0..6).filter(|&k| k != store.kopt);
        let (a, b) = (others.next().unwrap(), others.next().unwrap());
        let y = store.xpt.row(a).to_owned();
        store.xpt.row_mut(b).assign(&y);
        store.fval[b] = store.fval[a];

        let redesign = redesign(&mut store, &mut domain, 0.5);

        let placed: Vec<usize> = (0..6).filter(|k| !redesign.pending.contains(k)).collect();
        for (i, &p) in placed.iter().enumerate() {
            for &q in &placed[i + 1..] {
                let gap = &redesign.xpt.row(p) - &redesign.xpt.row(q);
                assert!(gap.dot(&gap).sqrt() >= MIN_SEPARATION * 0.5);
            }
        }
    }

    #[test]
    fn refit_interpolates_every_point() {
        let (mut store, _, mut domain) = fixture(5);
        store.gopt += &array![0.25, -0.5];

        let mut redesign = redesign(&mut store, &mut domain, 0.25);
        fill_pending(&store, &mut redesign);
        let mut fact = Factorization::zeros(2, 5);
        refit(&mut store, redesign, &mut fact);

        let xopt = store.xopt();
        for k in 0..5 {
            let d = &store.xpt.row(k) - &xopt;
            assert_relative_eq!(
                store.fopt() + store.quad_inc(&d),
                store.fval[k],
                epsilon = 1e-9,
                max_relative = 1e-9
            );
        }
        assert_eq!(store.kopt, store.best_feasible());
    }

    #[test]
    fn refit_recovers_a_quadratic_exactly() {
        let (mut store, _, mut domain) = fixture(6);

        let mut redesign = redesign(&mut store, &mut domain, 0.3);
        fill_pending(&store, &mut redesign);
        let mut fact = Factorization::zeros(2, 6);
        refit(&mut store, redesign, &mut fact);

        let x0 = &store.xbase + &store.xopt();
        let d = array![0.8, -1.1];
        assert_relative_eq!(
            store.quad_inc(&d),
            quadratic(&(&x0 + &d)) - quadratic(&x0),
            epsilon = 1e-8
        );
    }
}
