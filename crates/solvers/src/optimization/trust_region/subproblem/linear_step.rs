use ndarray::{Array1, Array2};

use crate::optimization::trust_region::model::ModelStore;

use super::{Step, active_set::ActiveSet};

/// Constraints with residual within this fraction of `delta` are candidates
/// for the initial active set.
const NEAR_ACTIVE: f64 = 0.2;

/// Projected truncated conjugate gradient step within `‖d‖ ≤ delta` that
/// keeps `normals · (xopt + d) ≤ rhs`.
///
/// The search runs in the null space of an active set of nearly binding
/// constraints. Whenever it meets another constraint, that constraint joins
/// the active set and the search restarts from the current step.
pub(super) fn linear_step(
    model: &ModelStore,
    normals: &Array2<f64>,
    rhs: &Array1<f64>,
    delta: f64,
) -> Step {
    let n = model.gopt.len();
    let xopt = model.xopt();
    let resid = (rhs - &normals.dot(&xopt)).mapv(|r| r.max(0.0));

    let mut active = select_active(normals, &resid, &model.gopt, delta);
    let mut active_changed = false;

    let mut d = Array1::<f64>::zeros(n);
    let mut gd = model.gopt.clone();
    let mut qred = 0.0;
    let mut crvmin = -1.0_f64;
    let mut iterations = 0;
    let max_iterations = 2 * n + normals.nrows();

    'restart: loop {
        let mut s = Array1::<f64>::zeros(n);
        let mut rsq_prev = 0.0;
        let mut first = true;

        loop {
            if active.len() >= n || iterations >= max_iterations {
                break 'restart;
            }
            let r = -active.project(&gd);
            let rsq = r.dot(&r);
            if rsq == 0.0 || rsq * delta * delta <= 1e-4 * qred * qred {
                break 'restart;
            }
            s = if first {
                r
            } else {
                r + &(&s * (rsq / rsq_prev))
            };
            first = false;
            rsq_prev = rsq;
            iterations += 1;

            let room = delta * delta - d.dot(&d);
            if room <= 0.0 {
                crvmin = 0.0;
                break 'restart;
            }
            let ds = d.dot(&s);
            let ss = s.dot(&s);
            let blen = room / ((ds * ds + ss * room).sqrt() + ds);

            let hs = model.hess_mul(&s);
            let shs = s.dot(&hs);
            let descent = -s.dot(&gd);
            if descent <= 0.0 {
                break 'restart;
            }

            let mut stplen = blen;
            if shs > 0.0 {
                stplen = stplen.min(descent / shs);
            }

            let mut hit = None;
            for (j, a) in normals.rows().into_iter().enumerate() {
                if active.contains(j) {
                    continue;
                }
                let rate = a.dot(&s);
                if rate <= 0.0 {
                    continue;
                }
                let slack = (resid[j] - a.dot(&d)).max(0.0);
                let t = slack / rate;
                if t < stplen {
                    stplen = t;
                    hit = Some(j);
                }
            }

            let mut sdec = 0.0;
            if stplen > 0.0 {
                sdec = stplen * descent - 0.5 * stplen * stplen * shs;
                d.scaled_add(stplen, &s);
                gd.scaled_add(stplen, &hs);
                qred += sdec.max(0.0);
                if hit.is_none() && shs > 0.0 {
                    let curv = shs / ss;
                    crvmin = if crvmin < 0.0 { curv } else { crvmin.min(curv) };
                }
            }

            if let Some(j) = hit {
                if !active.add(j, normals.row(j)) {
                    break 'restart;
                }
                active_changed = true;
                log::trace!("linear step met constraint {j}");
                continue 'restart;
            }
            if stplen >= blen {
                crvmin = 0.0;
                break 'restart;
            }
            if sdec <= 0.01 * qred {
                break 'restart;
            }
        }
    }

    Step {
        d,
        crvmin: crvmin.max(0.0),
        active_changed,
    }
}

/// Picks the constraints that bind a steepest descent step of length
/// `delta` among those with residual at most `NEAR_ACTIVE · delta`.
///
/// A constraint is added when the projected descent direction would cross it
/// within the trust region, and dropped again when its multiplier turns
/// negative.
fn select_active(
    normals: &Array2<f64>,
    resid: &Array1<f64>,
    g: &Array1<f64>,
    delta: f64,
) -> ActiveSet {
    let n = g.len();
    let candidates: Vec<usize> = (0..normals.nrows())
        .filter(|&j| resid[j] <= NEAR_ACTIVE * delta)
        .collect();
    let mut active = ActiveSet::default();
    if candidates.is_empty() {
        return active;
    }

    for _ in 0..(2 * candidates.len() + n) {
        let lambda = active.multipliers(g);
        if let Some((pos, _)) = lambda
            .iter()
            .enumerate()
            .filter(|(_, l)| **l < 0.0)
            .min_by(|a, b| a.1.total_cmp(b.1))
        {
            active.remove(pos);
            continue;
        }

        let p = -active.project(g);
        let pnorm = p.dot(&p).sqrt();
        if pnorm == 0.0 || active.len() >= n {
            break;
        }
        let blocking = candidates
            .iter()
            .filter(|&&j| !active.contains(j))
            .map(|&j| (j, normals.row(j).dot(&p) / pnorm))
            .filter(|&(j, rate)| rate * delta > resid[j])
            .max_by(|a, b| a.1.total_cmp(&b.1));
        match blocking {
            Some((j, _)) if active.add(j, normals.row(j)) => {}
            _ => break,
        }
    }
    active
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::array;

    /// Model with gradient `g` and identity Hessian centered at the origin.
    fn model(g: Array1<f64>) -> ModelStore {
        let n = g.len();
        ModelStore {
            xbase: Array1::zeros(n),
            xpt: Array2::zeros((n + 2, n)),
            fval: Array1::zeros(n + 2),
            feasible: vec![true; n + 2],
            kopt: 0,
            gopt: g,
            hq: Array2::eye(n),
            pq: Array1::zeros(n + 2),
        }
    }

    #[test]
    fn far_constraints_leave_newton_step() {
        let m = model(array![-1.0, 0.5]);
        let normals = array![[1.0, 0.0]];
        let rhs = array![10.0];

        let step = linear_step(&m, &normals, &rhs, 5.0);

        assert_relative_eq!(step.d[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(step.d[1], -0.5, epsilon = 1e-12);
        assert!(!step.active_changed);
    }

    #[test]
    fn step_stops_on_constraint_and_slides_along_it() {
        let s = 0.5_f64.sqrt();
        let m = model(array![-1.0, -1.0]);
        let normals = array![[s, s]];
        let rhs = array![s];

        let step = linear_step(&m, &normals, &rhs, 2.0);

        assert_relative_eq!(step.d[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(step.d[1], 0.5, epsilon = 1e-12);
        assert!(step.active_changed);
        assert!(normals.row(0).dot(&step.d) <= rhs[0] + 1e-12);
    }

    #[test]
    fn nearly_active_constraint_is_held_from_the_start() {
        let m = model(array![-1.0, -1.0]);
        let normals = array![[0.0, 1.0]];
        let rhs = array![0.0];

        let step = linear_step(&m, &normals, &rhs, 0.5);

        assert_relative_eq!(step.d[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(step.d[1], 0.0, epsilon = 1e-12);
        assert_eq!(step.crvmin, 0.0);
        assert!(!step.active_changed);
    }

    #[test]
    fn constraint_pulling_away_is_not_activated() {
        // The gradient points away from y ≤ 0, so the step may leave it.
        let m = model(array![0.0, 1.0]);
        let normals = array![[0.0, 1.0]];
        let rhs = array![0.0];

        let step = linear_step(&m, &normals, &rhs, 5.0);

        assert_relative_eq!(step.d[1], -1.0, epsilon = 1e-12);
    }
}
