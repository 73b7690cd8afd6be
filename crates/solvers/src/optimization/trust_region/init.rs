use std::{convert::Infallible, f64::consts::SQRT_2};

use ndarray::{Array1, Array2};
use tregion_core::{Model, Observer, OptimizationProblem};

use super::{
    Error, Event,
    event::EvalKind,
    factorization::Factorization,
    model::ModelStore,
    region::{Domain, ProbeSteps},
    sampler::{Control, Sampler},
};

/// Coordinates `(i, j)` combined by pair point `row` (`row > 2n`).
///
/// Pairs are visited in the order `(1,0), (2,1), …` so early pairs couple
/// neighboring variables.
pub(super) fn pair_coordinates(n: usize, row: usize) -> (usize, usize) {
    let itemp = (row - n - 1) / n;
    let mut jpt = row - itemp * n - n;
    let mut ipt = jpt + itemp;
    if ipt > n {
        let temp = jpt;
        jpt = ipt - n;
        ipt = temp;
    }
    (ipt - 1, jpt - 1)
}

/// Offset of design point `row` from the design origin.
pub(super) fn design_point(n: usize, steps: &[ProbeSteps], row: usize) -> Array1<f64> {
    let mut x = Array1::zeros(n);
    if row == 0 {
        return x;
    }
    if row <= n {
        x[row - 1] = steps[row - 1].a;
    } else if row <= 2 * n {
        x[row - n - 1] = steps[row - n - 1].b;
    } else {
        let (i, j) = pair_coordinates(n, row);
        x[i] = steps[i].a;
        x[j] = steps[j].a;
    }
    x
}

/// The `m`-point coordinate design and the exact inverse factorization of its
/// interpolation system.
///
/// Row 0 is the origin, rows `1..=n` probe each coordinate by `a`, rows
/// `n+1..=2n` probe by `b` as far as `m` allows, and any remaining rows are
/// pair points.
pub(super) fn coordinate_design(
    n: usize,
    m: usize,
    steps: &[ProbeSteps],
) -> (Array2<f64>, Factorization) {
    let mut xpt = Array2::zeros((m, n));
    for row in 1..m {
        xpt.row_mut(row).assign(&design_point(n, steps, row));
    }

    let mut fact = Factorization::zeros(n, m);
    let (b, z) = (&mut fact.bmat, &mut fact.zmat);
    for (c, step) in steps.iter().enumerate() {
        let (p, q) = (c + 1, n + c + 1);
        let a = step.a;
        if q < m {
            let bs = step.b;
            b[[0, c]] = -(a + bs) / (a * bs);
            b[[q, c]] = -a / (bs * (bs - a));
            b[[p, c]] = -b[[0, c]] - b[[q, c]];
            z[[0, c]] = SQRT_2 / (a * bs);
            z[[p, c]] = SQRT_2 / (a * (a - bs));
            z[[q, c]] = -SQRT_2 / (bs * (a - bs));
        } else {
            b[[0, c]] = -1.0 / a;
            b[[p, c]] = 1.0 / a;
            b[[m + c, c]] = -0.5 * a * a;
        }
    }

    for row in (2 * n + 1)..m {
        let (i, j) = pair_coordinates(n, row);
        let col = row - n - 1;
        let scale = 1.0 / (steps[i].a * steps[j].a).abs();
        z[[0, col]] = scale;
        z[[row, col]] = scale;
        z[[i + 1, col]] = -scale;
        z[[j + 1, col]] = -scale;
    }

    (xpt, fact)
}

/// Evaluates the initial design around `xbase` and builds the first model.
///
/// `f0` is the already sampled value at `xbase`. When the two probes of a
/// coordinate lie on opposite sides, the better one becomes the `a` probe so
/// pair points are built from it.
pub(super) fn initialize<M, P, Obs, F, const N: usize>(
    sampler: &mut Sampler<'_, M, P, Obs, F, N>,
    domain: &Domain,
    xbase: Array1<f64>,
    f0: f64,
    npt: usize,
    rho: f64,
) -> Result<Control<(ModelStore, Factorization)>, Error>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
    Obs: for<'e> Observer<Event<'e, M, N>, Infallible>,
    F: Fn(f64) -> f64,
{
    let n = N;
    let mut steps: Vec<ProbeSteps> = (0..n).map(|c| domain.probe_steps(c, rho)).collect();
    let mut fval = Array1::zeros(npt);
    fval[0] = f0;

    for row in 1..npt {
        if row == 2 * n + 1 {
            // Pair points depend on the final choice of `a` probes.
            for c in 0..n {
                let (p, q) = (c + 1, n + c + 1);
                if steps[c].a * steps[c].b < 0.0 && fval[q] < fval[p] {
                    steps[c] = ProbeSteps {
                        a: steps[c].b,
                        b: steps[c].a,
                    };
                    fval.swap(p, q);
                }
            }
        }

        let y = design_point(n, &steps, row);
        let x = domain.absolute(&xbase, &y);
        match sampler.sample(&x, domain.is_feasible(&y), EvalKind::Initial)? {
            Control::Continue(f) => fval[row] = f,
            Control::Stop(status) => return Ok(Control::Stop(status)),
        }
    }

    let (xpt, fact) = coordinate_design(n, npt, &steps);
    let feasible = xpt
        .rows()
        .into_iter()
        .map(|y| domain.is_feasible(&y.to_owned()))
        .collect();
    let store = ModelStore::from_design(xbase, xpt, fval, feasible, &fact);

    log::trace!(
        "initial design of {npt} points, best value {}",
        store.fopt()
    );
    Ok(Control::Continue((store, fact)))
}
