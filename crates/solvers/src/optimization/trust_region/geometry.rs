//! Choosing which interpolation point to retire and where to move it.

use std::f64::consts::SQRT_2;

use ndarray::{Array1, Array2};

use super::{factorization::Factorization, model::ModelStore, region::Domain};

/// The Lagrange function of one interpolation point, expanded about `xopt`.
///
/// `ℓ(xopt + s) − ℓ(xopt) = glag·s + ½ Σₖ hcolₖ (xₖ·s)²`.
struct LagrangeFunction<'a> {
    xpt: &'a Array2<f64>,
    hcol: Array1<f64>,
    glag: Array1<f64>,
    alpha: f64,
}

impl<'a> LagrangeFunction<'a> {
    fn new(model: &'a ModelStore, fact: &Factorization, knew: usize) -> Self {
        let hcol = fact.omega_col(knew);
        let xopt = model.xopt();
        let mut glag = fact.bmat.row(knew).to_owned();
        for (k, x) in model.xpt.rows().into_iter().enumerate() {
            glag.scaled_add(hcol[k] * x.dot(&xopt), &x);
        }
        Self {
            xpt: &model.xpt,
            alpha: hcol[knew],
            hcol,
            glag,
        }
    }

    fn curvature(&self, s: &Array1<f64>) -> f64 {
        self.xpt
            .rows()
            .into_iter()
            .zip(&self.hcol)
            .map(|(x, h)| {
                let t = x.dot(s);
                h * t * t
            })
            .sum()
    }

    fn change(&self, s: &Array1<f64>) -> f64 {
        self.glag.dot(s) + 0.5 * self.curvature(s)
    }
}

/// Picks the point to replace by a trial point.
///
/// `vlag` and `beta` describe the trial point (see
/// [`Factorization::lagrange`]) and distances are measured from `center`.
/// Returns `None` when no candidate's weighted denominator clears half of
/// the largest weighted `vlagₖ²`.
pub(super) fn choose_drop_for_trial(
    model: &ModelStore,
    fact: &Factorization,
    vlag: &Array1<f64>,
    beta: f64,
    center: &Array1<f64>,
    delta: f64,
    exclude_kopt: bool,
) -> Option<usize> {
    let delsq = delta * delta;
    let mut best = None;
    let mut best_score = 0.0;
    let mut biglsq = 0.0_f64;

    for (k, x) in model.xpt.rows().into_iter().enumerate() {
        if exclude_kopt && k == model.kopt {
            continue;
        }
        let distsq = (&x - center).mapv(|v| v * v).sum();
        let weight = (distsq / delsq).powi(2).max(1.0);
        let den = beta * fact.omega_diag(k) + vlag[k] * vlag[k];
        let score = weight * den;
        if score.is_finite() && score > best_score {
            best_score = score;
            best = Some(k);
        }
        biglsq = biglsq.max(weight * vlag[k] * vlag[k]);
    }

    if best_score <= 0.5 * biglsq {
        None
    } else {
        best
    }
}

/// The point farthest from `xopt`, if it lies beyond `max(2δ, 10ρ)`.
pub(super) fn choose_drop_for_geometry(
    model: &ModelStore,
    delta: f64,
    rho: f64,
) -> Option<(usize, f64)> {
    let threshold = (2.0 * delta).max(10.0 * rho).powi(2);
    model
        .distsq()
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, d)| d > threshold)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(k, d)| (k, d.sqrt()))
}

/// A geometry-improving replacement for point `knew`.
#[derive(Debug, Clone)]
pub(super) struct GeometryStep {
    pub(super) d: Array1<f64>,
    pub(super) vlag: Array1<f64>,
    pub(super) beta: f64,

    /// The update denominator `α·β + vlag[knew]²` for this step.
    pub(super) denom: f64,
}

impl GeometryStep {
    /// Whether the denominator is too small for a stable update.
    pub(super) fn is_degenerate(&self, knew: usize) -> bool {
        !self.denom.is_finite() || self.denom <= 0.5 * self.vlag[knew] * self.vlag[knew]
    }
}

/// Computes a feasible step of length at most `adelt` from `xopt` that makes
/// `|ℓ_knew|` large.
///
/// Candidates are the best point on the lines through `xopt` and each other
/// interpolation point, and a constrained Cauchy step of `±ℓ_knew`. The
/// Cauchy step is used when its predicted `ℓ²` beats the denominator of the
/// line-search step.
pub(super) fn geometry_step(
    model: &ModelStore,
    fact: &Factorization,
    domain: &Domain,
    knew: usize,
    adelt: f64,
) -> GeometryStep {
    let lag = LagrangeFunction::new(model, fact, knew);
    let xopt = model.xopt();

    let d = line_step(model, domain, &lag, knew, adelt, &xopt);
    let alt = match domain {
        Domain::Box { sl, su, .. } => box_cauchy_step(&lag, &xopt, sl, su, adelt),
        Domain::Linear { normals, rhs, .. } => {
            linear_gradient_step(&lag, &xopt, normals, rhs, adelt)
        }
    };

    let step = |d: Array1<f64>| {
        let (vlag, beta) = fact.lagrange(&model.xpt, model.kopt, &d);
        let denom = lag.alpha * beta + vlag[knew] * vlag[knew];
        GeometryStep {
            d,
            vlag,
            beta,
            denom,
        }
    };

    let primary = step(d);
    match alt {
        Some((d, cauchy)) if cauchy > 0.0 && cauchy > primary.denom => step(d),
        _ => primary,
    }
}

/// Best step along the lines from `xopt` through the other points.
fn line_step(
    model: &ModelStore,
    domain: &Domain,
    lag: &LagrangeFunction<'_>,
    knew: usize,
    adelt: f64,
    xopt: &Array1<f64>,
) -> Array1<f64> {
    let ha = 0.5 * lag.alpha;
    let mut presav = 0.0;
    let mut best: Option<(Array1<f64>, f64)> = None;

    for (k, x) in model.xpt.rows().into_iter().enumerate() {
        if k == model.kopt {
            continue;
        }
        let u = &x - xopt;
        let distsq = u.dot(&u);
        if distsq == 0.0 {
            continue;
        }
        let dderiv = lag.glag.dot(&u);
        let (slbd, subd) = line_bounds(domain, xopt, &u, adelt / distsq.sqrt(), model.feasible[k]);

        let (step, vlag) = if k == knew {
            let diff = dderiv - 1.0;
            let mut step = slbd;
            let mut vlag = slbd * (dderiv - slbd * diff);
            let temp = subd * (dderiv - subd * diff);
            if temp.abs() > vlag.abs() {
                step = subd;
                vlag = temp;
            }
            let tempd = 0.5 * dderiv;
            let tempa = tempd - diff * slbd;
            let tempb = tempd - diff * subd;
            if tempa * tempb < 0.0 {
                let temp = tempd * tempd / diff;
                if temp.abs() > vlag.abs() {
                    step = tempd / diff;
                    vlag = temp;
                }
            }
            (step, vlag)
        } else {
            let mut step = slbd;
            let mut vlag = slbd * (1.0 - slbd);
            let temp = subd * (1.0 - subd);
            if temp.abs() > vlag.abs() {
                step = subd;
                vlag = temp;
            }
            if subd > 0.5 && vlag.abs() < 0.25 {
                step = 0.5;
                vlag = 0.25;
            }
            (step, vlag * dderiv)
        };

        let temp = step * (1.0 - step) * distsq;
        let predsq = vlag * vlag * (vlag * vlag + ha * temp * temp);
        if predsq > presav {
            presav = predsq;
            best = Some((u, step));
        }
    }

    let Some((u, step)) = best else {
        return Array1::zeros(xopt.len());
    };
    let mut d = u * step;
    if let Domain::Box { sl, su, .. } = domain {
        for i in 0..d.len() {
            d[i] = (xopt[i] + d[i]).clamp(sl[i], su[i]) - xopt[i];
        }
    }
    d
}

/// Range `[slbd, subd]` of `t` keeping `xopt + t·u` feasible, starting from
/// `±bound`. A feasible endpoint keeps at least `min(1, bound)` of room
/// towards it.
fn line_bounds(
    domain: &Domain,
    xopt: &Array1<f64>,
    u: &Array1<f64>,
    bound: f64,
    endpoint_feasible: bool,
) -> (f64, f64) {
    let mut slbd = -bound;
    let mut subd = bound;
    let sumin = bound.min(1.0);

    match domain {
        Domain::Box { sl, su, .. } => {
            for i in 0..u.len() {
                let (lo, hi) = (sl[i] - xopt[i], su[i] - xopt[i]);
                let t = u[i];
                if t > 0.0 {
                    if slbd * t < lo {
                        slbd = lo / t;
                    }
                    if subd * t > hi {
                        subd = sumin.max(hi / t);
                    }
                } else if t < 0.0 {
                    if slbd * t > hi {
                        slbd = hi / t;
                    }
                    if subd * t < lo {
                        subd = sumin.max(lo / t);
                    }
                }
            }
        }
        Domain::Linear { normals, rhs, .. } => {
            let resid = (rhs - &normals.dot(xopt)).mapv(|r| r.max(0.0));
            for (a, r) in normals.rows().into_iter().zip(&resid) {
                let rate = a.dot(u);
                if rate > 0.0 {
                    subd = subd.min(r / rate);
                } else if rate < 0.0 {
                    slbd = slbd.max(r / rate);
                }
            }
            if endpoint_feasible {
                subd = subd.max(sumin);
            }
        }
    }
    (slbd, subd)
}

/// Constrained Cauchy step of `±ℓ` over the box, as `(d, ℓ(xopt + d)²)`.
///
/// Returns `None` when no variable can move along the gradient.
fn box_cauchy_step(
    lag: &LagrangeFunction<'_>,
    xopt: &Array1<f64>,
    sl: &Array1<f64>,
    su: &Array1<f64>,
    adelt: f64,
) -> Option<(Array1<f64>, f64)> {
    let up = cauchy_pass(lag, &lag.glag, 1.0, xopt, sl, su, adelt)?;
    let down = cauchy_pass(lag, &(-&lag.glag), -1.0, xopt, sl, su, adelt);
    match down {
        Some(down) if down.1 >= up.1 => Some(down),
        _ => Some(up),
    }
}

fn cauchy_pass(
    lag: &LagrangeFunction<'_>,
    glag: &Array1<f64>,
    sign: f64,
    xopt: &Array1<f64>,
    sl: &Array1<f64>,
    su: &Array1<f64>,
    adelt: f64,
) -> Option<(Array1<f64>, f64)> {
    let n = xopt.len();

    // `None` marks a free variable; `Some(w)` a variable held at offset `w`.
    let mut w: Vec<Option<f64>> = vec![Some(0.0); n];
    let mut ggfree = 0.0;
    for i in 0..n {
        let tempa = (xopt[i] - sl[i]).min(glag[i]);
        let tempb = (xopt[i] - su[i]).max(glag[i]);
        if tempa > 0.0 || tempb < 0.0 {
            w[i] = None;
            ggfree += glag[i] * glag[i];
        }
    }
    if ggfree == 0.0 {
        return None;
    }

    let mut wfixsq = 0.0;
    let mut step = 0.0;
    loop {
        let room = adelt * adelt - wfixsq;
        if room <= 0.0 {
            break;
        }
        let wsqsav = wfixsq;
        step = (room / ggfree).sqrt();
        ggfree = 0.0;
        for i in 0..n {
            if w[i].is_some() {
                continue;
            }
            let t = xopt[i] - step * glag[i];
            if t <= sl[i] {
                let wi = sl[i] - xopt[i];
                w[i] = Some(wi);
                wfixsq += wi * wi;
            } else if t >= su[i] {
                let wi = su[i] - xopt[i];
                w[i] = Some(wi);
                wfixsq += wi * wi;
            } else {
                ggfree += glag[i] * glag[i];
            }
        }
        if !(wfixsq > wsqsav && ggfree > 0.0) {
            break;
        }
    }

    let mut wv = Array1::zeros(n);
    let mut xalt = Array1::zeros(n);
    for i in 0..n {
        match w[i] {
            None => {
                wv[i] = -step * glag[i];
                xalt[i] = (xopt[i] + wv[i]).clamp(sl[i], su[i]);
            }
            Some(wi) => {
                wv[i] = wi;
                xalt[i] = if wi == 0.0 {
                    xopt[i]
                } else if glag[i] > 0.0 {
                    sl[i]
                } else {
                    su[i]
                };
            }
        }
    }
    let gw = glag.dot(&wv);

    let curv = sign * lag.curvature(&wv);
    let cauchy = if curv > -gw && curv < -gw * (1.0 + SQRT_2) {
        let scale = -gw / curv;
        for i in 0..n {
            xalt[i] = (xopt[i] + scale * wv[i]).clamp(sl[i], su[i]);
        }
        (0.5 * gw * scale).powi(2)
    } else {
        (gw + 0.5 * curv).powi(2)
    };

    Some((xalt - xopt, cauchy))
}

/// Step of length `adelt` along `±∇ℓ`, truncated to the feasible region.
fn linear_gradient_step(
    lag: &LagrangeFunction<'_>,
    xopt: &Array1<f64>,
    normals: &Array2<f64>,
    rhs: &Array1<f64>,
    adelt: f64,
) -> Option<(Array1<f64>, f64)> {
    let gnorm = lag.glag.dot(&lag.glag).sqrt();
    if gnorm == 0.0 {
        return None;
    }
    let resid = (rhs - &normals.dot(xopt)).mapv(|r| r.max(0.0));

    [1.0, -1.0]
        .into_iter()
        .map(|sign| {
            let s = &lag.glag * (sign * adelt / gnorm);
            let t = normals
                .rows()
                .into_iter()
                .zip(&resid)
                .filter_map(|(a, r)| {
                    let rate = a.dot(&s);
                    (rate > 0.0).then_some(r / rate)
                })
                .fold(1.0_f64, f64::min);
            let s = s * t;
            let value = lag.change(&s);
            (s, value * value)
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .filter(|(_, cauchy)| *cauchy > 0.0)
}
