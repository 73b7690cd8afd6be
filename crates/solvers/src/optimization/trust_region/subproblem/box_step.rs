use ndarray::Array1;

use crate::optimization::trust_region::model::ModelStore;

use super::Step;

/// Which bound, if any, a variable is held at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fixed {
    Free,
    Lower,
    Upper,
}

/// How the conjugate gradient phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Done,
    Alternative,
}

/// Truncated conjugate gradient step over the box `sl ≤ xopt + d ≤ su`
/// within `‖d‖ ≤ delta`.
///
/// Variables are frozen where the search meets their bounds and the
/// iteration restarts. Once the step reaches the trust-region boundary it is
/// refined by rotating within the plane of `d` and the reduced gradient.
pub(super) fn box_step(
    model: &ModelStore,
    sl: &Array1<f64>,
    su: &Array1<f64>,
    delta: f64,
) -> Step {
    let n = model.gopt.len();
    let xopt = model.xopt();

    let mut fixed = vec![Fixed::Free; n];
    let mut nact = 0;
    for i in 0..n {
        if xopt[i] <= sl[i] {
            if model.gopt[i] >= 0.0 {
                fixed[i] = Fixed::Lower;
            }
        } else if xopt[i] >= su[i] && model.gopt[i] <= 0.0 {
            fixed[i] = Fixed::Upper;
        }
        if fixed[i] != Fixed::Free {
            nact += 1;
        }
    }

    let mut search = BoxSearch {
        model,
        sl,
        su,
        fixed,
        nact,
        d: Array1::zeros(n),
        gnew: model.gopt.clone(),
        s: Array1::zeros(n),
        hs: Array1::zeros(n),
        hred: Array1::zeros(n),
        delsq: delta * delta,
        qred: 0.0,
        crvmin: -1.0,
        iterc: 0,
        xopt,
    };

    if search.conjugate_gradient() == Phase::Alternative {
        search.crvmin = 0.0;
        search.alternative();
    }
    search.finish()
}

struct BoxSearch<'a> {
    model: &'a ModelStore,
    sl: &'a Array1<f64>,
    su: &'a Array1<f64>,
    xopt: Array1<f64>,
    fixed: Vec<Fixed>,
    nact: usize,
    d: Array1<f64>,
    gnew: Array1<f64>,
    s: Array1<f64>,
    hs: Array1<f64>,
    hred: Array1<f64>,
    delsq: f64,
    qred: f64,
    crvmin: f64,
    iterc: usize,
}

impl BoxSearch<'_> {
    fn is_free(&self, i: usize) -> bool {
        self.fixed[i] == Fixed::Free
    }

    fn conjugate_gradient(&mut self) -> Phase {
        let n = self.d.len();
        let mut gredsq = 0.0;
        let mut itermax = 0;

        loop {
            let mut beta = 0.0;
            let mut ggsav = 0.0;

            loop {
                let mut stepsq = 0.0;
                for i in 0..n {
                    self.s[i] = if !self.is_free(i) {
                        0.0
                    } else if beta == 0.0 {
                        -self.gnew[i]
                    } else {
                        beta * self.s[i] - self.gnew[i]
                    };
                    stepsq += self.s[i] * self.s[i];
                }
                if stepsq == 0.0 {
                    return Phase::Done;
                }
                if beta == 0.0 {
                    gredsq = stepsq;
                    itermax = self.iterc + n - self.nact;
                }
                if gredsq * self.delsq <= 1e-4 * self.qred * self.qred {
                    return Phase::Done;
                }

                self.hs = self.model.hess_mul(&self.s);

                let mut resid = self.delsq;
                let mut ds = 0.0;
                let mut shs = 0.0;
                for i in (0..n).filter(|&i| self.is_free(i)) {
                    resid -= self.d[i] * self.d[i];
                    ds += self.s[i] * self.d[i];
                    shs += self.s[i] * self.hs[i];
                }
                if resid <= 0.0 {
                    return Phase::Alternative;
                }

                let temp = (stepsq * resid + ds * ds).sqrt();
                let blen = if ds < 0.0 {
                    (temp - ds) / stepsq
                } else {
                    resid / (temp + ds)
                };
                let mut stplen = blen;
                if shs > 0.0 {
                    stplen = blen.min(gredsq / shs);
                }

                let mut iact = None;
                for i in (0..n).filter(|&i| self.s[i] != 0.0) {
                    let xsum = self.xopt[i] + self.d[i];
                    let temp = if self.s[i] > 0.0 {
                        (self.su[i] - xsum) / self.s[i]
                    } else {
                        (self.sl[i] - xsum) / self.s[i]
                    };
                    if temp < stplen {
                        stplen = temp;
                        iact = Some(i);
                    }
                }

                let mut sdec = 0.0;
                if stplen > 0.0 {
                    self.iterc += 1;
                    let curv = shs / stepsq;
                    if iact.is_none() && curv > 0.0 {
                        self.crvmin = if self.crvmin < 0.0 {
                            curv
                        } else {
                            self.crvmin.min(curv)
                        };
                    }
                    ggsav = gredsq;
                    gredsq = 0.0;
                    for i in 0..n {
                        self.gnew[i] += stplen * self.hs[i];
                        if self.is_free(i) {
                            gredsq += self.gnew[i] * self.gnew[i];
                        }
                        self.d[i] += stplen * self.s[i];
                    }
                    sdec = (stplen * (ggsav - 0.5 * stplen * shs)).max(0.0);
                    self.qred += sdec;
                }

                if let Some(i) = iact {
                    self.nact += 1;
                    self.fixed[i] = if self.s[i] < 0.0 {
                        Fixed::Lower
                    } else {
                        Fixed::Upper
                    };
                    self.delsq -= self.d[i] * self.d[i];
                    if self.delsq <= 0.0 {
                        return Phase::Alternative;
                    }
                    break;
                }

                if stplen < blen {
                    if self.iterc == itermax || sdec <= 0.01 * self.qred {
                        return Phase::Done;
                    }
                    beta = gredsq / ggsav;
                    continue;
                }
                return Phase::Alternative;
            }
        }
    }

    fn alternative(&mut self) {
        let n = self.d.len();
        let mut iterations = 0;

        'refix: loop {
            if self.nact + 1 >= n {
                return;
            }

            let mut dredsq = 0.0;
            let mut dredg = 0.0;
            let mut gredsq = 0.0;
            for i in 0..n {
                if self.is_free(i) {
                    dredsq += self.d[i] * self.d[i];
                    dredg += self.d[i] * self.gnew[i];
                    gredsq += self.gnew[i] * self.gnew[i];
                    self.s[i] = self.d[i];
                } else {
                    self.s[i] = 0.0;
                }
            }
            self.hred = self.model.hess_mul(&self.s);

            loop {
                self.iterc += 1;
                iterations += 1;
                if iterations > n {
                    return;
                }

                let temp = gredsq * dredsq - dredg * dredg;
                if temp <= 1e-4 * self.qred * self.qred {
                    return;
                }
                let temp = temp.sqrt();
                for i in 0..n {
                    self.s[i] = if self.is_free(i) {
                        (dredg * self.d[i] - dredsq * self.gnew[i]) / temp
                    } else {
                        0.0
                    };
                }
                let sredg = -temp;

                // Bound the rotation so no free variable leaves the box.
                let mut angbd = 1.0;
                let mut iact = None;
                let mut xsav = Fixed::Free;
                for i in 0..n {
                    if !self.is_free(i) {
                        continue;
                    }
                    let tempa = self.xopt[i] + self.d[i] - self.sl[i];
                    let tempb = self.su[i] - self.xopt[i] - self.d[i];
                    if tempa <= 0.0 {
                        self.nact += 1;
                        self.fixed[i] = Fixed::Lower;
                        continue 'refix;
                    }
                    if tempb <= 0.0 {
                        self.nact += 1;
                        self.fixed[i] = Fixed::Upper;
                        continue 'refix;
                    }
                    let ssq = self.d[i] * self.d[i] + self.s[i] * self.s[i];
                    let temp = ssq - (self.xopt[i] - self.sl[i]).powi(2);
                    if temp > 0.0 {
                        let temp = temp.sqrt() - self.s[i];
                        if angbd * temp > tempa {
                            angbd = tempa / temp;
                            iact = Some(i);
                            xsav = Fixed::Lower;
                        }
                    }
                    let temp = ssq - (self.su[i] - self.xopt[i]).powi(2);
                    if temp > 0.0 {
                        let temp = temp.sqrt() + self.s[i];
                        if angbd * temp > tempb {
                            angbd = tempb / temp;
                            iact = Some(i);
                            xsav = Fixed::Upper;
                        }
                    }
                }

                self.hs = self.model.hess_mul(&self.s);
                let mut shs = 0.0;
                let mut dhs = 0.0;
                let mut dhd = 0.0;
                for i in (0..n).filter(|&i| self.is_free(i)) {
                    shs += self.s[i] * self.hs[i];
                    dhs += self.d[i] * self.hs[i];
                    dhd += self.d[i] * self.hred[i];
                }

                // Coarse search over tan(θ/2) in [0, angbd].
                let reduction = |angt: f64| {
                    let sth = (angt + angt) / (1.0 + angt * angt);
                    let temp = shs + angt * (angt * dhd - dhs - dhs);
                    sth * (angt * dredg - sredg - 0.5 * sth * temp)
                };
                let mut redmax = 0.0;
                let mut isav = 0;
                let mut redsav = 0.0;
                let mut rdprev = 0.0;
                let mut rdnext = 0.0;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let iu = (17.0 * angbd + 3.1) as usize;
                for i in 1..=iu {
                    let rednew = reduction(angbd * i as f64 / iu as f64);
                    if rednew > redmax {
                        redmax = rednew;
                        isav = i;
                        rdprev = redsav;
                    } else if i == isav + 1 {
                        rdnext = rednew;
                    }
                    redsav = rednew;
                }
                if isav == 0 {
                    return;
                }

                let mut angt = angbd;
                if isav < iu {
                    let denom = redmax + redmax - rdprev - rdnext;
                    let temp = if denom == 0.0 {
                        0.0
                    } else {
                        (rdnext - rdprev) / denom
                    };
                    angt = angbd * (isav as f64 + 0.5 * temp) / iu as f64;
                }
                let cth = (1.0 - angt * angt) / (1.0 + angt * angt);
                let sth = (angt + angt) / (1.0 + angt * angt);
                let sdec = reduction(angt);
                if sdec <= 0.0 {
                    return;
                }

                dredg = 0.0;
                gredsq = 0.0;
                for i in 0..n {
                    self.gnew[i] += (cth - 1.0) * self.hred[i] + sth * self.hs[i];
                    if self.is_free(i) {
                        self.d[i] = cth * self.d[i] + sth * self.s[i];
                        dredg += self.d[i] * self.gnew[i];
                        gredsq += self.gnew[i] * self.gnew[i];
                    }
                    self.hred[i] = cth * self.hred[i] + sth * self.hs[i];
                }
                self.qred += sdec;

                if let Some(i) = iact
                    && isav == iu
                {
                    self.nact += 1;
                    self.fixed[i] = xsav;
                    continue 'refix;
                }
                if sdec <= 0.01 * self.qred {
                    return;
                }
            }
        }
    }

    /// Clamps `xopt + d` into the box, pinning fixed variables exactly.
    fn finish(mut self) -> Step {
        for i in 0..self.d.len() {
            let x = match self.fixed[i] {
                Fixed::Lower => self.sl[i],
                Fixed::Upper => self.su[i],
                Fixed::Free => (self.xopt[i] + self.d[i]).min(self.su[i]).max(self.sl[i]),
            };
            self.d[i] = x - self.xopt[i];
        }
        Step {
            d: self.d,
            crvmin: self.crvmin.max(0.0),
            active_changed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::{Array2, array};

    /// Model with gradient `g` and Hessian `diag(h)` centered at the origin.
    fn model(g: Array1<f64>, h: &[f64]) -> ModelStore {
        let n = g.len();
        let mut hq = Array2::zeros((n, n));
        for (i, v) in h.iter().enumerate() {
            hq[[i, i]] = *v;
        }
        ModelStore {
            xbase: Array1::zeros(n),
            xpt: Array2::zeros((n + 2, n)),
            fval: Array1::zeros(n + 2),
            feasible: vec![true; n + 2],
            kopt: 0,
            gopt: g,
            hq,
            pq: Array1::zeros(n + 2),
        }
    }

    fn unbounded(n: usize) -> (Array1<f64>, Array1<f64>) {
        (
            Array1::from_elem(n, f64::NEG_INFINITY),
            Array1::from_elem(n, f64::INFINITY),
        )
    }

    #[test]
    fn interior_newton_step() {
        let m = model(array![-2.0, -40.0], &[2.0, 20.0]);
        let (sl, su) = unbounded(2);

        let step = box_step(&m, &sl, &su, 10.0);

        assert_relative_eq!(step.d[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(step.d[1], 2.0, epsilon = 1e-10);
        assert!(step.crvmin > 0.0);
    }

    #[test]
    fn boundary_step_has_trust_region_length() {
        let m = model(array![-2.0, -40.0], &[2.0, 20.0]);
        let (sl, su) = unbounded(2);

        let step = box_step(&m, &sl, &su, 0.5);

        assert_relative_eq!(step.d.dot(&step.d).sqrt(), 0.5, epsilon = 1e-10);
        assert_eq!(step.crvmin, 0.0);
        assert!(m.quad_inc(&step.d) < 0.0);
    }

    #[test]
    fn bound_is_met_exactly() {
        let m = model(array![-2.0, -40.0], &[2.0, 20.0]);
        let sl = array![-5.0, -5.0];
        let su = array![5.0, 1.0];

        let step = box_step(&m, &sl, &su, 10.0);

        assert_eq!(step.d[1], 1.0);
        assert_relative_eq!(step.d[0], 1.0, epsilon = 1e-8);
    }

    #[test]
    fn negative_curvature_goes_to_boundary() {
        let m = model(array![0.1, 0.0, -0.2], &[-1.0, 2.0, 1.0]);
        let (sl, su) = unbounded(3);

        let step = box_step(&m, &sl, &su, 1.0);

        assert_relative_eq!(step.d.dot(&step.d).sqrt(), 1.0, epsilon = 1e-8);
        assert!(m.quad_inc(&step.d) < -0.4);
    }

    #[test]
    fn blocked_gradient_gives_zero_step() {
        let m = model(array![1.0, -1.0], &[1.0, 1.0]);
        let sl = array![0.0, -3.0];
        let su = array![3.0, 0.0];

        let step = box_step(&m, &sl, &su, 1.0);

        assert_eq!(step.d, array![0.0, 0.0]);
    }
}
