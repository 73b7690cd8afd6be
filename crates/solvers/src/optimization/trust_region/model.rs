use ndarray::{Array1, Array2, Axis, s};

use super::{factorization::Factorization, region::Domain};

/// Interpolation points and the quadratic model through them.
///
/// Points are stored relative to `xbase`. The model is
/// `Q(xopt + d) = fopt + gopt·d + ½ dᵀ(hq + Σₖ pqₖ xₖxₖᵀ)d`, where `xopt` is
/// the point at index `kopt`; the implicit part is only used in products.
#[derive(Debug, Clone)]
pub(super) struct ModelStore {
    pub(super) xbase: Array1<f64>,
    pub(super) xpt: Array2<f64>,
    pub(super) fval: Array1<f64>,
    pub(super) feasible: Vec<bool>,
    pub(super) kopt: usize,
    pub(super) gopt: Array1<f64>,
    pub(super) hq: Array2<f64>,
    pub(super) pq: Array1<f64>,
}

impl ModelStore {
    /// Builds the minimum-norm model through a freshly designed point set.
    pub(super) fn from_design(
        xbase: Array1<f64>,
        xpt: Array2<f64>,
        fval: Array1<f64>,
        feasible: Vec<bool>,
        fact: &Factorization,
    ) -> Self {
        let (m, n) = xpt.dim();
        let mut store = Self {
            xbase,
            xpt,
            fval,
            feasible,
            kopt: 0,
            gopt: Array1::zeros(n),
            hq: Array2::zeros((n, n)),
            pq: Array1::zeros(m),
        };
        store.kopt = store.best_feasible();
        store.replace_with_alternative(fact);
        store
    }

    pub(super) fn npt(&self) -> usize {
        self.xpt.nrows()
    }

    pub(super) fn xopt(&self) -> Array1<f64> {
        self.xpt.row(self.kopt).to_owned()
    }

    pub(super) fn fopt(&self) -> f64 {
        self.fval[self.kopt]
    }

    /// Index of the lowest value among feasible points, or `kopt` if none.
    pub(super) fn best_feasible(&self) -> usize {
        (0..self.npt())
            .filter(|&k| self.feasible[k])
            .min_by(|&a, &b| self.fval[a].total_cmp(&self.fval[b]))
            .unwrap_or(self.kopt)
    }

    /// Squared distance of every point from `xopt`.
    pub(super) fn distsq(&self) -> Array1<f64> {
        let xopt = self.xopt();
        self.xpt
            .rows()
            .into_iter()
            .map(|x| (&x - &xopt).mapv(|v| v * v).sum())
            .collect()
    }

    /// Hessian-vector product `(hq + Σₖ pqₖ xₖxₖᵀ)·s`.
    pub(super) fn hess_mul(&self, s: &Array1<f64>) -> Array1<f64> {
        let mut hs = self.hq.dot(s);
        for (k, x) in self.xpt.rows().into_iter().enumerate() {
            hs.scaled_add(self.pq[k] * x.dot(s), &x);
        }
        hs
    }

    /// Model change `Q(xopt + d) − Q(xopt)`.
    pub(super) fn quad_inc(&self, d: &Array1<f64>) -> f64 {
        self.gopt.dot(d) + 0.5 * d.dot(&self.hess_mul(d))
    }

    /// Change predicted by the minimum-norm interpolant, from Lagrange values.
    pub(super) fn alternative_change(&self, vlag: &Array1<f64>) -> f64 {
        let fopt = self.fopt();
        (0..self.npt()).map(|k| vlag[k] * (self.fval[k] - fopt)).sum()
    }

    /// Replaces point `knew` and folds the model error `moderr` into the model.
    ///
    /// `fact` must already reflect the replacement. The center is unchanged;
    /// call [`Self::recenter`] afterwards if the new point is better.
    pub(super) fn absorb(
        &mut self,
        fact: &Factorization,
        knew: usize,
        moderr: f64,
        xnew: &Array1<f64>,
        f: f64,
        feasible: bool,
    ) {
        let xopt = self.xopt();

        let pqold = self.pq[knew];
        self.pq[knew] = 0.0;
        let xold = self.xpt.row(knew).to_owned();
        for i in 0..xold.len() {
            for j in 0..xold.len() {
                self.hq[[i, j]] += pqold * xold[i] * xold[j];
            }
        }

        let hcol = fact.omega_col(knew);
        self.pq.scaled_add(moderr, &hcol);

        self.fval[knew] = f;
        self.feasible[knew] = feasible;
        self.xpt.row_mut(knew).assign(xnew);

        let mut w = fact.bmat.row(knew).to_owned();
        for (k, x) in self.xpt.rows().into_iter().enumerate() {
            w.scaled_add(hcol[k] * x.dot(&xopt), &x);
        }
        self.gopt.scaled_add(moderr, &w);
    }

    /// Moves the center to point `k`.
    pub(super) fn recenter(&mut self, k: usize) {
        if k == self.kopt {
            return;
        }
        let d = &self.xpt.row(k) - &self.xpt.row(self.kopt);
        self.recenter_by(k, &d);
    }

    /// Moves the center to point `k`, which lies at `d` from the old center.
    ///
    /// Needed when `k` was the center itself and has just been replaced.
    pub(super) fn recenter_by(&mut self, k: usize, d: &Array1<f64>) {
        let hd = self.hess_mul(d);
        self.gopt += &hd;
        self.kopt = k;
    }

    /// The minimum-norm interpolant of the cached values: `(gopt, pq)`.
    pub(super) fn alternative(&self, fact: &Factorization) -> (Array1<f64>, Array1<f64>) {
        let m = self.npt();
        let fopt = self.fopt();
        let r = self.fval.mapv(|f| f - fopt);

        let pq = fact.omega_mul(&r);
        let mut g = fact.bmat.slice(s![..m, ..]).t().dot(&r);
        let xopt = self.xpt.row(self.kopt);
        for (k, x) in self.xpt.rows().into_iter().enumerate() {
            g.scaled_add(pq[k] * x.dot(&xopt), &x);
        }
        (g, pq)
    }

    pub(super) fn replace_with_alternative(&mut self, fact: &Factorization) {
        let (gopt, pq) = self.alternative(fact);
        self.gopt = gopt;
        self.pq = pq;
        self.hq.fill(0.0);
    }

    /// Moves the implicit Hessian terms into `hq`.
    pub(super) fn absorb_implicit_hessian(&mut self) {
        for (k, x) in self.xpt.rows().into_iter().enumerate() {
            let pk = self.pq[k];
            for i in 0..x.len() {
                for j in 0..x.len() {
                    self.hq[[i, j]] += pk * x[i] * x[j];
                }
            }
        }
        self.pq.fill(0.0);
    }

    /// Moves `xbase` to `xopt`, revising every quantity stored relative to it.
    pub(super) fn shift_base(&mut self, fact: &mut Factorization, domain: &mut Domain) {
        let (m, n) = self.xpt.dim();
        let xopt = self.xopt();
        let xoptsq = xopt.dot(&xopt);
        let fracsq = 0.25 * xoptsq;

        let mut sumpq = 0.0;
        let mut wm = Array1::zeros(m);
        for k in 0..m {
            sumpq += self.pq[k];
            let sum = self.xpt.row(k).dot(&xopt) - 0.5 * xoptsq;
            wm[k] = sum;
            let temp = fracsq - 0.5 * sum;
            let bk = fact.bmat.row(k).to_owned();
            let v = &self.xpt.row(k) * sum + &xopt * temp;
            for i in 0..n {
                for j in 0..=i {
                    fact.bmat[[m + i, j]] += bk[i] * v[j] + v[i] * bk[j];
                }
            }
        }

        for jj in 0..fact.zmat.ncols() {
            let sign = fact.sign(jj);
            let col = fact.zmat.column(jj).to_owned();
            let sumz = col.sum();
            let vz = &wm * &col;
            let sumw = vz.sum();
            let mut w = Array1::zeros(n);
            for j in 0..n {
                let sum = (fracsq * sumz - 0.5 * sumw) * xopt[j] + vz.dot(&self.xpt.column(j));
                w[j] = sum;
                for k in 0..m {
                    fact.bmat[[k, j]] += sign * sum * col[k];
                }
            }
            for i in 0..n {
                for j in 0..=i {
                    fact.bmat[[m + i, j]] += sign * w[i] * w[j];
                }
            }
        }

        let mut w = self.xpt.t().dot(&self.pq);
        w.scaled_add(-0.5 * sumpq, &xopt);
        for i in 0..n {
            for j in 0..n {
                self.hq[[i, j]] += w[i] * xopt[j] + xopt[i] * w[j];
            }
            for j in 0..i {
                fact.bmat[[m + j, i]] = fact.bmat[[m + i, j]];
            }
        }

        for mut row in self.xpt.axis_iter_mut(Axis(0)) {
            row -= &xopt;
        }
        self.xbase += &xopt;
        domain.shift(&xopt);
    }
}
