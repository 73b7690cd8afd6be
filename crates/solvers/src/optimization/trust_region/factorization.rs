use ndarray::{Array1, Array2};
use thiserror::Error;

/// Factored inverse of the interpolation KKT matrix.
///
/// The leading `m×m` block is `Ω = Z·S·Zᵀ`, where `S` is diagonal with `-1`
/// in the first `idz` positions and `+1` elsewhere. `bmat` holds the
/// remaining `(m+n)×n` block, one row per interpolation point followed by an
/// `n×n` symmetric part.
#[derive(Debug, Clone)]
pub(super) struct Factorization {
    pub(super) bmat: Array2<f64>,
    pub(super) zmat: Array2<f64>,
    pub(super) idz: usize,
}

/// The update denominator vanished or was not finite.
#[derive(Debug, Clone, Copy, Error)]
#[error("factorization update is singular (denominator {denom})")]
pub(super) struct SingularUpdate {
    pub(super) denom: f64,
}

impl Factorization {
    pub(super) fn zeros(n: usize, m: usize) -> Self {
        Self {
            bmat: Array2::zeros((m + n, n)),
            zmat: Array2::zeros((m, m - n - 1)),
            idz: 0,
        }
    }

    pub(super) fn sign(&self, j: usize) -> f64 {
        if j < self.idz { -1.0 } else { 1.0 }
    }

    /// Column `k` of `Ω`.
    pub(super) fn omega_col(&self, k: usize) -> Array1<f64> {
        let mut hcol = Array1::zeros(self.zmat.nrows());
        for (j, col) in self.zmat.columns().into_iter().enumerate() {
            let temp = self.sign(j) * col[k];
            hcol.scaled_add(temp, &col);
        }
        hcol
    }

    pub(super) fn omega_diag(&self, k: usize) -> f64 {
        self.zmat
            .row(k)
            .iter()
            .enumerate()
            .map(|(j, z)| self.sign(j) * z * z)
            .sum()
    }

    /// Computes `Ω·v`.
    pub(super) fn omega_mul(&self, v: &Array1<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(self.zmat.nrows());
        for (j, col) in self.zmat.columns().into_iter().enumerate() {
            let temp = self.sign(j) * col.dot(v);
            out.scaled_add(temp, &col);
        }
        out
    }

    /// Lagrange values at `xpt[kopt] + d` and the update parameter `β`.
    ///
    /// The first `m` entries of the returned vector are the values of the
    /// Lagrange functions at the candidate; the trailing `n` entries are the
    /// matching components of the `bmat` product used by [`Self::update`].
    pub(super) fn lagrange(
        &self,
        xpt: &Array2<f64>,
        kopt: usize,
        d: &Array1<f64>,
    ) -> (Array1<f64>, f64) {
        let (m, n) = xpt.dim();
        let xopt = xpt.row(kopt);

        let mut vlag = Array1::zeros(m + n);
        let mut w = Array1::zeros(m);
        for k in 0..m {
            let xk = xpt.row(k);
            let suma = xk.dot(d);
            let sumb = xk.dot(&xopt);
            w[k] = suma * (0.5 * suma + sumb);
            vlag[k] = self.bmat.row(k).dot(d);
        }

        let mut beta = 0.0;
        for (jj, col) in self.zmat.columns().into_iter().enumerate() {
            let mut sum = col.dot(&w);
            if jj < self.idz {
                beta += sum * sum;
                sum = -sum;
            } else {
                beta -= sum * sum;
            }
            for k in 0..m {
                vlag[k] += sum * col[k];
            }
        }

        let dsq = d.dot(d);
        let xoptsq = xopt.dot(&xopt);
        let mut bsum = 0.0;
        let mut dx = 0.0;
        for j in 0..n {
            let mut sum: f64 = (0..m).map(|k| w[k] * self.bmat[[k, j]]).sum();
            bsum += sum * d[j];
            sum += (0..n).map(|i| self.bmat[[m + j, i]] * d[i]).sum::<f64>();
            vlag[m + j] = sum;
            bsum += sum * d[j];
            dx += d[j] * xopt[j];
        }

        beta = dx * dx + dsq * (xoptsq + dx + dx + 0.5 * dsq) + beta - bsum;
        vlag[kopt] += 1.0;

        (vlag, beta)
    }

    /// Replaces interpolation point `knew` by the candidate described by
    /// `vlag` and `beta` (as returned by [`Self::lagrange`]).
    ///
    /// # Errors
    ///
    /// Returns [`SingularUpdate`] and leaves the factorization unchanged when
    /// the denominator `σ = αβ + τ²` is zero or not finite.
    pub(super) fn update(
        &mut self,
        knew: usize,
        beta: f64,
        vlag: &Array1<f64>,
    ) -> Result<(), SingularUpdate> {
        let (m, n) = (self.zmat.nrows(), self.bmat.ncols());
        let nptm = self.zmat.ncols();

        // Rotations leave Ω unchanged, so σ can be checked up front.
        let denom = self.omega_diag(knew) * beta + vlag[knew] * vlag[knew];
        if denom == 0.0 || !denom.is_finite() {
            return Err(SingularUpdate { denom });
        }

        let mut vlag = vlag.clone();
        let z = &mut self.zmat;

        let mut jl = 0;
        for j in 1..nptm {
            if j == self.idz {
                jl = self.idz;
            } else if z[[knew, j]] != 0.0 {
                let temp = z[[knew, jl]].hypot(z[[knew, j]]);
                let tempa = z[[knew, jl]] / temp;
                let tempb = z[[knew, j]] / temp;
                for i in 0..m {
                    let temp = tempa * z[[i, jl]] + tempb * z[[i, j]];
                    z[[i, j]] = tempa * z[[i, j]] - tempb * z[[i, jl]];
                    z[[i, jl]] = temp;
                }
                z[[knew, j]] = 0.0;
            }
        }

        let mut tempa = z[[knew, 0]];
        if self.idz >= 1 {
            tempa = -tempa;
        }
        let tempb = if jl > 0 { z[[knew, jl]] } else { 0.0 };

        let mut w = Array1::zeros(m + n);
        for i in 0..m {
            w[i] = tempa * z[[i, 0]];
            if jl > 0 {
                w[i] += tempb * z[[i, jl]];
            }
        }

        let alpha = w[knew];
        let tau = vlag[knew];
        let tausq = tau * tau;
        let denom = alpha * beta + tausq;
        vlag[knew] -= 1.0;

        let mut iflag = false;
        if jl == 0 {
            let temp = denom.abs().sqrt();
            let tempb = tempa / temp;
            let tempa = tau / temp;
            for i in 0..m {
                z[[i, 0]] = tempa * z[[i, 0]] - tempb * vlag[i];
            }
            // `temp` is a square root, so this never fires; a negative
            // denominator leaves `idz` untouched in the single-column case.
            if self.idz == 0 && temp < 0.0 {
                self.idz = 1;
            }
            if self.idz >= 1 && temp >= 0.0 {
                iflag = true;
            }
        } else {
            let ja = if beta >= 0.0 { jl } else { 0 };
            let jb = jl - ja;
            let temp = z[[knew, jb]] / denom;
            let tempa = temp * beta;
            let tempb = temp * tau;
            let temp = z[[knew, ja]];
            let scala = 1.0 / (beta.abs() * temp * temp + tausq).sqrt();
            let scalb = scala * denom.abs().sqrt();
            for i in 0..m {
                z[[i, ja]] = scala * (tau * z[[i, ja]] - temp * vlag[i]);
                z[[i, jb]] = scalb * (z[[i, jb]] - tempa * w[i] - tempb * vlag[i]);
            }
            if denom <= 0.0 {
                if beta < 0.0 {
                    self.idz += 1;
                } else {
                    iflag = true;
                }
            }
        }

        if iflag {
            self.idz -= 1;
            for i in 0..m {
                z.swap([i, 0], [i, self.idz]);
            }
        }

        let b = &mut self.bmat;
        for j in 0..n {
            let jp = m + j;
            w[jp] = b[[knew, j]];
            let tempa = (alpha * vlag[jp] - tau * w[jp]) / denom;
            let tempb = (-beta * w[jp] - tau * vlag[jp]) / denom;
            for i in 0..=jp {
                b[[i, j]] += tempa * vlag[i] + tempb * w[i];
                if i >= m {
                    b[[jp, i - m]] = b[[i, j]];
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::array;

    use crate::optimization::trust_region::{init::coordinate_design, region::ProbeSteps};

    fn design(n: usize, m: usize) -> (Array2<f64>, Factorization) {
        let steps: Vec<_> = (0..n)
            .map(|c| ProbeSteps {
                a: 0.5 + 0.1 * c as f64,
                b: -0.4,
            })
            .collect();
        coordinate_design(n, m, &steps)
    }

    fn assert_exact(xpt: &Array2<f64>, fact: &Factorization, kopt: usize) {
        let m = xpt.nrows();
        let xopt = xpt.row(kopt).to_owned();
        for k in 0..m {
            let d = &xpt.row(k).to_owned() - &xopt;
            let (vlag, _) = fact.lagrange(xpt, kopt, &d);
            for j in 0..m {
                let expected = if j == k { 1.0 } else { 0.0 };
                assert_relative_eq!(vlag[j], expected, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn coordinate_design_is_exact() {
        for (n, m) in [(2, 4), (2, 5), (2, 6), (3, 7), (3, 10)] {
            let (xpt, fact) = design(n, m);
            assert_exact(&xpt, &fact, 0);
        }
    }

    #[test]
    fn lagrange_values_sum_to_one() {
        let (xpt, fact) = design(3, 9);
        let (vlag, beta) = fact.lagrange(&xpt, 0, &array![0.2, -0.1, 0.3]);

        assert_relative_eq!(vlag.slice(ndarray::s![..9]).sum(), 1.0, epsilon = 1e-12);
        assert!(beta.is_finite());
    }

    #[test]
    fn update_keeps_factorization_exact() {
        let (mut xpt, mut fact) = design(3, 7);
        let replacements = [
            (2, array![0.3, 0.1, -0.2]),
            (5, array![-0.2, 0.4, 0.1]),
            (1, array![0.1, -0.3, 0.25]),
        ];

        for (knew, x) in replacements {
            let d = &x - &xpt.row(0);
            let (vlag, beta) = fact.lagrange(&xpt, 0, &d);
            fact.update(knew, beta, &vlag).unwrap();
            xpt.row_mut(knew).assign(&x);

            assert_exact(&xpt, &fact, 0);
        }
    }

    #[test]
    fn singular_update_leaves_state_untouched() {
        let (xpt, mut fact) = design(2, 5);
        let before = fact.clone();
        let (mut vlag, _) = fact.lagrange(&xpt, 0, &array![0.1, 0.1]);
        vlag[3] = 0.0;

        let err = fact.update(3, f64::NAN, &vlag).unwrap_err();

        assert!(err.denom.is_nan());
        assert_eq!(fact.zmat, before.zmat);
        assert_eq!(fact.bmat, before.bmat);
    }

    #[test]
    fn single_column_update_keeps_split_index_when_denominator_negative() {
        // With m = n + 2 there is one Z column. A negative denominator would
        // call for a negative signature, but the historical test compares a
        // square root against zero and never fires.
        let (xpt, mut fact) = design(2, 4);
        let (mut vlag, _) = fact.lagrange(&xpt, 0, &array![0.2, -0.1]);
        vlag[1] = 1e-3;
        let beta = -1.0e3;
        let denom = fact.omega_diag(1) * beta + vlag[1] * vlag[1];
        assert!(denom < 0.0);

        fact.update(1, beta, &vlag).unwrap();

        assert_eq!(fact.idz, 0);
        assert!(fact.zmat.iter().all(|z| z.is_finite()));
    }

    #[test]
    fn omega_products_agree() {
        let (_, fact) = design(3, 8);
        let v = array![1.0, -2.0, 0.5, 0.0, 3.0, -1.0, 0.25, 2.0];

        let product = fact.omega_mul(&v);
        for k in 0..8 {
            assert_relative_eq!(fact.omega_col(k).dot(&v), product[k], epsilon = 1e-12);
        }
        assert_relative_eq!(fact.omega_col(4)[4], fact.omega_diag(4), epsilon = 1e-12);
    }
}
