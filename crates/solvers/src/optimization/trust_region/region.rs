use ndarray::{Array1, Array2};
use thiserror::Error;

/// The feasible region searched by the solver.
#[derive(Debug, Clone, PartialEq)]
pub enum Region<const N: usize> {
    /// No constraints on `x`.
    Unconstrained,

    /// Simple bounds `lower ≤ x ≤ upper`; infinite entries are allowed.
    ///
    /// Every interval must be at least twice the initial radius wide.
    Bounds { lower: [f64; N], upper: [f64; N] },

    /// Linear inequalities `normal · x ≤ bound`.
    Linear(Vec<LinearConstraint<N>>),
}

/// A single linear inequality `normal · x ≤ bound`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearConstraint<const N: usize> {
    pub normal: [f64; N],
    pub bound: f64,
}

impl<const N: usize> LinearConstraint<N> {
    #[must_use]
    pub fn new(normal: [f64; N], bound: f64) -> Self {
        Self { normal, bound }
    }
}

/// Errors that can occur when validating a region against the start point.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum RegionError {
    #[error("initial point must be finite")]
    StartNotFinite,

    #[error("bounds for variable {index} contain NaN")]
    BoundIsNan { index: usize },

    #[error("lower bound exceeds upper bound for variable {index}")]
    InvertedBounds { index: usize },

    #[error("bounds for variable {index} are {width} wide, at least {required} required")]
    NarrowBounds {
        index: usize,
        width: f64,
        required: f64,
    },

    #[error("constraint {index} has non-finite data")]
    ConstraintNotFinite { index: usize },

    #[error("constraint {index} has a zero normal")]
    ZeroNormal { index: usize },

    #[error("initial point violates the region")]
    InfeasibleStart,
}

/// Relative tolerance for linear feasibility checks.
const FEASIBILITY_TOL: f64 = 1e-10;

/// Offsets along one coordinate for the two probe points of a design.
///
/// `a` is always usable; `b` is only used when the design has room for a
/// second probe on that coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct ProbeSteps {
    pub(super) a: f64,
    pub(super) b: f64,
}

/// The region in solver coordinates, relative to the current base point.
#[derive(Debug, Clone)]
pub(super) enum Domain {
    /// `sl ≤ y ≤ su` with `y = x − xbase`; unconstrained uses infinite bounds.
    Box {
        lower: Array1<f64>,
        upper: Array1<f64>,
        sl: Array1<f64>,
        su: Array1<f64>,
    },

    /// `normals · y ≤ rhs` with unit-length normals.
    Linear {
        normals: Array2<f64>,
        bounds: Array1<f64>,
        rhs: Array1<f64>,
    },
}

impl Domain {
    /// Validates the region and returns it with the starting base point.
    ///
    /// For boxes the start is nudged so each variable either sits on a bound
    /// or is at least `rho` away from it, leaving room for the probes.
    pub(super) fn new<const N: usize>(
        region: &Region<N>,
        x0: &[f64; N],
        rho: f64,
    ) -> Result<(Self, Array1<f64>), RegionError> {
        if x0.iter().any(|x| !x.is_finite()) {
            return Err(RegionError::StartNotFinite);
        }

        match region {
            Region::Unconstrained => {
                let lower = Array1::from_elem(N, f64::NEG_INFINITY);
                let upper = Array1::from_elem(N, f64::INFINITY);
                Ok(Self::boxed(lower, upper, Array1::from(x0.to_vec()), rho))
            }
            Region::Bounds { lower, upper } => {
                for index in 0..N {
                    let (lo, hi) = (lower[index], upper[index]);
                    if lo.is_nan() || hi.is_nan() {
                        return Err(RegionError::BoundIsNan { index });
                    }
                    if lo > hi {
                        return Err(RegionError::InvertedBounds { index });
                    }
                    if hi - lo < 2.0 * rho {
                        return Err(RegionError::NarrowBounds {
                            index,
                            width: hi - lo,
                            required: 2.0 * rho,
                        });
                    }
                    if x0[index] < lo || x0[index] > hi {
                        return Err(RegionError::InfeasibleStart);
                    }
                }
                Ok(Self::boxed(
                    Array1::from(lower.to_vec()),
                    Array1::from(upper.to_vec()),
                    Array1::from(x0.to_vec()),
                    rho,
                ))
            }
            Region::Linear(constraints) => {
                let mut normals = Array2::zeros((constraints.len(), N));
                let mut bounds = Array1::zeros(constraints.len());
                for (index, constraint) in constraints.iter().enumerate() {
                    if !constraint.bound.is_finite()
                        || constraint.normal.iter().any(|a| !a.is_finite())
                    {
                        return Err(RegionError::ConstraintNotFinite { index });
                    }
                    let norm = constraint.normal.iter().map(|a| a * a).sum::<f64>().sqrt();
                    if norm == 0.0 {
                        return Err(RegionError::ZeroNormal { index });
                    }
                    for (j, a) in constraint.normal.iter().enumerate() {
                        normals[[index, j]] = a / norm;
                    }
                    bounds[index] = constraint.bound / norm;
                }

                let xbase = Array1::from(x0.to_vec());
                let rhs = &bounds - &normals.dot(&xbase);
                let domain = Self::Linear {
                    normals,
                    bounds,
                    rhs,
                };
                if !domain.is_feasible(&Array1::zeros(N)) {
                    return Err(RegionError::InfeasibleStart);
                }
                Ok((domain, xbase))
            }
        }
    }

    fn boxed(
        lower: Array1<f64>,
        upper: Array1<f64>,
        mut x: Array1<f64>,
        rho: f64,
    ) -> (Self, Array1<f64>) {
        let n = x.len();
        let mut sl = Array1::zeros(n);
        let mut su = Array1::zeros(n);
        for j in 0..n {
            let width = upper[j] - lower[j];
            sl[j] = lower[j] - x[j];
            su[j] = upper[j] - x[j];
            if sl[j] >= -rho {
                if sl[j] >= 0.0 {
                    x[j] = lower[j];
                    sl[j] = 0.0;
                    su[j] = width;
                } else {
                    x[j] = lower[j] + rho;
                    sl[j] = -rho;
                    su[j] = (upper[j] - x[j]).max(rho);
                }
            } else if su[j] <= rho {
                if su[j] <= 0.0 {
                    x[j] = upper[j];
                    sl[j] = -width;
                    su[j] = 0.0;
                } else {
                    x[j] = upper[j] - rho;
                    sl[j] = (lower[j] - x[j]).min(-rho);
                    su[j] = rho;
                }
            }
        }
        (
            Self::Box {
                lower,
                upper,
                sl,
                su,
            },
            x,
        )
    }

    /// Moves the origin of the relative coordinates by `s`.
    pub(super) fn shift(&mut self, s: &Array1<f64>) {
        match self {
            Self::Box { sl, su, .. } => {
                *sl -= s;
                *su -= s;
            }
            Self::Linear { normals, rhs, .. } => {
                *rhs -= &normals.dot(s);
            }
        }
    }

    /// Maps a relative point back to absolute coordinates.
    ///
    /// Box points are clamped and snapped onto bounds they touch so rounding
    /// in `xbase + y` never leaves the box.
    pub(super) fn absolute(&self, xbase: &Array1<f64>, y: &Array1<f64>) -> Array1<f64> {
        let mut x = xbase + y;
        if let Self::Box {
            lower,
            upper,
            sl,
            su,
        } = self
        {
            for j in 0..x.len() {
                x[j] = x[j].clamp(lower[j], upper[j]);
                if y[j] <= sl[j] {
                    x[j] = lower[j];
                }
                if y[j] >= su[j] {
                    x[j] = upper[j];
                }
            }
        }
        x
    }

    /// Constraint residuals `rhs − normals·y`; empty for boxes.
    pub(super) fn residuals(&self, y: &Array1<f64>) -> Array1<f64> {
        match self {
            Self::Box { .. } => Array1::zeros(0),
            Self::Linear { normals, rhs, .. } => rhs - &normals.dot(y),
        }
    }

    pub(super) fn is_feasible(&self, y: &Array1<f64>) -> bool {
        match self {
            Self::Box { sl, su, .. } => y
                .iter()
                .zip(sl.iter().zip(su))
                .all(|(y, (lo, hi))| *y >= *lo && *y <= *hi),
            Self::Linear { bounds, .. } => self
                .residuals(y)
                .iter()
                .zip(bounds)
                .all(|(r, b)| *r >= -FEASIBILITY_TOL * (1.0 + b.abs())),
        }
    }

    /// Probe offsets along coordinate `c` around the relative origin.
    ///
    /// Boxes prefer `±rho` inside the bounds; when the far side is too close
    /// the second probe goes further out on the same side. Linear regions
    /// probe `+rho` when feasible and `−rho` otherwise, with `b = −a`.
    pub(super) fn probe_steps(&self, c: usize, rho: f64) -> ProbeSteps {
        match self {
            Self::Box { sl, su, .. } => {
                let (lo, hi) = (sl[c], su[c]);
                let a = if hi >= rho {
                    rho
                } else if lo <= -rho {
                    -rho
                } else if hi >= -lo {
                    hi
                } else {
                    lo
                };
                let opposite = if a > 0.0 { lo.max(-rho) } else { hi.min(rho) };
                let b = if opposite.abs() >= 0.5 * a.abs() {
                    opposite
                } else if a > 0.0 {
                    hi.min(2.0 * rho)
                } else {
                    lo.max(-2.0 * rho)
                };
                ProbeSteps { a, b }
            }
            Self::Linear { .. } => {
                let mut e = Array1::zeros(self.dim());
                e[c] = rho;
                let a = if self.is_feasible(&e) { rho } else { -rho };
                ProbeSteps { a, b: -a }
            }
        }
    }

    /// Clamps a relative box point into `[sl, su]`; linear points are left as is.
    pub(super) fn clip(&self, y: &mut Array1<f64>) {
        if let Self::Box { sl, su, .. } = self {
            for ((v, lo), hi) in y.iter_mut().zip(sl).zip(su) {
                *v = v.clamp(*lo, *hi);
            }
        }
    }

    fn dim(&self) -> usize {
        match self {
            Self::Box { sl, .. } => sl.len(),
            Self::Linear { normals, .. } => normals.ncols(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn start_is_nudged_away_from_nearby_bounds() {
        let region = Region::Bounds {
            lower: [0.0, -5.0, -1.0],
            upper: [10.0, 0.9, 1.0],
        };
        let (domain, xbase) = Domain::new(&region, &[0.3, 0.5, 0.0], 1.0).unwrap();

        // Within rho of the lower bound: moved to lower + rho.
        assert_relative_eq!(xbase[0], 1.0);
        // Within rho of the upper bound: moved to upper − rho.
        assert_relative_eq!(xbase[1], -0.1);
        assert_relative_eq!(xbase[2], 0.0);

        let Domain::Box { sl, su, .. } = &domain else {
            panic!("expected a box");
        };
        assert_relative_eq!(sl[0], -1.0);
        assert_relative_eq!(su[1], 1.0);
    }

    #[test]
    fn start_on_bound_stays_there() {
        let region = Region::Bounds {
            lower: [0.0],
            upper: [4.0],
        };
        let (domain, xbase) = Domain::new(&region, &[0.0], 1.0).unwrap();

        assert_relative_eq!(xbase[0], 0.0);
        let steps = domain.probe_steps(0, 1.0);
        assert_relative_eq!(steps.a, 1.0);
        assert_relative_eq!(steps.b, 2.0);
    }

    #[test]
    fn probes_are_symmetric_without_bounds() {
        let (domain, _) = Domain::new(&Region::<2>::Unconstrained, &[3.0, 4.0], 0.5).unwrap();

        assert_eq!(domain.probe_steps(1, 0.5), ProbeSteps { a: 0.5, b: -0.5 });
    }

    #[test]
    fn rejects_invalid_bounds() {
        let narrow = Region::Bounds {
            lower: [0.0, 0.0],
            upper: [1.0, 5.0],
        };
        assert!(matches!(
            Domain::new(&narrow, &[0.5, 0.5], 1.0),
            Err(RegionError::NarrowBounds { index: 0, .. })
        ));

        let inverted = Region::Bounds {
            lower: [0.0, 3.0],
            upper: [5.0, 1.0],
        };
        assert!(matches!(
            Domain::new(&inverted, &[0.5, 0.5], 0.1),
            Err(RegionError::InvertedBounds { index: 1 })
        ));

        let outside = Region::Bounds {
            lower: [0.0],
            upper: [5.0],
        };
        assert_eq!(
            Domain::new(&outside, &[6.0], 0.1).unwrap_err(),
            RegionError::InfeasibleStart
        );
    }

    #[test]
    fn linear_constraints_are_normalized_and_shifted() {
        let region = Region::Linear(vec![LinearConstraint::new([3.0, 4.0], 10.0)]);
        let (mut domain, xbase) = Domain::new(&region, &[0.0, 0.0], 1.0).unwrap();

        assert_relative_eq!(domain.residuals(&array![0.0, 0.0])[0], 2.0);

        domain.shift(&array![1.0, 1.0]);
        assert_relative_eq!(domain.residuals(&array![0.0, 0.0])[0], 0.6, epsilon = 1e-12);
        assert!(domain.is_feasible(&array![0.6, 0.0]));
        assert!(!domain.is_feasible(&array![1.5, 0.0]));
        assert_eq!(xbase, array![0.0, 0.0]);
    }

    #[test]
    fn linear_probes_avoid_violated_side() {
        let region = Region::Linear(vec![LinearConstraint::new([1.0, 0.0], 0.5)]);
        let (domain, _) = Domain::new(&region, &[0.0, 0.0], 1.0).unwrap();

        assert_eq!(domain.probe_steps(0, 1.0), ProbeSteps { a: -1.0, b: 1.0 });
        assert_eq!(domain.probe_steps(1, 1.0), ProbeSteps { a: 1.0, b: -1.0 });
    }

    #[test]
    fn rejects_bad_constraints() {
        let zero = Region::Linear(vec![LinearConstraint::new([0.0, 0.0], 1.0)]);
        assert_eq!(
            Domain::new(&zero, &[0.0, 0.0], 1.0).unwrap_err(),
            RegionError::ZeroNormal { index: 0 }
        );

        let infeasible = Region::Linear(vec![LinearConstraint::new([1.0, 1.0], -1.0)]);
        assert_eq!(
            Domain::new(&infeasible, &[0.0, 0.0], 1.0).unwrap_err(),
            RegionError::InfeasibleStart
        );
    }

    #[test]
    fn absolute_points_snap_to_bounds() {
        let region = Region::Bounds {
            lower: [0.1],
            upper: [3.0],
        };
        let (domain, xbase) = Domain::new(&region, &[0.1], 1.0).unwrap();

        let x = domain.absolute(&xbase, &array![-1e-17]);
        assert_eq!(x[0], 0.1);
    }
}
