use tregion_core::Model;

/// Why a point was evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalKind {
    /// Part of the initial interpolation design.
    Initial,

    /// Trust-region step from the current best point.
    Trial,

    /// Step chosen to improve the geometry of the interpolation set.
    Geometry,

    /// Replacement point evaluated while rebuilding the interpolation set.
    Rescue,

    /// Last pending short step, evaluated before returning.
    Final,
}

/// Events emitted by the trust-region solver.
///
/// Observers watch progress; the action type is [`std::convert::Infallible`]
/// so they cannot steer or stop the search.
pub enum Event<'a, M, const N: usize>
where
    M: Model,
{
    /// An objective evaluation completed.
    Evaluated {
        /// The evaluated point.
        x: [f64; N],

        /// The objective value, possibly non-finite.
        objective: f64,

        /// Whether the point satisfies the region.
        feasible: bool,

        /// The model input at this point.
        input: &'a M::Input,

        /// The model output at this point.
        output: &'a M::Output,

        /// Why the point was evaluated.
        kind: EvalKind,

        /// Evaluations so far, including this one.
        evals: usize,
    },

    /// The resolution was reduced.
    RadiusReduced { rho: f64, delta: f64 },

    /// The interpolation set was rebuilt around the best point.
    Rescued { evals: usize },

    /// The quadratic model was replaced by the minimum-norm interpolant.
    ModelReplaced { evals: usize },
}

impl<M, const N: usize> Event<'_, M, N>
where
    M: Model,
{
    /// Returns the evaluation count carried by the event, if any.
    #[must_use]
    pub fn evals(&self) -> Option<usize> {
        match self {
            Self::Evaluated { evals, .. }
            | Self::Rescued { evals }
            | Self::ModelReplaced { evals } => Some(*evals),
            Self::RadiusReduced { .. } => None,
        }
    }
}
