use tregion_core::Snapshot;

use super::HistoryEntry;

/// Why the trust-region search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Status {
    /// The resolution reached the configured final radius.
    ResolutionReached,

    /// A feasible objective reached the configured target.
    TargetReached,

    /// The evaluation budget ran out.
    BudgetExhausted,

    /// The objective at the initial point was not finite.
    NonFiniteAtStart,

    /// The interpolation set degenerated and could not be repaired.
    SubproblemDegenerate,
}

/// The result of a trust-region search.
#[derive(Debug, Clone)]
pub struct Solution<I, O, const N: usize> {
    /// Final solver status.
    pub status: Status,

    /// Best feasible point seen.
    pub x: [f64; N],

    /// Objective value at `x`.
    pub objective: f64,

    /// Snapshot at `x`.
    pub snapshot: Snapshot<I, O>,

    /// Number of objective evaluations.
    pub evals: usize,

    /// Final resolution.
    pub rho: f64,

    /// Recent evaluations, oldest first, if history was requested.
    pub history: Vec<HistoryEntry<N>>,
}
