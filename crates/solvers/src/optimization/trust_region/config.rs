use thiserror::Error;

use super::history::HistoryEntry;

/// Configuration for the trust-region solver.
///
/// Fields are public; call [`Config::validate`] to check a config against
/// the problem dimension. The solver validates before evaluating anything.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Number of interpolation points `m`, with `n+2 ≤ m ≤ (n+1)(n+2)/2`.
    ///
    /// Defaults to `2n+1` when `None`.
    pub interpolation_points: Option<usize>,

    /// Initial trust-region radius and resolution.
    pub initial_radius: f64,

    /// Final resolution; the search stops once it is reached.
    pub final_radius: f64,

    /// Stop as soon as a feasible objective at or below this value is seen
    /// (at or above it when maximizing). Infinite values never stop the search.
    pub target_objective: f64,

    /// Evaluation budget; defaults to `500·n` when `None`.
    pub max_evals: Option<usize>,

    /// Number of evaluations to keep in the returned history, if any.
    pub history: Option<usize>,

    /// Upper bound, in bytes, on the memory used by the history buffer.
    pub history_memory_limit: usize,
}

/// Errors that can occur when validating a trust-region config.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum ConfigError {
    #[error("problem must have at least one variable")]
    NoVariables,

    #[error("interpolation_points must be in {min}..={max}, got {got}")]
    InterpolationPoints { got: usize, min: usize, max: usize },

    #[error("initial_radius must be finite and positive")]
    InitialRadius,

    #[error("final_radius must be finite, positive, and no larger than initial_radius")]
    FinalRadius,

    #[error("target_objective must not be NaN")]
    TargetObjective,

    #[error("max_evals must be at least {required}, got {got}")]
    MaxEvals { got: usize, required: usize },
}

/// Values derived from a validated config for a given dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Limits {
    pub(super) npt: usize,
    pub(super) max_evals: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interpolation_points: None,
            initial_radius: 1.0,
            final_radius: 1e-6,
            target_objective: f64::NEG_INFINITY,
            max_evals: None,
            history: None,
            history_memory_limit: 64 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Checks the config for a problem with `n` variables.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first invalid setting.
    pub fn validate(&self, n: usize) -> Result<(), ConfigError> {
        self.limits(n).map(|_| ())
    }

    pub(super) fn limits(&self, n: usize) -> Result<Limits, ConfigError> {
        if n == 0 {
            return Err(ConfigError::NoVariables);
        }

        let (min, max) = (n + 2, (n + 1) * (n + 2) / 2);
        let npt = self.interpolation_points.unwrap_or(2 * n + 1);
        if npt < min || npt > max {
            return Err(ConfigError::InterpolationPoints { got: npt, min, max });
        }

        if !self.initial_radius.is_finite() || self.initial_radius <= 0.0 {
            return Err(ConfigError::InitialRadius);
        }
        if !self.final_radius.is_finite()
            || self.final_radius <= 0.0
            || self.final_radius > self.initial_radius
        {
            return Err(ConfigError::FinalRadius);
        }
        if self.target_objective.is_nan() {
            return Err(ConfigError::TargetObjective);
        }

        let max_evals = self.max_evals.unwrap_or(500 * n);
        if max_evals < npt + 1 {
            return Err(ConfigError::MaxEvals {
                got: max_evals,
                required: npt + 1,
            });
        }

        Ok(Limits { npt, max_evals })
    }

    /// Number of history entries to keep for `N` variables.
    ///
    /// Never more than `max_evals` or what fits in `history_memory_limit`.
    pub(super) fn history_capacity<const N: usize>(&self, max_evals: usize) -> usize {
        let entry_size = std::mem::size_of::<HistoryEntry<N>>().max(1);
        self.history.map_or(0, |h| {
            h.min(max_evals).min(self.history_memory_limit / entry_size)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_dimension() {
        let config = Config::default();
        let limits = config.limits(3).unwrap();

        assert_eq!(limits.npt, 7);
        assert_eq!(limits.max_evals, 1500);
        assert_eq!(config.history_capacity::<3>(limits.max_evals), 0);
    }

    #[test]
    fn interpolation_points_are_range_checked() {
        let config = Config {
            interpolation_points: Some(11),
            ..Config::default()
        };

        assert_eq!(
            config.validate(3),
            Err(ConfigError::InterpolationPoints {
                got: 11,
                min: 5,
                max: 10
            })
        );
    }

    #[test]
    fn radii_must_be_ordered() {
        let config = Config {
            initial_radius: 0.1,
            final_radius: 0.2,
            ..Config::default()
        };
        assert_eq!(config.validate(2), Err(ConfigError::FinalRadius));

        let config = Config {
            initial_radius: f64::INFINITY,
            ..Config::default()
        };
        assert_eq!(config.validate(2), Err(ConfigError::InitialRadius));
    }

    #[test]
    fn budget_must_cover_initial_design() {
        let config = Config {
            max_evals: Some(5),
            ..Config::default()
        };

        assert_eq!(
            config.validate(2),
            Err(ConfigError::MaxEvals {
                got: 5,
                required: 6
            })
        );
    }

    #[test]
    fn history_capacity_respects_memory_limit() {
        let entry = std::mem::size_of::<HistoryEntry<2>>();
        let config = Config {
            history: Some(1000),
            history_memory_limit: 10 * entry,
            ..Config::default()
        };

        assert_eq!(config.history_capacity::<2>(1500), 10);
    }

    #[test]
    fn history_capacity_never_exceeds_budget() {
        let config = Config {
            history: Some(usize::MAX),
            ..Config::default()
        };

        assert_eq!(config.history_capacity::<2>(40), 40);
    }

    #[test]
    fn nan_target_is_rejected() {
        let config = Config {
            target_objective: f64::NAN,
            ..Config::default()
        };

        assert_eq!(config.validate(1), Err(ConfigError::TargetObjective));
    }
}
