/// Number of recent step lengths consulted by [`TrustRegionState::accurate_model`].
const STEP_HISTORY: usize = 5;

/// Number of recent model errors consulted by [`TrustRegionState::accurate_model`].
const ERROR_HISTORY: usize = 3;

/// Consecutive trial steps the alternative model must win before it replaces
/// the incremental one.
const ALTERNATIVE_WINS: usize = 3;

/// Radii and the short histories that drive the controller's decisions.
#[derive(Debug, Clone)]
pub(super) struct TrustRegionState {
    pub(super) rho: f64,
    pub(super) delta: f64,
    rho_end: f64,
    dnorms: [f64; STEP_HISTORY],
    moderrs: [f64; ERROR_HISTORY],
    alternative_wins: usize,
}

impl TrustRegionState {
    pub(super) fn new(rho_beg: f64, rho_end: f64) -> Self {
        Self {
            rho: rho_beg,
            delta: rho_beg,
            rho_end,
            dnorms: [f64::MAX; STEP_HISTORY],
            moderrs: [f64::MAX; ERROR_HISTORY],
            alternative_wins: 0,
        }
    }

    pub(super) fn record_step(&mut self, dnorm: f64) {
        self.dnorms.rotate_left(1);
        self.dnorms[STEP_HISTORY - 1] = dnorm;
    }

    pub(super) fn record_model_error(&mut self, moderr: f64) {
        self.moderrs.rotate_left(1);
        self.moderrs[ERROR_HISTORY - 1] = moderr.abs();
    }

    /// Whether the model has tracked recent steps well at this resolution.
    pub(super) fn accurate_model(&self, crvmin: f64) -> bool {
        let tol = 0.125 * crvmin * self.rho * self.rho;
        self.moderrs.iter().all(|e| *e <= tol) && self.dnorms.iter().all(|d| *d <= self.rho)
    }

    /// Whether every point lies within `max(2δ, 10ρ)` of the center.
    pub(super) fn is_close(&self, distsq: impl IntoIterator<Item = f64>) -> bool {
        let limit = (2.0 * self.delta).max(10.0 * self.rho).powi(2);
        distsq.into_iter().all(|d| d <= limit)
    }

    /// Shrinks `δ` after a step that was not worth evaluating.
    pub(super) fn shrink(&mut self) {
        self.delta *= 0.1;
        self.floor_delta();
    }

    /// Revises `δ` from the reduction ratio of an evaluated step of length `dnorm`.
    pub(super) fn update_radius(&mut self, ratio: f64, dnorm: f64) {
        let half = 0.5 * self.delta;
        self.delta = if ratio <= 0.1 {
            half.min(dnorm)
        } else if ratio <= 0.7 {
            half.max(dnorm)
        } else {
            half.max(2.0 * dnorm)
        };
        self.floor_delta();
    }

    fn floor_delta(&mut self) {
        if self.delta <= 1.5 * self.rho {
            self.delta = self.rho;
        }
    }

    pub(super) fn at_final_resolution(&self) -> bool {
        self.rho <= self.rho_end
    }

    /// Moves to the next resolution and clears the histories.
    pub(super) fn reduce(&mut self) {
        let ratio = self.rho / self.rho_end;
        let rho_new = if ratio <= 16.0 {
            self.rho_end
        } else if ratio <= 250.0 {
            (self.rho * self.rho_end).sqrt()
        } else {
            0.1 * self.rho
        };
        self.delta = (0.5 * self.rho).max(rho_new);
        self.rho = rho_new;
        self.dnorms = [f64::MAX; STEP_HISTORY];
        self.moderrs = [f64::MAX; ERROR_HISTORY];
    }

    /// Records whether the alternative model predicted the last trial step
    /// much better than the incremental one.
    ///
    /// Returns `true` once it has done so for enough consecutive steps; the
    /// count restarts afterwards.
    pub(super) fn record_alternative(&mut self, better: bool) -> bool {
        if !better {
            self.alternative_wins = 0;
            return false;
        }
        self.alternative_wins += 1;
        if self.alternative_wins >= ALTERNATIVE_WINS {
            self.alternative_wins = 0;
            return true;
        }
        false
    }

    #[cfg(any(test, feature = "invariant-checks"))]
    pub(super) fn check_invariants(&self, previous_rho: f64) {
        assert!(
            self.delta >= self.rho,
            "radius {} below resolution {}",
            self.delta,
            self.rho
        );
        assert!(
            self.rho <= previous_rho,
            "resolution grew from {previous_rho} to {}",
            self.rho
        );
        assert!(self.rho >= self.rho_end, "resolution below its final value");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    #[test]
    fn radius_follows_the_ratio() {
        let mut state = TrustRegionState::new(0.1, 1e-6);
        state.delta = 1.0;

        state.update_radius(0.05, 0.3);
        assert_relative_eq!(state.delta, 0.3);

        state.delta = 1.0;
        state.update_radius(0.5, 0.8);
        assert_relative_eq!(state.delta, 0.8);

        state.delta = 1.0;
        state.update_radius(0.9, 0.8);
        assert_relative_eq!(state.delta, 1.6);

        state.delta = 1.0;
        state.update_radius(-1.0, 0.12);
        assert_eq!(state.delta, state.rho);
    }

    #[test]
    fn short_steps_shrink_towards_rho() {
        let mut state = TrustRegionState::new(0.1, 1e-6);
        state.delta = 2.0;

        state.shrink();
        assert_relative_eq!(state.delta, 0.2);
        state.shrink();
        assert_eq!(state.delta, 0.1);
    }

    #[test]
    fn resolution_schedule() {
        let mut state = TrustRegionState::new(1.0, 1e-6);
        state.reduce();
        assert_relative_eq!(state.rho, 0.1);
        assert_relative_eq!(state.delta, 0.5);

        let mut state = TrustRegionState::new(1e-4, 1e-6);
        state.reduce();
        assert_relative_eq!(state.rho, 1e-5);

        let mut state = TrustRegionState::new(1e-5, 1e-6);
        state.reduce();
        assert_eq!(state.rho, 1e-6);
        assert!(state.at_final_resolution());
        assert!(state.delta >= state.rho);

        let mut state = TrustRegionState::new(1e-4 * 2.0, 1e-6);
        state.reduce();
        assert_relative_eq!(state.rho, (2e-4_f64 * 1e-6).sqrt());
    }

    #[test]
    fn accuracy_needs_full_histories() {
        let mut state = TrustRegionState::new(1.0, 1e-6);
        assert!(!state.accurate_model(1.0));

        for _ in 0..STEP_HISTORY {
            state.record_step(0.5);
        }
        for _ in 0..ERROR_HISTORY {
            state.record_model_error(-0.01);
        }
        assert!(state.accurate_model(1.0));
        assert!(!state.accurate_model(0.0));

        state.reduce();
        assert!(!state.accurate_model(1.0));
    }

    #[test]
    fn alternative_model_needs_consecutive_wins() {
        let mut state = TrustRegionState::new(1.0, 1e-6);
        assert!(!state.record_alternative(true));
        assert!(!state.record_alternative(true));
        assert!(!state.record_alternative(false));
        assert!(!state.record_alternative(true));
        assert!(!state.record_alternative(true));
        assert!(state.record_alternative(true));
        assert!(!state.record_alternative(true));
    }

    #[test]
    fn closeness_uses_the_larger_radius() {
        let mut state = TrustRegionState::new(0.1, 1e-6);
        state.delta = 0.1;
        assert!(state.is_close([0.5, 1.0]));
        assert!(!state.is_close([1.0 + 1e-9]));
    }
}
