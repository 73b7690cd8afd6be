/// Receives solver events and decides how the iteration should proceed.
///
/// Observers let callers monitor a solver without changing its API, enabling
/// logging, recording, or custom reporting.
///
/// The `observe` method returns `Option<A>`, where `Some(action)` requests a
/// solver-specific action and `None` lets the solver continue unchanged.
/// Solvers that accept no actions use an uninhabited action type such as
/// [`std::convert::Infallible`].
///
/// Closures automatically implement `Observer`, and a built-in impl for `()`
/// provides a no-op observer that always returns `None`.
pub trait Observer<E, A> {
    /// Observes a solver event and optionally returns a control action.
    fn observe(&mut self, event: &E) -> Option<A>;
}

/// Blanket implementation for observer closures.
impl<E, A, F> Observer<E, A> for F
where
    F: FnMut(&E) -> Option<A>,
{
    fn observe(&mut self, event: &E) -> Option<A> {
        self(event)
    }
}

/// A no-op observer that always returns `None`.
impl<E, A> Observer<E, A> for () {
    fn observe(&mut self, _event: &E) -> Option<A> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::convert::Infallible;

    fn drive<Obs: Observer<u32, Infallible>>(mut observer: Obs, events: &[u32]) {
        for event in events {
            let _ = observer.observe(event);
        }
    }

    #[test]
    fn closure_observer_sees_every_event() {
        let mut seen = Vec::new();
        drive(
            |event: &u32| {
                seen.push(*event);
                None
            },
            &[3, 1, 4],
        );

        assert_eq!(seen, vec![3, 1, 4]);
    }

    #[test]
    fn unit_observer_returns_none() {
        let mut observer = ();
        let action: Option<Infallible> = observer.observe(&7_u32);
        assert!(action.is_none());
    }
}
