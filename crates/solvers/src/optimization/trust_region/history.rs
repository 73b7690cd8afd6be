use std::collections::VecDeque;

/// One recorded objective evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryEntry<const N: usize> {
    pub x: [f64; N],
    pub objective: f64,
}

/// Fixed-capacity ring of recent evaluations; the oldest entry is dropped first.
///
/// Storage grows with use, up to `capacity`.
#[derive(Debug, Clone)]
pub(super) struct History<const N: usize> {
    entries: VecDeque<HistoryEntry<N>>,
    capacity: usize,
}

impl<const N: usize> History<N> {
    pub(super) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    pub(super) fn push(&mut self, x: [f64; N], objective: f64) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry { x, objective });
    }

    /// Entries oldest first, with `report` applied to each objective.
    pub(super) fn into_vec(self, report: impl Fn(f64) -> f64) -> Vec<HistoryEntry<N>> {
        self.entries
            .into_iter()
            .map(|e| HistoryEntry {
                x: e.x,
                objective: report(e.objective),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_when_full() {
        let mut history = History::<1>::with_capacity(2);
        for i in 0..4 {
            history.push([f64::from(i)], f64::from(10 * i));
        }

        let entries = history.into_vec(|v| v);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].x, [2.0]);
        assert_eq!(entries[1].objective, 30.0);
    }

    #[test]
    fn large_capacity_is_not_reserved_up_front() {
        let mut history = History::<3>::with_capacity(usize::MAX);
        assert_eq!(history.entries.capacity(), 0);

        history.push([1.0, 2.0, 3.0], 4.0);
        assert_eq!(history.into_vec(|v| -v)[0].objective, -4.0);
    }

    #[test]
    fn zero_capacity_records_nothing() {
        let mut history = History::<2>::with_capacity(0);
        history.push([1.0, 2.0], 3.0);

        assert!(history.into_vec(|v| v).is_empty());
    }
}
