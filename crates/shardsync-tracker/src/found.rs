//! Bounded lookback of recently-found change units.
//!
//! Hole retention makes the pull loop re-visit a trailing time window on
//! every cycle, so the same units keep reappearing. The window remembers the
//! last N units seen and lets the loop skip result sets it has already
//! consumed. It is a spin-guard, not a correctness boundary: a unit rotated
//! out is simply re-returned by the pull loop and then skipped by the
//! already-indexed check.

use std::collections::{HashSet, VecDeque};

use shardsync_core::types::{ChangeUnit, ChangeUnitId};

/// Fixed-capacity deque of the most recently found change units.
pub struct FoundWindow {
    capacity: usize,
    order: VecDeque<ChangeUnit>,
    ids: HashSet<ChangeUnitId>,
}

impl FoundWindow {
    /// Creates a window remembering at most `capacity` units.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
        }
    }

    /// Records a found unit, evicting the oldest once over capacity.
    pub fn add(&mut self, unit: ChangeUnit) {
        if self.ids.contains(&unit.id) {
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted.id);
            }
        }
        self.ids.insert(unit.id);
        self.order.push_back(unit);
    }

    /// The most recently found unit.
    pub fn last(&self) -> Option<&ChangeUnit> {
        self.order.back()
    }

    /// Number of remembered units.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when nothing has been found yet.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// True when every unit of a non-empty result set has already been seen,
    /// meaning the pull loop should widen its window and continue. A
    /// single-unit result is compared against the newest entry only, so a
    /// stream that genuinely ends with one repeated unit terminates the scan.
    pub fn already_seen_all(&self, units: &[ChangeUnit]) -> bool {
        if self.order.is_empty() || units.is_empty() {
            return false;
        }
        if units.len() == 1 {
            return self
                .last()
                .map(|newest| newest.id == units[0].id)
                .unwrap_or(false);
        }
        units.iter().all(|u| self.ids.contains(&u.id))
    }
}

#[cfg(test)]
mod tests {
    use shardsync_core::types::CommitTime;

    use super::*;

    fn unit(id: u64, time: u64) -> ChangeUnit {
        ChangeUnit::new(ChangeUnitId::new(id), CommitTime::from_millis(time), 1, 0)
    }

    #[test]
    fn test_empty_window_never_matches() {
        let window = FoundWindow::new(4);
        assert!(!window.already_seen_all(&[unit(1, 10)]));
    }

    #[test]
    fn test_single_unit_compares_against_newest() {
        let mut window = FoundWindow::new(4);
        window.add(unit(1, 10));
        window.add(unit(2, 20));
        assert!(window.already_seen_all(&[unit(2, 20)]));
        // Unit 1 is remembered but is not the newest, so a single-unit
        // result for it is treated as novel.
        assert!(!window.already_seen_all(&[unit(1, 10)]));
    }

    #[test]
    fn test_multi_unit_set_must_be_fully_seen() {
        let mut window = FoundWindow::new(4);
        window.add(unit(1, 10));
        window.add(unit(2, 20));
        assert!(window.already_seen_all(&[unit(1, 10), unit(2, 20)]));
        assert!(!window.already_seen_all(&[unit(2, 20), unit(3, 30)]));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut window = FoundWindow::new(3);
        for id in 1..=5 {
            window.add(unit(id, id * 10));
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.last().unwrap().id, ChangeUnitId::new(5));
        // Units 1 and 2 rotated out.
        assert!(!window.already_seen_all(&[unit(1, 10), unit(2, 20)]));
    }

    #[test]
    fn test_window_rotation_can_forget() {
        // The documented edge case: once a unit rotates out of the window it
        // reads as novel again, so the pull loop re-returns it and the
        // already-indexed check (not this window) must skip it.
        let mut window = FoundWindow::new(2);
        window.add(unit(1, 10));
        window.add(unit(2, 20));
        window.add(unit(3, 30));

        assert!(!window.already_seen_all(&[unit(1, 10), unit(4, 40)]));

        // Re-adding the forgotten unit works like any other novel unit.
        window.add(unit(1, 10));
        assert_eq!(window.last().unwrap().id, ChangeUnitId::new(1));
    }

    #[test]
    fn test_duplicate_add_is_ignored() {
        let mut window = FoundWindow::new(3);
        window.add(unit(1, 10));
        window.add(unit(1, 10));
        assert_eq!(window.len(), 1);
    }
}
