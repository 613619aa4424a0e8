//! Administrator-triggered maintenance queues.
//!
//! Each change-pull tracker owns one set of queues accepting ids from the
//! admin surface; the owning tracker drains them once per cycle before the
//! regular pull, and the coordinator drains them when a commit is due.
//! Multi-producer, single-consumer; ids are raw u64 values interpreted by
//! the owning tracker (record ids for metadata, ACL-group ids for ACL).

use std::collections::VecDeque;

use parking_lot::Mutex;

/// The per-tracker maintenance queues.
#[derive(Default)]
pub struct MaintenanceQueues {
    units_to_index: Mutex<VecDeque<u64>>,
    units_to_reindex: Mutex<VecDeque<u64>>,
    units_to_purge: Mutex<VecDeque<u64>>,
    records_to_index: Mutex<VecDeque<u64>>,
    records_to_reindex: Mutex<VecDeque<u64>>,
    records_to_purge: Mutex<VecDeque<u64>>,
    queries_to_reindex: Mutex<VecDeque<String>>,
}

impl MaintenanceQueues {
    /// Creates empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a change unit for indexing.
    pub fn add_unit_to_index(&self, id: u64) {
        self.units_to_index.lock().push_back(id);
    }

    /// Enqueues a change unit for purge-then-reapply.
    pub fn add_unit_to_reindex(&self, id: u64) {
        self.units_to_reindex.lock().push_back(id);
    }

    /// Enqueues a change unit for unconditional deletion.
    pub fn add_unit_to_purge(&self, id: u64) {
        self.units_to_purge.lock().push_back(id);
    }

    /// Enqueues a record for indexing.
    pub fn add_record_to_index(&self, id: u64) {
        self.records_to_index.lock().push_back(id);
    }

    /// Enqueues a record for re-evaluation.
    pub fn add_record_to_reindex(&self, id: u64) {
        self.records_to_reindex.lock().push_back(id);
    }

    /// Enqueues a record for unconditional deletion.
    pub fn add_record_to_purge(&self, id: u64) {
        self.records_to_purge.lock().push_back(id);
    }

    /// Enqueues an index query whose matches should be re-indexed.
    pub fn add_query_to_reindex(&self, query: impl Into<String>) {
        self.queries_to_reindex.lock().push_back(query.into());
    }

    /// Pops the next unit to index.
    pub fn pop_unit_to_index(&self) -> Option<u64> {
        self.units_to_index.lock().pop_front()
    }

    /// Pops the next unit to reindex.
    pub fn pop_unit_to_reindex(&self) -> Option<u64> {
        self.units_to_reindex.lock().pop_front()
    }

    /// Pops the next unit to purge.
    pub fn pop_unit_to_purge(&self) -> Option<u64> {
        self.units_to_purge.lock().pop_front()
    }

    /// Pops the next record to index.
    pub fn pop_record_to_index(&self) -> Option<u64> {
        self.records_to_index.lock().pop_front()
    }

    /// Pops the next record to reindex.
    pub fn pop_record_to_reindex(&self) -> Option<u64> {
        self.records_to_reindex.lock().pop_front()
    }

    /// Pops the next record to purge.
    pub fn pop_record_to_purge(&self) -> Option<u64> {
        self.records_to_purge.lock().pop_front()
    }

    /// Pops the next query to reindex.
    pub fn pop_query_to_reindex(&self) -> Option<String> {
        self.queries_to_reindex.lock().pop_front()
    }

    /// True when any queue holds pending work.
    pub fn has_work(&self) -> bool {
        !self.units_to_index.lock().is_empty()
            || !self.units_to_reindex.lock().is_empty()
            || !self.units_to_purge.lock().is_empty()
            || !self.records_to_index.lock().is_empty()
            || !self.records_to_reindex.lock().is_empty()
            || !self.records_to_purge.lock().is_empty()
            || !self.queries_to_reindex.lock().is_empty()
    }

    /// Logs and drops all pending work. Called when a tracker is disabled.
    pub fn clear_logged(&self, core: &str, tracker: &str) {
        let mut dropped = 0usize;
        for queue in [
            &self.units_to_index,
            &self.units_to_reindex,
            &self.units_to_purge,
            &self.records_to_index,
            &self.records_to_reindex,
            &self.records_to_purge,
        ] {
            let mut guard = queue.lock();
            dropped += guard.len();
            guard.clear();
        }
        {
            let mut guard = self.queries_to_reindex.lock();
            dropped += guard.len();
            guard.clear();
        }
        if dropped > 0 {
            tracing::info!(core, tracker, dropped, "cleared scheduled maintenance work");
        }
    }
}
