//! Tracker configuration.

use serde::Deserialize;

/// One hour in milliseconds, the default pull window.
pub const TIME_STEP_1_HR_MS: u64 = 60 * 60 * 1000;

/// Thirty-two days in milliseconds, the cap on exponential window widening.
pub const TIME_STEP_32_DAYS_MS: u64 = 1000 * 60 * 60 * 24 * 32;

/// Configuration shared by the trackers of one shard instance.
#[derive(Clone, Debug, Deserialize)]
pub struct TrackerConfig {
    /// Flush a change-unit batch once its accumulated update+delete count
    /// exceeds this threshold. Default is 2000.
    pub batch_doc_threshold: u64,
    /// Records per apply-worker sub-batch. Default is 50.
    pub record_batch_size: usize,
    /// ACL groups per apply-worker sub-batch. Default is 100.
    pub acl_batch_size: usize,
    /// Dependent records per cascade worker. Default is 10.
    pub cascade_batch_size: usize,
    /// Unclean records refreshed per content-tracker page. Default is 2000.
    pub content_batch_size: usize,
    /// Maximum concurrent apply workers per tracker. Default is 32.
    pub max_parallelism: usize,
    /// Maximum change units returned by one repository pull. Default is 2000.
    pub max_units_per_pull: usize,
    /// Initial pull window width in milliseconds. Default is 1 hour.
    pub time_step_ms: u64,
    /// Trailing rewind applied to the scan floor when a cycle continues, so
    /// units that arrived out of commit-time order are re-visited.
    /// Default is 1 hour.
    pub hole_retention_ms: u64,
    /// Id window used to locate the repository's first change unit.
    /// Default is 0..2000.
    pub initial_unit_window: (u64, u64),
    /// Minimum interval between index commits. Default is 60 seconds.
    pub commit_interval_ms: u64,
    /// Minimum interval between opening new index readers.
    /// Default is 120 seconds.
    pub new_reader_interval_ms: u64,
    /// New readers are not opened while this many are already live.
    /// Default is 2.
    pub max_live_readers: usize,
    /// Length of the lookback window used to skip already-found units while
    /// re-scanning the trailing hole-retention window. Default is 100.
    pub found_window_size: usize,
    /// Total shard count for the index.
    pub shard_count: u32,
    /// This instance's shard number, in `[0, shard_count)`.
    pub shard_instance: u32,
    /// Whether cascade tracking is enabled; when false, rejected updates are
    /// tombstoned rather than converted to cascade markers.
    pub cascade_tracking_enabled: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            batch_doc_threshold: 2000,
            record_batch_size: 50,
            acl_batch_size: 100,
            cascade_batch_size: 10,
            content_batch_size: 2000,
            max_parallelism: 32,
            max_units_per_pull: 2000,
            time_step_ms: TIME_STEP_1_HR_MS,
            hole_retention_ms: TIME_STEP_1_HR_MS,
            initial_unit_window: (0, 2000),
            commit_interval_ms: 60_000,
            new_reader_interval_ms: 120_000,
            max_live_readers: 2,
            found_window_size: 100,
            shard_count: 1,
            shard_instance: 0,
            cascade_tracking_enabled: true,
        }
    }
}
