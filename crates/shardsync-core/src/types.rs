//! Core identifiers and change-stream data types shared by every tracker.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Represents a unique identifier for a change unit (a repository-side
/// transaction or ACL change set).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeUnitId(u64);

impl ChangeUnitId {
    /// A zero change-unit ID, below any real unit.
    pub const ZERO: ChangeUnitId = ChangeUnitId(0);

    /// Creates a new ChangeUnitId from a raw u64 value.
    pub fn new(id: u64) -> Self {
        ChangeUnitId(id)
    }

    /// Returns the raw u64 value of this change-unit ID.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChangeUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents a unique identifier for a content record (node).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(u64);

impl RecordId {
    /// Creates a new RecordId from a raw u64 value.
    pub fn new(id: u64) -> Self {
        RecordId(id)
    }

    /// Returns the raw u64 value of this record ID.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents a unique identifier for an access-control group.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AclGroupId(u64);

impl AclGroupId {
    /// Creates a new AclGroupId from a raw u64 value.
    pub fn new(id: u64) -> Self {
        AclGroupId(id)
    }

    /// Returns the raw u64 value of this ACL-group ID.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AclGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A repository commit timestamp in milliseconds since the epoch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitTime(u64);

impl CommitTime {
    /// The zero commit time, below any real commit.
    pub const ZERO: CommitTime = CommitTime(0);

    /// Creates a commit time from raw milliseconds.
    pub fn from_millis(ms: u64) -> Self {
        CommitTime(ms)
    }

    /// Returns the raw millisecond value.
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Returns this commit time advanced by `ms` milliseconds.
    pub fn plus_millis(&self, ms: u64) -> CommitTime {
        CommitTime(self.0.saturating_add(ms))
    }

    /// Returns this commit time rewound by `ms` milliseconds, floored at zero.
    pub fn minus_millis(&self, ms: u64) -> CommitTime {
        CommitTime(self.0.saturating_sub(ms))
    }
}

impl fmt::Display for CommitTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// The `(commit time, id)` pair marking the newest change unit durably
/// reflected in the index. Commit time orders first; the id breaks ties
/// because commit times are not unique.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Watermark {
    /// Commit time of the newest applied change unit.
    pub commit_time: CommitTime,
    /// Id of the newest applied change unit (tie-break).
    pub id: ChangeUnitId,
}

impl Watermark {
    /// The zero watermark, below any real change unit.
    pub const ZERO: Watermark = Watermark {
        commit_time: CommitTime::ZERO,
        id: ChangeUnitId::ZERO,
    };

    /// Creates a watermark from a commit time and unit id.
    pub fn new(commit_time: CommitTime, id: ChangeUnitId) -> Self {
        Watermark { commit_time, id }
    }

    /// Advances this watermark to `other` if `other` is strictly newer.
    /// Returns true if the watermark moved.
    pub fn advance_to(&mut self, other: Watermark) -> bool {
        if other > *self {
            *self = other;
            true
        } else {
            false
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, id {})", self.commit_time, self.id)
    }
}

/// Which change stream a repository pull targets.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreSelector {
    /// Content-metadata transactions.
    Metadata,
    /// Access-control change sets.
    Acl,
}

impl fmt::Display for StoreSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreSelector::Metadata => write!(f, "metadata"),
            StoreSelector::Acl => write!(f, "acl"),
        }
    }
}

/// An atomically-committed batch of repository mutations. Change units never
/// merge or split; their ordering key is `(commit_time, id)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeUnit {
    /// Repository-assigned unit id.
    pub id: ChangeUnitId,
    /// Commit timestamp on the repository.
    pub commit_time: CommitTime,
    /// Number of record updates carried by the unit.
    pub updates: u64,
    /// Number of record deletions carried by the unit.
    pub deletes: u64,
}

impl ChangeUnit {
    /// Creates a change unit.
    pub fn new(id: ChangeUnitId, commit_time: CommitTime, updates: u64, deletes: u64) -> Self {
        ChangeUnit {
            id,
            commit_time,
            updates,
            deletes,
        }
    }

    /// Total mutation count, used for batch sizing.
    pub fn work_size(&self) -> u64 {
        self.updates + self.deletes
    }

    /// The ordering key of this unit.
    pub fn watermark(&self) -> Watermark {
        Watermark::new(self.commit_time, self.id)
    }
}

impl fmt::Display for ChangeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unit {} @ {} (+{} -{})",
            self.id, self.commit_time, self.updates, self.deletes
        )
    }
}

/// Status of a record inside a change unit. The NonShard variants are
/// produced locally when the router rejects a record that still requires a
/// tombstone or a cascade re-evaluation on this shard.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    /// Created or updated on the repository.
    Updated,
    /// Deleted on the repository.
    Deleted,
    /// Status could not be determined; treated as a full re-evaluation.
    Unknown,
    /// Updated, but owned by another shard; dependents may need cascading.
    NonShardUpdated,
    /// No longer owned by this shard; a local tombstone is required.
    NonShardDeleted,
}

/// A single content record carried inside a change unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Repository record id.
    pub id: RecordId,
    /// The change unit that carried this record.
    pub change_unit_id: ChangeUnitId,
    /// The access-control group governing this record.
    pub acl_group: AclGroupId,
    /// Mutation status.
    pub status: RecordStatus,
    /// Precomputed owning-shard value, when the repository assigns one.
    pub owning_shard: Option<u32>,
    /// Free-form record properties (router keys, date fields, paths).
    pub properties: BTreeMap<String, String>,
}

impl Record {
    /// Creates a record with no properties and no owning-shard assignment.
    pub fn new(
        id: RecordId,
        change_unit_id: ChangeUnitId,
        acl_group: AclGroupId,
        status: RecordStatus,
    ) -> Self {
        Record {
            id,
            change_unit_id,
            acl_group,
            status,
            owning_shard: None,
            properties: BTreeMap::new(),
        }
    }

    /// Builds the local delete-tombstone for a record the router rejected
    /// while it was still live elsewhere.
    pub fn tombstone_of(other: &Record) -> Record {
        Record {
            status: RecordStatus::NonShardDeleted,
            properties: BTreeMap::new(),
            ..other.clone()
        }
    }

    /// Builds the cascade-trigger marker for an updated record that left
    /// local ownership; dependents must be re-evaluated.
    pub fn cascade_marker_of(other: &Record) -> Record {
        Record {
            status: RecordStatus::NonShardUpdated,
            properties: BTreeMap::new(),
            ..other.clone()
        }
    }

    /// Sets a property, builder style.
    pub fn with_property(mut self, key: &str, value: &str) -> Record {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }
}

/// An access-control group carried inside an ACL change set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclGroup {
    /// Repository ACL-group id.
    pub id: AclGroupId,
    /// The change unit that carried this group.
    pub change_unit_id: ChangeUnitId,
    /// Number of ACL entries in the group.
    pub acl_count: u64,
}

impl AclGroup {
    /// Creates an ACL group.
    pub fn new(id: AclGroupId, change_unit_id: ChangeUnitId, acl_count: u64) -> Self {
        AclGroup {
            id,
            change_unit_id,
            acl_count,
        }
    }
}

/// Resolved membership of an access-control group: the authorities that can
/// read through it and those explicitly denied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    /// The group this membership resolves.
    pub group: AclGroupId,
    /// Authorities granted read access.
    pub readers: Vec<String>,
    /// Authorities explicitly denied.
    pub denied: Vec<String>,
}

/// A record whose derived content representation is pending or stale.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UncleanRecord {
    /// The record needing a content refresh.
    pub id: RecordId,
    /// Owning tenant, carried through to the refresh call.
    pub tenant: String,
}
