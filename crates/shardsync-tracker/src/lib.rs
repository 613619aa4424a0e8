#![warn(missing_docs)]

//! ShardSync tracker subsystem: the change-pull engines, their cursor state,
//! and the cross-tracker commit/rollback protocol.
//!
//! Each tracker is invoked independently and periodically by an external
//! scheduler through [`track`](cycle::CycleRunner). The metadata and ACL
//! trackers pull their change streams and fan updates out over bounded worker
//! pools; the content and cascade trackers operate against already-indexed
//! state; the commit tracker makes work visible and rolls everything back
//! when a peer signals failure.

pub mod acl;
pub mod cascade;
pub mod clock;
pub mod commit;
pub mod consistency;
pub mod content;
pub mod cycle;
pub mod found;
pub mod locks;
pub mod maintenance;
pub mod metadata;
pub mod pull;
pub mod registry;
pub mod report;
pub mod state;
pub mod workers;

pub use cycle::TrackerType;
pub use registry::{CoreRegistry, TrackerRegistry};
