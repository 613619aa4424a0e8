#![warn(missing_docs)]

//! ShardSync routing subsystem: shard-ownership predicates for records and ACL groups.
//!
//! Every strategy is a pure, side-effect-free predicate deciding whether a
//! record (or ACL group) belongs on the local shard instance. Strategies that
//! can legitimately have no answer return an indeterminate decision, which a
//! fallback composition resolves through a secondary strategy.

pub mod acl_hash;
pub mod date_bucket;
pub mod decision;
pub mod explicit;
pub mod factory;
pub mod fallback;
pub mod hashing;
pub mod id_hash;
pub mod property;
pub mod range;
pub mod router;

pub use decision::RouteDecision;
pub use factory::{build_router, RouterConfig, RouterError, ShardMethod};
pub use router::{DocRouter, SupportsRuntimeExpansion};
