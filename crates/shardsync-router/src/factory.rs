//! Router construction from configuration.

use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::acl_hash::AclIdHashRouter;
use crate::date_bucket::DateBucketRouter;
use crate::explicit::{DynamicShardRouter, StaticShardRouter};
use crate::fallback::FallbackRouter;
use crate::id_hash::DbIdHashRouter;
use crate::property::PropertyRouter;
use crate::range::DbIdRangeRouter;
use crate::router::DocRouter;

/// The configured sharding method.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShardMethod {
    /// Hash-mod on the record id; ACL groups duplicated everywhere.
    DbId,
    /// Runtime-expandable id window.
    DbIdRange,
    /// Hash-mod on the ACL-group id; records co-located with their group.
    AclId,
    /// Repository-assigned owning-shard slot.
    ExplicitStatic,
    /// Owning shard read from a record property, id-hash fallback.
    ExplicitDynamic,
    /// Regex-keyed property hash, id-hash fallback.
    Property,
    /// Month-bucketed date property, id-hash fallback.
    DateMonth,
}

/// Router configuration for one shard instance.
#[derive(Clone, Debug, Deserialize)]
pub struct RouterConfig {
    /// The sharding method to build.
    pub method: ShardMethod,
    /// Id window for [`ShardMethod::DbIdRange`].
    pub range: Option<(u64, u64)>,
    /// Record property for the property, date and dynamic-explicit methods.
    pub property: Option<String>,
    /// Regex applied to the property value ([`ShardMethod::Property`]).
    pub pattern: Option<String>,
    /// Months per bucket for [`ShardMethod::DateMonth`].
    pub date_grouping: Option<u32>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            method: ShardMethod::DbId,
            range: None,
            property: None,
            pattern: None,
            date_grouping: None,
        }
    }
}

/// Errors raised while building a router from configuration.
#[derive(Debug, Error)]
pub enum RouterError {
    /// A required configuration field is missing for the chosen method.
    #[error("shard method {method:?} requires the `{field}` setting")]
    MissingField {
        /// The configured method.
        method: ShardMethod,
        /// The missing field name.
        field: &'static str,
    },

    /// The configured property regex does not compile.
    #[error("invalid routing pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Builds the router for the given configuration.
pub fn build_router(config: &RouterConfig) -> Result<Arc<dyn DocRouter>, RouterError> {
    let router: Arc<dyn DocRouter> = match config.method {
        ShardMethod::DbId => Arc::new(DbIdHashRouter::new()),
        ShardMethod::AclId => Arc::new(AclIdHashRouter::new()),
        ShardMethod::DbIdRange => {
            let (start, end) = config.range.ok_or(RouterError::MissingField {
                method: config.method,
                field: "range",
            })?;
            Arc::new(DbIdRangeRouter::new(start, end))
        }
        ShardMethod::ExplicitStatic => Arc::new(StaticShardRouter::new()),
        ShardMethod::ExplicitDynamic => {
            let property = config.property.clone().ok_or(RouterError::MissingField {
                method: config.method,
                field: "property",
            })?;
            Arc::new(FallbackRouter::new(
                Arc::new(DynamicShardRouter::new(property)),
                Arc::new(DbIdHashRouter::new()),
            ))
        }
        ShardMethod::Property => {
            let property = config.property.clone().ok_or(RouterError::MissingField {
                method: config.method,
                field: "property",
            })?;
            let pattern = config
                .pattern
                .as_deref()
                .map(Regex::new)
                .transpose()?;
            Arc::new(PropertyRouter::new(property, pattern))
        }
        ShardMethod::DateMonth => {
            let property = config.property.clone().ok_or(RouterError::MissingField {
                method: config.method,
                field: "property",
            })?;
            Arc::new(DateBucketRouter::new(
                property,
                config.date_grouping.unwrap_or(1),
            ))
        }
    };
    Ok(router)
}
