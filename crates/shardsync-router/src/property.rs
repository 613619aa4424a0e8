//! Property-keyed hash routing.
//!
//! Extracts a key from a configured record property (optionally through a
//! regex capture) and routes by its hash. Records without the property, or
//! whose value the regex does not match, fall back to id-hash routing so
//! every record still has exactly one home.

use regex::Regex;

use shardsync_core::types::{AclGroup, Record};

use crate::decision::RouteDecision;
use crate::hashing::shard_for_bytes;
use crate::id_hash::DbIdHashRouter;
use crate::router::DocRouter;

/// Routes records by a hashed substring of a configured property.
#[derive(Debug)]
pub struct PropertyRouter {
    property: String,
    pattern: Option<Regex>,
    fallback: DbIdHashRouter,
}

impl PropertyRouter {
    /// Creates the router. When `pattern` is set, its first capture group
    /// (or the whole match when there is none) becomes the routing key.
    pub fn new(property: impl Into<String>, pattern: Option<Regex>) -> Self {
        Self {
            property: property.into(),
            pattern,
            fallback: DbIdHashRouter::new(),
        }
    }

    fn routing_key<'a>(&self, value: &'a str) -> Option<&'a str> {
        match &self.pattern {
            None => Some(value),
            Some(regex) => {
                let captures = regex.captures(value)?;
                match captures.get(1) {
                    Some(group) => Some(group.as_str()),
                    None => Some(captures.get(0)?.as_str()),
                }
            }
        }
    }
}

impl DocRouter for PropertyRouter {
    fn route_record(
        &self,
        shard_count: u32,
        shard_instance: u32,
        record: &Record,
    ) -> RouteDecision {
        if shard_count <= 1 {
            return RouteDecision::Accept;
        }
        match record
            .properties
            .get(&self.property)
            .and_then(|v| self.routing_key(v))
        {
            Some(key) => RouteDecision::from_bool(
                shard_for_bytes(key.as_bytes(), shard_count) == shard_instance,
            ),
            None => self.fallback.route_record(shard_count, shard_instance, record),
        }
    }

    fn route_acl_group(
        &self,
        _shard_count: u32,
        _shard_instance: u32,
        _group: &AclGroup,
    ) -> RouteDecision {
        RouteDecision::Accept
    }
}
