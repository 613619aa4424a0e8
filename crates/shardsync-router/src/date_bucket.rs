//! Date-bucket routing.
//!
//! Buckets a configured date property by `(year * 12 + month) / grouping`
//! and routes the bucket by modulo, so consecutive months (up to the
//! grouping width) land on the same shard. Records without the property, or
//! with an unparsable value, fall back to id-hash routing.

use chrono::{DateTime, NaiveDate};

use shardsync_core::types::{AclGroup, Record};

use crate::decision::RouteDecision;
use crate::id_hash::DbIdHashRouter;
use crate::router::DocRouter;

/// Routes records by a month-granularity bucket of a date property.
#[derive(Debug)]
pub struct DateBucketRouter {
    property: String,
    grouping: u32,
    fallback: DbIdHashRouter,
}

impl DateBucketRouter {
    /// Creates the router. `grouping` is the number of consecutive months
    /// sharing a bucket; zero is treated as one.
    pub fn new(property: impl Into<String>, grouping: u32) -> Self {
        Self {
            property: property.into(),
            grouping: grouping.max(1),
            fallback: DbIdHashRouter::new(),
        }
    }

    fn bucket(&self, value: &str) -> Option<i64> {
        let (year, month) = parse_year_month(value)?;
        Some((i64::from(year) * 12 + i64::from(month)) / i64::from(self.grouping))
    }
}

/// Accepts RFC 3339 timestamps and plain `YYYY-MM-DD` dates.
fn parse_year_month(value: &str) -> Option<(i32, u32)> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        let date = ts.date_naive();
        return Some((chrono::Datelike::year(&date), chrono::Datelike::month(&date)));
    }
    let date = NaiveDate::parse_from_str(value.get(..10)?, "%Y-%m-%d").ok()?;
    Some((chrono::Datelike::year(&date), chrono::Datelike::month(&date)))
}

impl DocRouter for DateBucketRouter {
    fn route_record(
        &self,
        shard_count: u32,
        shard_instance: u32,
        record: &Record,
    ) -> RouteDecision {
        if shard_count <= 1 {
            return RouteDecision::Accept;
        }
        match record.properties.get(&self.property).and_then(|v| self.bucket(v)) {
            Some(bucket) => RouteDecision::from_bool(
                bucket.rem_euclid(i64::from(shard_count)) == i64::from(shard_instance),
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
