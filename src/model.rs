//! # Model Module
//!
//! Core data types: the listing record routed between shards, shard
//! identifiers, and the per-shard batch handed from the partitioner to the
//! load coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::macros::format_description;
use time::{Date, PrimitiveDateTime};

/// Identifier of one physical shard database (e.g. `shard1`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(pub String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShardId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ShardId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Destination column order of the `listings` table.
///
/// Bind order in every INSERT follows this list exactly.
pub const LISTING_COLUMNS: [&str; 16] = [
    "id",
    "name",
    "host_id",
    "host_name",
    "neighbourhood",
    "latitude",
    "longitude",
    "room_type",
    "price",
    "minimum_nights",
    "number_of_reviews",
    "last_review",
    "reviews_per_month",
    "calculated_host_listings_count",
    "availability_365",
    "number_of_reviews_ltm",
];

/// One source row.
///
/// `id` is the destination primary key and is always present. Every other
/// field is nullable; a missing value is `None`, never an empty string or a
/// NaN placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: i64,
    pub name: Option<String>,
    pub host_id: Option<i64>,
    pub host_name: Option<String>,
    /// Partition key.
    pub neighbourhood: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub room_type: Option<String>,
    pub price: Option<i64>,
    pub minimum_nights: Option<i64>,
    pub number_of_reviews: Option<i64>,
    pub last_review: Option<Date>,
    pub reviews_per_month: Option<f64>,
    pub calculated_host_listings_count: Option<i64>,
    pub availability_365: Option<i64>,
    pub number_of_reviews_ltm: Option<i64>,
}

impl Listing {
    /// A listing with only its identifier and partition key set.
    pub fn new(id: i64, neighbourhood: Option<&str>) -> Self {
        Self {
            id,
            name: None,
            host_id: None,
            host_name: None,
            neighbourhood: neighbourhood.map(str::to_string),
            latitude: None,
            longitude: None,
            room_type: None,
            price: None,
            minimum_nights: None,
            number_of_reviews: None,
            last_review: None,
            reviews_per_month: None,
            calculated_host_listings_count: None,
            availability_365: None,
            number_of_reviews_ltm: None,
        }
    }

    /// Trim text, and replace blank strings and non-finite floats with
    /// explicit nulls.
    pub fn normalized(mut self) -> Self {
        self.name = trim_or_null(self.name);
        self.host_name = trim_or_null(self.host_name);
        self.neighbourhood = trim_or_null(self.neighbourhood);
        self.room_type = trim_or_null(self.room_type);
        self.latitude = null_if_non_finite(self.latitude);
        self.longitude = null_if_non_finite(self.longitude);
        self.reviews_per_month = null_if_non_finite(self.reviews_per_month);
        self
    }

    /// Partition key, if present.
    pub fn partition_key(&self) -> Option<&str> {
        self.neighbourhood.as_deref()
    }
}

fn trim_or_null(value: Option<String>) -> Option<String> {
    value.and_then(|text| {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == text.len() {
            Some(text)
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn null_if_non_finite(value: Option<f64>) -> Option<f64> {
    value.filter(|number| number.is_finite())
}

/// Ordered listings destined for one shard.
///
/// Built once per run by the partitioner and consumed by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionBatch {
    shard: ShardId,
    records: Vec<Listing>,
}

impl PartitionBatch {
    pub fn new(shard: ShardId) -> Self {
        Self {
            shard,
            records: Vec::new(),
        }
    }

    pub fn with_records(shard: ShardId, records: Vec<Listing>) -> Self {
        Self { shard, records }
    }

    pub fn shard(&self) -> &ShardId {
        &self.shard
    }

    pub fn push(&mut self, record: Listing) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Listing] {
        &self.records
    }

    /// Consecutive slices of at most `rows` records, in input order.
    pub fn chunks(&self, rows: usize) -> std::slice::Chunks<'_, Listing> {
        self.records.chunks(rows.max(1))
    }

    pub fn into_records(self) -> Vec<Listing> {
        self.records
    }
}

// =============================================================================
// Lenient coercion
// =============================================================================

fn is_null_token(raw: &str) -> bool {
    matches!(
        raw,
        "" | "nan" | "NaN" | "NAN" | "null" | "NULL" | "None" | "NaT" | "N/A"
    )
}

/// Trimmed text, or `None` for blank and null tokens.
pub fn coerce_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if is_null_token(trimmed) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Integer parse that also accepts whole floats such as `120.0`.
pub fn coerce_int(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if is_null_token(trimmed) {
        return None;
    }
    if let Ok(value) = trimmed.parse::<i64>() {
        return Some(value);
    }
    let float = trimmed.parse::<f64>().ok()?;
    if float.is_finite() && float.fract() == 0.0 && float.abs() < i64::MAX as f64 {
        Some(float as i64)
    } else {
        None
    }
}

/// Finite float, or `None`.
pub fn coerce_float(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if is_null_token(trimmed) {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Date parse over the formats the cleaned dataset is known to contain.
///
/// Unparsable input yields `None` rather than an error.
pub fn coerce_date(raw: &str) -> Option<Date> {
    let trimmed = raw.trim();
    if is_null_token(trimmed) {
        return None;
    }

    let iso = format_description!("[year]-[month]-[day]");
    let slashed = format_description!("[year]/[month]/[day]");
    let month_first = format_description!("[month]/[day]/[year]");
    let spaced_time = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let t_time = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

    Date::parse(trimmed, iso)
        .or_else(|_| Date::parse(trimmed, slashed))
        .or_else(|_| Date::parse(trimmed, month_first))
        .ok()
        .or_else(|| {
            PrimitiveDateTime::parse(trimmed, spaced_time)
                .or_else(|_| PrimitiveDateTime::parse(trimmed, t_time))
                .ok()
                .map(|datetime| datetime.date())
        })
}
