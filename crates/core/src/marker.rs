//! Deletion marker codec.
//!
//! The marker is the only durable state the engine owns: an RFC3339 instant
//! stored in a volume annotation once a reclaim has been scheduled. Markers
//! are written in UTC at whole-second precision. Reading also accepts any
//! RFC3339 offset and the naive `YYYY-MM-DDTHH:MM:SS` form written by older
//! releases, which is taken as UTC.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::error::MarkerParseError;

const LEGACY_NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Persisted scheduling state of one volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionMarker {
    Unset,
    Scheduled(DateTime<Utc>),
}

impl DeletionMarker {
    /// Read the marker from its raw annotation value.
    pub fn from_annotation(raw: Option<&str>) -> Result<Self, MarkerParseError> {
        match raw {
            None => Ok(Self::Unset),
            Some(value) => parse_marker(value).map(Self::Scheduled),
        }
    }
}

/// Parse a stored marker value.
pub fn parse_marker(raw: &str) -> Result<DateTime<Utc>, MarkerParseError> {
    let value = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, LEGACY_NAIVE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| MarkerParseError {
            value: raw.to_string(),
        })
}

/// Encode an instant as a marker value. Sub-second precision is dropped, so
/// callers schedule on whole seconds (see [`crate::clock::ceil_to_second`]).
pub fn encode_marker(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}
