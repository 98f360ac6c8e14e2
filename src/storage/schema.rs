//! Metric record definitions
//!
//! A [`MetricRecord`] is the unit every backend stores, keyed by its `id`.
//! The kind decides which numeric field is populated:
//!
//! - **Gauge**: `value` holds the latest reading, each write replaces it
//! - **Counter**: `delta` holds the running total, each write adds to it
//!
//! The serialized shape (`{"id", "type", "delta"?, "value"?, "digest"?}`) is
//! shared by the snapshot file and the ingestion payloads of remote agents.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ValidationError;

/// Kind of a stored metric
///
/// Once a metric id has been stored with a kind, every later write
/// to that id must use the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Latest reported value wins
    Gauge,

    /// Reported increments accumulate into a running total
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(ValidationError::UnsupportedKind(other.to_string())),
        }
    }
}

/// A single metric as stored by every backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Unique metric name
    pub id: String,

    #[serde(rename = "type")]
    pub kind: MetricKind,

    /// Counter increment (or running total once stored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,

    /// Gauge reading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    /// Integrity digest supplied by the reporting agent
    #[serde(default, alias = "hash", skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl MetricRecord {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
            digest: None,
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
            digest: None,
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// Check the record on its own, without looking at stored state
    ///
    /// The id must be non-empty and exactly the field matching the kind
    /// must be populated. Gauge values must be finite since neither the
    /// snapshot format nor the database can hold NaN. Kind consistency against already stored records
    /// is checked by the backends.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }

        let (required, other) = match self.kind {
            MetricKind::Gauge => (self.value.is_some(), self.delta.is_some()),
            MetricKind::Counter => (self.delta.is_some(), self.value.is_some()),
        };

        if !required {
            return Err(ValidationError::MissingValue {
                id: self.id.clone(),
                kind: self.kind,
            });
        }
        if other {
            return Err(ValidationError::ConflictingValues {
                id: self.id.clone(),
                kind: self.kind,
            });
        }
        if self.value.is_some_and(|value| !value.is_finite()) {
            return Err(ValidationError::NonFiniteValue {
                id: self.id.clone(),
            });
        }

        Ok(())
    }

    /// Validate a record written under an explicit key
    pub fn validate_for_key(&self, key: &str) -> Result<(), ValidationError> {
        if key.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if key != self.id {
            return Err(ValidationError::IdMismatch {
                key: key.to_string(),
                id: self.id.clone(),
            });
        }
        self.validate()
    }

    /// Fold an incoming write into this stored record
    ///
    /// Counters add the incoming delta to the stored total, gauges take the
    /// incoming value. The digest always follows the latest write. Callers
    /// must have checked that both records share the same kind. A counter
    /// total outside the `i64` range is rejected and leaves `self` unchanged.
    pub(crate) fn merge(&mut self, incoming: MetricRecord) -> Result<(), ValidationError> {
        debug_assert_eq!(self.kind, incoming.kind);

        match self.kind {
            MetricKind::Counter => {
                let total = self
                    .delta
                    .unwrap_or(0)
                    .checked_add(incoming.delta.unwrap_or(0))
                    .ok_or_else(|| ValidationError::CounterOverflow {
                        id: self.id.clone(),
                    })?;
                self.delta = Some(total);
            }
            MetricKind::Gauge => self.value = incoming.value,
        }
        self.digest = incoming.digest;
        Ok(())
    }
}
