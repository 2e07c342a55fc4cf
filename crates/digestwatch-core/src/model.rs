//! Data model shared by the snapshot source, the differ and the estimator.
//!
//! A [`Snapshot`] is the full digest table at one instant. Two snapshots are
//! reduced to [`DigestDelta`]s by [`crate::diff`], and each delta is turned
//! into an [`Offender`] by [`crate::estimate`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique key of one row of the statement statistics table.
///
/// Opaque to everything except the source that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DigestKey(String);

impl DigestKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DigestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DigestKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Cumulative counters for one normalized query shape.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestStat {
    /// Digest identifier of the normalized statement.
    pub digest: String,

    /// Normalized statement text (literals replaced by placeholders).
    pub text: String,

    /// Literal statement sample, when the source captures one.
    #[serde(default)]
    pub sample: Option<String>,

    /// Cumulative number of executions.
    pub count: u64,

    /// Cumulative rows examined.
    pub rows_examined: u64,

    /// Cumulative rows sent to clients.
    pub rows_sent: u64,

    /// Cumulative rows affected by writes.
    pub rows_affected: u64,
}

/// Full point-in-time digest table.
pub type Snapshot = HashMap<DigestKey, DigestStat>;

/// Non-negative per-interval change of one digest's counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DigestDelta {
    pub digest: String,
    pub text: String,
    pub sample: Option<String>,
    pub count: u64,
    pub rows_examined: u64,
    pub rows_sent: u64,
    pub rows_affected: u64,
}

impl DigestDelta {
    /// Sample text when captured, normalized text otherwise.
    pub fn display_text(&self) -> &str {
        match self.sample.as_deref() {
            Some(sample) if !sample.is_empty() => sample,
            _ => &self.text,
        }
    }
}

/// A delta enriched with estimated byte volumes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Offender {
    pub digest: String,
    /// Full, untruncated display text.
    pub text: String,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub rows_examined: u64,
    pub rows_sent: u64,
    pub count: u64,
}

impl Offender {
    /// Larger of the two estimates; used for ranking.
    pub fn max_bytes(&self) -> u64 {
        self.bytes_read.max(self.bytes_written)
    }
}
