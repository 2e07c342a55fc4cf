//! Byte estimation and threshold alerting for digest deltas.

use serde::Serialize;

use crate::model::{DigestDelta, Offender};

/// Average-bytes estimators and alert thresholds, all in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Estimator {
    pub avg_bytes_per_row_examined: u64,
    pub avg_bytes_per_row_sent: u64,
    pub read_threshold: u64,
    pub write_threshold: u64,
}

/// Outcome of evaluating one delta.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub offender: Offender,
    pub alert: bool,
}

impl Estimator {
    /// Turn a delta into an offender with estimated byte volumes.
    ///
    /// Products saturate at `u64::MAX` rather than wrapping.
    pub fn estimate(&self, delta: &DigestDelta) -> Offender {
        Offender {
            digest: delta.digest.clone(),
            text: delta.display_text().to_string(),
            bytes_read: delta
                .rows_examined
                .saturating_mul(self.avg_bytes_per_row_examined),
            bytes_written: delta.rows_sent.saturating_mul(self.avg_bytes_per_row_sent),
            rows_examined: delta.rows_examined,
            rows_sent: delta.rows_sent,
            count: delta.count,
        }
    }

    /// Either estimate reaching its own threshold raises an alert.
    pub fn exceeds(&self, offender: &Offender) -> bool {
        offender.bytes_read >= self.read_threshold
            || offender.bytes_written >= self.write_threshold
    }

    pub fn evaluate(&self, delta: &DigestDelta) -> Verdict {
        let offender = self.estimate(delta);
        let alert = self.exceeds(&offender);
        Verdict { offender, alert }
    }
}
