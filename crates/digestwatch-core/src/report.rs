//! Alert sinks.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::estimate::Estimator;
use crate::fmt::format_bytes;
use crate::model::Offender;
use crate::stream::StreamMode;

/// Configuration echoed once when the monitor starts.
#[derive(Debug, Clone, Serialize)]
pub struct StartupSummary {
    pub source: String,
    pub interval: Duration,
    pub fetch_timeout: Duration,
    pub estimator: Estimator,
    pub min_report_bytes: u64,
    pub top_n: usize,
    /// `None` when no stream hub is attached.
    pub stream_mode: Option<StreamMode>,
    pub ring_capacity: usize,
}

/// Receives monitor lifecycle events and alerts.
///
/// `alert` is called once per qualifying delta per interval with a fully
/// populated offender. Reporters decide how alerts are persisted or shown.
pub trait Reporter: Send + Sync + 'static {
    fn startup(&self, summary: &StartupSummary);

    fn alert(&self, offender: &Offender, read_threshold: u64, write_threshold: u64);

    fn shutdown(&self);
}

/// Reporter writing structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn startup(&self, summary: &StartupSummary) {
        info!(
            source = %summary.source,
            interval_ms = summary.interval.as_millis() as u64,
            fetch_timeout_ms = summary.fetch_timeout.as_millis() as u64,
            read_threshold = %format_bytes(summary.estimator.read_threshold),
            write_threshold = %format_bytes(summary.estimator.write_threshold),
            avg_bytes_per_row_examined = summary.estimator.avg_bytes_per_row_examined,
            avg_bytes_per_row_sent = summary.estimator.avg_bytes_per_row_sent,
            min_report_bytes = %format_bytes(summary.min_report_bytes),
            top_n = summary.top_n,
            stream_mode = summary.stream_mode.map_or("off", StreamMode::as_str),
            ring_capacity = summary.ring_capacity,
            "starting monitor"
        );
    }

    fn alert(&self, offender: &Offender, read_threshold: u64, write_threshold: u64) {
        warn!(
            digest = %offender.digest,
            read_threshold = %format_bytes(read_threshold),
            write_threshold = %format_bytes(write_threshold),
            bytes_read = %format_bytes(offender.bytes_read),
            bytes_written = %format_bytes(offender.bytes_written),
            rows_examined = offender.rows_examined,
            rows_sent = offender.rows_sent,
            count = offender.count,
            sample = %offender.text,
            "ALERT: thresholds exceeded"
        );
    }

    fn shutdown(&self) {
        info!("monitor stopped");
    }
}

impl<R: Reporter> Reporter for Arc<R> {
    fn startup(&self, summary: &StartupSummary) {
        (**self).startup(summary)
    }

    fn alert(&self, offender: &Offender, read_threshold: u64, write_threshold: u64) {
        (**self).alert(offender, read_threshold, write_threshold)
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Event {
        Startup(String),
        Alert {
            digest: String,
            read_threshold: u64,
            write_threshold: u64,
        },
        Shutdown,
    }

    /// Reporter remembering every call in order.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingReporter {
        events: Mutex<Vec<Event>>,
        offenders: Mutex<Vec<Offender>>,
    }

    impl RecordingReporter {
        pub(crate) fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }

        pub(crate) fn offenders(&self) -> Vec<Offender> {
            self.offenders.lock().clone()
        }

        pub(crate) fn alerts(&self) -> usize {
            self.offenders.lock().len()
        }
    }

    impl Reporter for RecordingReporter {
        fn startup(&self, summary: &StartupSummary) {
            self.events
                .lock()
                .push(Event::Startup(summary.source.clone()));
        }

        fn alert(&self, offender: &Offender, read_threshold: u64, write_threshold: u64) {
            self.offenders.lock().push(offender.clone());
            self.events.lock().push(Event::Alert {
                digest: offender.digest.clone(),
                read_threshold,
                write_threshold,
            });
        }

        fn shutdown(&self) {
            self.events.lock().push(Event::Shutdown);
        }
    }
}
