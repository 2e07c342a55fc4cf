//! Timer-driven monitor loop: fetch, diff, estimate, alert.
//!
//! The source API is blocking, so every call runs on the blocking pool under
//! its own deadline. A call that misses the deadline is abandoned, not
//! cancelled: it keeps the source locked until it returns, and the next tick
//! waits for it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::diff::diff_snapshots;
use crate::estimate::Estimator;
use crate::fmt::format_bytes;
use crate::model::{Offender, Snapshot};
use crate::report::{Reporter, StartupSummary};
use crate::source::{SnapshotSource, SourceError};
use crate::stream::StreamMode;

/// The last successfully fetched snapshot. Only the monitor writes it.
pub type SharedSnapshot = Arc<Mutex<Snapshot>>;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("initial ping failed: {0}")]
    Ping(SourceError),
    #[error("initial snapshot failed: {0}")]
    InitialSnapshot(SourceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub interval: Duration,
    /// Deadline for one periodic snapshot fetch.
    pub fetch_timeout: Duration,
    /// Deadline for the startup connectivity check.
    pub ping_timeout: Duration,
    pub estimator: Estimator,
    /// Non-alerting offenders below this size are not reported.
    pub min_report_bytes: u64,
    /// How many non-alerting offenders to report per interval.
    pub top_n: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(10),
            estimator: Estimator {
                avg_bytes_per_row_examined: 200,
                avg_bytes_per_row_sent: 200,
                read_threshold: MIB,
                write_threshold: MIB,
            },
            min_report_bytes: MIB,
            top_n: 5,
        }
    }
}

/// Per-interval counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub digests_changed: usize,
    pub alerts: usize,
    /// Non-alerting offenders logged as activity.
    pub reported: usize,
}

pub struct Monitor<S, R> {
    source: Arc<Mutex<S>>,
    reporter: R,
    settings: MonitorSettings,
    previous: SharedSnapshot,
    stream: Option<(StreamMode, usize)>,
}

impl<S: SnapshotSource, R: Reporter> Monitor<S, R> {
    pub fn new(source: S, reporter: R, settings: MonitorSettings) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            reporter,
            settings,
            previous: Arc::new(Mutex::new(Snapshot::new())),
            stream: None,
        }
    }

    /// Records the stream configuration for the startup summary.
    pub fn with_stream(mut self, mode: StreamMode, ring_capacity: usize) -> Self {
        self.stream = Some((mode, ring_capacity));
        self
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn previous_snapshot(&self) -> SharedSnapshot {
        Arc::clone(&self.previous)
    }

    pub fn startup_summary(&self) -> StartupSummary {
        StartupSummary {
            source: self.source.lock().describe(),
            interval: self.settings.interval,
            fetch_timeout: self.settings.fetch_timeout,
            estimator: self.settings.estimator,
            min_report_bytes: self.settings.min_report_bytes,
            top_n: self.settings.top_n,
            stream_mode: self.stream.map(|(mode, _)| mode),
            ring_capacity: self.stream.map_or(0, |(_, capacity)| capacity),
        }
    }

    /// Runs until `shutdown` resolves. Startup failures are returned; every
    /// later failure is logged and skipped.
    ///
    /// `shutdown` is only observed between ticks.
    pub async fn run<F>(self, shutdown: F) -> Result<(), MonitorError>
    where
        F: Future<Output = ()>,
    {
        self.reporter.startup(&self.startup_summary());

        let result = match self.start().await {
            Ok(()) => {
                self.tick_loop(shutdown).await;
                Ok(())
            }
            Err(e) => Err(e),
        };

        if let Err(e) = self.call(self.settings.ping_timeout, |s| s.close()).await {
            warn!(error = %e, "failed to close snapshot source");
        }
        self.reporter.shutdown();
        result
    }

    /// Startup check followed by the baseline snapshot.
    async fn start(&self) -> Result<(), MonitorError> {
        let ping_timeout = self.settings.ping_timeout;
        self.call(ping_timeout, move |s| s.ping(ping_timeout))
            .await
            .map_err(MonitorError::Ping)?;

        let started = Instant::now();
        let initial = self
            .call(self.settings.fetch_timeout, |s| s.snapshot())
            .await
            .map_err(MonitorError::InitialSnapshot)?;
        let digests = initial.len();
        *self.previous.lock() = initial;

        info!(
            digests,
            duration_ms = started.elapsed().as_millis() as u64,
            "initial snapshot loaded"
        );
        Ok(())
    }

    async fn tick_loop<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let interval = self.settings.interval;
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        // Ticks that fire during a slow tick queue up and run back to back.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping monitor");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let started = Instant::now();
            match self.tick().await {
                Ok(stats) => {
                    info!(
                        digests_changed = stats.digests_changed,
                        alerts = stats.alerts,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "interval processed"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "snapshot failed, interval skipped");
                }
            }

            let elapsed = started.elapsed();
            if elapsed > interval {
                warn!(
                    duration_ms = elapsed.as_millis() as u64,
                    interval_ms = interval.as_millis() as u64,
                    "tick took longer than the interval"
                );
            }
        }
    }

    /// One interval. On error the previous snapshot is kept, so the next
    /// successful delta spans the gap.
    async fn tick(&self) -> Result<TickStats, SourceError> {
        let current = self
            .call(self.settings.fetch_timeout, |s| s.snapshot())
            .await?;

        let deltas = {
            let previous = self.previous.lock();
            diff_snapshots(&previous, &current)
        };
        *self.previous.lock() = current;

        let estimator = self.settings.estimator;
        let mut ordered: Vec<_> = deltas.iter().collect();
        ordered.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));

        let mut stats = TickStats {
            digests_changed: deltas.len(),
            ..TickStats::default()
        };
        let mut active: Vec<Offender> = Vec::new();

        for (_, delta) in ordered {
            let verdict = estimator.evaluate(delta);
            if verdict.alert {
                self.reporter.alert(
                    &verdict.offender,
                    estimator.read_threshold,
                    estimator.write_threshold,
                );
                stats.alerts += 1;
            } else if verdict.offender.max_bytes() >= self.settings.min_report_bytes {
                active.push(verdict.offender);
            }
        }

        active.sort_by(|a, b| b.max_bytes().cmp(&a.max_bytes()));
        for offender in active.iter().take(self.settings.top_n) {
            debug!(
                digest = %offender.digest,
                bytes_read = %format_bytes(offender.bytes_read),
                bytes_written = %format_bytes(offender.bytes_written),
                rows_examined = offender.rows_examined,
                rows_sent = offender.rows_sent,
                count = offender.count,
                sample = %offender.text,
                "digest activity"
            );
            stats.reported += 1;
        }

        Ok(stats)
    }

    /// Runs a blocking source call with a deadline.
    async fn call<T, F>(&self, timeout: Duration, f: F) -> Result<T, SourceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> Result<T, SourceError> + Send + 'static,
    {
        let source = Arc::clone(&self.source);
        let task = tokio::task::spawn_blocking(move || f(&mut *source.lock()));
        match time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(SourceError::Task(e.to_string())),
            Err(_) => Err(SourceError::Timeout(timeout)),
        }
    }
}
