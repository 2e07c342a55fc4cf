//! digestwatch-core: query digest monitoring and live log streaming.
//!
//! Provides:
//! - `source`: snapshot sources (`pg_stat_statements`, scripted mock)
//! - `diff`: per-interval deltas between two snapshots
//! - `estimate`: byte estimation and threshold alerting
//! - `monitor`: the timer-driven fetch/diff/alert loop
//! - `report`: alert sinks
//! - `stream`: ring buffer, broadcaster and streaming sessions
//! - `fmt`, `util`: formatting and parsing helpers
//!
//! With `postgres` feature (default):
//! - `source::PostgresSource`

/// Crate version with the git revision it was built from.
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "+", env!("DIGESTWATCH_GIT_SHA"));

pub mod diff;
pub mod estimate;
pub mod fmt;
pub mod model;
pub mod monitor;
pub mod report;
pub mod source;
pub mod stream;
pub mod util;

pub use model::{DigestDelta, DigestKey, DigestStat, Offender, Snapshot};
pub use monitor::{Monitor, MonitorError, MonitorSettings};
pub use report::{Reporter, StartupSummary, TracingReporter};
pub use source::{SnapshotSource, SourceError};
