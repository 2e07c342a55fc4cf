//! Snapshot sources.
//!
//! A source yields the full statement statistics table on demand. The API is
//! blocking; the monitor runs every call on the tokio blocking pool and
//! applies its own deadlines on top.
//!
//! - [`PostgresSource`] reads `pg_stat_statements`.
//! - [`mock::ScriptedSource`] replays canned results for tests.

pub mod mock;
#[cfg(feature = "postgres")]
mod pg;

use std::time::Duration;

use crate::model::Snapshot;

#[cfg(feature = "postgres")]
pub use pg::{PAGE_SIZE, PostgresSource};

/// Error type for snapshot sources.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Connection string could not be parsed.
    #[error("invalid connection string: {0}")]
    Config(String),
    /// Connecting or pinging failed.
    #[error("connection failed: {0}")]
    Connection(String),
    /// Statistics query failed.
    #[error("query failed: {0}")]
    Query(String),
    /// The call did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The blocking call panicked or was cancelled.
    #[error("source task failed: {0}")]
    Task(String),
    /// The source was closed or has nothing more to give.
    #[error("source closed")]
    Closed,
}

/// Producer of full point-in-time digest tables.
pub trait SnapshotSource: Send + 'static {
    /// Checks connectivity, giving up after `timeout`.
    fn ping(&mut self, timeout: Duration) -> Result<(), SourceError>;

    /// Reads the complete digest table.
    fn snapshot(&mut self) -> Result<Snapshot, SourceError>;

    /// Releases the underlying connection.
    fn close(&mut self) -> Result<(), SourceError>;

    /// Short human-readable name for logs.
    fn describe(&self) -> String {
        "snapshot source".to_string()
    }
}

impl<S: SnapshotSource + ?Sized> SnapshotSource for Box<S> {
    fn ping(&mut self, timeout: Duration) -> Result<(), SourceError> {
        (**self).ping(timeout)
    }

    fn snapshot(&mut self) -> Result<Snapshot, SourceError> {
        (**self).snapshot()
    }

    fn close(&mut self) -> Result<(), SourceError> {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
