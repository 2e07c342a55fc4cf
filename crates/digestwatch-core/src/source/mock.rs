//! Scripted snapshot source for tests and demos.
//!
//! Results are queued up front (or pushed later through a [`ScriptHandle`])
//! and handed out one per `snapshot()` call. Once the script runs dry every
//! further call returns [`SourceError::Closed`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{SnapshotSource, SourceError};
use crate::model::Snapshot;

#[derive(Default)]
struct Script {
    ping: Option<SourceError>,
    results: VecDeque<Result<Snapshot, SourceError>>,
    delay: Duration,
    pings: usize,
    snapshots: usize,
    closed: bool,
}

/// Snapshot source replaying queued results.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    script: Arc<Mutex<Script>>,
}

/// Observer/controller for a [`ScriptedSource`] that has been moved away.
#[derive(Clone)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful snapshot.
    pub fn then_snapshot(self, snapshot: Snapshot) -> Self {
        self.script.lock().results.push_back(Ok(snapshot));
        self
    }

    /// Queues a failed snapshot.
    pub fn then_error(self, error: SourceError) -> Self {
        self.script.lock().results.push_back(Err(error));
        self
    }

    /// Makes the next ping fail with `error`; later pings succeed.
    pub fn failing_ping(self, error: SourceError) -> Self {
        self.script.lock().ping = Some(error);
        self
    }

    /// Blocks every `snapshot()` call for `delay` before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.script.lock().delay = delay;
        self
    }

    pub fn handle(&self) -> ScriptHandle {
        ScriptHandle {
            script: Arc::clone(&self.script),
        }
    }
}

impl ScriptHandle {
    pub fn push_snapshot(&self, snapshot: Snapshot) {
        self.script.lock().results.push_back(Ok(snapshot));
    }

    pub fn push_error(&self, error: SourceError) {
        self.script.lock().results.push_back(Err(error));
    }

    pub fn set_delay(&self, delay: Duration) {
        self.script.lock().delay = delay;
    }

    pub fn pings(&self) -> usize {
        self.script.lock().pings
    }

    pub fn snapshots(&self) -> usize {
        self.script.lock().snapshots
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().results.len()
    }

    pub fn is_closed(&self) -> bool {
        self.script.lock().closed
    }
}

impl SnapshotSource for ScriptedSource {
    fn ping(&mut self, _timeout: Duration) -> Result<(), SourceError> {
        let mut script = self.script.lock();
        script.pings += 1;
        match script.ping.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn snapshot(&mut self) -> Result<Snapshot, SourceError> {
        let delay = {
            let mut script = self.script.lock();
            script.snapshots += 1;
            script.delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.script
            .lock()
            .results
            .pop_front()
            .unwrap_or(Err(SourceError::Closed))
    }

    fn close(&mut self) -> Result<(), SourceError> {
        self.script.lock().closed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
