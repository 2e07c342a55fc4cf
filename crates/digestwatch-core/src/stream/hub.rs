//! Process-wide handle over the ring buffer and the broadcaster.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::LogLine;
use super::broadcast::{BroadcastOutcome, Broadcaster};
use super::ring::LogRing;
use super::session::{PollSession, PushSession, Session, SessionSettings};

/// How sessions receive lines. Chosen once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Sessions drain a broadcaster subscription.
    #[default]
    Push,
    /// Sessions poll the ring buffer.
    Poll,
}

impl StreamMode {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamMode::Push => "push",
            StreamMode::Poll => "poll",
        }
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "push" => Ok(StreamMode::Push),
            "poll" => Ok(StreamMode::Poll),
            other => Err(format!("unknown stream mode '{other}', expected push or poll")),
        }
    }
}

/// Shared entry point for publishers and streaming sessions.
///
/// Cloning is cheap; every clone refers to the same ring and broadcaster.
#[derive(Debug, Clone)]
pub struct StreamHub {
    ring: Arc<LogRing>,
    broadcaster: Arc<Broadcaster>,
    mode: StreamMode,
    settings: SessionSettings,
}

impl StreamHub {
    pub fn new(
        ring_capacity: usize,
        queue_capacity: usize,
        mode: StreamMode,
        settings: SessionSettings,
    ) -> Self {
        Self::from_parts(
            Arc::new(LogRing::new(ring_capacity)),
            Broadcaster::new(queue_capacity),
            mode,
            settings,
        )
    }

    pub fn from_parts(
        ring: Arc<LogRing>,
        broadcaster: Arc<Broadcaster>,
        mode: StreamMode,
        settings: SessionSettings,
    ) -> Self {
        Self {
            ring,
            broadcaster,
            mode,
            settings,
        }
    }

    /// Records a line in the ring and, in push mode, fans it out.
    ///
    /// Returns the broadcast counts; poll mode never broadcasts.
    pub fn publish(&self, line: LogLine) -> BroadcastOutcome {
        self.ring.append(line.clone());
        match self.mode {
            StreamMode::Push => self.broadcaster.broadcast(line),
            StreamMode::Poll => BroadcastOutcome::default(),
        }
    }

    /// Opens a session of the configured mode with a clamped heartbeat.
    pub fn open_session(&self, requested_heartbeat: Option<Duration>) -> Session {
        let heartbeat = self.settings.heartbeat(requested_heartbeat);
        match self.mode {
            StreamMode::Push => Session::Push(PushSession::new(
                self.broadcaster.subscribe(),
                heartbeat,
            )),
            StreamMode::Poll => Session::Poll(PollSession::new(
                Arc::clone(&self.ring),
                heartbeat,
                self.settings.poll_period,
            )),
        }
    }

    pub fn ring(&self) -> &Arc<LogRing> {
        &self.ring
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }
}
