//! Live distribution of log lines: replay ring, broadcaster and the
//! per-client sessions built on top of them.

pub mod broadcast;
pub mod hub;
pub mod queue;
pub mod ring;
pub mod session;
pub mod sink;
pub mod tee;

use std::sync::Arc;

/// One emitted log line, shared between the ring and every subscriber.
pub type LogLine = Arc<str>;

pub use broadcast::{BroadcastOutcome, Broadcaster, Subscription, Unsubscriber};
pub use hub::{StreamHub, StreamMode};
pub use ring::{LogRing, ReplayBatch};
pub use session::{
    PollSession, PushSession, Session, SessionEnd, SessionSettings, StreamSession,
    clamp_heartbeat,
};
pub use sink::{EventSink, Frame};
pub use tee::LogTee;
