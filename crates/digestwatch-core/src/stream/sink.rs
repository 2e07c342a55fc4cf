//! Frames a session emits and the writer abstraction it emits them into.
//!
//! Sessions only decide *what* goes out; the wire encoding belongs to the
//! sink (the HTTP layer renders frames as server-sent events).

use std::future::Future;
use std::io;

use super::LogLine;

/// Event name of the first frame of every session.
pub const HELLO_EVENT: &str = "hello";

/// Payload of the hello frame.
pub const HELLO_DATA: &str = r#"{"msg":"connected"}"#;

/// Comment text of a heartbeat frame.
pub const KEEPALIVE_COMMENT: &str = "keepalive";

/// One unit written to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Connection acknowledgement, always first.
    Hello,
    /// Idle heartbeat.
    Keepalive,
    /// A log line.
    Data(LogLine),
}

/// Destination of a streaming session.
///
/// Any error is final: the session treats it as a disconnect.
pub trait EventSink: Send {
    fn write(&mut self, frame: Frame) -> impl Future<Output = io::Result<()>> + Send;

    fn flush(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}
