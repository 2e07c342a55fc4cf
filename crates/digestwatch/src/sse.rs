//! Server-sent event rendering of session frames.

use std::convert::Infallible;
use std::future::Future;
use std::io;

use axum::response::sse::Event;
use tokio::sync::mpsc;

use digestwatch_core::stream::sink::{HELLO_DATA, HELLO_EVENT, KEEPALIVE_COMMENT};
use digestwatch_core::stream::{EventSink, Frame};

/// Renders a frame as an SSE event.
///
/// Multi-line data becomes several `data:` fields; carriage returns are
/// dropped since the event encoder rejects them.
pub(crate) fn to_event(frame: &Frame) -> Event {
    match frame {
        Frame::Hello => Event::default().event(HELLO_EVENT).data(HELLO_DATA),
        Frame::Keepalive => Event::default().comment(KEEPALIVE_COMMENT),
        Frame::Data(line) if line.contains('\r') => Event::default().data(line.replace('\r', "")),
        Frame::Data(line) => Event::default().data(&**line),
    }
}

/// Sink feeding a bounded channel of events.
///
/// Writes accumulate locally; `flush` hands them to the channel. A dropped
/// receiver is reported as `BrokenPipe`.
pub(crate) struct ChannelSink {
    tx: mpsc::Sender<Event>,
    pending: Vec<Event>,
}

/// Creates a sink and the receiver of its flushed events.
pub(crate) fn channel(capacity: usize) -> (ChannelSink, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChannelSink {
            tx,
            pending: Vec::new(),
        },
        rx,
    )
}

impl ChannelSink {
    /// Resolves once the receiving side is gone.
    pub(crate) fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let tx = self.tx.clone();
        async move { tx.closed().await }
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "stream receiver closed")
}

impl EventSink for ChannelSink {
    async fn write(&mut self, frame: Frame) -> io::Result<()> {
        if self.tx.is_closed() {
            return Err(broken_pipe());
        }
        self.pending.push(to_event(&frame));
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        for event in self.pending.drain(..) {
            self.tx.send(event).await.map_err(|_| broken_pipe())?;
        }
        Ok(())
    }
}

/// Event stream over what a session flushes. Dropping it (client gone)
/// closes the channel, which ends the session.
pub(crate) fn events(
    mut rx: mpsc::Receiver<Event>,
) -> impl futures_core::Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok(event);
        }
    }
}
