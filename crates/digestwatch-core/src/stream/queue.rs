//! Bounded per-subscriber queue with a non-blocking enqueue contract.
//!
//! [`QueueSender::try_push`] never waits: a full queue rejects the line and
//! reports it, so the drop policy is a return value the caller can count.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::LogLine;

/// Result of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// The line is in the queue.
    Accepted,
    /// The queue was at capacity; the line was dropped.
    Full,
    /// The receiving side is gone; the line was dropped.
    Closed,
}

impl Enqueue {
    #[inline]
    pub fn is_accepted(self) -> bool {
        matches!(self, Enqueue::Accepted)
    }
}

/// Producer half of a bounded queue.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<LogLine>,
}

/// Consumer half of a bounded queue.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<LogLine>,
}

/// Creates a queue holding at most `capacity` lines (at least one).
pub fn bounded(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueSender { tx }, QueueReceiver { rx })
}

impl QueueSender {
    /// Enqueues without waiting.
    #[inline]
    pub fn try_push(&self, line: LogLine) -> Enqueue {
        match self.tx.try_send(line) {
            Ok(()) => Enqueue::Accepted,
            Err(TrySendError::Full(_)) => Enqueue::Full,
            Err(TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }

    /// Lines currently waiting in the queue.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl QueueReceiver {
    /// Waits for the next line; `None` once every sender is gone and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<LogLine> {
        self.rx.recv().await
    }

    /// Takes a line if one is ready.
    pub fn try_recv(&mut self) -> Option<LogLine> {
        self.rx.try_recv().ok()
    }

    /// Stops accepting new lines; queued ones can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
