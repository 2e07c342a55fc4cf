//! Pub/sub fan-out of log lines to live subscribers.
//!
//! Each subscriber owns a bounded queue. [`Broadcaster::broadcast`] offers the
//! line to every queue without waiting; a full queue drops the line for that
//! subscriber only. Delivery is at most once and best effort; clients that
//! need catch-up read the ring buffer instead.
//!
//! The registry lock is held only for map updates and non-blocking enqueues,
//! so a broadcast costs O(subscribers) regardless of how fast they read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::LogLine;
use super::queue::{Enqueue, QueueReceiver, QueueSender, bounded};

/// Per-call delivery counts returned by [`Broadcaster::broadcast`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    /// Subscribers whose queue was full.
    pub dropped: usize,
}

#[derive(Debug, Default)]
struct Registry {
    subscribers: HashMap<u64, QueueSender>,
    next_id: u64,
}

/// Registry of live subscriptions.
#[derive(Debug)]
pub struct Broadcaster {
    queue_capacity: usize,
    registry: Mutex<Registry>,
}

impl Broadcaster {
    /// Creates a broadcaster whose subscriber queues hold `queue_capacity` lines.
    pub fn new(queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            queue_capacity: queue_capacity.max(1),
            registry: Mutex::new(Registry::default()),
        })
    }

    /// Registers a new subscriber with an empty bounded queue.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = bounded(self.queue_capacity);
        let id = {
            let mut registry = self.registry.lock();
            registry.next_id += 1;
            let id = registry.next_id;
            registry.subscribers.insert(id, tx);
            id
        };

        Subscription {
            rx,
            unsubscriber: Unsubscriber {
                id,
                broadcaster: Arc::downgrade(self),
                done: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    /// Offers `line` to every registered queue without blocking.
    pub fn broadcast(&self, line: LogLine) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();
        let mut registry = self.registry.lock();
        let mut gone = Vec::new();

        for (&id, tx) in &registry.subscribers {
            match tx.try_push(line.clone()) {
                Enqueue::Accepted => outcome.delivered += 1,
                Enqueue::Full => outcome.dropped += 1,
                Enqueue::Closed => gone.push(id),
            }
        }
        // Receivers dropped without unsubscribing.
        for id in gone {
            registry.subscribers.remove(&id);
        }

        outcome
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().subscribers.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    fn remove(&self, id: u64) -> bool {
        // The sender is dropped after the lock is released; that closes the queue.
        let removed = self.registry.lock().subscribers.remove(&id);
        removed.is_some()
    }
}

/// Idempotent handle removing one subscription from its broadcaster.
///
/// Cheap to clone; any clone may be called any number of times, from any
/// thread, concurrently with broadcasts.
#[derive(Debug, Clone)]
pub struct Unsubscriber {
    id: u64,
    broadcaster: Weak<Broadcaster>,
    done: Arc<AtomicBool>,
}

impl Unsubscriber {
    /// Removes the subscription. Returns `true` only for the call that
    /// actually removed it.
    pub fn unsubscribe(&self) -> bool {
        if self.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        match self.broadcaster.upgrade() {
            Some(broadcaster) => broadcaster.remove(self.id),
            None => false,
        }
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A live subscription: the queue to read from plus its unsubscriber.
///
/// Dropping the subscription unsubscribes it.
#[derive(Debug)]
pub struct Subscription {
    rx: QueueReceiver,
    unsubscriber: Unsubscriber,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.unsubscriber.id
    }

    /// Next line; `None` once the subscription has been removed and drained.
    pub async fn recv(&mut self) -> Option<LogLine> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LogLine> {
        self.rx.try_recv()
    }

    pub fn unsubscriber(&self) -> Unsubscriber {
        self.unsubscriber.clone()
    }

    pub fn unsubscribe(&self) -> bool {
        self.unsubscriber.unsubscribe()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscriber.unsubscribe();
    }
}
