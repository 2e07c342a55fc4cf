//! Per-client streaming sessions.
//!
//! A session writes the hello frame, then loops until the client goes away:
//! push sessions drain a broadcaster subscription, poll sessions read the
//! ring from a cursor on a fixed period. Both interleave keepalive comments
//! so idle proxies keep the connection open. Every frame is flushed as soon
//! as it is written.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use super::broadcast::Subscription;
use super::ring::LogRing;
use super::sink::{EventSink, Frame};

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(15);
pub const MIN_HEARTBEAT: Duration = Duration::from_millis(100);
pub const MAX_HEARTBEAT: Duration = Duration::from_secs(300);
pub const POLL_PERIOD: Duration = Duration::from_millis(200);

/// Shortest period a session timer is ever armed with.
const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

/// Heartbeat bounds and poll cadence shared by every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub default_heartbeat: Duration,
    pub min_heartbeat: Duration,
    pub max_heartbeat: Duration,
    pub poll_period: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_heartbeat: DEFAULT_HEARTBEAT,
            min_heartbeat: MIN_HEARTBEAT,
            max_heartbeat: MAX_HEARTBEAT,
            poll_period: POLL_PERIOD,
        }
    }
}

impl SessionSettings {
    /// Effective heartbeat for a client request; `None` means the default.
    pub fn heartbeat(&self, requested: Option<Duration>) -> Duration {
        let period = requested.unwrap_or(self.default_heartbeat);
        clamp_heartbeat(period, self.min_heartbeat, self.max_heartbeat)
    }
}

/// Raises `requested` to `min` or lowers it to `max`. Never returns zero,
/// even when both bounds are zero.
pub fn clamp_heartbeat(requested: Duration, min: Duration, max: Duration) -> Duration {
    requested.max(min).min(max).max(MIN_TIMER_PERIOD)
}

/// Why a session returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The disconnect signal fired.
    Disconnected,
    /// Writing or flushing to the client failed.
    WriteFailed,
    /// The subscription was removed from under the session.
    SubscriptionClosed,
}

impl SessionEnd {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionEnd::Disconnected => "disconnected",
            SessionEnd::WriteFailed => "write_failed",
            SessionEnd::SubscriptionClosed => "subscription_closed",
        }
    }
}

/// Runs one client stream to completion.
pub trait StreamSession {
    /// Streams into `sink` until `disconnect` resolves or a write fails.
    fn run<S, D>(self, sink: S, disconnect: D) -> impl Future<Output = SessionEnd> + Send
    where
        S: EventSink,
        D: Future<Output = ()> + Send;
}

async fn send<S: EventSink>(sink: &mut S, frame: Frame) -> bool {
    sink.write(frame).await.is_ok() && sink.flush().await.is_ok()
}

fn heartbeat_timer(period: Duration) -> Interval {
    let period = period.max(MIN_TIMER_PERIOD);
    let mut timer = time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Session fed by a broadcaster subscription.
#[derive(Debug)]
pub struct PushSession {
    subscription: Subscription,
    heartbeat: Duration,
}

impl PushSession {
    pub fn new(subscription: Subscription, heartbeat: Duration) -> Self {
        Self {
            subscription,
            heartbeat,
        }
    }

    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }
}

impl StreamSession for PushSession {
    async fn run<S, D>(self, mut sink: S, disconnect: D) -> SessionEnd
    where
        S: EventSink,
        D: Future<Output = ()> + Send,
    {
        let PushSession {
            mut subscription,
            heartbeat,
        } = self;

        let end = push_loop(&mut subscription, heartbeat, &mut sink, disconnect).await;
        // Dropping the subscription would do the same; keep it explicit.
        subscription.unsubscribe();
        end
    }
}

async fn push_loop<S, D>(
    subscription: &mut Subscription,
    heartbeat: Duration,
    sink: &mut S,
    disconnect: D,
) -> SessionEnd
where
    S: EventSink,
    D: Future<Output = ()> + Send,
{
    if !send(sink, Frame::Hello).await {
        return SessionEnd::WriteFailed;
    }

    let mut keepalive = heartbeat_timer(heartbeat);
    tokio::pin!(disconnect);

    loop {
        tokio::select! {
            biased;
            _ = &mut disconnect => return SessionEnd::Disconnected,
            _ = keepalive.tick() => {
                if !send(sink, Frame::Keepalive).await {
                    return SessionEnd::WriteFailed;
                }
            }
            line = subscription.recv() => match line {
                Some(line) => {
                    if !send(sink, Frame::Data(line)).await {
                        return SessionEnd::WriteFailed;
                    }
                }
                None => return SessionEnd::SubscriptionClosed,
            },
        }
    }
}

/// Session reading the ring buffer on a fixed period.
///
/// The cursor starts at the ring head, so only lines appended after the
/// session opened are delivered.
#[derive(Debug)]
pub struct PollSession {
    ring: Arc<LogRing>,
    cursor: u64,
    heartbeat: Duration,
    poll_period: Duration,
}

impl PollSession {
    pub fn new(ring: Arc<LogRing>, heartbeat: Duration, poll_period: Duration) -> Self {
        let cursor = ring.head();
        Self {
            ring,
            cursor,
            heartbeat,
            poll_period,
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }
}

impl StreamSession for PollSession {
    async fn run<S, D>(mut self, mut sink: S, disconnect: D) -> SessionEnd
    where
        S: EventSink,
        D: Future<Output = ()> + Send,
    {
        if !send(&mut sink, Frame::Hello).await {
            return SessionEnd::WriteFailed;
        }

        let mut keepalive = heartbeat_timer(self.heartbeat);
        let mut poll = time::interval(self.poll_period.max(MIN_TIMER_PERIOD));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(disconnect);

        loop {
            tokio::select! {
                biased;
                _ = &mut disconnect => return SessionEnd::Disconnected,
                _ = keepalive.tick() => {
                    if !send(&mut sink, Frame::Keepalive).await {
                        return SessionEnd::WriteFailed;
                    }
                }
                _ = poll.tick() => {
                    let batch = self.ring.get_from(self.cursor);
                    for line in batch.lines {
                        if !send(&mut sink, Frame::Data(line)).await {
                            return SessionEnd::WriteFailed;
                        }
                    }
                    self.cursor = batch.next;
                }
            }
        }
    }
}

/// The session variant chosen by the process-wide stream mode.
#[derive(Debug)]
pub enum Session {
    Push(PushSession),
    Poll(PollSession),
}

impl Session {
    pub fn heartbeat(&self) -> Duration {
        match self {
            Session::Push(s) => s.heartbeat(),
            Session::Poll(s) => s.heartbeat(),
        }
    }
}

impl StreamSession for Session {
    async fn run<S, D>(self, sink: S, disconnect: D) -> SessionEnd
    where
        S: EventSink,
        D: Future<Output = ()> + Send,
    {
        match self {
            Session::Push(session) => session.run(sink, disconnect).await,
            Session::Poll(session) => session.run(sink, disconnect).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;
    use crate::stream::LogLine;
    use crate::stream::broadcast::Broadcaster;
    use crate::stream::sink::testing::{RecordingSink, data};

    fn disconnect_signal() -> (oneshot::Sender<()>, impl Future<Output = ()> + Send) {
        let (tx, rx) = oneshot::channel::<()>();
        (tx, async move {
            let _ = rx.await;
        })
    }

    #[test]
    fn heartbeat_is_clamped() {
        let settings = SessionSettings::default();
        assert_eq!(settings.heartbeat(None), DEFAULT_HEARTBEAT);
        assert_eq!(
            settings.heartbeat(Some(Duration::from_millis(10))),
            MIN_HEARTBEAT
        );
        assert_eq!(
            settings.heartbeat(Some(Duration::from_secs(3600))),
            MAX_HEARTBEAT
        );
        assert_eq!(
            settings.heartbeat(Some(Duration::from_secs(30))),
            Duration::from_secs(30)
        );
        assert_eq!(settings.heartbeat(Some(Duration::ZERO)), MIN_HEARTBEAT);
    }

    #[test]
    fn zero_bounds_still_yield_a_period() {
        let settings = SessionSettings {
            default_heartbeat: Duration::ZERO,
            min_heartbeat: Duration::ZERO,
            ..SessionSettings::default()
        };
        assert_eq!(settings.heartbeat(Some(Duration::ZERO)), MIN_TIMER_PERIOD);
        assert_eq!(settings.heartbeat(None), MIN_TIMER_PERIOD);
        assert_eq!(
            clamp_heartbeat(Duration::ZERO, Duration::ZERO, Duration::ZERO),
            MIN_TIMER_PERIOD
        );
    }

    #[tokio::test(start_paused = true)]
    async fn zero_heartbeat_session_keeps_running() {
        let bus = Broadcaster::new(8);
        let session = PushSession::new(bus.subscribe(), Duration::ZERO);
        let sink = RecordingSink::default();
        let (stop, disconnect) = disconnect_signal();
        let handle = tokio::spawn(session.run(sink.clone(), disconnect));

        time::sleep(Duration::from_millis(3)).await;
        stop.send(()).unwrap();
        assert_eq!(handle.await.unwrap(), SessionEnd::Disconnected);

        let frames = sink.frames();
        assert_eq!(frames[0], Frame::Hello);
        assert!(frames[1..].iter().all(|f| *f == Frame::Keepalive));
        assert!(frames.len() > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn push_session_streams_until_disconnect() {
        let bus = Broadcaster::new(8);
        let session = PushSession::new(bus.subscribe(), Duration::from_secs(1));
        let sink = RecordingSink::default();
        let (stop, disconnect) = disconnect_signal();

        bus.broadcast(LogLine::from("first"));
        let handle = tokio::spawn(session.run(sink.clone(), disconnect));

        time::sleep(Duration::from_millis(1500)).await;
        stop.send(()).unwrap();
        assert_eq!(handle.await.unwrap(), SessionEnd::Disconnected);

        assert_eq!(
            sink.frames(),
            [Frame::Hello, data("first"), Frame::Keepalive]
        );
        assert_eq!(sink.flushes(), 3);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn push_session_stops_on_write_failure() {
        let bus = Broadcaster::new(8);
        let session = PushSession::new(bus.subscribe(), Duration::from_secs(15));
        let sink = RecordingSink::failing_after(1);
        let (_stop, disconnect) = disconnect_signal();

        bus.broadcast(LogLine::from("boom"));
        let end = session.run(sink.clone(), disconnect).await;

        assert_eq!(end, SessionEnd::WriteFailed);
        assert_eq!(sink.frames(), [Frame::Hello]);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn push_session_ends_when_subscription_removed() {
        let bus = Broadcaster::new(8);
        let subscription = bus.subscribe();
        subscription.unsubscriber().unsubscribe();
        let session = PushSession::new(subscription, Duration::from_secs(15));
        let (_stop, disconnect) = disconnect_signal();

        let end = session.run(RecordingSink::default(), disconnect).await;
        assert_eq!(end, SessionEnd::SubscriptionClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_push_session_releases_subscription() {
        let bus = Broadcaster::new(8);
        let session = PushSession::new(bus.subscribe(), Duration::from_secs(15));
        let (_stop, disconnect) = disconnect_signal();

        let handle = tokio::spawn(session.run(RecordingSink::default(), disconnect));
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bus.subscriber_count(), 1);

        handle.abort();
        let _ = handle.await;
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_session_starts_at_head() {
        let ring = Arc::new(LogRing::new(16));
        ring.append(LogLine::from("history"));

        let session = PollSession::new(ring.clone(), Duration::from_secs(15), POLL_PERIOD);
        assert_eq!(session.cursor(), 1);
        let sink = RecordingSink::default();
        let (stop, disconnect) = disconnect_signal();
        let handle = tokio::spawn(session.run(sink.clone(), disconnect));

        ring.append(LogLine::from("one"));
        ring.append(LogLine::from("two"));
        time::sleep(Duration::from_millis(450)).await;
        ring.append(LogLine::from("three"));
        time::sleep(Duration::from_millis(450)).await;

        stop.send(()).unwrap();
        assert_eq!(handle.await.unwrap(), SessionEnd::Disconnected);
        assert_eq!(
            sink.frames(),
            [Frame::Hello, data("one"), data("two"), data("three")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn poll_session_sends_keepalives_when_idle() {
        let ring = Arc::new(LogRing::new(16));
        let session = PollSession::new(ring, Duration::from_millis(500), POLL_PERIOD);
        let sink = RecordingSink::default();
        let (stop, disconnect) = disconnect_signal();
        let handle = tokio::spawn(session.run(sink.clone(), disconnect));

        time::sleep(Duration::from_millis(1250)).await;
        stop.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(
            sink.frames(),
            [Frame::Hello, Frame::Keepalive, Frame::Keepalive]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn poll_session_stops_on_write_failure() {
        let ring = Arc::new(LogRing::new(16));
        let session = PollSession::new(ring.clone(), Duration::from_secs(15), POLL_PERIOD);
        let sink = RecordingSink::failing_after(1);
        let (_stop, disconnect) = disconnect_signal();
        let handle = tokio::spawn(session.run(sink.clone(), disconnect));

        ring.append(LogLine::from("boom"));
        time::sleep(Duration::from_millis(450)).await;

        assert!(handle.is_finished());
        assert_eq!(handle.await.unwrap(), SessionEnd::WriteFailed);
        assert_eq!(sink.frames(), [Frame::Hello]);
    }

    #[tokio::test(start_paused = true)]
    async fn session_enum_dispatches() {
        let ring = Arc::new(LogRing::new(4));
        let session = Session::Poll(PollSession::new(
            ring,
            Duration::from_secs(2),
            POLL_PERIOD,
        ));
        assert_eq!(session.heartbeat(), Duration::from_secs(2));

        let end = session.run(RecordingSink::default(), async {}).await;
        assert_eq!(end, SessionEnd::Disconnected);
    }
}
