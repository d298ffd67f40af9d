//! Subscriber fan-out
//!
//! Each subscriber owns a bounded channel. Writes never block: a closed or
//! full channel counts as a failed write and the subscriber is evicted in
//! the same pass. A keepalive task runs only while at least one subscriber
//! is connected.
//!
//! Staleness is measured on the consuming side. A frame only counts once
//! the subscriber has taken it off its stream, so a transport that stopped
//! reading without closing is evicted after the staleness window even
//! though its buffer still accepts writes.

use crate::SyncEvent;
use chrono::Utc;
use dashmap::DashMap;
use fleetsync_core::{duration_millis, BroadcastError, SubscriberId, SyncConfig, Timestamp};
use futures_util::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// One frame on a subscriber's stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Event(Arc<SyncEvent>),
    /// No-op frame proving the stream is still writable.
    Keepalive,
}

/// When the consuming side last took a frame off its stream, shared
/// between the broadcaster and the subscription.
#[derive(Debug, Clone)]
struct Progress {
    origin: Instant,
    consumed_ms: Arc<AtomicU64>,
}

impl Progress {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            consumed_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    fn mark(&self) {
        self.consumed_ms
            .store(duration_millis(self.origin.elapsed()), Ordering::Relaxed);
    }

    fn last_consumed(&self) -> Instant {
        self.origin + Duration::from_millis(self.consumed_ms.load(Ordering::Relaxed))
    }
}

/// Receiving half handed to a new subscriber.
///
/// Also a [`Stream`] of frames, which is how transports should drain it.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub connected_at: Timestamp,
    rx: mpsc::Receiver<StreamFrame>,
    progress: Progress,
}

impl Subscription {
    /// Next frame, or `None` once the subscriber has been evicted.
    pub async fn recv(&mut self) -> Option<StreamFrame> {
        let frame = self.rx.recv().await;
        self.consumed(frame)
    }

    pub fn try_recv(&mut self) -> Option<StreamFrame> {
        let frame = self.rx.try_recv().ok();
        self.consumed(frame)
    }

    fn consumed(&self, frame: Option<StreamFrame>) -> Option<StreamFrame> {
        if frame.is_some() {
            self.progress.mark();
        }
        frame
    }
}

impl Stream for Subscription {
    type Item = StreamFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamFrame>> {
        let frame = ready!(self.rx.poll_recv(cx));
        Poll::Ready(self.consumed(frame))
    }
}

struct Subscriber {
    tx: mpsc::Sender<StreamFrame>,
    connected_at: Timestamp,
    progress: Progress,
}

impl Subscriber {
    fn write(&self, id: SubscriberId, frame: StreamFrame) -> Result<(), BroadcastError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(BroadcastError::TransportFailure {
                subscriber_id: id,
                reason: "stream closed".to_string(),
            }),
            Err(TrySendError::Full(_)) => Err(BroadcastError::TransportFailure {
                subscriber_id: id,
                reason: "subscriber not draining its stream".to_string(),
            }),
        }
    }
}

/// Point-in-time description of a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberInfo {
    pub id: SubscriberId,
    pub connected_at: Timestamp,
    pub idle: Duration,
}

struct Inner {
    subscribers: DashMap<SubscriberId, Subscriber>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
    buffer: usize,
    keepalive_interval: Duration,
    stale_after: Duration,
}

impl Inner {
    fn keepalive_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        // The slot only holds a task handle; a panic while it was held
        // cannot leave it half-updated.
        self.keepalive
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Write `frame` to every subscriber, evicting each one that fails.
    fn fan_out(&self, frame: &StreamFrame) -> (usize, usize) {
        let (mut delivered, mut evicted) = (0, 0);
        self.subscribers.retain(|id, subscriber| match subscriber.write(*id, frame.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(err) => {
                tracing::debug!(error = %err, "Evicting subscriber");
                evicted += 1;
                false
            }
        });
        (delivered, evicted)
    }

    /// Evict subscribers that have not consumed a frame within the
    /// staleness window, then write a keepalive to the rest.
    fn keepalive_pass(&self, now: Instant) -> usize {
        let stale_after = self.stale_after;
        let mut evicted = 0;
        self.subscribers.retain(|id, subscriber| {
            if now.saturating_duration_since(subscriber.progress.last_consumed()) > stale_after {
                tracing::info!(subscriber_id = %id, "Evicting stale subscriber");
                evicted += 1;
                return false;
            }
            match subscriber.write(*id, StreamFrame::Keepalive) {
                Ok(()) => true,
                Err(err) => {
                    tracing::debug!(error = %err, "Keepalive failed, evicting subscriber");
                    evicted += 1;
                    false
                }
            }
        });
        evicted
    }

    /// Stop the keepalive task if nobody is subscribed. The check runs
    /// under the slot lock, so a concurrent `register` either sees the
    /// slot emptied and spawns a new task, or is seen here. Returns true
    /// when the task was stopped.
    fn stop_keepalive_if_idle(&self) -> bool {
        let mut slot = self.keepalive_slot();
        if !self.subscribers.is_empty() {
            return false;
        }
        if let Some(handle) = slot.take() {
            handle.abort();
            tracing::debug!("Last subscriber left, keepalive stopped");
        }
        true
    }
}

async fn keepalive_loop(inner: Weak<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.keepalive_pass(Instant::now());
        if inner.subscribers.is_empty() && inner.stop_keepalive_if_idle() {
            break;
        }
    }
}

/// Fans events out to any number of long-lived subscribers.
///
/// Cheap to clone; clones share the subscriber set.
#[derive(Clone)]
pub struct EventBroadcaster {
    inner: Arc<Inner>,
}

impl EventBroadcaster {
    pub fn new(buffer: usize, keepalive_interval: Duration, stale_after: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: DashMap::new(),
                keepalive: Mutex::new(None),
                buffer: buffer.max(1),
                keepalive_interval,
                stale_after,
            }),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.subscriber_buffer,
            config.keepalive_interval,
            config.subscriber_stale_after,
        )
    }

    /// Open a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        self.register(None)
    }

    /// Open a new subscriber whose stream starts with `snapshot`, ahead of
    /// any event published afterwards.
    pub fn subscribe_with_snapshot(&self, snapshot: SyncEvent) -> Subscription {
        self.register(Some(snapshot))
    }

    fn register(&self, first: Option<SyncEvent>) -> Subscription {
        let id = SubscriberId::now_v7();
        let connected_at = Utc::now();
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let progress = Progress::new();
        if let Some(event) = first {
            // Fresh channel with capacity >= 1, cannot be full.
            let _ = tx.try_send(StreamFrame::Event(Arc::new(event)));
        }

        self.inner.subscribers.insert(
            id,
            Subscriber {
                tx,
                connected_at,
                progress: progress.clone(),
            },
        );
        tracing::info!(
            subscriber_id = %id,
            subscribers = self.inner.subscribers.len(),
            "Subscriber connected"
        );
        self.ensure_keepalive();

        Subscription {
            id,
            connected_at,
            rx,
            progress,
        }
    }

    fn ensure_keepalive(&self) {
        let mut slot = self.inner.keepalive_slot();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let weak = Arc::downgrade(&self.inner);
                *slot = Some(runtime.spawn(keepalive_loop(weak, self.inner.keepalive_interval)));
                tracing::debug!(
                    interval_ms = duration_millis(self.inner.keepalive_interval),
                    "Keepalive started"
                );
            }
            Err(_) => {
                tracing::warn!("No async runtime, keepalive not started");
            }
        }
    }

    /// Close a subscriber explicitly. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.inner.subscribers.remove(&id).is_some();
        if removed {
            tracing::info!(subscriber_id = %id, "Subscriber disconnected");
            self.inner.stop_keepalive_if_idle();
        }
        removed
    }

    /// Write an event to every live subscriber. Returns how many received it.
    ///
    /// Subscribers whose write fails are evicted during the same pass.
    pub fn publish(&self, event: SyncEvent) -> usize {
        let event_type = event.event_type();
        let (delivered, evicted) = self.inner.fan_out(&StreamFrame::Event(Arc::new(event)));
        tracing::debug!(event_type, delivered, evicted, "Published event");
        if evicted > 0 {
            self.inner.stop_keepalive_if_idle();
        }
        delivered
    }

    /// Run one keepalive pass now. Returns how many subscribers were evicted.
    pub fn keepalive(&self) -> usize {
        let evicted = self.inner.keepalive_pass(Instant::now());
        if evicted > 0 {
            self.inner.stop_keepalive_if_idle();
        }
        evicted
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.inner.subscribers.contains_key(&id)
    }

    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        let now = Instant::now();
        self.inner
            .subscribers
            .iter()
            .map(|entry| SubscriberInfo {
                id: *entry.key(),
                connected_at: entry.connected_at,
                idle: now.saturating_duration_since(entry.progress.last_consumed()),
            })
            .collect()
    }

    /// True while the keepalive task is running.
    pub fn keepalive_running(&self) -> bool {
        self.inner
            .keepalive_slot()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("subscribers", &self.subscriber_count())
            .field("keepalive_interval", &self.inner.keepalive_interval)
            .field("stale_after", &self.inner.stale_after)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use fleetsync_core::{AgentId, LivenessStatus};

    fn heartbeat(agent: &str) -> SyncEvent {
        SyncEvent::AgentHeartbeat {
            agent_id: AgentId::new(agent),
            status: LivenessStatus::Online,
            at: Utc::now(),
        }
    }

    fn broadcaster() -> EventBroadcaster {
        EventBroadcaster::new(8, Duration::from_secs(10), Duration::from_secs(30))
    }

    fn agent_of(frame: Option<StreamFrame>) -> Option<String> {
        match frame {
            Some(StreamFrame::Event(event)) => event.agent_id().map(|a| a.to_string()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_all_live_subscribers() {
        let b = broadcaster();
        let mut one = b.subscribe();
        let mut two = b.subscribe();
        let three = b.subscribe();
        assert!(b.unsubscribe(three.id));

        assert_eq!(b.publish(heartbeat("a")), 2);
        assert_eq!(agent_of(one.try_recv()), Some("a".to_string()));
        assert_eq!(agent_of(two.try_recv()), Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_publish_order_is_preserved_per_subscriber() {
        let b = broadcaster();
        let mut sub = b.subscribe();
        for agent in ["a", "b", "c"] {
            b.publish(heartbeat(agent));
        }
        let order: Vec<_> = (0..3).filter_map(|_| agent_of(sub.try_recv())).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_closed_subscriber_evicted_on_publish() {
        let b = broadcaster();
        let gone = b.subscribe();
        let _live = b.subscribe();
        let gone_id = gone.id;
        drop(gone);

        assert_eq!(b.publish(heartbeat("a")), 1);
        assert!(!b.is_subscribed(gone_id));
        assert_eq!(b.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_full_subscriber_is_evicted() {
        let b = EventBroadcaster::new(2, Duration::from_secs(10), Duration::from_secs(30));
        let _slow = b.subscribe();
        assert_eq!(b.publish(heartbeat("a")), 1);
        assert_eq!(b.publish(heartbeat("b")), 1);
        assert_eq!(b.publish(heartbeat("c")), 0);
        assert_eq!(b.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_precedes_later_events() {
        let b = broadcaster();
        let snapshot = SyncEvent::AgentError {
            agent_id: AgentId::new("snap"),
            message: "baseline".to_string(),
            at: Utc::now(),
        };
        let mut sub = b.subscribe_with_snapshot(snapshot);
        b.publish(heartbeat("later"));

        assert_eq!(agent_of(sub.try_recv()), Some("snap".to_string()));
        assert_eq!(agent_of(sub.try_recv()), Some("later".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_runs_only_while_subscribed() {
        let b = broadcaster();
        assert!(!b.keepalive_running());

        let mut sub = b.subscribe();
        assert!(b.keepalive_running());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(sub.try_recv(), Some(StreamFrame::Keepalive));

        b.unsubscribe(sub.id);
        assert!(!b.keepalive_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_subscriber_is_evicted() {
        let b = broadcaster();
        let sub = b.subscribe();
        let later = Instant::now() + Duration::from_secs(31);

        assert_eq!(b.inner.keepalive_pass(later), 1);
        assert!(!b.is_subscribed(sub.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unread_subscriber_is_evicted_despite_free_buffer() {
        let b = EventBroadcaster::new(256, Duration::from_secs(10), Duration::from_secs(30));
        let sub = b.subscribe();

        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(!b.is_subscribed(sub.id));
        assert!(!b.keepalive_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reading_subscriber_survives_keepalive_passes() {
        let b = EventBroadcaster::new(256, Duration::from_secs(10), Duration::from_secs(30));
        let mut sub = b.subscribe();

        let mut keepalives = 0;
        for _ in 0..24 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            while let Some(frame) = sub.try_recv() {
                if frame == StreamFrame::Keepalive {
                    keepalives += 1;
                }
            }
        }

        assert!(b.is_subscribed(sub.id));
        assert!(keepalives >= 10);
        assert!(b.subscribers()[0].idle <= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_consumption_counts_as_progress() {
        use futures_util::StreamExt;

        let b = broadcaster();
        let mut sub = b.subscribe();
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(sub.next().await, Some(StreamFrame::Keepalive));

        let later = Instant::now() + Duration::from_secs(20);
        assert_eq!(b.inner.keepalive_pass(later), 0);
        assert!(b.is_subscribed(sub.id));
    }

    #[tokio::test]
    async fn test_idle_stop_rechecks_under_lock() {
        let b = broadcaster();
        let first = b.subscribe();
        let _second = b.subscribe();
        assert!(b.keepalive_running());

        assert!(b.unsubscribe(first.id));
        assert!(!b.inner.stop_keepalive_if_idle());
        assert!(b.keepalive_running());

        let empty = broadcaster();
        assert!(empty.inner.stop_keepalive_if_idle());
    }

    #[test]
    fn test_subscribe_without_runtime_still_works() {
        let b = broadcaster();
        let mut sub = b.subscribe();
        assert!(!b.keepalive_running());
        assert_eq!(b.publish(heartbeat("a")), 1);
        assert!(sub.try_recv().is_some());
        assert_eq!(b.keepalive(), 0);
    }
}
