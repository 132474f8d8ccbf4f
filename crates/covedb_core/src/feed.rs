//! Change feed for observing committed writes.
//!
//! Each open instance owns one feed, created by the configuration's
//! [`FeedFactory`]. Events are emitted after a write transaction commits
//! and fan out to every subscriber.

use crate::object::ObjectId;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, OnceLock};

/// Kind of a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// An object was created.
    Created,
    /// An object was deleted.
    Deleted,
}

/// A single committed change.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Commit sequence number, monotonic per instance.
    pub sequence: u64,
    /// Object type the change applies to.
    pub type_name: String,
    /// The affected object.
    pub object_id: ObjectId,
    /// Kind of change.
    pub kind: ChangeKind,
}

/// Distributes committed changes to subscribers.
///
/// The feed:
/// - Emits only committed operations
/// - Preserves commit order
/// - Supports multiple subscribers
/// - Is thread-safe
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
}

impl ChangeFeed {
    /// Creates a new change feed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to the feed.
    ///
    /// Returns a receiver that observes all future change events.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits a batch of events from one commit, pruning disconnected
    /// subscribers.
    pub fn publish(&self, events: &[ChangeEvent]) {
        if events.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Strategy for creating the per-instance change feed.
///
/// The factory is part of the configuration and is compared by allocation
/// identity, mirroring how other lifecycle callbacks are handled. Custom
/// factories can wire instances into an application's own reactive layer.
pub trait FeedFactory: Send + Sync {
    /// Builds the feed for a newly opened instance.
    fn create_feed(&self) -> ChangeFeed;
}

/// The default factory: plain channel-backed feeds.
#[derive(Debug, Default)]
pub struct ChannelFeedFactory;

impl FeedFactory for ChannelFeedFactory {
    fn create_feed(&self) -> ChangeFeed {
        ChangeFeed::new()
    }
}

/// Shared default factory allocation.
///
/// One process-wide `Arc` keeps default-built configurations equal to each
/// other under identity comparison.
pub(crate) fn default_feed_factory() -> Arc<dyn FeedFactory> {
    static DEFAULT: OnceLock<Arc<ChannelFeedFactory>> = OnceLock::new();
    DEFAULT.get_or_init(|| Arc::new(ChannelFeedFactory)).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn event(sequence: u64) -> ChangeEvent {
        ChangeEvent {
            sequence,
            type_name: "Person".to_string(),
            object_id: ObjectId::new(),
            kind: ChangeKind::Created,
        }
    }

    #[test]
    fn publish_and_receive() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();

        let sent = event(1);
        feed.publish(std::slice::from_ref(&sent));

        let received = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(received, sent);
    }

    #[test]
    fn multiple_subscribers_see_every_event() {
        let feed = ChangeFeed::new();
        let rx1 = feed.subscribe();
        let rx2 = feed.subscribe();

        feed.publish(&[event(1), event(2)]);

        assert_eq!(rx1.iter().take(2).count(), 2);
        assert_eq!(rx2.iter().take(2).count(), 2);
    }

    #[test]
    fn disconnected_subscribers_pruned() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);

        drop(rx);
        feed.publish(&[event(1)]);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn empty_batch_is_noop() {
        let feed = ChangeFeed::new();
        let _rx = feed.subscribe();
        feed.publish(&[]);
        assert_eq!(feed.subscriber_count(), 1);
    }

    #[test]
    fn default_factory_is_shared() {
        let a = default_feed_factory();
        let b = default_feed_factory();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
