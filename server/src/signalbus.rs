use std::collections::HashMap;
use std::sync::{Arc, Weak};

use futures::FutureExt as _;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Named-topic wake-ups for watch streams.
///
/// The bus is purely advisory: notifications are edges that coalesce while
/// nobody is waiting, and the revision-cursor fetch stays the source of
/// truth. Subscribe before the first fetch, otherwise a commit can slip
/// between "last fetched" and "next notify".
#[derive(Default)]
pub struct SignalBus {
    topics: Mutex<HashMap<String, Vec<Weak<Notify>>>>,
}

impl SignalBus {
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let notify = Arc::new(Notify::new());

        self.topics
            .lock()
            .entry(topic.to_owned())
            .or_default()
            .push(Arc::downgrade(&notify));

        Subscription {
            notify: Some(notify),
        }
    }

    /// Wakes every live subscription on `topic`. Never blocks.
    pub fn notify(&self, topic: &str) {
        let mut topics = self.topics.lock();

        let Some(subscriptions) = topics.get_mut(topic) else {
            return;
        };

        subscriptions.retain(|weak| match weak.upgrade() {
            Some(notify) => {
                notify.notify_one();
                true
            }
            None => false,
        });

        if subscriptions.is_empty() {
            topics.remove(topic);
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map(|subs| subs.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

/// One edge-triggered signal channel with capacity 1.
///
/// Multiple notifications while no reader is waiting coalesce into a single
/// pending signal.
pub struct Subscription {
    notify: Option<Arc<Notify>>,
}

impl Subscription {
    /// Waits for the next signal. Never resolves on a closed subscription.
    pub async fn signalled(&self) {
        match &self.notify {
            Some(notify) => notify.notified().await,
            None => std::future::pending().await,
        }
    }

    /// Consumes a pending signal without waiting.
    pub fn try_signalled(&self) -> bool {
        match &self.notify {
            Some(notify) => notify.notified().now_or_never().is_some(),
            None => false,
        }
    }

    /// Detaches from the bus. Idempotent.
    pub fn close(&mut self) {
        self.notify = None;
    }
}
