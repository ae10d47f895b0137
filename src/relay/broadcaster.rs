//! In-process pub/sub fan-out for store mutations.
//!
//! Subscribers are plain callbacks invoked synchronously, in registration
//! order, for every event. A failing subscriber (returned `Err` or panic) is
//! logged and skipped; it never affects delivery to the others or the
//! mutation that triggered the notify.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use anyhow::Result;
use tracing::{error, warn};

use super::models::RelayEvent;

pub type SubscriberFn = dyn Fn(&RelayEvent) -> Result<()> + Send + Sync;

#[derive(Default)]
struct Registry {
    // Ids are handed out monotonically, so key order is registration order.
    subscribers: Mutex<BTreeMap<u64, Arc<SubscriberFn>>>,
    next_id: AtomicU64,
}

impl Registry {
    fn remove(&self, id: u64) {
        match self.subscribers.lock() {
            Ok(mut subs) => {
                subs.remove(&id);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&id);
            }
        }
    }
}

/// Cheaply cloneable handle to a shared subscriber registry.
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    inner: Arc<Registry>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. The returned [`Subscription`] removes exactly this
    /// listener when unsubscribed or dropped.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&RelayEvent) -> Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: Arc<SubscriberFn> = Arc::new(callback);
        match self.inner.subscribers.lock() {
            Ok(mut subs) => {
                subs.insert(id, callback);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(id, callback);
            }
        }
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
            released: AtomicBool::new(false),
        }
    }

    /// Deliver `event` to every subscriber. Returns how many accepted it.
    pub fn notify(&self, event: &RelayEvent) -> usize {
        // Snapshot so callbacks may subscribe/unsubscribe without deadlocking.
        let snapshot: Vec<(u64, Arc<SubscriberFn>)> = match self.inner.subscribers.lock() {
            Ok(subs) => subs.iter().map(|(id, cb)| (*id, Arc::clone(cb))).collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .map(|(id, cb)| (*id, Arc::clone(cb)))
                .collect(),
        };

        let mut delivered = 0;
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(subscriber = id, error = %e, "subscriber rejected event");
                }
                Err(_) => {
                    error!(subscriber = id, "subscriber panicked during notify");
                }
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        match self.inner.subscribers.lock() {
            Ok(subs) => subs.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// Scoped registration handle; unsubscribes on drop.
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
    released: AtomicBool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the listener. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::models::{TransactionStatus, TransactionStatusEvent};
    use chrono::Utc;

    fn status_event(id: &str) -> RelayEvent {
        RelayEvent::Transaction(TransactionStatusEvent {
            transaction_id: id.to_string(),
            status: TransactionStatus::Applied,
            timestamp: Utc::now(),
        })
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> impl Fn(&RelayEvent) -> Result<()> + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |event| {
            let id = event.transaction_id().unwrap_or("-").to_string();
            log.lock().unwrap().push(format!("{}:{}", name, id));
            Ok(())
        }
    }

    #[test]
    fn test_notify_in_registration_order() {
        let broadcaster = EventBroadcaster::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = broadcaster.subscribe(recorder(&log, "a"));
        let _b = broadcaster.subscribe(recorder(&log, "b"));
        let _c = broadcaster.subscribe(recorder(&log, "c"));

        assert_eq!(broadcaster.notify(&status_event("tx-1")), 3);
        assert_eq!(*log.lock().unwrap(), vec!["a:tx-1", "b:tx-1", "c:tx-1"]);
    }

    #[test]
    fn test_failing_subscriber_is_isolated() {
        let broadcaster = EventBroadcaster::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = broadcaster.subscribe(recorder(&log, "a"));
        let _err = broadcaster.subscribe(|_| anyhow::bail!("listener gone"));
        let _panics = broadcaster.subscribe(|_| panic!("listener blew up"));
        let _d = broadcaster.subscribe(recorder(&log, "d"));

        let delivered = broadcaster.notify(&status_event("tx-9"));
        assert_eq!(delivered, 2);
        assert_eq!(*log.lock().unwrap(), vec!["a:tx-9", "d:tx-9"]);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_listener() {
        let broadcaster = EventBroadcaster::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = broadcaster.subscribe(recorder(&log, "a"));
        let _b = broadcaster.subscribe(recorder(&log, "b"));
        assert_eq!(broadcaster.subscriber_count(), 2);

        a.unsubscribe();
        a.unsubscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);

        broadcaster.notify(&status_event("tx-2"));
        assert_eq!(*log.lock().unwrap(), vec!["b:tx-2"]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let broadcaster = EventBroadcaster::new();
        {
            let _sub = broadcaster.subscribe(|_| Ok(()));
            assert_eq!(broadcaster.subscriber_count(), 1);
        }
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe_after_broadcaster_dropped() {
        let broadcaster = EventBroadcaster::new();
        let sub = broadcaster.subscribe(|_| Ok(()));
        drop(broadcaster);
        sub.unsubscribe();
    }

    #[test]
    fn test_notify_without_subscribers() {
        let broadcaster = EventBroadcaster::new();
        assert_eq!(broadcaster.notify(&RelayEvent::Connected), 0);
    }
}
