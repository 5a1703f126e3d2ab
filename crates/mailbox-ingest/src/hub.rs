//! Observer registry and event fan-out.
//!
//! Each observer owns a bounded queue. `broadcast` only ever uses
//! `try_send`, so a slow or dead observer can never stall the ingest path.
//! The observer map stays locked for the whole fan-out: every observer sees
//! the same global order, and once `unregister` returns no further delivery
//! is attempted for that observer.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

use crate::event::TelemetryEvent;

/// Default per-observer queue depth.
pub const DEFAULT_OBSERVER_CAPACITY: usize = 64;

/// What to do when an observer's queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Skip this event for the lagging observer and keep it registered.
    #[default]
    DropNewest,
    /// Treat the lagging observer as disconnected and remove it.
    Disconnect,
}

/// Hub configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Events buffered per observer before the overflow policy applies.
    pub observer_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            observer_capacity: DEFAULT_OBSERVER_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Opaque observer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Observers that received the event.
    pub delivered: usize,
    /// Observers that skipped the event because their queue was full.
    pub dropped: usize,
    /// Observers removed during this broadcast.
    pub disconnected: usize,
}

type ObserverMap = BTreeMap<ObserverId, mpsc::Sender<TelemetryEvent>>;

#[derive(Debug)]
struct Shared {
    observers: Mutex<ObserverMap>,
    next_id: AtomicU64,
    config: HubConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ObserverMap> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: ObserverId) -> bool {
        let mut observers = self.lock();
        let removed = observers.remove(&id).is_some();
        if removed {
            tracing::debug!(observer = %id, observers = observers.len(), "observer unregistered");
        }
        removed
    }
}

/// Fan-out point between the state machine and live observers.
///
/// Cloning the hub yields another handle to the same observer set.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    shared: Arc<Shared>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    pub fn with_config(config: HubConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                observers: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                config,
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.shared.config
    }

    /// Add an observer. It receives only events broadcast after this returns.
    pub fn register(&self) -> Observer {
        let capacity = self.shared.config.observer_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let id = ObserverId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));

        let mut observers = self.shared.lock();
        observers.insert(id, tx);
        tracing::debug!(observer = %id, observers = observers.len(), "observer registered");
        drop(observers);

        Observer {
            id,
            rx,
            hub: Arc::downgrade(&self.shared),
        }
    }

    /// Remove an observer. Returns `false` if it was already gone.
    pub fn unregister(&self, id: ObserverId) -> bool {
        self.shared.remove(id)
    }

    /// Deliver `event` to every registered observer without blocking.
    pub fn broadcast(&self, event: &TelemetryEvent) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut observers = self.shared.lock();

        observers.retain(|id, tx| match tx.try_send(*event) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => match self.shared.config.overflow {
                OverflowPolicy::DropNewest => {
                    report.dropped += 1;
                    tracing::warn!(observer = %id, "observer queue full; dropping event");
                    true
                }
                OverflowPolicy::Disconnect => {
                    report.disconnected += 1;
                    tracing::warn!(observer = %id, "observer queue full; disconnecting");
                    false
                }
            },
            Err(TrySendError::Closed(_)) => {
                report.disconnected += 1;
                tracing::debug!(observer = %id, "observer closed; unregistering");
                false
            }
        });

        report
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.shared.lock().len()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered observer and its event queue.
///
/// Dropping the observer unregisters it.
#[derive(Debug)]
pub struct Observer {
    id: ObserverId,
    rx: mpsc::Receiver<TelemetryEvent>,
    hub: Weak<Shared>,
}

impl Observer {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Wait for the next event. Returns `None` once the observer has been
    /// unregistered (or the hub dropped) and its queue is drained.
    pub async fn recv(&mut self) -> Option<TelemetryEvent> {
        self.rx.recv().await
    }

    /// Blocking variant of [`Observer::recv`] for use outside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<TelemetryEvent> {
        self.rx.blocking_recv()
    }

    pub fn try_recv(&mut self) -> Result<TelemetryEvent, TryRecvError> {
        self.rx.try_recv()
    }

    /// Stop accepting events. The hub drops this observer on its next
    /// broadcast; already queued events can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        if let Some(shared) = self.hub.upgrade() {
            shared.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use mailbox_frame::{MailboxState, TelemetryFrame};

    use super::*;
    use crate::topic::TopicClass;

    fn event(n: u32) -> TelemetryEvent {
        TelemetryEvent::from_frame(
            TopicClass::Status,
            &TelemetryFrame {
                device_ip: Ipv4Addr::new(192, 168, 1, 100),
                timestamp: n,
                distance: 300,
                state: MailboxState::Empty,
                success_rate: 250,
                baseline: 300,
                confidence: 0,
            },
        )
    }

    fn drain(observer: &mut Observer) -> Vec<u32> {
        let mut seen = Vec::new();
        while let Ok(event) = observer.try_recv() {
            seen.push(event.timestamp());
        }
        seen
    }

    #[test]
    fn new_observers_see_only_later_events() {
        let hub = BroadcastHub::new();
        hub.broadcast(&event(1));

        let mut observer = hub.register();
        hub.broadcast(&event(2));

        assert_eq!(drain(&mut observer), vec![2]);
    }

    #[test]
    fn all_observers_see_the_same_order() {
        let hub = BroadcastHub::new();
        let mut a = hub.register();
        let mut b = hub.register();

        for n in 1..=3 {
            let report = hub.broadcast(&event(n));
            assert_eq!(report.delivered, 2);
        }

        assert_eq!(drain(&mut a), vec![1, 2, 3]);
        assert_eq!(drain(&mut b), vec![1, 2, 3]);
    }

    #[test]
    fn failed_observer_is_removed_without_affecting_others() {
        let hub = BroadcastHub::new();
        let mut a = hub.register();
        let mut b = hub.register();

        hub.broadcast(&event(1));
        a.close();

        let report = hub.broadcast(&event(2));
        assert_eq!(
            report,
            BroadcastReport {
                delivered: 1,
                dropped: 0,
                disconnected: 1,
            }
        );
        assert_eq!(hub.observer_count(), 1);

        hub.broadcast(&event(3));
        assert_eq!(drain(&mut b), vec![1, 2, 3]);
        assert_eq!(drain(&mut a), vec![1]);
    }

    #[test]
    fn unregister_is_idempotent_and_stops_delivery() {
        let hub = BroadcastHub::new();
        let mut observer = hub.register();

        assert!(hub.unregister(observer.id()));
        assert!(!hub.unregister(observer.id()));

        let report = hub.broadcast(&event(1));
        assert_eq!(report.delivered, 0);
        assert_eq!(observer.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn dropping_observer_unregisters() {
        let hub = BroadcastHub::new();
        let observer = hub.register();
        let _other = hub.register();
        assert_eq!(hub.observer_count(), 2);

        drop(observer);
        assert_eq!(hub.observer_count(), 1);
    }

    #[test]
    fn full_queue_drops_newest_by_default() {
        let hub = BroadcastHub::with_config(HubConfig {
            observer_capacity: 2,
            ..HubConfig::default()
        });
        let mut slow = hub.register();

        hub.broadcast(&event(1));
        hub.broadcast(&event(2));
        let report = hub.broadcast(&event(3));

        assert_eq!(report.dropped, 1);
        assert_eq!(hub.observer_count(), 1);
        assert_eq!(drain(&mut slow), vec![1, 2]);

        hub.broadcast(&event(4));
        assert_eq!(drain(&mut slow), vec![4]);
    }

    #[test]
    fn full_queue_can_disconnect() {
        let hub = BroadcastHub::with_config(HubConfig {
            observer_capacity: 1,
            overflow: OverflowPolicy::Disconnect,
        });
        let _slow = hub.register();
        let mut fast = hub.register();

        hub.broadcast(&event(1));
        drain(&mut fast);
        let report = hub.broadcast(&event(2));

        assert_eq!(report.disconnected, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(hub.observer_count(), 1);
        assert_eq!(drain(&mut fast), vec![2]);
    }

    #[test]
    fn concurrent_register_and_broadcast() {
        let hub = BroadcastHub::with_config(HubConfig {
            observer_capacity: 1024,
            ..HubConfig::default()
        });
        let mut steady = hub.register();

        let churn = {
            let hub = hub.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let observer = hub.register();
                    hub.unregister(observer.id());
                }
            })
        };

        for n in 0..500 {
            hub.broadcast(&event(n));
        }
        churn.join().unwrap();

        assert_eq!(drain(&mut steady), (0..500).collect::<Vec<_>>());
        assert_eq!(hub.observer_count(), 1);
    }

    #[tokio::test]
    async fn async_observer_receives_until_hub_dropped() {
        let hub = BroadcastHub::new();
        let mut observer = hub.register();

        hub.broadcast(&event(7));
        drop(hub);

        assert_eq!(observer.recv().await.map(|e| e.timestamp()), Some(7));
        assert_eq!(observer.recv().await, None);
    }
}
