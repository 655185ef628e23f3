//! Eviction Notification Module
//!
//! Eviction records, the observer trait and the ordered dispatcher.
//!
//! Records are queued while the cache guard is held, so queue order is
//! eviction order. A dedicated delivery thread, started with the first
//! subscription, drains the queue front to back and invokes a snapshot of the
//! observer list taken under a short read lock. Cache callers only push onto
//! the queue; they never run observers.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, warn};

use crate::error::CacheError;

// == Eviction Record ==
/// An entry removed from the cache to make room for a new one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Eviction<K, V> {
    /// Key of the evicted entry
    pub key: K,
    /// Value it held when evicted
    pub value: V,
    /// 1-based position of this eviction in the cache's eviction history
    pub sequence: u64,
    /// When the entry was removed
    pub evicted_at: DateTime<Utc>,
}

impl<K, V> Eviction<K, V> {
    pub fn new(key: K, value: V, sequence: u64) -> Self {
        Self {
            key,
            value,
            sequence,
            evicted_at: Utc::now(),
        }
    }

    pub fn into_pair(self) -> (K, V) {
        (self.key, self.value)
    }
}

// == Observer Trait ==
/// Receives eviction notifications.
///
/// Called without the cache guard held. A panicking observer is contained
/// and logged; it does not affect other observers or the cache.
pub trait EvictionObserver<K, V>: Send + Sync {
    fn on_evict(&self, eviction: &Eviction<K, V>);

    /// Closed observers are dropped from the registry after a dispatch.
    fn is_closed(&self) -> bool {
        false
    }
}

impl<K, V, F> EvictionObserver<K, V> for F
where
    F: Fn(&Eviction<K, V>) + Send + Sync,
{
    fn on_evict(&self, eviction: &Eviction<K, V>) {
        self(eviction)
    }
}

/// Identifies a registered observer for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// == Channel Observer ==
/// Forwards evictions into a tokio unbounded channel.
///
/// `send` on an unbounded channel never blocks, so this hands records off for
/// out-of-band processing.
pub(crate) struct ChannelObserver<K, V> {
    tx: UnboundedSender<Eviction<K, V>>,
}

impl<K, V> ChannelObserver<K, V> {
    pub(crate) fn new(tx: UnboundedSender<Eviction<K, V>>) -> Self {
        Self { tx }
    }
}

impl<K, V> EvictionObserver<K, V> for ChannelObserver<K, V>
where
    K: Clone + Send,
    V: Clone + Send,
{
    fn on_evict(&self, eviction: &Eviction<K, V>) {
        if self.tx.send(eviction.clone()).is_err() {
            warn!(
                sequence = eviction.sequence,
                "Eviction channel receiver dropped, record discarded"
            );
        }
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

type Registered<K, V> = (SubscriptionId, Arc<dyn EvictionObserver<K, V>>);

// == Delivery Thread ==
/// Queue plus delivery progress, guarded together.
struct QueueState<K, V> {
    pending: VecDeque<Eviction<K, V>>,
    enqueued: u64,
    delivered: u64,
    /// Set once the delivery thread is running
    worker: Option<ThreadId>,
    shutdown: bool,
}

/// State shared between the cache and its delivery thread.
struct Shared<K, V> {
    observers: RwLock<Vec<Registered<K, V>>>,
    state: Mutex<QueueState<K, V>>,
    /// Signalled when a record is queued or on shutdown
    ready: Condvar,
    /// Signalled after each delivery
    drained: Condvar,
    faults: AtomicU64,
}

impl<K, V> Shared<K, V> {
    /// Delivery loop. Exits once shut down and the queue is empty.
    fn run(&self) {
        loop {
            let eviction = {
                let mut state = self.state.lock();
                loop {
                    if let Some(eviction) = state.pending.pop_front() {
                        break eviction;
                    }
                    if state.shutdown {
                        return;
                    }
                    self.ready.wait(&mut state);
                }
            };

            self.deliver(&eviction);

            self.state.lock().delivered += 1;
            self.drained.notify_all();
        }
    }

    fn deliver(&self, eviction: &Eviction<K, V>) {
        let observers: Vec<Registered<K, V>> = self.observers.read().clone();

        let mut saw_closed = false;
        for (id, observer) in &observers {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| observer.on_evict(eviction)));
            if let Err(payload) = delivered {
                let err = CacheError::from_panic(payload);
                self.faults.fetch_add(1, Ordering::Relaxed);
                error!(subscription = %id, sequence = eviction.sequence, error = %err, "Eviction observer failed");
            }
            saw_closed |= observer.is_closed();
        }

        if saw_closed {
            self.observers.write().retain(|(id, observer)| {
                let closed = observer.is_closed();
                if closed {
                    debug!(subscription = %id, "Dropping closed eviction observer");
                }
                !closed
            });
        }
    }
}

// == Dispatcher ==
/// Owns the observer list, the pending-notification queue and the delivery
/// thread.
///
/// Dropping the dispatcher lets the thread finish the queued records and exit;
/// it is not joined.
pub(crate) struct EvictionDispatcher<K, V> {
    shared: Arc<Shared<K, V>>,
    next_id: AtomicU64,
}

impl<K, V> EvictionDispatcher<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                observers: RwLock::new(Vec::new()),
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    enqueued: 0,
                    delivered: 0,
                    worker: None,
                    shutdown: false,
                }),
                ready: Condvar::new(),
                drained: Condvar::new(),
                faults: AtomicU64::new(0),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn subscribe(&self, observer: Arc<dyn EvictionObserver<K, V>>) -> SubscriptionId
    where
        K: Send + 'static,
        V: Send + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared.observers.write().push((id, observer));
        debug!(subscription = %id, "Eviction observer registered");
        self.ensure_worker();
        id
    }

    fn ensure_worker(&self)
    where
        K: Send + 'static,
        V: Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if state.worker.is_some() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("eviction-delivery".to_string())
            .spawn(move || shared.run());
        match spawned {
            Ok(handle) => {
                state.worker = Some(handle.thread().id());
                debug!("Eviction delivery thread started");
            }
            Err(err) => {
                error!(error = %err, "Failed to start eviction delivery thread");
            }
        }
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.shared.observers.write();
        let before = observers.len();
        observers.retain(|(registered, _)| *registered != id);
        let removed = observers.len() != before;
        if removed {
            debug!(subscription = %id, "Eviction observer removed");
        }
        removed
    }

    pub(crate) fn observer_count(&self) -> usize {
        self.shared.observers.read().len()
    }

    /// Number of observer panics contained so far.
    pub(crate) fn faults(&self) -> u64 {
        self.shared.faults.load(Ordering::Relaxed)
    }

    /// Records queued but not yet delivered.
    pub(crate) fn pending(&self) -> usize {
        let state = self.shared.state.lock();
        (state.enqueued - state.delivered) as usize
    }

    /// Queues a record. Called while the cache guard is held; never blocks on
    /// observers.
    ///
    /// Records are dropped while no delivery thread exists, since nobody has
    /// subscribed yet.
    pub(crate) fn enqueue(&self, eviction: Eviction<K, V>) {
        let mut state = self.shared.state.lock();
        if state.worker.is_none() {
            return;
        }
        state.pending.push_back(eviction);
        state.enqueued += 1;
        drop(state);
        self.shared.ready.notify_one();
    }

    /// Blocks until every record queued before this call has been delivered.
    ///
    /// Returns at once when called from an observer, which runs on the
    /// delivery thread itself.
    pub(crate) fn flush(&self) {
        let mut state = self.shared.state.lock();
        if state.worker == Some(thread::current().id()) {
            return;
        }
        let target = state.enqueued;
        while state.delivered < target {
            self.shared.drained.wait(&mut state);
        }
    }
}

impl<K, V> Drop for EvictionDispatcher<K, V> {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.ready.notify_all();
    }
}
