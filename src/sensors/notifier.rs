//! Weak subscriber registry with type-narrowing dispatch.
//!
//! Every producer owns one [`SubscriberRegistry`]. Consumers are held through
//! `Weak` handles, so subscribing never keeps a consumer alive. A handle whose
//! consumer has been dropped is removed by the next dispatch pass.
//!
//! Dispatch is type-erased: the value and sender travel as `&dyn Any` and each
//! registration narrows them to the static types of its [`Consumer`]. A
//! registration whose types do not match is skipped, which lets one producer
//! serve consumers interested in different payloads.
//!
//! # Locking
//!
//! - Registrations live behind a `RwLock`. `subscribe`, `unsubscribe` and
//!   pruning take the write lock; dispatch takes the read lock only long
//!   enough to snapshot the handles, then releases it before calling out.
//! - Dispatch passes of one registry are serialized by a reentrant mutex. A
//!   second pass from another thread waits for the first to finish. A pass
//!   started from inside a consumer callback on the same thread runs nested.

use super::Consumer;
use super::value_cell::{Value, ValueCell};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Identifier of one registration. Never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Outcome of offering a broadcast to one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Delivered,
    Skipped,
    Released,
}

/// Type-erased view of a registration.
trait ErasedSubscriber: Send + Sync {
    fn accept(&self, value: &dyn Any, sender: &dyn Any) -> Delivery;
    fn is_alive(&self) -> bool;
}

/// Registration of a `Consumer<V, S>` held weakly.
struct TypedSubscriber<C, V, S> {
    consumer: Weak<C>,
    _types: PhantomData<fn(&V, &S)>,
}

impl<C, V, S> ErasedSubscriber for TypedSubscriber<C, V, S>
where
    C: Consumer<V, S>,
    V: Any,
    S: Any,
{
    fn accept(&self, value: &dyn Any, sender: &dyn Any) -> Delivery {
        let Some(consumer) = self.consumer.upgrade() else {
            return Delivery::Released;
        };
        match (value.downcast_ref::<V>(), sender.downcast_ref::<S>()) {
            (Some(value), Some(sender)) => {
                consumer.receive(value, sender);
                Delivery::Delivered
            }
            _ => Delivery::Skipped,
        }
    }

    fn is_alive(&self) -> bool {
        self.consumer.strong_count() > 0
    }
}

struct Registration {
    id: SubscriptionId,
    subscriber: Arc<dyn ErasedSubscriber>,
}

/// Counts from one dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Consumers whose callback ran.
    pub delivered: usize,
    /// Live consumers whose types did not match.
    pub skipped: usize,
    /// Dead handles removed after the pass.
    pub pruned: usize,
}

/// Ordered set of weakly held consumers for one producer.
///
/// # Example
/// ```ignore
/// let registry = SubscriberRegistry::new();
/// let consumer = Arc::new(Printer);
/// registry.subscribe::<Value<f64>, Thermometer, _>(&consumer);
///
/// // Inside the producer:
/// registry.dispatch(&snapshot, self);
/// ```
pub struct SubscriberRegistry {
    registrations: RwLock<Vec<Registration>>,
    dispatching: ReentrantMutex<()>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            dispatching: ReentrantMutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `consumer` for broadcasts narrowing to `(V, S)`.
    ///
    /// Only a weak handle is kept. Subscribing the same consumer twice
    /// creates two registrations, and each receives every broadcast.
    pub fn subscribe<V, S, C>(&self, consumer: &Arc<C>) -> SubscriptionId
    where
        V: Any,
        S: Any,
        C: Consumer<V, S>,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscriber: Arc<dyn ErasedSubscriber> = Arc::new(TypedSubscriber::<C, V, S> {
            consumer: Arc::downgrade(consumer),
            _types: PhantomData,
        });
        self.registrations
            .write()
            .push(Registration { id, subscriber });
        log::trace!("[Registry] {} subscribed", id);
        id
    }

    /// Remove one registration. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registrations = self.registrations.write();
        let before = registrations.len();
        registrations.retain(|registration| registration.id != id);
        before != registrations.len()
    }

    /// Number of registrations, including dead ones not yet pruned.
    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.read().is_empty()
    }

    /// Remove every registration whose consumer has been dropped.
    ///
    /// Returns the number of registrations removed.
    pub fn prune(&self) -> usize {
        let mut registrations = self.registrations.write();
        let before = registrations.len();
        registrations.retain(|registration| registration.subscriber.is_alive());
        before - registrations.len()
    }

    /// Start a serialized dispatch pass.
    ///
    /// Holding the returned guard keeps other threads from dispatching
    /// through this registry, so a producer can mutate its state and
    /// broadcast the result as one ordered step.
    pub fn begin(&self) -> DispatchPass<'_> {
        DispatchPass {
            registry: self,
            _serial: self.dispatching.lock(),
        }
    }

    /// Deliver `value` from `sender` to every live, type-matching consumer.
    pub fn dispatch<V: Any, S: Any>(&self, value: &V, sender: &S) -> DispatchReport {
        self.begin().dispatch(value, sender)
    }

    fn snapshot(&self) -> Vec<(SubscriptionId, Arc<dyn ErasedSubscriber>)> {
        self.registrations
            .read()
            .iter()
            .map(|registration| (registration.id, registration.subscriber.clone()))
            .collect()
    }

    fn remove_released(&self, released: &[SubscriptionId]) -> usize {
        if released.is_empty() {
            return 0;
        }
        let mut registrations = self.registrations.write();
        let before = registrations.len();
        registrations.retain(|registration| !released.contains(&registration.id));
        before - registrations.len()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("registrations", &self.len())
            .finish()
    }
}

/// Exclusive dispatch access to a [`SubscriberRegistry`].
///
/// Obtained from [`SubscriberRegistry::begin`]. Passes are released when the
/// guard is dropped.
pub struct DispatchPass<'a> {
    registry: &'a SubscriberRegistry,
    _serial: ReentrantMutexGuard<'a, ()>,
}

impl DispatchPass<'_> {
    /// Deliver `value` from `sender` to every live, type-matching consumer.
    ///
    /// Consumers subscribed while this call is running are not visited.
    /// Panics raised by a consumer propagate to the caller.
    pub fn dispatch<V: Any, S: Any>(&self, value: &V, sender: &S) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut released = Vec::new();

        for (id, subscriber) in self.registry.snapshot() {
            match subscriber.accept(value, sender) {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Skipped => report.skipped += 1,
                Delivery::Released => released.push(id),
            }
        }

        report.pruned = self.registry.remove_released(&released);
        log::trace!(
            "[Registry] dispatched {}: delivered={} skipped={} pruned={}",
            std::any::type_name::<V>(),
            report.delivered,
            report.skipped,
            report.pruned
        );
        report
    }

    /// Write `data` into `cell` and broadcast the new snapshot from `sender`.
    ///
    /// The write and the broadcast happen inside this pass, so concurrent
    /// updates of one producer reach consumers in the order the cell saw them.
    pub fn update<T, S>(&self, cell: &ValueCell<T>, data: T, sender: &S) -> Value<T>
    where
        T: Clone + Any,
        S: Any,
    {
        let value = cell.update(data);
        self.dispatch(&value, sender);
        value
    }
}
