//! Value broadcasting for sensor properties.
//!
//! This module provides the producer/consumer contract used to push sensor
//! readings to interested parties:
//!
//! - [`ValueCell`] stores the latest timestamped [`Value`] of one property.
//! - [`SubscriberRegistry`] holds consumers weakly and dispatches broadcasts.
//! - [`Producer`] and [`Consumer`] are the typed surface over the registry.
//! - [`PropertiesProvider`] exposes an object's cells as a type-erased list.

pub mod clock;
pub mod notifier;
pub mod value_cell;

pub use clock::{Clock, ManualClock, SystemClock};
pub use notifier::{DispatchPass, DispatchReport, SubscriberRegistry, SubscriptionId};
pub use value_cell::{AnyValue, Timestamped, Value, ValueCell, newest};

use chrono::{DateTime, Utc};
use std::any::Any;
use std::sync::Arc;

/// Receiver of broadcasts carrying a `V` sent by an `S`.
///
/// A type may implement `Consumer` for several `(V, S)` pairs and subscribe
/// once per pair. Broadcasts whose value or sender is of another type are
/// never delivered.
pub trait Consumer<V, S>: Send + Sync + 'static {
    /// Handle one broadcast.
    fn receive(&self, value: &V, sender: &S);
}

/// Originator of typed broadcasts.
///
/// Implementors only provide their registry; subscription management and
/// notification come from the default methods. Broadcasts sent through
/// [`notify`](Self::notify) carry `Self` as the sender.
pub trait Producer: Any + Send + Sync {
    /// Registry holding this producer's subscribers.
    fn subscribers(&self) -> &SubscriberRegistry;

    /// Subscribe `consumer` to broadcasts of `V` from this producer.
    fn subscribe<V, C>(&self, consumer: &Arc<C>) -> SubscriptionId
    where
        Self: Sized,
        V: Any,
        C: Consumer<V, Self>,
    {
        self.subscribers().subscribe::<V, Self, C>(consumer)
    }

    /// Remove a subscription made through [`subscribe`](Self::subscribe).
    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers().unsubscribe(id)
    }

    /// Write `data` into one of this producer's cells and broadcast the new
    /// snapshot.
    ///
    /// Consumer callbacks have run by the time this returns.
    fn update<T>(&self, cell: &ValueCell<T>, data: T) -> Value<T>
    where
        Self: Sized,
        T: Clone + Any,
    {
        self.subscribers().begin().update(cell, data, self)
    }

    /// Broadcast `value` to every matching subscriber.
    fn notify<V: Any>(&self, value: &V) -> DispatchReport
    where
        Self: Sized,
    {
        self.subscribers().dispatch(value, self)
    }
}

/// Object exposing its properties as a type-erased list.
///
/// The list follows declaration order and never changes order on update.
pub trait PropertiesProvider: Send + Sync {
    /// Latest snapshot of every property, in declaration order.
    fn all_properties(&self) -> Vec<AnyValue>;

    /// Timestamp of the most recent update across all properties.
    fn latest_update(&self) -> Option<DateTime<Utc>> {
        let properties = self.all_properties();
        newest(&properties).map(Timestamped::timestamp)
    }
}
