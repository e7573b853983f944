//! Timestamped value storage for sensor properties.
//!
//! A [`ValueCell`] holds the latest [`Value`] of one property. Cells are
//! plain storage: the provider that owns a cell is responsible for
//! dispatching each new snapshot to its subscribers.

use super::clock::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

/// Anything that carries the time it was last updated.
pub trait Timestamped {
    /// Time of the update that produced this value.
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Immutable snapshot of a property: its data and when it was set.
#[derive(Debug, Clone, PartialEq)]
pub struct Value<T> {
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

impl<T> Value<T> {
    pub fn new(data: T, timestamp: DateTime<Utc>) -> Self {
        Self { data, timestamp }
    }
}

impl<T> Timestamped for Value<T> {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Type-erased [`Value`] for heterogeneous property lists.
#[derive(Clone)]
pub struct AnyValue {
    data: Arc<dyn Any + Send + Sync>,
    timestamp: DateTime<Utc>,
    type_name: &'static str,
}

impl AnyValue {
    /// Borrow the data if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    /// Rebuild the typed snapshot if the data is a `T`.
    pub fn to_value<T: Any + Clone>(&self) -> Option<Value<T>> {
        self.downcast_ref::<T>()
            .map(|data| Value::new(data.clone(), self.timestamp))
    }

    /// Name of the erased data type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl Timestamped for AnyValue {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyValue")
            .field("type", &self.type_name)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl<T: Any + Send + Sync> From<Value<T>> for AnyValue {
    fn from(value: Value<T>) -> Self {
        Self {
            data: Arc::new(value.data),
            timestamp: value.timestamp,
            type_name: type_name::<T>(),
        }
    }
}

/// Pick the most recently updated value.
///
/// Returns the value with the greatest timestamp. When several share it, the
/// first one in iteration order wins. Returns `None` for an empty input.
pub fn newest<'a, V, I>(values: I) -> Option<&'a V>
where
    V: Timestamped + 'a,
    I: IntoIterator<Item = &'a V>,
{
    values.into_iter().fold(None, |best, candidate| match best {
        Some(best) if best.timestamp() >= candidate.timestamp() => Some(best),
        _ => Some(candidate),
    })
}

/// Thread-safe cell holding the latest value of one property.
///
/// Every [`update`](Self::update) stamps a fresh timestamp, even when the new
/// data equals the old data. Callers that want deduplication compare first.
///
/// # Example
/// ```ignore
/// let cell = ValueCell::new(5);
/// let snapshot = cell.update(7);
/// assert_eq!(cell.current().data, 7);
/// ```
pub struct ValueCell<T> {
    current: RwLock<Value<T>>,
    clock: Arc<dyn Clock>,
}

impl<T: Clone> ValueCell<T> {
    /// Create a cell stamped with the system clock.
    pub fn new(initial: T) -> Self {
        Self::with_clock(initial, Arc::new(SystemClock))
    }

    /// Create a cell that reads time from `clock`.
    ///
    /// The initial value is stamped with the clock's current time.
    pub fn with_clock(initial: T, clock: Arc<dyn Clock>) -> Self {
        let timestamp = clock.now();
        Self {
            current: RwLock::new(Value::new(initial, timestamp)),
            clock,
        }
    }

    /// Replace the data and return the new snapshot.
    pub fn update(&self, data: T) -> Value<T> {
        let value = Value::new(data, self.clock.now());
        *self.current.write() = value.clone();
        value
    }

    /// Get the latest snapshot.
    pub fn current(&self) -> Value<T> {
        self.current.read().clone()
    }

    /// Get the latest data without its timestamp.
    pub fn get(&self) -> T {
        self.current.read().data.clone()
    }
}

impl<T: Clone + Any + Send + Sync> ValueCell<T> {
    /// Latest snapshot in type-erased form.
    pub fn erased(&self) -> AnyValue {
        self.current().into()
    }
}

impl<T: fmt::Debug> fmt::Debug for ValueCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCell")
            .field("current", &*self.current.read())
            .finish()
    }
}
