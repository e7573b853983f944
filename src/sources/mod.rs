//! Identified, controllable sources and their aggregation.
//!
//! A [`Source`] is a properties provider with its own lifecycle. The
//! [`SourceAggregator`] groups sources, broadcasts membership changes as
//! [`SourceProviderEvent`]s and starts or stops all of its children at once.

pub mod aggregator;

pub use aggregator::SourceAggregator;

use crate::lifecycle::Controllable;
use crate::sensors::PropertiesProvider;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Stable identity of a source for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(Uuid);

impl SourceId {
    /// Generate a fresh random identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SourceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named, independently controllable provider of properties.
pub trait Source: Controllable + PropertiesProvider {
    fn id(&self) -> SourceId;

    /// Human-readable name, used in logs.
    fn name(&self) -> &str;
}

/// Membership change of a [`SourceAggregator`].
#[derive(Clone)]
pub enum SourceProviderEvent {
    SourceAdded(Arc<dyn Source>),
    SourceRemoved(Arc<dyn Source>),
}

impl SourceProviderEvent {
    /// The source that was added or removed.
    pub fn source(&self) -> &Arc<dyn Source> {
        match self {
            SourceProviderEvent::SourceAdded(source) | SourceProviderEvent::SourceRemoved(source) => {
                source
            }
        }
    }
}

impl fmt::Debug for SourceProviderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, source) = match self {
            SourceProviderEvent::SourceAdded(source) => ("SourceAdded", source),
            SourceProviderEvent::SourceRemoved(source) => ("SourceRemoved", source),
        };
        f.debug_struct(kind)
            .field("id", &source.id())
            .field("name", &source.name())
            .finish()
    }
}
