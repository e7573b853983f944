//! Aggregation of several sources under one controllable provider.
//!
//! Starting or stopping the aggregator fans out to every current child
//! concurrently and resolves once all children have resolved. A child that
//! is refused does not fail the aggregate start: its refusal is re-broadcast
//! on the aggregator's lifecycle feed with the child as sender.

use super::{Source, SourceId, SourceProviderEvent};
use crate::error::{BroadcastError, Result};
use crate::lifecycle::{
    AlwaysGranted, Availability, Controllable, ControllableEvent, Lifecycle, Transition,
};
use crate::sensors::{AnyValue, Producer, PropertiesProvider, SubscriberRegistry};
use async_trait::async_trait;
use futures_util::future::join_all;
use log::info;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Ordered, observable collection of [`Source`]s.
///
/// Membership events are broadcast through the aggregator's registry with
/// the aggregator as sender, so consumers implement
/// `Consumer<SourceProviderEvent, SourceAggregator>`. Lifecycle events are on
/// [`Lifecycle::events`]: the aggregator's own transitions carry the
/// aggregator as sender, re-broadcast child refusals carry the child's
/// `Arc<dyn Source>`.
///
/// Adding a source never starts it, and removing one never stops it. The
/// aggregator owns the collection, not the sources' lifecycles.
pub struct SourceAggregator {
    sources: RwLock<Vec<Arc<dyn Source>>>,
    membership: SubscriberRegistry,
    lifecycle: Lifecycle,
}

impl SourceAggregator {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
            membership: SubscriberRegistry::new(),
            lifecycle: Lifecycle::new(label),
        }
    }

    /// Snapshot of the current members, in insertion order.
    pub fn sources(&self) -> Vec<Arc<dyn Source>> {
        self.sources.read().clone()
    }

    /// Look up a member by identity.
    pub fn source(&self, id: SourceId) -> Option<Arc<dyn Source>> {
        self.sources
            .read()
            .iter()
            .find(|source| source.id() == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }

    /// Append a source and broadcast `SourceAdded`.
    ///
    /// The new member is not started, even if the aggregator is already
    /// updating. Start it directly, or stop and restart the aggregator.
    ///
    /// Fails with [`BroadcastError::DuplicateSource`] if a source with the
    /// same identity is already a member.
    pub fn add(&self, source: Arc<dyn Source>) -> Result<()> {
        let pass = self.membership.begin();
        {
            let mut sources = self.sources.write();
            if sources.iter().any(|member| member.id() == source.id()) {
                return Err(BroadcastError::DuplicateSource(source.id()));
            }
            sources.push(source.clone());
        }

        info!("[Sources] added {} ({})", source.name(), source.id());
        pass.dispatch(&SourceProviderEvent::SourceAdded(source), self);
        Ok(())
    }

    /// Remove a source and broadcast `SourceRemoved`.
    ///
    /// Returns the removed source. Fails with
    /// [`BroadcastError::UnknownSource`] if no member has that identity.
    pub fn remove(&self, id: SourceId) -> Result<Arc<dyn Source>> {
        let pass = self.membership.begin();
        let removed = {
            let mut sources = self.sources.write();
            let index = sources
                .iter()
                .position(|member| member.id() == id)
                .ok_or(BroadcastError::UnknownSource(id))?;
            sources.remove(index)
        };

        info!("[Sources] removed {} ({})", removed.name(), id);
        pass.dispatch(&SourceProviderEvent::SourceRemoved(removed.clone()), self);
        Ok(removed)
    }

    async fn start_children(&self) {
        let children = self.sources();
        let outcomes = join_all(children.iter().map(|child| child.start_updating())).await;

        for (child, outcome) in children.iter().zip(outcomes) {
            if let Transition::Denied(reason) = outcome {
                self.lifecycle.emit(
                    &ControllableEvent::AvailabilityUpdated(Availability::Unavailable(reason)),
                    child,
                );
            }
        }
    }

    async fn stop_children(&self) {
        let children = self.sources();
        join_all(children.iter().map(|child| child.stop_updating())).await;
    }
}

impl Producer for SourceAggregator {
    fn subscribers(&self) -> &SubscriberRegistry {
        &self.membership
    }
}

impl PropertiesProvider for SourceAggregator {
    /// Properties of every member, grouped by source in membership order.
    fn all_properties(&self) -> Vec<AnyValue> {
        self.sources()
            .iter()
            .flat_map(|source| source.all_properties())
            .collect()
    }
}

#[async_trait]
impl Controllable for SourceAggregator {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Start every member concurrently.
    ///
    /// Succeeds once all members have been attempted, even if some were
    /// refused. Members added while the aggregator is already updating are
    /// not started by a repeated call.
    async fn start_updating(&self) -> Transition {
        self.lifecycle
            .start(self, &AlwaysGranted, || self.start_children())
            .await
    }

    async fn stop_updating(&self) -> Transition {
        self.lifecycle.stop(self, || self.stop_children()).await
    }
}

impl fmt::Debug for SourceAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceAggregator")
            .field("lifecycle", &self.lifecycle)
            .field("sources", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{
        ControllableState, PermissionGate, PermissionStatus, UnavailableReason,
    };
    use crate::sensors::{Consumer, ManualClock, Timestamped, ValueCell};
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::Barrier;

    /// Gate with a fixed answer.
    struct FixedGate(PermissionStatus);

    #[async_trait]
    impl PermissionGate for FixedGate {
        fn status(&self) -> PermissionStatus {
            self.0.clone()
        }

        async fn request(&self) -> Availability {
            Availability::Available
        }
    }

    struct StubSource {
        id: SourceId,
        name: String,
        reading: ValueCell<i64>,
        lifecycle: Lifecycle,
        gate: FixedGate,
        barrier: Option<Arc<Barrier>>,
    }

    impl StubSource {
        fn new(name: &str, status: PermissionStatus) -> Self {
            Self {
                id: SourceId::new(),
                name: name.to_string(),
                reading: ValueCell::new(0),
                lifecycle: Lifecycle::new(name),
                gate: FixedGate(status),
                barrier: None,
            }
        }

        fn granted(name: &str) -> Arc<Self> {
            Arc::new(Self::new(name, PermissionStatus::Granted))
        }
    }

    impl PropertiesProvider for StubSource {
        fn all_properties(&self) -> Vec<AnyValue> {
            vec![self.reading.erased()]
        }
    }

    #[async_trait]
    impl Controllable for StubSource {
        fn lifecycle(&self) -> &Lifecycle {
            &self.lifecycle
        }

        async fn start_updating(&self) -> Transition {
            self.lifecycle
                .start(self, &self.gate, || async {
                    if let Some(barrier) = &self.barrier {
                        barrier.wait().await;
                    }
                })
                .await
        }

        async fn stop_updating(&self) -> Transition {
            self.lifecycle.stop(self, || async {}).await
        }
    }

    impl Source for StubSource {
        fn id(&self) -> SourceId {
            self.id
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    #[derive(Default)]
    struct Watcher {
        membership: Mutex<Vec<(bool, String)>>,
        refusals: Mutex<Vec<(String, Availability)>>,
        own_events: Mutex<Vec<ControllableEvent>>,
    }

    impl Consumer<SourceProviderEvent, SourceAggregator> for Watcher {
        fn receive(&self, event: &SourceProviderEvent, _sender: &SourceAggregator) {
            let added = matches!(event, SourceProviderEvent::SourceAdded(_));
            self.membership
                .lock()
                .push((added, event.source().name().to_string()));
        }
    }

    impl Consumer<ControllableEvent, Arc<dyn Source>> for Watcher {
        fn receive(&self, event: &ControllableEvent, child: &Arc<dyn Source>) {
            if let ControllableEvent::AvailabilityUpdated(availability) = event {
                self.refusals
                    .lock()
                    .push((child.name().to_string(), availability.clone()));
            }
        }
    }

    impl Consumer<ControllableEvent, SourceAggregator> for Watcher {
        fn receive(&self, event: &ControllableEvent, _sender: &SourceAggregator) {
            self.own_events.lock().push(event.clone());
        }
    }

    fn watch(aggregator: &SourceAggregator) -> Arc<Watcher> {
        let watcher = Arc::new(Watcher::default());
        aggregator.subscribe::<SourceProviderEvent, _>(&watcher);
        aggregator
            .lifecycle()
            .subscribe::<Arc<dyn Source>, _>(&watcher);
        aggregator
            .lifecycle()
            .subscribe::<SourceAggregator, _>(&watcher);
        watcher
    }

    #[test]
    fn test_membership_events_in_mutation_order() {
        let aggregator = SourceAggregator::new("all");
        let watcher = watch(&aggregator);
        let motion = StubSource::granted("motion");
        let screen = StubSource::granted("screen");

        aggregator.add(motion.clone()).unwrap();
        aggregator.add(screen.clone()).unwrap();
        aggregator.remove(motion.id).unwrap();

        assert_eq!(
            *watcher.membership.lock(),
            vec![
                (true, "motion".to_string()),
                (true, "screen".to_string()),
                (false, "motion".to_string()),
            ]
        );
        assert_eq!(aggregator.len(), 1);
        assert_eq!(aggregator.sources()[0].name(), "screen");
    }

    #[test]
    fn test_duplicate_and_unknown_sources() {
        let aggregator = SourceAggregator::new("all");
        let watcher = watch(&aggregator);
        let motion = StubSource::granted("motion");

        aggregator.add(motion.clone()).unwrap();
        let duplicate = aggregator.add(motion.clone());
        assert!(matches!(duplicate, Err(BroadcastError::DuplicateSource(id)) if id == motion.id));

        let removed = aggregator.remove(motion.id).unwrap();
        assert_eq!(removed.id(), motion.id);
        assert!(aggregator.source(motion.id).is_none());

        let unknown = aggregator.remove(motion.id);
        assert!(matches!(unknown, Err(BroadcastError::UnknownSource(_))));

        // Failed mutations broadcast nothing
        assert_eq!(watcher.membership.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_partial_denial_still_starts_aggregate() {
        let aggregator = SourceAggregator::new("all");
        let watcher = watch(&aggregator);
        let location = Arc::new(StubSource::new(
            "location",
            PermissionStatus::Denied(UnavailableReason::PermissionDenied),
        ));
        let motion = StubSource::granted("motion");
        let screen = StubSource::granted("screen");

        aggregator.add(motion.clone()).unwrap();
        aggregator.add(location.clone()).unwrap();
        aggregator.add(screen.clone()).unwrap();

        let transition = aggregator.start_updating().await;

        assert_eq!(transition, Transition::Started);
        assert_eq!(aggregator.state(), ControllableState::Updating);
        assert_eq!(aggregator.sources().len(), 3);
        assert_eq!(motion.state(), ControllableState::Updating);
        assert_eq!(screen.state(), ControllableState::Updating);
        assert_eq!(location.state(), ControllableState::Idle);

        assert_eq!(
            *watcher.refusals.lock(),
            vec![(
                "location".to_string(),
                Availability::Unavailable(UnavailableReason::PermissionDenied)
            )]
        );
        assert_eq!(
            *watcher.own_events.lock(),
            vec![ControllableEvent::StartedUpdating]
        );
    }

    #[tokio::test]
    async fn test_member_added_while_updating_waits_for_restart() {
        let aggregator = SourceAggregator::new("all");
        let motion = StubSource::granted("motion");
        aggregator.add(motion.clone()).unwrap();
        aggregator.start_updating().await;

        let screen = StubSource::granted("screen");
        aggregator.add(screen.clone()).unwrap();
        assert_eq!(screen.state(), ControllableState::Idle);
        assert_eq!(
            aggregator.start_updating().await,
            Transition::Unchanged(ControllableState::Updating)
        );
        assert_eq!(screen.state(), ControllableState::Idle);

        aggregator.stop_updating().await;
        aggregator.start_updating().await;
        assert_eq!(motion.state(), ControllableState::Updating);
        assert_eq!(screen.state(), ControllableState::Updating);
    }

    #[tokio::test]
    async fn test_children_start_concurrently() {
        let barrier = Arc::new(Barrier::new(3));
        let aggregator = SourceAggregator::new("all");
        let children: Vec<Arc<StubSource>> = ["a", "b", "c"]
            .iter()
            .map(|name| {
                let mut source = StubSource::new(name, PermissionStatus::Granted);
                source.barrier = Some(barrier.clone());
                Arc::new(source)
            })
            .collect();
        for child in &children {
            aggregator.add(child.clone()).unwrap();
        }

        // Sequential starts would wait on the barrier forever
        let transition = tokio::time::timeout(Duration::from_secs(5), aggregator.start_updating())
            .await
            .expect("children were not started concurrently");

        assert_eq!(transition, Transition::Started);
        assert!(children.iter().all(|child| child.lifecycle.is_updating()));
    }

    #[tokio::test]
    async fn test_stop_fans_out_and_is_idempotent() {
        let aggregator = SourceAggregator::new("all");
        let watcher = watch(&aggregator);
        let motion = StubSource::granted("motion");
        aggregator.add(motion.clone()).unwrap();

        aggregator.start_updating().await;
        assert_eq!(aggregator.stop_updating().await, Transition::Stopped);
        assert_eq!(
            aggregator.stop_updating().await,
            Transition::Unchanged(ControllableState::Idle)
        );
        assert_eq!(motion.state(), ControllableState::Idle);
        assert_eq!(
            *watcher.own_events.lock(),
            vec![
                ControllableEvent::StartedUpdating,
                ControllableEvent::StoppedUpdating
            ]
        );
    }

    #[test]
    fn test_latest_update_across_children() {
        let clock = Arc::new(ManualClock::at_millis(100));
        let aggregator = SourceAggregator::new("all");
        let mut sources = Vec::new();
        for (name, millis) in [("a", 100), ("b", 250), ("c", 180)] {
            let mut source = StubSource::new(name, PermissionStatus::Granted);
            source.reading = ValueCell::with_clock(0, clock.clone());
            clock.set_millis(millis);
            source.reading.update(millis);
            let source = Arc::new(source);
            aggregator.add(source.clone()).unwrap();
            sources.push(source);
        }

        let properties = aggregator.all_properties();
        assert_eq!(properties.len(), 3);
        assert_eq!(properties[1].timestamp(), Utc.timestamp_millis_opt(250).unwrap());
        assert_eq!(
            aggregator.latest_update(),
            Utc.timestamp_millis_opt(250).single()
        );
    }
}
