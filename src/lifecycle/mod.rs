//! Start/stop lifecycle for update producers.
//!
//! A [`Lifecycle`] is an explicit `Idle`/`Updating` state machine. Its
//! transitions are async and serialized: a start or stop waits for any
//! transition already in progress, then re-checks the state. Transitions
//! return a [`Transition`] and also broadcast [`ControllableEvent`]s on the
//! lifecycle's own event feed, which uses the same weak dispatch as value
//! broadcasts.
//!
//! ```text
//!            start (granted)              stop
//!   Idle ─────────────────────▶ Updating ──────▶ Idle
//!    │  start (denied): AvailabilityUpdated(Unavailable), stays Idle
//! ```

pub mod permission;

pub use permission::{
    AlwaysGranted, Availability, PermissionGate, PermissionStatus, UnavailableReason,
};

use crate::sensors::{Consumer, DispatchReport, SubscriberRegistry, SubscriptionId};
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::future::Future;

/// Whether a controllable object is producing updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllableState {
    #[default]
    Idle,
    Updating,
}

impl fmt::Display for ControllableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllableState::Idle => write!(f, "idle"),
            ControllableState::Updating => write!(f, "updating"),
        }
    }
}

/// Lifecycle notifications broadcast on [`Lifecycle::events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllableEvent {
    /// A start is waiting on a permission prompt.
    RequestingPermission,
    /// Availability changed: a prompt was granted, or a start was refused.
    AvailabilityUpdated(Availability),
    StartedUpdating,
    StoppedUpdating,
}

/// Result of a start or stop call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Started,
    Stopped,
    /// Already in the requested state; nothing happened.
    Unchanged(ControllableState),
    /// Start refused; the state stayed `Idle`.
    Denied(UnavailableReason),
}

impl Transition {
    /// State after this transition, for transitions that define one.
    pub fn state(&self) -> ControllableState {
        match self {
            Transition::Started => ControllableState::Updating,
            Transition::Stopped | Transition::Denied(_) => ControllableState::Idle,
            Transition::Unchanged(state) => *state,
        }
    }
}

/// Object with an explicit idle/updating lifecycle.
#[async_trait]
pub trait Controllable: Send + Sync {
    /// The state machine backing this object.
    fn lifecycle(&self) -> &Lifecycle;

    fn state(&self) -> ControllableState {
        self.lifecycle().state()
    }

    /// Begin producing updates.
    ///
    /// Resolves once the object is updating, was already updating, or has
    /// been refused. Refusal is reported through the returned [`Transition`]
    /// and an `AvailabilityUpdated` event, never as an error.
    async fn start_updating(&self) -> Transition;

    /// Stop producing updates.
    ///
    /// Once resolved, no new update is produced until the next start.
    async fn stop_updating(&self) -> Transition;
}

/// Serialized idle/updating state machine with an event feed.
pub struct Lifecycle {
    label: String,
    state: RwLock<ControllableState>,
    transition: tokio::sync::Mutex<()>,
    events: SubscriberRegistry,
}

impl Lifecycle {
    /// Create an idle lifecycle. `label` only appears in log messages.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: RwLock::new(ControllableState::Idle),
            transition: tokio::sync::Mutex::new(()),
            events: SubscriberRegistry::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current state. Never waits for a transition in progress.
    pub fn state(&self) -> ControllableState {
        *self.state.read()
    }

    pub fn is_updating(&self) -> bool {
        self.state() == ControllableState::Updating
    }

    /// Registry carrying this lifecycle's [`ControllableEvent`]s.
    pub fn events(&self) -> &SubscriberRegistry {
        &self.events
    }

    /// Subscribe `consumer` to lifecycle events sent by an `S`.
    pub fn subscribe<S, C>(&self, consumer: &std::sync::Arc<C>) -> SubscriptionId
    where
        S: Any,
        C: Consumer<ControllableEvent, S>,
    {
        self.events.subscribe::<ControllableEvent, S, C>(consumer)
    }

    /// Broadcast `event` on the lifecycle feed with `sender` attached.
    pub fn emit<S: Any>(&self, event: &ControllableEvent, sender: &S) -> DispatchReport {
        debug!("[Lifecycle] {}: {:?}", self.label, event);
        self.events.dispatch(event, sender)
    }

    /// Transition to `Updating`.
    ///
    /// Consults `gate` first. If the gate has not decided, a
    /// `RequestingPermission` event is emitted and the request is awaited.
    /// On success `activate` runs before the state flips to `Updating` and
    /// `StartedUpdating` is emitted. Calling this while already updating
    /// returns `Unchanged` and emits nothing.
    pub async fn start<S, F, Fut>(
        &self,
        sender: &S,
        gate: &dyn PermissionGate,
        activate: F,
    ) -> Transition
    where
        S: Any + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let _transition = self.transition.lock().await;
        if self.is_updating() {
            debug!("[Lifecycle] {} already updating", self.label);
            return Transition::Unchanged(ControllableState::Updating);
        }

        let availability = match gate.status() {
            PermissionStatus::Granted => Availability::Available,
            PermissionStatus::Denied(reason) => Availability::Unavailable(reason),
            PermissionStatus::NotDetermined => {
                info!("[Lifecycle] {} requesting permission", self.label);
                self.emit(&ControllableEvent::RequestingPermission, sender);
                let availability = gate.request().await;
                if availability.is_available() {
                    self.emit(
                        &ControllableEvent::AvailabilityUpdated(Availability::Available),
                        sender,
                    );
                }
                availability
            }
        };

        if let Availability::Unavailable(reason) = availability {
            warn!("[Lifecycle] {} unavailable: {}", self.label, reason);
            self.emit(
                &ControllableEvent::AvailabilityUpdated(Availability::Unavailable(
                    reason.clone(),
                )),
                sender,
            );
            return Transition::Denied(reason);
        }

        activate().await;
        *self.state.write() = ControllableState::Updating;
        info!("[Lifecycle] {} started updating", self.label);
        self.emit(&ControllableEvent::StartedUpdating, sender);
        Transition::Started
    }

    /// Transition to `Idle`.
    ///
    /// `deactivate` runs before the state flips to `Idle` and must not
    /// resolve until the owner has stopped scheduling updates. Calling this
    /// while idle returns `Unchanged` and emits nothing.
    pub async fn stop<S, F, Fut>(&self, sender: &S, deactivate: F) -> Transition
    where
        S: Any + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let _transition = self.transition.lock().await;
        if !self.is_updating() {
            debug!("[Lifecycle] {} already idle", self.label);
            return Transition::Unchanged(ControllableState::Idle);
        }

        deactivate().await;
        *self.state.write() = ControllableState::Idle;
        info!("[Lifecycle] {} stopped updating", self.label);
        self.emit(&ControllableEvent::StoppedUpdating, sender);
        Transition::Stopped
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("label", &self.label)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Gate that answers after a short delay and counts prompts.
    struct SlowGate {
        answer: Availability,
        requests: AtomicUsize,
    }

    impl SlowGate {
        fn new(answer: Availability) -> Self {
            Self {
                answer,
                requests: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PermissionGate for SlowGate {
        fn status(&self) -> PermissionStatus {
            PermissionStatus::NotDetermined
        }

        async fn request(&self) -> Availability {
            self.requests.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.answer.clone()
        }
    }

    struct Device {
        lifecycle: Lifecycle,
        gate: Box<dyn PermissionGate>,
        activations: AtomicUsize,
    }

    impl Device {
        fn new(gate: impl PermissionGate + 'static) -> Self {
            Self {
                lifecycle: Lifecycle::new("device"),
                gate: Box::new(gate),
                activations: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Controllable for Device {
        fn lifecycle(&self) -> &Lifecycle {
            &self.lifecycle
        }

        async fn start_updating(&self) -> Transition {
            self.lifecycle
                .start(self, self.gate.as_ref(), || async {
                    self.activations.fetch_add(1, Ordering::SeqCst);
                })
                .await
        }

        async fn stop_updating(&self) -> Transition {
            self.lifecycle.stop(self, || async {}).await
        }
    }

    struct EventLog {
        events: Mutex<Vec<ControllableEvent>>,
    }

    impl EventLog {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<ControllableEvent> {
            self.events.lock().clone()
        }
    }

    impl Consumer<ControllableEvent, Device> for EventLog {
        fn receive(&self, event: &ControllableEvent, _sender: &Device) {
            self.events.lock().push(event.clone());
        }
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let device = Device::new(AlwaysGranted);
        let log = EventLog::new();
        device.lifecycle.subscribe::<Device, _>(&log);

        assert_eq!(device.state(), ControllableState::Idle);
        assert_eq!(device.start_updating().await, Transition::Started);
        assert_eq!(device.state(), ControllableState::Updating);
        assert_eq!(device.stop_updating().await, Transition::Stopped);
        assert_eq!(device.state(), ControllableState::Idle);

        assert_eq!(
            log.events(),
            vec![
                ControllableEvent::StartedUpdating,
                ControllableEvent::StoppedUpdating
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_silent() {
        let device = Device::new(AlwaysGranted);
        let log = EventLog::new();
        device.lifecycle.subscribe::<Device, _>(&log);

        let transition = device.stop_updating().await;
        assert_eq!(transition, Transition::Unchanged(ControllableState::Idle));
        assert_eq!(transition.state(), ControllableState::Idle);
        assert!(log.events().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_starts_emit_one_event() {
        let device = Device::new(SlowGate::new(Availability::Available));
        let log = EventLog::new();
        device.lifecycle.subscribe::<Device, _>(&log);

        let (first, second) = tokio::join!(device.start_updating(), device.start_updating());

        assert_eq!(first.state(), ControllableState::Updating);
        assert_eq!(second.state(), ControllableState::Updating);
        assert_eq!(device.state(), ControllableState::Updating);
        assert_eq!(device.activations.load(Ordering::SeqCst), 1);

        let started = log
            .events()
            .into_iter()
            .filter(|event| *event == ControllableEvent::StartedUpdating)
            .count();
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn test_permission_prompt_sequence() {
        let device = Device::new(SlowGate::new(Availability::Available));
        let log = EventLog::new();
        device.lifecycle.subscribe::<Device, _>(&log);

        device.start_updating().await;

        assert_eq!(
            log.events(),
            vec![
                ControllableEvent::RequestingPermission,
                ControllableEvent::AvailabilityUpdated(Availability::Available),
                ControllableEvent::StartedUpdating,
            ]
        );
    }

    #[tokio::test]
    async fn test_denied_start_stays_idle() {
        let reason = UnavailableReason::PermissionDenied;
        let device = Device::new(SlowGate::new(Availability::Unavailable(reason.clone())));
        let log = EventLog::new();
        device.lifecycle.subscribe::<Device, _>(&log);

        let transition = device.start_updating().await;

        assert_eq!(transition, Transition::Denied(reason.clone()));
        assert_eq!(device.state(), ControllableState::Idle);
        assert_eq!(device.activations.load(Ordering::SeqCst), 0);
        assert_eq!(
            log.events(),
            vec![
                ControllableEvent::RequestingPermission,
                ControllableEvent::AvailabilityUpdated(Availability::Unavailable(reason)),
            ]
        );
    }

    #[tokio::test]
    async fn test_events_from_other_senders_are_ignored() {
        let device = Device::new(AlwaysGranted);
        let log = EventLog::new();
        device.lifecycle.subscribe::<Device, _>(&log);

        let report = device
            .lifecycle
            .emit(&ControllableEvent::StartedUpdating, &"someone else");
        assert_eq!(report.skipped, 1);
        assert!(log.events().is_empty());
    }
}
