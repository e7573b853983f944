//! Sensor simulation for testing.
//!
//! Provides a simulated source that produces readings on a fixed interval
//! while it is updating. Useful for development and for exercising the
//! broadcast core without real hardware.

use crate::lifecycle::{Controllable, Lifecycle, PermissionGate, Transition};
use crate::sensors::{
    AnyValue, Clock, Producer, PropertiesProvider, SubscriberRegistry, SystemClock, Value,
    ValueCell,
};
use crate::sources::{Source, SourceId};
use async_trait::async_trait;
use log::{debug, error, info};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

/// Running sampling task.
struct Sampler {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Simulated sensor with two properties, declared in this order:
///
/// 1. `level`: `f64` following a deterministic wave between 0 and 100
/// 2. `active`: `bool` toggled on every sample
///
/// Subscribers implement `Consumer<Value<f64>, SimulatedSource>` and/or
/// `Consumer<Value<bool>, SimulatedSource>`.
pub struct SimulatedSource {
    id: SourceId,
    name: String,
    level: ValueCell<f64>,
    active: ValueCell<bool>,
    step: AtomicU64,
    interval: Duration,
    subscribers: SubscriberRegistry,
    lifecycle: Lifecycle,
    gate: Arc<dyn PermissionGate>,
    sampler: Mutex<Option<Sampler>>,
    me: Weak<SimulatedSource>,
}

impl SimulatedSource {
    /// Create a source sampling every `interval` once started.
    pub fn new(
        name: impl Into<String>,
        interval: Duration,
        gate: Arc<dyn PermissionGate>,
    ) -> Arc<Self> {
        Self::with_clock(name, interval, gate, Arc::new(SystemClock))
    }

    /// Create a source whose readings are stamped by `clock`.
    pub fn with_clock(
        name: impl Into<String>,
        interval: Duration,
        gate: Arc<dyn PermissionGate>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|me| Self {
            id: SourceId::new(),
            lifecycle: Lifecycle::new(name.clone()),
            name,
            level: ValueCell::with_clock(0.0, clock.clone()),
            active: ValueCell::with_clock(false, clock),
            step: AtomicU64::new(0),
            interval,
            subscribers: SubscriberRegistry::new(),
            gate,
            sampler: Mutex::new(None),
            me: me.clone(),
        })
    }

    /// Latest level snapshot.
    pub fn level(&self) -> Value<f64> {
        self.level.current()
    }

    /// Latest active snapshot.
    pub fn active(&self) -> Value<bool> {
        self.active.current()
    }

    /// Set the level and broadcast the new snapshot.
    pub fn update_level(&self, level: f64) -> Value<f64> {
        self.update(&self.level, level)
    }

    /// Set the active flag and broadcast the new snapshot.
    pub fn update_active(&self, active: bool) -> Value<bool> {
        self.update(&self.active, active)
    }

    /// Take one sample right away: advance the wave, toggle `active`.
    ///
    /// Both broadcasts go out as one uninterrupted pass, level first.
    pub fn sample_now(&self) {
        let step = self.step.fetch_add(1, Ordering::SeqCst) + 1;
        let _pass = self.subscribers.begin();
        let level = self.update_level(wave(step));
        let active = self.update_active(step % 2 == 1);
        debug!(
            "[Sim] {} sample {}: level={:.2} active={}",
            self.name, step, level.data, active.data
        );
    }

    /// Number of samples taken so far.
    pub fn samples(&self) -> u64 {
        self.step.load(Ordering::SeqCst)
    }

    fn spawn_sampler(&self) {
        let token = CancellationToken::new();
        let source = self.me.clone();
        let period = self.interval;
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            // First sample one period after start, never inside activation
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        // Stop once the source itself is gone
                        let Some(live) = source.upgrade() else { break };
                        live.sample_now();
                    }
                }
            }
        });

        *self.sampler.lock() = Some(Sampler { token, handle });
        info!("[Sim] {} sampling every {:?}", self.name, self.interval);
    }

    async fn stop_sampler(&self) {
        let sampler = self.sampler.lock().take();
        if let Some(Sampler { token, handle }) = sampler {
            token.cancel();
            if let Err(e) = handle.await {
                error!("[Sim] {} sampling task failed: {}", self.name, e);
            }
        }
    }
}

/// Deterministic level for sample `step`, between 0 and 100.
fn wave(step: u64) -> f64 {
    let level = 50.0 + 50.0 * (step as f64 * 0.3).sin();
    (level * 100.0).round() / 100.0
}

impl Producer for SimulatedSource {
    fn subscribers(&self) -> &SubscriberRegistry {
        &self.subscribers
    }
}

impl PropertiesProvider for SimulatedSource {
    fn all_properties(&self) -> Vec<AnyValue> {
        vec![self.level.erased(), self.active.erased()]
    }
}

#[async_trait]
impl Controllable for SimulatedSource {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn start_updating(&self) -> Transition {
        self.lifecycle
            .start(self, self.gate.as_ref(), || async { self.spawn_sampler() })
            .await
    }

    async fn stop_updating(&self) -> Transition {
        self.lifecycle.stop(self, || self.stop_sampler()).await
    }
}

impl Source for SimulatedSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SimulatedSource {
    fn drop(&mut self) {
        if let Some(sampler) = self.sampler.get_mut().take() {
            sampler.token.cancel();
        }
    }
}
