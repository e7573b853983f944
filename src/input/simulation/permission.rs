//! Simulated permission prompt.

use crate::lifecycle::{Availability, PermissionGate, PermissionStatus, UnavailableReason};
use async_trait::async_trait;
use log::info;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Permission gate that behaves like a platform prompt.
///
/// Starts undecided. The first request waits `delay`, records `answer` and
/// returns it; afterwards [`status`](PermissionGate::status) reports the
/// recorded answer and no further prompt is needed.
pub struct SimulatedPermission {
    answer: Availability,
    delay: Duration,
    decided: RwLock<Option<Availability>>,
    requests: AtomicUsize,
}

impl SimulatedPermission {
    pub fn new(answer: Availability, delay: Duration) -> Self {
        Self {
            answer,
            delay,
            decided: RwLock::new(None),
            requests: AtomicUsize::new(0),
        }
    }

    /// Prompt that grants access after `delay`.
    pub fn granting(delay: Duration) -> Self {
        Self::new(Availability::Available, delay)
    }

    /// Prompt that refuses access after `delay`.
    pub fn denying(delay: Duration) -> Self {
        Self::new(
            Availability::Unavailable(UnavailableReason::PermissionDenied),
            delay,
        )
    }

    /// Number of prompts shown so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionGate for SimulatedPermission {
    fn status(&self) -> PermissionStatus {
        match self.decided.read().as_ref() {
            None => PermissionStatus::NotDetermined,
            Some(Availability::Available) => PermissionStatus::Granted,
            Some(Availability::Unavailable(reason)) => PermissionStatus::Denied(reason.clone()),
        }
    }

    async fn request(&self) -> Availability {
        self.requests.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        info!("[Sim] Permission prompt answered: {:?}", self.answer);
        *self.decided.write() = Some(self.answer.clone());
        self.answer.clone()
    }
}
