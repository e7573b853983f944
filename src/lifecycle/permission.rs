//! Permission gating for lifecycle starts.
//!
//! Platform permission handling is an external concern. Sources receive a
//! [`PermissionGate`] and the lifecycle consults it before every start.

use async_trait::async_trait;
use std::fmt;

/// Why a source cannot produce updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    /// The user or platform refused access.
    PermissionDenied,
    /// Access is blocked by policy and cannot be requested.
    Restricted,
    /// The hardware or backend is not present.
    Unsupported,
    /// Any other adapter-specific reason.
    Other(String),
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::PermissionDenied => write!(f, "permission denied"),
            UnavailableReason::Restricted => write!(f, "restricted"),
            UnavailableReason::Unsupported => write!(f, "unsupported"),
            UnavailableReason::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// Whether a source can currently produce updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable(UnavailableReason),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

/// Permission state known without prompting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    /// Not decided yet. Starting will call [`PermissionGate::request`].
    NotDetermined,
    Denied(UnavailableReason),
}

/// Capability deciding whether a source may start updating.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// Current status, without prompting.
    fn status(&self) -> PermissionStatus;

    /// Ask for permission. May suspend for as long as the platform prompt takes.
    async fn request(&self) -> Availability;
}

/// Gate for sources that need no permission.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysGranted;

#[async_trait]
impl PermissionGate for AlwaysGranted {
    fn status(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }

    async fn request(&self) -> Availability {
        Availability::Available
    }
}
