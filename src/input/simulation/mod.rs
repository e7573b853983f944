//! Simulated input sources.
//!
//! Stand-ins for platform sensor adapters, driven by [`SimulationConfig`].

mod permission;
mod sensors;

pub use permission::SimulatedPermission;
pub use sensors::SimulatedSource;

use crate::config::SimulationConfig;
use crate::lifecycle::PermissionGate;
use std::sync::Arc;

/// Create one simulated source per configured name.
///
/// Each source gets its own permission prompt, denied for names listed in
/// `denied_sources` and granted otherwise.
pub fn build_sources(config: &SimulationConfig) -> Vec<Arc<SimulatedSource>> {
    config
        .sources
        .iter()
        .map(|name| {
            let gate: Arc<dyn PermissionGate> = if config.is_denied(name) {
                Arc::new(SimulatedPermission::denying(config.permission_delay()))
            } else {
                Arc::new(SimulatedPermission::granting(config.permission_delay()))
            };
            SimulatedSource::new(name.clone(), config.sample_interval(), gate)
        })
        .collect()
}
