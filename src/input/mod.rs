//! Input adapters feeding the broadcast core.
//!
//! Current input sources:
//! - `simulation`: simulated sensors with permission prompts

pub mod simulation;

pub use simulation::{SimulatedPermission, SimulatedSource, build_sources};
