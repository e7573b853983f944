//! Sensor broadcast library.
//!
//! This library provides the core for propagating periodically updated
//! measurements from sources (sensors) to interested consumers:
//!
//! - [`sensors`]: timestamped value cells and the weak subscriber registry
//! - [`lifecycle`]: the start/stop state machine and permission gating
//! - [`sources`]: identified sources and their controllable aggregation
//! - [`input`]: adapters producing updates (currently a simulation)

pub mod config;
pub mod error;
pub mod input;
pub mod lifecycle;
pub mod sensors;
pub mod sources;

pub use error::{BroadcastError, Result};
