//! Periodic backup scheduling

mod registry;
mod runner;

pub use registry::{ScheduleHandle, ScheduleRegistry};
pub use runner::{initial_delay, PeriodicRunner};
