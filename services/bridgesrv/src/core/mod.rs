//! Scheduler core: task abstraction, bridge execution, cycle driver

pub mod bridge;
pub mod convert;
pub mod scheduler;
pub mod task;
