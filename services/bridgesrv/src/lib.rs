//! Bridge Service (`bridgesrv`)
//!
//! Cyclic bridge scheduler for EdgeLink: once per global cycle every
//! protocol bridge executes its due tasks in priority order within a
//! bounded time budget, then a single process-image pass promotes all
//! staged channel values. Protocol bridges (Modbus, M-Bus, MQTT, REST)
//! share the task abstraction and differ only in their executors.

pub mod config;
pub mod core;
pub mod protocols;

pub use config::{AppConfig, BridgeConfig, ProtocolKind};
pub use crate::core::bridge::{Bridge, CycleStats, ProtocolExecutor};
pub use crate::core::scheduler::{CyclePhase, CycleReport, CycleScheduler};
pub use crate::core::task::{Priority, Task, TaskAddress, TaskDirection};
