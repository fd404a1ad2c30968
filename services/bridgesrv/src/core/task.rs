//! Task abstraction
//!
//! A task is one scheduled read or write against a device: an address on
//! some protocol, a direction, a priority, a polling interval and the
//! retry/deferral state the scheduler maintains. Tasks are registered per
//! logical device on a bridge at component activation and removed at
//! deactivation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use edge_core::Channel;

use crate::protocols::mbus::MbusAddress;
use crate::protocols::modbus::ModbusAddress;
use crate::protocols::mqtt::MqttTaskConfig;
use crate::protocols::rest::RestAddress;

/// Task priority. URGENT exists for command traffic on message-bus
/// bridges; polling tasks use HIGH and LOW.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    High,
    Urgent,
}

/// Read from the device into the channel, or write a staged value out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskDirection {
    Read,
    Write,
}

/// Protocol-specific address of a task
#[derive(Debug, Clone)]
pub enum TaskAddress {
    Modbus(ModbusAddress),
    Mbus(MbusAddress),
    Mqtt(MqttTaskConfig),
    Rest(RestAddress),
}

/// Execution state maintained by the scheduler
#[derive(Debug, Clone, Default)]
pub struct TaskState {
    pub last_attempt: Option<Instant>,
    /// Consecutive transport failures
    pub failures: u32,
    /// Consecutive cycles this task was deferred by the budget
    pub deferrals: u32,
}

/// One scheduled read or write operation
#[derive(Debug)]
pub struct Task {
    pub channel: Arc<Channel>,
    pub address: TaskAddress,
    pub direction: TaskDirection,
    pub priority: Priority,
    /// Polling interval; zero means every cycle
    pub interval: Duration,
    pub state: TaskState,
}

impl Task {
    pub fn new(
        channel: Arc<Channel>,
        address: TaskAddress,
        direction: TaskDirection,
        priority: Priority,
        interval: Duration,
    ) -> Self {
        Self {
            channel,
            address,
            direction,
            priority,
            interval,
            state: TaskState::default(),
        }
    }

    /// Due this cycle? A deferred task stays ready since its interval has
    /// already elapsed.
    pub fn is_ready(&self, now: Instant) -> bool {
        if self.interval.is_zero() {
            return true;
        }
        match self.state.last_attempt {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        }
    }

    /// Priority after starvation protection: a LOW task deferred past the
    /// limit competes as HIGH until it runs.
    pub fn effective_priority(&self, deferral_limit: u32) -> Priority {
        if self.priority == Priority::Low && self.state.deferrals >= deferral_limit {
            Priority::High
        } else {
            self.priority
        }
    }

    pub fn mark_attempt(&mut self, now: Instant) {
        self.state.last_attempt = Some(now);
        self.state.deferrals = 0;
    }

    pub fn mark_success(&mut self) {
        self.state.failures = 0;
    }

    pub fn mark_failure(&mut self) -> u32 {
        self.state.failures += 1;
        self.state.failures
    }
}
