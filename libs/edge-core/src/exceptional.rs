//! Exceptional-state watchdog
//!
//! A time-limited external override: some supervisor repeatedly writes
//! `true` into a component's enable-signal channel, and the component must
//! honor the override while the signal keeps arriving. Missed renewals are
//! tolerated for a grace period backed by one timer identifier; once the
//! timer runs out the override drops until a fresh signal arrives.

use std::sync::Arc;

use tracing::debug;

use errors::EdgeResult;

use crate::component::{Component, EXCEPTIONAL_STATE_ENABLE_SIGNAL, EXCEPTIONAL_STATE_VALUE};
use crate::timer::TimerService;

/// Watchdog over a component's exceptional-state channels
#[derive(Debug)]
pub struct ExceptionalStateHandler {
    timers: Arc<TimerService>,
    identifier: String,
    active_before: bool,
}

impl ExceptionalStateHandler {
    /// `identifier` must already be registered with the timer service;
    /// its threshold is the grace period.
    pub fn new(timers: Arc<TimerService>, identifier: impl Into<String>) -> Self {
        Self {
            timers,
            identifier: identifier.into(),
            active_before: false,
        }
    }

    /// Check whether the override is active this cycle.
    ///
    /// A pending write on the enable channel is consumed (get-and-reset).
    /// `true` renews the override and restarts the grace timer; `false`
    /// drops it immediately. With no pending write, a previously active
    /// override stays live until the grace timer expires.
    pub fn exceptional_state_active(&mut self, component: &Component) -> EdgeResult<bool> {
        let enable = component.channel(EXCEPTIONAL_STATE_ENABLE_SIGNAL)?;

        match enable.get_next_write_value_and_reset() {
            Some(signal) => {
                if signal.as_bool().unwrap_or(false) {
                    self.active_before = true;
                    self.timers.reset(&self.identifier)?;
                    Ok(true)
                } else {
                    self.active_before = false;
                    Ok(false)
                }
            },
            None => {
                if self.active_before && !self.timers.check_time_is_up(&self.identifier)? {
                    debug!(
                        component = component.id(),
                        "exceptional state in grace period"
                    );
                    Ok(true)
                } else {
                    self.active_before = false;
                    Ok(false)
                }
            },
        }
    }

    /// The override target value, read from the committed value of the
    /// exceptional-state value channel.
    pub fn exceptional_state_value(&self, component: &Component) -> EdgeResult<Option<i64>> {
        let value = component.channel(EXCEPTIONAL_STATE_VALUE)?;
        Ok(value.value().and_then(|v| v.as_i64()))
    }
}
