//! Identifier-scoped timer service
//!
//! Each identifier tracks one expiration window, measured either in global
//! cycle ticks or wall-clock time. `reset` restarts the window at the
//! current cycle, `check_time_is_up` is a pure query; both are idempotent
//! and safe to call every cycle. An identifier that has never been reset
//! starts its window lazily on the first check.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use errors::{EdgeError, EdgeResult};

/// Measurement mode and threshold for one identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Expire after this many global cycle ticks
    Cycles(u64),
    /// Expire after this much wall-clock time
    Time(Duration),
}

#[derive(Debug)]
struct TimerEntry {
    kind: TimerKind,
    initialized: bool,
    started_cycle: u64,
    started_at: Instant,
}

/// Timer service shared by scheduler, bridges and handlers
#[derive(Debug, Default)]
pub struct TimerService {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cycle: u64,
    entries: HashMap<String, TimerEntry>,
}

impl TimerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an identifier. Re-registering updates the threshold and
    /// leaves the running window untouched.
    pub fn add_identifier(&self, id: impl Into<String>, kind: TimerKind) {
        let mut inner = self.inner.lock();
        inner
            .entries
            .entry(id.into())
            .and_modify(|e| e.kind = kind)
            .or_insert(TimerEntry {
                kind,
                initialized: false,
                started_cycle: 0,
                started_at: Instant::now(),
            });
    }

    pub fn remove_identifier(&self, id: &str) {
        self.inner.lock().entries.remove(id);
    }

    /// Restart the window for `id`, anchored at the current cycle and
    /// instant. A threshold of k cycles therefore expires k ticks after
    /// the reset, not after the next check.
    pub fn reset(&self, id: &str) -> EdgeResult<()> {
        let mut inner = self.inner.lock();
        let cycle = inner.cycle;
        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| EdgeError::config(format!("unknown timer identifier: {id}")))?;
        entry.initialized = true;
        entry.started_cycle = cycle;
        entry.started_at = Instant::now();
        Ok(())
    }

    /// Whether the window for `id` has expired. A fresh (or just reset)
    /// identifier starts its window on the first check and reports not
    /// expired, unless the threshold is zero.
    pub fn check_time_is_up(&self, id: &str) -> EdgeResult<bool> {
        let mut inner = self.inner.lock();
        let cycle = inner.cycle;
        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| EdgeError::config(format!("unknown timer identifier: {id}")))?;

        if !entry.initialized {
            entry.initialized = true;
            entry.started_cycle = cycle;
            entry.started_at = Instant::now();
        }
        let up = match entry.kind {
            TimerKind::Cycles(max) => cycle.saturating_sub(entry.started_cycle) >= max,
            TimerKind::Time(max) => entry.started_at.elapsed() >= max,
        };
        Ok(up)
    }

    /// Advance the global cycle counter. Driven once per cycle by the
    /// scheduler, after the process-image pass.
    pub fn tick(&self) {
        self.inner.lock().cycle += 1;
    }

    pub fn current_cycle(&self) -> u64 {
        self.inner.lock().cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycles_mode() {
        let timers = TimerService::new();
        timers.add_identifier("grace", TimerKind::Cycles(3));

        assert!(!timers.check_time_is_up("grace").unwrap());
        timers.tick();
        timers.tick();
        assert!(!timers.check_time_is_up("grace").unwrap());
        timers.tick();
        assert!(timers.check_time_is_up("grace").unwrap());
    }

    #[test]
    fn test_reset_restarts_window() {
        let timers = TimerService::new();
        timers.add_identifier("grace", TimerKind::Cycles(2));

        timers.check_time_is_up("grace").unwrap();
        timers.tick();
        timers.tick();
        assert!(timers.check_time_is_up("grace").unwrap());

        timers.reset("grace").unwrap();
        assert!(!timers.check_time_is_up("grace").unwrap());
        timers.tick();
        timers.tick();
        assert!(timers.check_time_is_up("grace").unwrap());
    }

    #[test]
    fn test_reset_anchors_window_at_reset_cycle() {
        let timers = TimerService::new();
        timers.add_identifier("grace", TimerKind::Cycles(2));
        timers.tick();

        // The window starts at the reset, not at the first check after it.
        timers.reset("grace").unwrap();
        timers.tick();
        assert!(!timers.check_time_is_up("grace").unwrap());
        timers.tick();
        assert!(timers.check_time_is_up("grace").unwrap());
    }

    #[test]
    fn test_zero_threshold_expires_immediately() {
        let timers = TimerService::new();
        timers.add_identifier("now", TimerKind::Cycles(0));
        assert!(timers.check_time_is_up("now").unwrap());
    }

    #[test]
    fn test_time_mode() {
        let timers = TimerService::new();
        timers.add_identifier("wall", TimerKind::Time(Duration::from_millis(10)));

        assert!(!timers.check_time_is_up("wall").unwrap());
        std::thread::sleep(Duration::from_millis(15));
        assert!(timers.check_time_is_up("wall").unwrap());
    }

    #[test]
    fn test_unknown_identifier() {
        let timers = TimerService::new();
        assert!(timers.check_time_is_up("nope").is_err());
        assert!(timers.reset("nope").is_err());
    }

    #[test]
    fn test_identifiers_are_independent() {
        let timers = TimerService::new();
        timers.add_identifier("a", TimerKind::Cycles(1));
        timers.add_identifier("b", TimerKind::Cycles(5));

        timers.check_time_is_up("a").unwrap();
        timers.check_time_is_up("b").unwrap();
        timers.tick();
        assert!(timers.check_time_is_up("a").unwrap());
        assert!(!timers.check_time_is_up("b").unwrap());
    }
}
