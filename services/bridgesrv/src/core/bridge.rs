//! Bridge: one physical transport, many logical devices
//!
//! A bridge owns the tasks registered against its transport, grouped per
//! logical device in registration order, plus the connection-health flag.
//! Each cycle the scheduler asks the bridge to execute its due tasks for
//! one direction; the bridge serializes them (most wire protocols cannot
//! be multiplexed) under a per-task timeout, applies priority order and
//! the cycle budget, and feeds results into the channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use edge_core::ChannelValue;
use errors::{EdgeError, EdgeResult};

use super::task::{Priority, Task, TaskDirection};

/// Protocol-specific execution of a single task. Implementations wrap
/// their transport; the bridge guarantees calls are serialized.
#[async_trait]
pub trait ProtocolExecutor: Send + Sync {
    fn protocol(&self) -> &'static str;

    /// Perform one read. `Ok(None)` stages the undefined state (value
    /// unavailable this poll, e.g. an unresolved record position).
    async fn execute_read(&self, task: &mut Task) -> EdgeResult<Option<ChannelValue>>;

    /// Send one consumed write value out.
    async fn execute_write(&self, task: &mut Task, value: ChannelValue) -> EdgeResult<()>;
}

/// Per-direction execution counters for one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub executed: usize,
    pub deferred: usize,
    pub failed: usize,
    pub skipped_writes: usize,
}

impl CycleStats {
    pub fn merge(&mut self, other: CycleStats) {
        self.executed += other.executed;
        self.deferred += other.deferred;
        self.failed += other.failed;
        self.skipped_writes += other.skipped_writes;
    }
}

#[derive(Debug)]
struct DeviceTasks {
    device_id: String,
    tasks: Vec<Task>,
}

/// A named protocol endpoint and its registered tasks
pub struct Bridge {
    name: String,
    executor: Box<dyn ProtocolExecutor>,
    devices: Mutex<Vec<DeviceTasks>>,
    connected: AtomicBool,
    failure_threshold: u32,
    task_timeout: Duration,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("name", &self.name)
            .field("protocol", &self.executor.protocol())
            .field("connected", &self.is_healthy())
            .finish_non_exhaustive()
    }
}

impl Bridge {
    pub fn new(
        name: impl Into<String>,
        executor: Box<dyn ProtocolExecutor>,
        failure_threshold: u32,
        task_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            executor,
            devices: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            failure_threshold,
            task_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocol(&self) -> &'static str {
        self.executor.protocol()
    }

    /// Connection-health flag: degraded once a task exceeds the failure
    /// threshold, restored by the next success.
    pub fn is_healthy(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Register a device's tasks. Called at component activation; the
    /// device id must be unique on this bridge.
    pub async fn add_device(&self, device_id: impl Into<String>, tasks: Vec<Task>) -> EdgeResult<()> {
        let device_id = device_id.into();
        let mut devices = self.devices.lock().await;
        if devices.iter().any(|d| d.device_id == device_id) {
            return Err(EdgeError::config(format!(
                "device {device_id} already registered on bridge {}",
                self.name
            )));
        }
        debug!(bridge = %self.name, device = %device_id, tasks = tasks.len(), "device registered");
        devices.push(DeviceTasks { device_id, tasks });
        Ok(())
    }

    /// Remove a device's tasks. Called at component deactivation.
    pub async fn remove_device(&self, device_id: &str) -> EdgeResult<()> {
        let mut devices = self.devices.lock().await;
        let before = devices.len();
        devices.retain(|d| d.device_id != device_id);
        if devices.len() == before {
            return Err(EdgeError::ComponentNotFound(device_id.to_string()));
        }
        Ok(())
    }

    pub async fn task_count(&self) -> usize {
        self.devices.lock().await.iter().map(|d| d.tasks.len()).sum()
    }

    /// Execute this bridge's due tasks for one direction, HIGH before LOW
    /// within the cycle budget. Deferred LOW tasks stay ready (their
    /// interval has elapsed) and are promoted once deferred past the
    /// limit.
    pub async fn execute_cycle(
        &self,
        direction: TaskDirection,
        budget: Duration,
        deferral_limit: u32,
    ) -> CycleStats {
        let mut stats = CycleStats::default();
        let now = Instant::now();
        let mut devices = self.devices.lock().await;

        // Ready tasks in registration order; the stable sort keeps that
        // order within equal priority, which makes cycles reproducible.
        let mut order: Vec<(usize, usize, Priority)> = Vec::new();
        for (di, device) in devices.iter().enumerate() {
            for (ti, task) in device.tasks.iter().enumerate() {
                if task.direction == direction && task.is_ready(now) {
                    order.push((di, ti, task.effective_priority(deferral_limit)));
                }
            }
        }
        order.sort_by(|a, b| b.2.cmp(&a.2));

        let start = Instant::now();
        for (di, ti, effective) in order {
            let device_id = devices[di].device_id.clone();
            let task = &mut devices[di].tasks[ti];

            if effective == Priority::Low && start.elapsed() >= budget {
                task.state.deferrals += 1;
                stats.deferred += 1;
                if task.state.deferrals == deferral_limit {
                    warn!(
                        bridge = %self.name,
                        device = %device_id,
                        channel = %task.channel.address(),
                        deferrals = task.state.deferrals,
                        "cycle overrun: low-priority task promoted"
                    );
                }
                continue;
            }

            task.mark_attempt(Instant::now());
            match direction {
                TaskDirection::Read => self.run_read(&device_id, task, &mut stats).await,
                TaskDirection::Write => self.run_write(&device_id, task, &mut stats).await,
            }
        }
        stats
    }

    async fn run_read(&self, device_id: &str, task: &mut Task, stats: &mut CycleStats) {
        let result = tokio::time::timeout(self.task_timeout, self.executor.execute_read(task)).await;
        match result {
            Ok(Ok(staged)) => {
                task.channel.set_next_value(staged);
                task.mark_success();
                self.connected.store(true, Ordering::Relaxed);
                stats.executed += 1;
            },
            Ok(Err(e)) => self.handle_failure(device_id, task, e, stats),
            Err(_) => {
                let e = EdgeError::Timeout(format!("{}/{device_id}", self.name));
                self.handle_failure(device_id, task, e, stats);
            },
        }
    }

    async fn run_write(&self, device_id: &str, task: &mut Task, stats: &mut CycleStats) {
        // Writes are driven by a consumed staged value; nothing staged
        // means nothing to send this cycle.
        let Some(value) = task.channel.get_next_write_value_and_reset() else {
            stats.skipped_writes += 1;
            return;
        };
        let result =
            tokio::time::timeout(self.task_timeout, self.executor.execute_write(task, value)).await;
        match result {
            Ok(Ok(())) => {
                task.mark_success();
                self.connected.store(true, Ordering::Relaxed);
                stats.executed += 1;
            },
            Ok(Err(e)) => self.handle_failure(device_id, task, e, stats),
            Err(_) => {
                let e = EdgeError::Timeout(format!("{}/{device_id}", self.name));
                self.handle_failure(device_id, task, e, stats);
            },
        }
    }

    fn handle_failure(&self, device_id: &str, task: &mut Task, e: EdgeError, stats: &mut CycleStats) {
        stats.failed += 1;
        if e.is_retryable() {
            // Transport problem: the channel keeps its stale value; the
            // task is retried once its interval elapses again.
            let failures = task.mark_failure();
            if failures >= self.failure_threshold {
                self.connected.store(false, Ordering::Relaxed);
                warn!(
                    bridge = %self.name,
                    device = %device_id,
                    channel = %task.channel.address(),
                    failures,
                    error = %e,
                    "bridge degraded"
                );
            } else {
                debug!(
                    bridge = %self.name,
                    device = %device_id,
                    failures,
                    error = %e,
                    "task failed, will retry"
                );
            }
        } else {
            // Conversion or addressing problem: retrying cannot help. A
            // failed read leaves the channel undefined for this cycle so
            // nobody consumes a misassigned value; a failed write only
            // loses the request.
            if task.direction == TaskDirection::Read {
                task.channel.set_next_value(None);
            }
            warn!(
                bridge = %self.name,
                device = %device_id,
                channel = %task.channel.address(),
                category = e.category(),
                error = %e,
                "task dropped, not retryable"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::TaskAddress;
    use crate::protocols::rest::RestAddress;
    use edge_core::{AccessMode, Channel, ChannelAddress, ChannelType, Doc};
    use parking_lot::Mutex as SyncMutex;
    use std::sync::Arc;

    /// Executor whose behavior is scripted per call
    struct ScriptedExecutor {
        delay: Duration,
        results: SyncMutex<Vec<EdgeResult<Option<ChannelValue>>>>,
        writes: SyncMutex<Vec<ChannelValue>>,
    }

    impl ScriptedExecutor {
        fn ok(value: f64) -> Self {
            Self {
                delay: Duration::ZERO,
                results: SyncMutex::new(vec![Ok(Some(ChannelValue::Float(value)))]),
                writes: SyncMutex::new(Vec::new()),
            }
        }

        fn failing(n: usize) -> Self {
            Self {
                delay: Duration::ZERO,
                results: SyncMutex::new(
                    (0..n).map(|_| Err(EdgeError::transport("link down"))).collect(),
                ),
                writes: SyncMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProtocolExecutor for ScriptedExecutor {
        fn protocol(&self) -> &'static str {
            "scripted"
        }

        async fn execute_read(&self, _task: &mut Task) -> EdgeResult<Option<ChannelValue>> {
            tokio::time::sleep(self.delay).await;
            let mut results = self.results.lock();
            if results.is_empty() {
                Ok(Some(ChannelValue::Float(0.0)))
            } else {
                results.remove(0)
            }
        }

        async fn execute_write(&self, _task: &mut Task, value: ChannelValue) -> EdgeResult<()> {
            tokio::time::sleep(self.delay).await;
            self.writes.lock().push(value);
            Ok(())
        }
    }

    fn float_channel(access: AccessMode) -> Arc<Channel> {
        Channel::new(
            ChannelAddress::new("meter0", "Power"),
            Doc::of(ChannelType::Float).access_mode(access),
        )
    }

    fn read_task(channel: Arc<Channel>, priority: Priority) -> Task {
        Task::new(
            channel,
            TaskAddress::Rest(RestAddress::new("meter0", "Power")),
            TaskDirection::Read,
            priority,
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn test_read_stages_next_value() {
        let bridge = Bridge::new(
            "rest0",
            Box::new(ScriptedExecutor::ok(230.0)),
            3,
            Duration::from_secs(1),
        );
        let channel = float_channel(AccessMode::ReadOnly);
        bridge
            .add_device("meter0", vec![read_task(channel.clone(), Priority::High)])
            .await
            .unwrap();

        let stats = bridge
            .execute_cycle(TaskDirection::Read, Duration::from_secs(1), 5)
            .await;
        assert_eq!(stats.executed, 1);

        // Staged, not yet visible.
        assert_eq!(channel.value(), None);
        channel.next_process_image();
        assert_eq!(channel.value(), Some(ChannelValue::Float(230.0)));
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn test_transport_failure_keeps_stale_value_and_degrades() {
        let bridge = Bridge::new(
            "bus0",
            Box::new(ScriptedExecutor::failing(3)),
            3,
            Duration::from_secs(1),
        );
        let channel = float_channel(AccessMode::ReadOnly);
        channel.set_next_value(Some(ChannelValue::Float(42.0)));
        channel.next_process_image();
        bridge
            .add_device("meter0", vec![read_task(channel.clone(), Priority::High)])
            .await
            .unwrap();

        for _ in 0..3 {
            bridge
                .execute_cycle(TaskDirection::Read, Duration::from_secs(1), 5)
                .await;
            channel.next_process_image();
        }

        // Stale value survives transport failures; health flag degrades.
        assert_eq!(channel.value(), Some(ChannelValue::Float(42.0)));
        assert!(!bridge.is_healthy());
        assert!(logs_contain("bridge degraded"));
    }

    #[tokio::test]
    async fn test_conversion_failure_clears_channel() {
        let executor = ScriptedExecutor {
            delay: Duration::ZERO,
            results: SyncMutex::new(vec![Err(EdgeError::conversion("out of range"))]),
            writes: SyncMutex::new(Vec::new()),
        };
        let bridge = Bridge::new("bus0", Box::new(executor), 3, Duration::from_secs(1));
        let channel = float_channel(AccessMode::ReadOnly);
        channel.set_next_value(Some(ChannelValue::Float(42.0)));
        channel.next_process_image();
        bridge
            .add_device("meter0", vec![read_task(channel.clone(), Priority::High)])
            .await
            .unwrap();

        bridge
            .execute_cycle(TaskDirection::Read, Duration::from_secs(1), 5)
            .await;
        channel.next_process_image();

        assert_eq!(channel.value(), None);
        // Conversion failures do not degrade the link.
        assert!(bridge.is_healthy());
    }

    #[tokio::test]
    async fn test_budget_defers_low_priority() {
        let executor = ScriptedExecutor {
            delay: Duration::from_millis(30),
            results: SyncMutex::new(Vec::new()),
            writes: SyncMutex::new(Vec::new()),
        };
        let bridge = Bridge::new("bus0", Box::new(executor), 3, Duration::from_secs(1));

        let high_a = float_channel(AccessMode::ReadOnly);
        let high_b = float_channel(AccessMode::ReadOnly);
        let low = float_channel(AccessMode::ReadOnly);
        bridge
            .add_device(
                "meter0",
                vec![
                    read_task(low.clone(), Priority::Low),
                    read_task(high_a.clone(), Priority::High),
                    read_task(high_b.clone(), Priority::High),
                ],
            )
            .await
            .unwrap();

        // Budget fits roughly two tasks; both HIGH run, the LOW defers.
        let stats = bridge
            .execute_cycle(TaskDirection::Read, Duration::from_millis(50), 5)
            .await;
        assert_eq!(stats.executed, 2);
        assert_eq!(stats.deferred, 1);

        // The deferred task is still ready next cycle.
        let stats = bridge
            .execute_cycle(TaskDirection::Read, Duration::from_secs(1), 5)
            .await;
        assert_eq!(stats.executed, 3);
        assert_eq!(stats.deferred, 0);
    }

    #[tokio::test]
    async fn test_write_skipped_without_staged_value() {
        let executor = ScriptedExecutor::ok(0.0);
        let bridge = Bridge::new("bus0", Box::new(executor), 3, Duration::from_secs(1));
        let channel = float_channel(AccessMode::ReadWrite);
        let task = Task::new(
            channel.clone(),
            TaskAddress::Rest(RestAddress::new("meter0", "Power")),
            TaskDirection::Write,
            Priority::High,
            Duration::ZERO,
        );
        bridge.add_device("meter0", vec![task]).await.unwrap();

        let stats = bridge
            .execute_cycle(TaskDirection::Write, Duration::from_secs(1), 5)
            .await;
        assert_eq!(stats.skipped_writes, 1);
        assert_eq!(stats.executed, 0);

        channel.set_next_write_value(ChannelValue::Float(50.0)).unwrap();
        let stats = bridge
            .execute_cycle(TaskDirection::Write, Duration::from_secs(1), 5)
            .await;
        assert_eq!(stats.executed, 1);

        // The staged value was consumed; a repeat cycle sends nothing.
        let stats = bridge
            .execute_cycle(TaskDirection::Write, Duration::from_secs(1), 5)
            .await;
        assert_eq!(stats.skipped_writes, 1);
    }

    #[tokio::test]
    async fn test_duplicate_device_rejected() {
        let bridge = Bridge::new(
            "bus0",
            Box::new(ScriptedExecutor::ok(0.0)),
            3,
            Duration::from_secs(1),
        );
        bridge.add_device("meter0", Vec::new()).await.unwrap();
        assert!(bridge.add_device("meter0", Vec::new()).await.is_err());
        bridge.remove_device("meter0").await.unwrap();
        assert!(bridge.remove_device("meter0").await.is_err());
    }
}
