//! Cycle scheduler
//!
//! One global cycle drives everything: bridges execute their read tasks
//! concurrently (each serializing its own transport), a single
//! process-image pass promotes all staged values, controllers run against
//! the freshly promoted snapshot, write tasks push consumed requests out,
//! and the cycle-mode timers tick. The phases are an explicit enum
//! dispatched in a fixed order; there is no event bus.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, info};

use edge_core::{ComponentRegistry, TimerService};

use super::bridge::{Bridge, CycleStats};
use super::task::TaskDirection;

/// Phases of one global cycle, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// Bridges acquire inputs; staged values are not yet visible
    BeforeProcessImage,
    /// Promotion happened; controllers read the consistent snapshot and
    /// stage write requests
    AfterControllers,
    /// Bridges push consumed write requests to the devices
    ExecuteWrite,
}

impl CyclePhase {
    pub const ORDER: [CyclePhase; 3] = [
        CyclePhase::BeforeProcessImage,
        CyclePhase::AfterControllers,
        CyclePhase::ExecuteWrite,
    ];
}

/// Controller hook invoked between promotion and the write phase
pub type ControllerFn = Box<dyn Fn(&ComponentRegistry) + Send + Sync>;

/// Summary of one cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleReport {
    pub cycle: u64,
    pub reads: CycleStats,
    pub writes: CycleStats,
    pub channels_promoted: usize,
}

/// Owns the bridges and drives the global cycle
pub struct CycleScheduler {
    registry: Arc<ComponentRegistry>,
    timers: Arc<TimerService>,
    bridges: Vec<Arc<Bridge>>,
    controllers: Vec<ControllerFn>,
    budget: Duration,
    deferral_limit: u32,
}

impl CycleScheduler {
    pub fn new(
        registry: Arc<ComponentRegistry>,
        timers: Arc<TimerService>,
        budget: Duration,
        deferral_limit: u32,
    ) -> Self {
        Self {
            registry,
            timers,
            bridges: Vec::new(),
            controllers: Vec::new(),
            budget,
            deferral_limit,
        }
    }

    pub fn add_bridge(&mut self, bridge: Arc<Bridge>) {
        info!(bridge = bridge.name(), protocol = bridge.protocol(), "bridge added");
        self.bridges.push(bridge);
    }

    /// Register a controller hook, run in registration order each cycle
    pub fn add_controller(&mut self, controller: ControllerFn) {
        self.controllers.push(controller);
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn timers(&self) -> &Arc<TimerService> {
        &self.timers
    }

    pub fn bridges(&self) -> &[Arc<Bridge>] {
        &self.bridges
    }

    /// Run one global cycle
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport {
            cycle: self.timers.current_cycle(),
            ..CycleReport::default()
        };

        for phase in CyclePhase::ORDER {
            match phase {
                CyclePhase::BeforeProcessImage => {
                    report.reads = self.run_bridges(TaskDirection::Read).await;
                    report.channels_promoted = self.registry.process_image();
                },
                CyclePhase::AfterControllers => {
                    for controller in &self.controllers {
                        controller(&self.registry);
                    }
                },
                CyclePhase::ExecuteWrite => {
                    report.writes = self.run_bridges(TaskDirection::Write).await;
                },
            }
        }

        self.timers.tick();
        debug!(
            cycle = report.cycle,
            reads = report.reads.executed,
            deferred = report.reads.deferred,
            writes = report.writes.executed,
            "cycle finished"
        );
        report
    }

    /// Run all bridges for one direction concurrently. Bridges overlap
    /// (blocking I/O on one transport must not stall the others); each
    /// bridge serializes its own tasks internally.
    async fn run_bridges(&self, direction: TaskDirection) -> CycleStats {
        let budget = self.budget;
        let deferral_limit = self.deferral_limit;

        let handles: Vec<_> = self
            .bridges
            .iter()
            .map(|bridge| {
                let bridge = bridge.clone();
                tokio::spawn(async move {
                    bridge.execute_cycle(direction, budget, deferral_limit).await
                })
            })
            .collect();

        let mut total = CycleStats::default();
        for result in join_all(handles).await {
            match result {
                Ok(stats) => total.merge(stats),
                Err(e) => error!(error = %e, "bridge worker panicked"),
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bridge::ProtocolExecutor;
    use crate::core::task::{Priority, Task, TaskAddress, TaskDirection};
    use crate::protocols::rest::RestAddress;
    use async_trait::async_trait;
    use edge_core::{AccessMode, ChannelDecl, ChannelType, ChannelValue, Doc};
    use errors::EdgeResult;
    use parking_lot::Mutex;

    struct CountingExecutor {
        reads: Arc<Mutex<u32>>,
        writes: Arc<Mutex<Vec<ChannelValue>>>,
    }

    #[async_trait]
    impl ProtocolExecutor for CountingExecutor {
        fn protocol(&self) -> &'static str {
            "counting"
        }

        async fn execute_read(&self, _task: &mut Task) -> EdgeResult<Option<ChannelValue>> {
            let mut reads = self.reads.lock();
            *reads += 1;
            Ok(Some(ChannelValue::Float(f64::from(*reads))))
        }

        async fn execute_write(&self, _task: &mut Task, value: ChannelValue) -> EdgeResult<()> {
            self.writes.lock().push(value);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_full_cycle_read_promote_control_write() {
        let registry = Arc::new(ComponentRegistry::new());
        let timers = Arc::new(TimerService::new());
        let comp = registry
            .activate(
                "meter0",
                vec![
                    ChannelDecl::new("Power", Doc::of(ChannelType::Float)),
                    ChannelDecl::new(
                        "SetLimit",
                        Doc::of(ChannelType::Float).access_mode(AccessMode::ReadWrite),
                    ),
                ],
            )
            .unwrap();
        let power = comp.channel("Power").unwrap();
        let set_limit = comp.channel("SetLimit").unwrap();

        let writes = Arc::new(Mutex::new(Vec::new()));
        let executor = CountingExecutor {
            reads: Arc::new(Mutex::new(0)),
            writes: writes.clone(),
        };
        let bridge = Arc::new(Bridge::new(
            "bus0",
            Box::new(executor),
            3,
            Duration::from_secs(1),
        ));
        bridge
            .add_device(
                "meter0",
                vec![
                    Task::new(
                        power.clone(),
                        TaskAddress::Rest(RestAddress::new("meter0", "Power")),
                        TaskDirection::Read,
                        Priority::High,
                        Duration::ZERO,
                    ),
                    Task::new(
                        set_limit.clone(),
                        TaskAddress::Rest(RestAddress::new("meter0", "SetLimit")),
                        TaskDirection::Write,
                        Priority::High,
                        Duration::ZERO,
                    ),
                ],
            )
            .await
            .unwrap();

        let mut scheduler =
            CycleScheduler::new(registry.clone(), timers.clone(), Duration::from_secs(1), 5);
        scheduler.add_bridge(bridge);

        // Controller: once power is visible, request a limit write.
        scheduler.add_controller(Box::new(move |registry| {
            let comp = registry.get("meter0").unwrap();
            let power = comp.channel("Power").unwrap();
            if power.value().is_some() {
                comp.channel("SetLimit")
                    .unwrap()
                    .set_next_write_value(ChannelValue::Float(100.0))
                    .unwrap();
            }
        }));

        // Cycle 1: read + promote; the controller stages a write that goes
        // out in the same cycle's write phase.
        let report = scheduler.run_cycle().await;
        assert_eq!(report.reads.executed, 1);
        assert_eq!(power.value(), Some(ChannelValue::Float(1.0)));
        assert_eq!(report.writes.executed, 1);
        assert_eq!(writes.lock().as_slice(), &[ChannelValue::Float(100.0)]);

        assert_eq!(timers.current_cycle(), 1);
    }

    #[tokio::test]
    async fn test_reader_sees_consistent_snapshot() {
        let registry = Arc::new(ComponentRegistry::new());
        let timers = Arc::new(TimerService::new());
        let comp = registry
            .activate(
                "meter0",
                vec![ChannelDecl::new("Power", Doc::of(ChannelType::Float))],
            )
            .unwrap();
        let power = comp.channel("Power").unwrap();

        let executor = CountingExecutor {
            reads: Arc::new(Mutex::new(0)),
            writes: Arc::new(Mutex::new(Vec::new())),
        };
        let bridge = Arc::new(Bridge::new(
            "bus0",
            Box::new(executor),
            3,
            Duration::from_secs(1),
        ));
        bridge
            .add_device(
                "meter0",
                vec![Task::new(
                    power.clone(),
                    TaskAddress::Rest(RestAddress::new("meter0", "Power")),
                    TaskDirection::Read,
                    Priority::High,
                    Duration::ZERO,
                )],
            )
            .await
            .unwrap();

        let mut scheduler =
            CycleScheduler::new(registry.clone(), timers, Duration::from_secs(1), 5);
        scheduler.add_bridge(bridge);

        scheduler.run_cycle().await;
        assert_eq!(power.value(), Some(ChannelValue::Float(1.0)));
        scheduler.run_cycle().await;
        assert_eq!(power.value(), Some(ChannelValue::Float(2.0)));
    }
}
