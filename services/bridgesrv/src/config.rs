//! Service configuration
//!
//! Loaded with `common::load_config` (file + `BRIDGESRV_` environment
//! overrides). Validation runs at startup; invalid values are fatal per
//! the error taxonomy — a service with a zero cycle time or a budget
//! larger than the cycle cannot honor its scheduling guarantees.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use errors::{EdgeError, EdgeResult};

pub const ENV_PREFIX: &str = "BRIDGESRV_";

/// Supported bridge protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Modbus,
    Mbus,
    Mqtt,
    Rest,
}

/// One configured bridge: a named physical transport endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub name: String,
    pub protocol: ProtocolKind,
    /// Transport endpoint: host:port, serial device, broker URL or HTTP
    /// base URL depending on the protocol
    pub endpoint: String,
    /// Run the bridge against the built-in loopback transport instead of
    /// the endpoint. Useful for commissioning without field wiring.
    #[serde(default)]
    pub simulated: bool,
}

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global cycle period
    #[serde(default = "default_cycle_ms")]
    pub cycle_ms: u64,
    /// Per-bridge execution budget within one cycle. When unset, 80% of
    /// `cycle_ms` is used, so shortening the cycle never strands a stale
    /// absolute default above it.
    #[serde(default)]
    pub budget_ms: Option<u64>,
    /// Per-task I/O timeout
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    /// Consecutive task failures before a bridge is flagged degraded
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Cycles a LOW task may be deferred before it is promoted
    #[serde(default = "default_deferral_limit")]
    pub deferral_limit: u32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub bridges: Vec<BridgeConfig>,
}

fn default_cycle_ms() -> u64 {
    1000
}
fn default_task_timeout_ms() -> u64 {
    2000
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_deferral_limit() -> u32 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cycle_ms: default_cycle_ms(),
            budget_ms: None,
            task_timeout_ms: default_task_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            deferral_limit: default_deferral_limit(),
            log_level: default_log_level(),
            bridges: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> EdgeResult<Self> {
        let config: Self = common::load_config(path, ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EdgeResult<()> {
        if self.cycle_ms == 0 {
            return Err(EdgeError::InvalidConfig {
                field: "cycle_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if let Some(budget) = self.budget_ms {
            if budget == 0 || budget > self.cycle_ms {
                return Err(EdgeError::InvalidConfig {
                    field: "budget_ms".into(),
                    reason: format!("must be in 1..={} (cycle_ms)", self.cycle_ms),
                });
            }
        }
        if self.task_timeout_ms == 0 {
            return Err(EdgeError::InvalidConfig {
                field: "task_timeout_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }
        let mut names: Vec<&str> = self.bridges.iter().map(|b| b.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.bridges.len() {
            return Err(EdgeError::InvalidConfig {
                field: "bridges".into(),
                reason: "bridge names must be unique".into(),
            });
        }
        Ok(())
    }

    pub fn cycle(&self) -> Duration {
        Duration::from_millis(self.cycle_ms)
    }

    pub fn budget(&self) -> Duration {
        let budget = self
            .budget_ms
            .unwrap_or_else(|| (self.cycle_ms * 4 / 5).max(1));
        Duration::from_millis(budget)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}
