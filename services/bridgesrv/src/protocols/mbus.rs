//! M-Bus bridge: record-oriented meter reads
//!
//! M-Bus meters answer a poll with their full record set; a task picks one
//! record out of it by position. Some meters shuffle record positions
//! between firmware revisions, so tasks can opt into dynamic addressing:
//! when the configured position no longer carries the declared unit, the
//! resolver searches the record set for a unit match and remaps the task
//! in place. M-Bus is read-only; write tasks are rejected.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use edge_core::{ChannelValue, Unit};
use errors::{EdgeError, EdgeResult};

use crate::core::bridge::ProtocolExecutor;
use crate::core::convert::scale_raw;
use crate::core::task::{Task, TaskAddress};

/// One data record from a meter response. Position in the response vector
/// is the record index tasks address.
#[derive(Debug, Clone, PartialEq)]
pub struct MbusRecord {
    pub unit: Unit,
    pub value: f64,
}

impl MbusRecord {
    pub fn new(unit: Unit, value: f64) -> Self {
        Self { unit, value }
    }
}

/// Address of one record task
#[derive(Debug, Clone, PartialEq)]
pub struct MbusAddress {
    pub primary_address: u8,
    pub record_index: usize,
    pub scale: f64,
    /// Remap the record index by unit match when the configured position
    /// stops carrying the declared unit
    pub dynamic: bool,
}

impl MbusAddress {
    pub fn new(primary_address: u8, record_index: usize) -> Self {
        Self {
            primary_address,
            record_index,
            scale: 1.0,
            dynamic: false,
        }
    }

    #[must_use]
    pub fn scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    #[must_use]
    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }
}

/// Meter poll a driver must provide. One poll returns the complete record
/// set of the addressed meter.
#[async_trait]
pub trait MbusTransport: Send + Sync {
    async fn read_records(&mut self, primary_address: u8) -> EdgeResult<Vec<MbusRecord>>;
}

/// Where a record was found relative to its configured position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Configured position carries the declared unit
    Match,
    /// Exactly one other record carries the declared unit
    Remapped(usize),
    /// No record, or more than one, carries the declared unit
    Unavailable,
}

/// Locate the record for a declared unit. The configured position wins
/// when it matches; otherwise a unit search must be unambiguous, since
/// picking one of several same-unit records would silently misassign a
/// value.
pub fn resolve_record_position(
    records: &[MbusRecord],
    declared_unit: Unit,
    configured_index: usize,
) -> Resolution {
    if records
        .get(configured_index)
        .is_some_and(|r| r.unit == declared_unit)
    {
        return Resolution::Match;
    }
    let mut matches = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.unit == declared_unit)
        .map(|(i, _)| i);
    match (matches.next(), matches.next()) {
        (Some(index), None) => Resolution::Remapped(index),
        _ => Resolution::Unavailable,
    }
}

/// In-memory meter for tests and simulated deployments
#[derive(Debug, Default)]
pub struct SimulatedMbusTransport {
    meters: HashMap<u8, Vec<MbusRecord>>,
}

impl SimulatedMbusTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_meter(&mut self, primary_address: u8, records: Vec<MbusRecord>) {
        self.meters.insert(primary_address, records);
    }
}

#[async_trait]
impl MbusTransport for SimulatedMbusTransport {
    async fn read_records(&mut self, primary_address: u8) -> EdgeResult<Vec<MbusRecord>> {
        self.meters
            .get(&primary_address)
            .cloned()
            .ok_or_else(|| EdgeError::transport(format!("no meter at address {primary_address}")))
    }
}

/// Maps record tasks onto an M-Bus transport
pub struct MbusExecutor {
    transport: Mutex<Box<dyn MbusTransport>>,
}

impl MbusExecutor {
    pub fn new(transport: Box<dyn MbusTransport>) -> Self {
        Self {
            transport: Mutex::new(transport),
        }
    }
}

#[async_trait]
impl ProtocolExecutor for MbusExecutor {
    fn protocol(&self) -> &'static str {
        "mbus"
    }

    async fn execute_read(&self, task: &mut Task) -> EdgeResult<Option<ChannelValue>> {
        let TaskAddress::Mbus(addr) = &task.address else {
            return Err(EdgeError::addressing(format!(
                "M-Bus executor got a non-M-Bus task address: {:?}",
                task.address
            )));
        };
        let (primary, configured, scale, dynamic) =
            (addr.primary_address, addr.record_index, addr.scale, addr.dynamic);

        let records = self.transport.lock().await.read_records(primary).await?;

        let index = if dynamic {
            let declared = task.channel.unit();
            match resolve_record_position(&records, declared, configured) {
                Resolution::Match => configured,
                Resolution::Remapped(index) => {
                    info!(
                        channel = %task.channel.address(),
                        from = configured,
                        to = index,
                        "record position moved, remapping task"
                    );
                    // Cache the new position until the next mismatch.
                    if let TaskAddress::Mbus(addr) = &mut task.address {
                        addr.record_index = index;
                    }
                    index
                },
                Resolution::Unavailable => {
                    warn!(
                        channel = %task.channel.address(),
                        unit = ?declared,
                        "no unambiguous record for declared unit"
                    );
                    return Err(EdgeError::addressing(format!(
                        "meter {primary} has no unambiguous record with unit {declared:?}"
                    )));
                },
            }
        } else {
            configured
        };

        let record = records.get(index).ok_or_else(|| {
            EdgeError::addressing(format!(
                "meter {primary} returned {} records, index {index} out of range",
                records.len()
            ))
        })?;
        Ok(Some(ChannelValue::Float(scale_raw(record.value, scale))))
    }

    async fn execute_write(&self, _task: &mut Task, _value: ChannelValue) -> EdgeResult<()> {
        Err(EdgeError::config("M-Bus bridge is read-only"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use edge_core::{Channel, ChannelAddress, ChannelType, Doc};

    use crate::core::task::{Priority, TaskDirection};

    fn heat_meter() -> Vec<MbusRecord> {
        vec![
            MbusRecord::new(Unit::KilowattHour, 1250.0),
            MbusRecord::new(Unit::CubicMeter, 84.2),
            MbusRecord::new(Unit::DegreeCelsius, 65.0),
            MbusRecord::new(Unit::DegreeCelsius, 42.0),
        ]
    }

    #[test]
    fn test_configured_position_wins() {
        assert_eq!(
            resolve_record_position(&heat_meter(), Unit::CubicMeter, 1),
            Resolution::Match
        );
        // Even with another candidate elsewhere, a matching configured
        // position resolves without a search.
        assert_eq!(
            resolve_record_position(&heat_meter(), Unit::DegreeCelsius, 3),
            Resolution::Match
        );
    }

    #[test]
    fn test_single_unit_match_remaps() {
        assert_eq!(
            resolve_record_position(&heat_meter(), Unit::KilowattHour, 2),
            Resolution::Remapped(0)
        );
    }

    #[test]
    fn test_ambiguous_or_missing_is_unavailable() {
        // Two temperature records, none at the configured position.
        assert_eq!(
            resolve_record_position(&heat_meter(), Unit::DegreeCelsius, 0),
            Resolution::Unavailable
        );
        assert_eq!(
            resolve_record_position(&heat_meter(), Unit::Bar, 0),
            Resolution::Unavailable
        );
    }

    fn record_task(addr: MbusAddress, unit: Unit) -> Task {
        let channel = Channel::new(
            ChannelAddress::new("heat0", "TotalEnergy"),
            Doc::of(ChannelType::Float).unit(unit),
        );
        Task::new(
            channel,
            TaskAddress::Mbus(addr),
            TaskDirection::Read,
            Priority::Low,
            Duration::ZERO,
        )
    }

    fn meter_executor() -> MbusExecutor {
        let mut sim = SimulatedMbusTransport::new();
        sim.set_meter(5, heat_meter());
        MbusExecutor::new(Box::new(sim))
    }

    #[tokio::test]
    async fn test_read_configured_record() {
        let exec = meter_executor();
        let mut task = record_task(MbusAddress::new(5, 0), Unit::KilowattHour);

        let value = exec.execute_read(&mut task).await.unwrap();
        assert_eq!(value, Some(ChannelValue::Float(1250.0)));
    }

    #[tokio::test]
    async fn test_dynamic_remap_is_cached_in_task() {
        let exec = meter_executor();
        // Configured for index 2, but the energy record lives at 0.
        let mut task = record_task(MbusAddress::new(5, 2).dynamic(), Unit::KilowattHour);

        let value = exec.execute_read(&mut task).await.unwrap();
        assert_eq!(value, Some(ChannelValue::Float(1250.0)));

        let TaskAddress::Mbus(addr) = &task.address else {
            panic!("address kind changed");
        };
        assert_eq!(addr.record_index, 0);
    }

    #[tokio::test]
    async fn test_ambiguous_unit_is_addressing_error() {
        let exec = meter_executor();
        let mut task = record_task(MbusAddress::new(5, 0).dynamic(), Unit::DegreeCelsius);

        let err = exec.execute_read(&mut task).await.unwrap_err();
        assert!(matches!(err, EdgeError::Addressing(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_static_out_of_range_index() {
        let exec = meter_executor();
        let mut task = record_task(MbusAddress::new(5, 9), Unit::KilowattHour);

        let err = exec.execute_read(&mut task).await.unwrap_err();
        assert!(matches!(err, EdgeError::Addressing(_)));
    }

    #[tokio::test]
    async fn test_write_rejected() {
        let exec = meter_executor();
        let mut task = record_task(MbusAddress::new(5, 0), Unit::KilowattHour);

        let err = exec
            .execute_write(&mut task, ChannelValue::Float(1.0))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
