//! Modbus bridge: register/coil tasks over a pluggable transport
//!
//! The codec converts between 16-bit register words and channel values for
//! the usual industrial register layouts (16/32/64-bit integers and IEEE
//! floats in the four common byte orders). The transport trait carries the
//! raw function-code operations; drivers supply TCP or RTU behind it, and
//! a loopback implementation backs tests and simulated deployments.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use edge_core::ChannelValue;
use errors::{EdgeError, EdgeResult};

use crate::core::bridge::ProtocolExecutor;
use crate::core::convert::{self, unscale, value_as_f64};
use crate::core::task::{Task, TaskAddress};

/// Byte order of a multi-register value on the wire.
///
/// Letters name the bytes of a 32-bit value, most significant first:
/// `BigEndian` = ABCD, `LittleEndian` = DCBA, `BigEndianSwap` = BADC
/// (big-endian word order, swapped bytes within each word) and
/// `LittleEndianSwap` = CDAB (reversed word order, big-endian bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
    BigEndianSwap,
    LittleEndianSwap,
}

impl Default for ByteOrder {
    fn default() -> Self {
        Self::BigEndian
    }
}

impl FromStr for ByteOrder {
    type Err = EdgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abcd" | "big_endian" => Ok(Self::BigEndian),
            "dcba" | "little_endian" => Ok(Self::LittleEndian),
            "badc" | "big_endian_swap" => Ok(Self::BigEndianSwap),
            "cdab" | "little_endian_swap" => Ok(Self::LittleEndianSwap),
            other => Err(EdgeError::config(format!("unknown byte order {other:?}"))),
        }
    }
}

impl ByteOrder {
    /// Map wire bytes to canonical big-endian, or canonical back to wire.
    /// Every arrangement is its own inverse, so one function serves both
    /// directions.
    pub fn arrange(&self, mut bytes: Vec<u8>) -> Vec<u8> {
        match self {
            Self::BigEndian => bytes,
            Self::LittleEndian => {
                bytes.reverse();
                bytes
            },
            Self::BigEndianSwap => {
                for word in bytes.chunks_mut(2) {
                    word.reverse();
                }
                bytes
            },
            Self::LittleEndianSwap => bytes
                .chunks(2)
                .rev()
                .flat_map(|word| word.iter().copied())
                .collect(),
        }
    }
}

/// Wire representation of one register task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterType {
    Bool,
    U16,
    I16,
    U32,
    I32,
    F32,
    U64,
    I64,
    F64,
}

impl RegisterType {
    /// Number of 16-bit registers this type occupies
    pub fn register_count(&self) -> u16 {
        match self {
            Self::Bool | Self::U16 | Self::I16 => 1,
            Self::U32 | Self::I32 | Self::F32 => 2,
            Self::U64 | Self::I64 | Self::F64 => 4,
        }
    }
}

/// Modbus data area. Coils and holding registers are writable; discrete
/// inputs and input registers are device-side only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModbusArea {
    Coil,
    DiscreteInput,
    Holding,
    Input,
}

impl ModbusArea {
    pub fn read_function_code(&self) -> u8 {
        match self {
            Self::Coil => 0x01,
            Self::DiscreteInput => 0x02,
            Self::Holding => 0x03,
            Self::Input => 0x04,
        }
    }

    pub fn is_bit_area(&self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Coil | Self::Holding)
    }
}

/// Address of one register or coil task
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusAddress {
    pub unit_id: u8,
    pub area: ModbusArea,
    pub register: u16,
    pub register_type: RegisterType,
    pub byte_order: ByteOrder,
    /// Raw-to-engineering multiplier, e.g. 0.1 for deciwatt registers
    pub scale: f64,
}

impl ModbusAddress {
    pub fn new(unit_id: u8, area: ModbusArea, register: u16, register_type: RegisterType) -> Self {
        Self {
            unit_id,
            area,
            register,
            register_type,
            byte_order: ByteOrder::default(),
            scale: 1.0,
        }
    }

    #[must_use]
    pub fn byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    #[must_use]
    pub fn scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }
}

/// Decode register words into a raw (unscaled) channel value
pub fn decode_registers(
    regs: &[u16],
    ty: RegisterType,
    order: ByteOrder,
) -> EdgeResult<ChannelValue> {
    let expected = ty.register_count() as usize;
    if regs.len() != expected {
        return Err(EdgeError::conversion(format!(
            "{ty:?} needs {expected} registers, got {}",
            regs.len()
        )));
    }
    let bytes: Vec<u8> = regs.iter().flat_map(|r| r.to_be_bytes()).collect();
    let be = order.arrange(bytes);

    let value = match ty {
        RegisterType::Bool => ChannelValue::Bool(u16::from_be_bytes([be[0], be[1]]) != 0),
        RegisterType::U16 => ChannelValue::Int(i64::from(u16::from_be_bytes([be[0], be[1]]))),
        RegisterType::I16 => ChannelValue::Int(i64::from(i16::from_be_bytes([be[0], be[1]]))),
        RegisterType::U32 => ChannelValue::Int(i64::from(u32::from_be_bytes([
            be[0], be[1], be[2], be[3],
        ]))),
        RegisterType::I32 => ChannelValue::Int(i64::from(i32::from_be_bytes([
            be[0], be[1], be[2], be[3],
        ]))),
        RegisterType::F32 => ChannelValue::Float(f64::from(f32::from_be_bytes([
            be[0], be[1], be[2], be[3],
        ]))),
        RegisterType::U64 => {
            let raw = u64::from_be_bytes([be[0], be[1], be[2], be[3], be[4], be[5], be[6], be[7]]);
            let signed = i64::try_from(raw).map_err(|_| {
                EdgeError::conversion(format!("u64 register value {raw} exceeds i64 range"))
            })?;
            ChannelValue::Int(signed)
        },
        RegisterType::I64 => ChannelValue::Int(i64::from_be_bytes([
            be[0], be[1], be[2], be[3], be[4], be[5], be[6], be[7],
        ])),
        RegisterType::F64 => ChannelValue::Float(f64::from_be_bytes([
            be[0], be[1], be[2], be[3], be[4], be[5], be[6], be[7],
        ])),
    };
    Ok(value)
}

fn checked_int(raw: f64, ty: RegisterType) -> EdgeResult<i64> {
    let rounded = raw.round();
    let (min, max) = match ty {
        RegisterType::Bool | RegisterType::U16 => (0.0, f64::from(u16::MAX)),
        RegisterType::I16 => (f64::from(i16::MIN), f64::from(i16::MAX)),
        RegisterType::U32 => (0.0, f64::from(u32::MAX)),
        RegisterType::I32 => (f64::from(i32::MIN), f64::from(i32::MAX)),
        // Channel values are i64, so the usable u64 range stops there too.
        RegisterType::U64 => (0.0, i64::MAX as f64),
        RegisterType::I64 => (i64::MIN as f64, i64::MAX as f64),
        RegisterType::F32 | RegisterType::F64 => unreachable!("float types take no range check"),
    };
    if !rounded.is_finite() || rounded < min || rounded > max {
        return Err(EdgeError::conversion(format!(
            "value {raw} out of range for {ty:?} register"
        )));
    }
    Ok(rounded as i64)
}

/// Encode a raw (already unscaled) channel value into register words
pub fn encode_registers(
    value: &ChannelValue,
    ty: RegisterType,
    order: ByteOrder,
) -> EdgeResult<Vec<u16>> {
    let raw = value_as_f64(value)?;
    let be: Vec<u8> = match ty {
        RegisterType::Bool => {
            let bit: u16 = if value.as_bool().unwrap_or(raw != 0.0) { 1 } else { 0 };
            bit.to_be_bytes().to_vec()
        },
        RegisterType::U16 => (checked_int(raw, ty)? as u16).to_be_bytes().to_vec(),
        RegisterType::I16 => (checked_int(raw, ty)? as i16).to_be_bytes().to_vec(),
        RegisterType::U32 => (checked_int(raw, ty)? as u32).to_be_bytes().to_vec(),
        RegisterType::I32 => (checked_int(raw, ty)? as i32).to_be_bytes().to_vec(),
        RegisterType::U64 => (checked_int(raw, ty)? as u64).to_be_bytes().to_vec(),
        RegisterType::I64 => checked_int(raw, ty)?.to_be_bytes().to_vec(),
        RegisterType::F32 => (raw as f32).to_be_bytes().to_vec(),
        RegisterType::F64 => raw.to_be_bytes().to_vec(),
    };
    let wire = order.arrange(be);
    Ok(wire
        .chunks(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Raw function-code operations a Modbus driver must provide. The bridge
/// serializes calls, hence `&mut self`.
#[async_trait]
pub trait ModbusTransport: Send + Sync {
    async fn read_bits(
        &mut self,
        unit_id: u8,
        function_code: u8,
        address: u16,
        count: u16,
    ) -> EdgeResult<Vec<bool>>;

    async fn read_registers(
        &mut self,
        unit_id: u8,
        function_code: u8,
        address: u16,
        count: u16,
    ) -> EdgeResult<Vec<u16>>;

    async fn write_coil(&mut self, unit_id: u8, address: u16, value: bool) -> EdgeResult<()>;

    async fn write_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        values: &[u16],
    ) -> EdgeResult<()>;
}

/// In-memory loopback transport for tests and simulated deployments.
/// Reads return whatever was last written (or zero), per unit id.
#[derive(Debug, Default)]
pub struct SimulatedModbusTransport {
    registers: HashMap<(u8, u16), u16>,
    coils: HashMap<(u8, u16), bool>,
}

impl SimulatedModbusTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_register(&mut self, unit_id: u8, address: u16, value: u16) {
        self.registers.insert((unit_id, address), value);
    }

    pub fn set_coil(&mut self, unit_id: u8, address: u16, value: bool) {
        self.coils.insert((unit_id, address), value);
    }
}

#[async_trait]
impl ModbusTransport for SimulatedModbusTransport {
    async fn read_bits(
        &mut self,
        unit_id: u8,
        _function_code: u8,
        address: u16,
        count: u16,
    ) -> EdgeResult<Vec<bool>> {
        Ok((0..count)
            .map(|i| {
                self.coils
                    .get(&(unit_id, address.wrapping_add(i)))
                    .copied()
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn read_registers(
        &mut self,
        unit_id: u8,
        _function_code: u8,
        address: u16,
        count: u16,
    ) -> EdgeResult<Vec<u16>> {
        Ok((0..count)
            .map(|i| {
                self.registers
                    .get(&(unit_id, address.wrapping_add(i)))
                    .copied()
                    .unwrap_or(0)
            })
            .collect())
    }

    async fn write_coil(&mut self, unit_id: u8, address: u16, value: bool) -> EdgeResult<()> {
        self.coils.insert((unit_id, address), value);
        Ok(())
    }

    async fn write_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        values: &[u16],
    ) -> EdgeResult<()> {
        for (i, v) in values.iter().enumerate() {
            self.registers
                .insert((unit_id, address.wrapping_add(i as u16)), *v);
        }
        Ok(())
    }
}

/// Maps register tasks onto a Modbus transport
pub struct ModbusExecutor {
    transport: Mutex<Box<dyn ModbusTransport>>,
}

impl ModbusExecutor {
    pub fn new(transport: Box<dyn ModbusTransport>) -> Self {
        Self {
            transport: Mutex::new(transport),
        }
    }

    fn address<'a>(&self, task: &'a Task) -> EdgeResult<&'a ModbusAddress> {
        match &task.address {
            TaskAddress::Modbus(addr) => Ok(addr),
            other => Err(EdgeError::addressing(format!(
                "Modbus executor got a non-Modbus task address: {other:?}"
            ))),
        }
    }

    fn apply_scale(raw: ChannelValue, scale: f64) -> ChannelValue {
        if scale == 1.0 {
            return raw;
        }
        match raw {
            ChannelValue::Int(i) => ChannelValue::Float(convert::scale_raw(i as f64, scale)),
            ChannelValue::Float(f) => ChannelValue::Float(convert::scale_raw(f, scale)),
            other => other,
        }
    }
}

#[async_trait]
impl ProtocolExecutor for ModbusExecutor {
    fn protocol(&self) -> &'static str {
        "modbus"
    }

    async fn execute_read(&self, task: &mut Task) -> EdgeResult<Option<ChannelValue>> {
        let addr = self.address(task)?.clone();
        let mut transport = self.transport.lock().await;

        if addr.area.is_bit_area() {
            let bits = transport
                .read_bits(addr.unit_id, addr.area.read_function_code(), addr.register, 1)
                .await?;
            let bit = bits
                .first()
                .copied()
                .ok_or_else(|| EdgeError::transport("empty bit response"))?;
            return Ok(Some(ChannelValue::Bool(bit)));
        }

        let regs = transport
            .read_registers(
                addr.unit_id,
                addr.area.read_function_code(),
                addr.register,
                addr.register_type.register_count(),
            )
            .await?;
        let raw = decode_registers(&regs, addr.register_type, addr.byte_order)?;
        debug!(
            unit_id = addr.unit_id,
            register = addr.register,
            ?raw,
            "modbus read"
        );
        Ok(Some(Self::apply_scale(raw, addr.scale)))
    }

    async fn execute_write(&self, task: &mut Task, value: ChannelValue) -> EdgeResult<()> {
        let addr = self.address(task)?.clone();
        if !addr.area.is_writable() {
            return Err(EdgeError::addressing(format!(
                "{:?} area is read-only",
                addr.area
            )));
        }
        let mut transport = self.transport.lock().await;

        match addr.area {
            ModbusArea::Coil => {
                let on = value
                    .as_bool()
                    .or_else(|| value.as_i64().map(|i| i != 0))
                    .ok_or_else(|| {
                        EdgeError::conversion(format!("cannot write {value} to a coil"))
                    })?;
                transport.write_coil(addr.unit_id, addr.register, on).await
            },
            ModbusArea::Holding => {
                let raw = if addr.scale == 1.0 {
                    value
                } else {
                    ChannelValue::Float(unscale(value_as_f64(&value)?, addr.scale)?)
                };
                let regs = encode_registers(&raw, addr.register_type, addr.byte_order)?;
                transport
                    .write_registers(addr.unit_id, addr.register, &regs)
                    .await
            },
            ModbusArea::DiscreteInput | ModbusArea::Input => unreachable!("checked above"),
        }
    }
}
