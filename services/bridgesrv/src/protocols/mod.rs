//! Protocol executors behind the [`ProtocolExecutor`] trait.
//!
//! Each submodule pairs a transport trait (the raw wire operations a
//! driver must provide) with an executor that maps channel tasks onto
//! that transport.
//!
//! [`ProtocolExecutor`]: crate::core::bridge::ProtocolExecutor

pub mod mbus;
pub mod modbus;
pub mod mqtt;
pub mod rest;
