//! ZigBee Cluster Library primitives
//!
//! This crate implements the ZCL frame codec, APS-layer primitives and the
//! cluster command payloads exchanged between the gateway core and the
//! radio driver.

pub mod cluster;
pub mod commands;
pub mod frame;
pub mod green_power;
pub mod types;
pub mod zdp;

pub use frame::ZclFrame;
pub use green_power::{GpCommissioning, GpDataIndication};
pub use types::*;
