//! OBD-II Protocol Implementation
//!
//! This crate provides blocking serial communication with ELM327-compatible
//! OBD-II adapters: the reset/identify handshake, a strict one-command-at-a-
//! time transaction discipline, supported-PID discovery and decoders for
//! Mode 01 live data and readiness monitors.

mod client;
mod config;
mod error;
pub mod mock;
mod monitor;
mod pid;
mod supported;
pub mod transaction;
pub mod transport;

pub use client::{LinkState, ObdClient, ADAPTER_MARKER};
pub use config::{LinkConfig, DEFAULT_BAUD_RATE, HIGH_BAUD_RATE};
pub use error::ObdError;
pub use mock::MockAdapter;
pub use monitor::{
    CommonTest, CompressionTest, EngineTest, IgnitionType, MonitorStatus, SparkTest,
    TestComponent,
};
pub use pid::{
    decode_percent, decode_rpm, decode_temperature, encode_temperature, parse_payload,
    request_for, FuelSystemState, FuelSystemStatus, Pid, PidResponse, PidValue, SensorFrame,
};
pub use supported::{group_pids, has_more_groups, SupportedPids};
pub use transaction::{Channel, Echo, ReceiveOptions, Transaction};
pub use transport::{SerialTransport, Transport};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
}

/// ELM327 AT commands used by the link
pub mod at {
    /// Soft reset; the adapter answers with its identification banner
    pub const RESET: &str = "ATZ";
    /// Set protocol 0: automatic detection
    pub const AUTO_PROTOCOL: &str = "ATSP0";
    /// Read the supply (battery) voltage
    pub const READ_VOLTAGE: &str = "ATRV";
    /// Program parameter 0C (baud rate divisor) to 0x23, i.e. 115200 baud
    pub const SET_BAUD_PARAMETER: &str = "ATPP0CSV23";
    /// Enable programmable parameter 0C
    pub const ENABLE_BAUD_PARAMETER: &str = "ATPP0CON";
}
