//! OBD-II PID Definitions and Response Parsing
//!
//! Defines the Mode 01 Parameter IDs (PIDs) this crate reads and their
//! decoding formulas. Every decoder is a pure function of the raw payload.

use crate::mode;
use crate::monitor::MonitorStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mode 01 (current data) PIDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Pid {
    /// Monitor status since DTCs cleared (0x01)
    MonitorStatus = 0x01,
    /// Fuel system status (0x03)
    FuelSystemStatus = 0x03,
    /// Calculated engine load (0x04)
    EngineLoad = 0x04,
    /// Engine coolant temperature (0x05)
    CoolantTemp = 0x05,
    /// Intake manifold absolute pressure (0x0B)
    IntakeManifoldPressure = 0x0B,
    /// Engine RPM (0x0C)
    Rpm = 0x0C,
    /// Vehicle speed (0x0D)
    Speed = 0x0D,
    /// Intake air temperature (0x0F)
    IntakeAirTemp = 0x0F,
    /// Throttle position (0x11)
    ThrottlePosition = 0x11,
    /// Distance traveled with MIL on (0x21)
    DistanceWithMil = 0x21,
}

impl Pid {
    /// Every PID this crate knows how to decode
    pub const ALL: [Pid; 10] = [
        Pid::MonitorStatus,
        Pid::FuelSystemStatus,
        Pid::EngineLoad,
        Pid::CoolantTemp,
        Pid::IntakeManifoldPressure,
        Pid::Rpm,
        Pid::Speed,
        Pid::IntakeAirTemp,
        Pid::ThrottlePosition,
        Pid::DistanceWithMil,
    ];

    /// Get the PID hex value
    pub fn as_hex(&self) -> u8 {
        *self as u8
    }

    /// Look up a PID by its code
    pub fn from_hex(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.as_hex() == code)
    }

    /// Get the number of payload bytes for this PID
    pub fn response_bytes(&self) -> usize {
        match self {
            Pid::MonitorStatus => 4,
            Pid::FuelSystemStatus | Pid::Rpm | Pid::DistanceWithMil => 2,
            _ => 1,
        }
    }

    /// The request line for this PID, e.g. `"010C"`
    pub fn request(&self) -> String {
        request_for(self.as_hex())
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Pid::MonitorStatus => "Monitor status",
            Pid::FuelSystemStatus => "Fuel system status",
            Pid::EngineLoad => "Calculated engine load",
            Pid::CoolantTemp => "Coolant temperature",
            Pid::IntakeManifoldPressure => "Intake manifold pressure",
            Pid::Rpm => "Engine RPM",
            Pid::Speed => "Vehicle speed",
            Pid::IntakeAirTemp => "Intake air temperature",
            Pid::ThrottlePosition => "Throttle position",
            Pid::DistanceWithMil => "Distance with MIL on",
        }
    }
}

/// Build a Mode 01 request line for any PID code
pub fn request_for(pid: u8) -> String {
    format!("{:02X}{:02X}", mode::CURRENT_DATA, pid)
}

/// Parse the first `width` bytes of a stripped hex payload.
///
/// Short or non-hex payloads (including adapter messages like `NO DATA`)
/// give `None`.
pub fn parse_payload(hex: &str, width: usize) -> Option<u32> {
    if width == 0 || width > 4 {
        return None;
    }
    let field = hex.get(..width * 2)?;
    if !field.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(field, 16).ok()
}

/// RPM: raw / 4
pub fn decode_rpm(raw: u16) -> u16 {
    raw >> 2
}

/// Load and throttle: raw * 100 / 255, rounded to whole percent
pub fn decode_percent(raw: u8) -> u8 {
    (raw as f64 / 2.55).round() as u8
}

/// Coolant and intake air temperature: raw - 40 (°C)
pub fn decode_temperature(raw: u8) -> i16 {
    raw as i16 - 40
}

/// Inverse of [`decode_temperature`] for the representable range -40..=215 °C
pub fn encode_temperature(celsius: i16) -> Option<u8> {
    celsius
        .checked_add(40)
        .and_then(|raw| u8::try_from(raw).ok())
}

/// State of one fuel bank as reported by PID 03
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FuelSystemState {
    /// Bank absent or motor off
    #[default]
    NotPresent,
    /// Open loop due to insufficient engine temperature
    OpenLoopInsufficientEngineTemperature,
    /// Closed loop, using oxygen sensor feedback
    ClosedLoop,
    /// Open loop due to engine load or fuel cut on deceleration
    OpenLoopEngineLoadOrDeceleration,
    /// Open loop due to system failure
    OpenLoopSystemFailure,
    /// Closed loop with a fault in the feedback system
    ClosedLoopFeedbackFault,
    /// Byte outside the defined table
    Unrecognized(u8),
}

impl FuelSystemState {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => Self::NotPresent,
            0x01 => Self::OpenLoopInsufficientEngineTemperature,
            0x02 => Self::ClosedLoop,
            0x04 => Self::OpenLoopEngineLoadOrDeceleration,
            0x08 => Self::OpenLoopSystemFailure,
            0x10 => Self::ClosedLoopFeedbackFault,
            other => Self::Unrecognized(other),
        }
    }

    pub fn raw(&self) -> u8 {
        match self {
            Self::NotPresent => 0x00,
            Self::OpenLoopInsufficientEngineTemperature => 0x01,
            Self::ClosedLoop => 0x02,
            Self::OpenLoopEngineLoadOrDeceleration => 0x04,
            Self::OpenLoopSystemFailure => 0x08,
            Self::ClosedLoopFeedbackFault => 0x10,
            Self::Unrecognized(raw) => *raw,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::NotPresent => "not present",
            Self::OpenLoopInsufficientEngineTemperature => {
                "open loop, insufficient engine temperature"
            }
            Self::ClosedLoop => "closed loop",
            Self::OpenLoopEngineLoadOrDeceleration => "open loop, engine load or deceleration",
            Self::OpenLoopSystemFailure => "open loop, system failure",
            Self::ClosedLoopFeedbackFault => "closed loop, feedback fault",
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}

/// Fuel system status for both banks (PID 03)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FuelSystemStatus {
    pub bank1: FuelSystemState,
    pub bank2: FuelSystemState,
}

impl FuelSystemStatus {
    /// High byte is bank 1, low byte is bank 2
    pub fn from_raw(raw: u16) -> Self {
        Self {
            bank1: FuelSystemState::from_raw((raw >> 8) as u8),
            bank2: FuelSystemState::from_raw((raw & 0xFF) as u8),
        }
    }
}

/// A decoded Mode 01 value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PidValue {
    MonitorStatus(MonitorStatus),
    FuelSystem(FuelSystemStatus),
    /// Percent, 0-100
    Percent(u8),
    /// Degrees Celsius
    Temperature(i16),
    /// kPa
    Pressure(u8),
    /// Revolutions per minute
    Rpm(u16),
    /// km/h
    Speed(u8),
    /// km
    Distance(u16),
}

impl PidValue {
    /// Decode a raw payload already parsed to an integer
    pub fn decode(pid: Pid, raw: u32) -> Self {
        match pid {
            Pid::MonitorStatus => PidValue::MonitorStatus(MonitorStatus::decode(raw)),
            Pid::FuelSystemStatus => PidValue::FuelSystem(FuelSystemStatus::from_raw(raw as u16)),
            Pid::EngineLoad | Pid::ThrottlePosition => PidValue::Percent(decode_percent(raw as u8)),
            Pid::CoolantTemp | Pid::IntakeAirTemp => {
                PidValue::Temperature(decode_temperature(raw as u8))
            }
            Pid::IntakeManifoldPressure => PidValue::Pressure(raw as u8),
            Pid::Rpm => PidValue::Rpm(decode_rpm(raw as u16)),
            Pid::Speed => PidValue::Speed(raw as u8),
            Pid::DistanceWithMil => PidValue::Distance(raw as u16),
        }
    }
}

impl fmt::Display for PidValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PidValue::MonitorStatus(status) => write!(
                f,
                "MIL {}, {} DTC(s)",
                if status.mil { "on" } else { "off" },
                status.dtc_count
            ),
            PidValue::FuelSystem(status) => write!(
                f,
                "bank 1: {}, bank 2: {}",
                status.bank1.description(),
                status.bank2.description()
            ),
            PidValue::Percent(v) => write!(f, "{} %", v),
            PidValue::Temperature(v) => write!(f, "{} °C", v),
            PidValue::Pressure(v) => write!(f, "{} kPa", v),
            PidValue::Rpm(v) => write!(f, "{} rpm", v),
            PidValue::Speed(v) => write!(f, "{} km/h", v),
            PidValue::Distance(v) => write!(f, "{} km", v),
        }
    }
}

/// Response from a PID query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidResponse {
    /// The PID that was queried
    pub pid: Pid,
    /// Timestamp when the response was received (Unix ms)
    pub timestamp_ms: u64,
    /// Raw payload as an integer
    pub raw: u32,
    /// Decoded value
    pub value: PidValue,
}

impl PidResponse {
    /// Decode a stripped hex payload; `None` if it is malformed
    pub fn decode(pid: Pid, payload: &str, timestamp_ms: u64) -> Option<Self> {
        let raw = parse_payload(payload, pid.response_bytes())?;
        Some(Self {
            pid,
            timestamp_ms,
            raw,
            value: PidValue::decode(pid, raw),
        })
    }
}

/// A snapshot of every live-data reading
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorFrame {
    /// Timestamp (Unix ms)
    pub timestamp_ms: u64,
    /// Engine RPM
    pub rpm: u16,
    /// Vehicle speed (km/h)
    pub speed: u8,
    /// Coolant temperature (°C)
    pub coolant_temp: i16,
    /// Intake air temperature (°C)
    pub intake_air_temp: i16,
    /// Engine load (0-100%)
    pub engine_load: u8,
    /// Throttle position (0-100%)
    pub throttle_position: u8,
    /// Intake manifold absolute pressure (kPa)
    pub manifold_pressure: u8,
    /// Distance traveled with MIL on (km)
    pub distance_with_mil: u16,
    /// Fuel system status per bank
    pub fuel_system: FuelSystemStatus,
}

impl SensorFrame {
    /// Create a new empty frame with the given timestamp
    pub fn new(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            ..Default::default()
        }
    }

    /// Update a field from a PID response
    pub fn update_from_response(&mut self, response: &PidResponse) {
        match (response.pid, &response.value) {
            (Pid::Rpm, PidValue::Rpm(v)) => self.rpm = *v,
            (Pid::Speed, PidValue::Speed(v)) => self.speed = *v,
            (Pid::CoolantTemp, PidValue::Temperature(v)) => self.coolant_temp = *v,
            (Pid::IntakeAirTemp, PidValue::Temperature(v)) => self.intake_air_temp = *v,
            (Pid::EngineLoad, PidValue::Percent(v)) => self.engine_load = *v,
            (Pid::ThrottlePosition, PidValue::Percent(v)) => self.throttle_position = *v,
            (Pid::IntakeManifoldPressure, PidValue::Pressure(v)) => self.manifold_pressure = *v,
            (Pid::DistanceWithMil, PidValue::Distance(v)) => self.distance_with_mil = *v,
            (Pid::FuelSystemStatus, PidValue::FuelSystem(v)) => self.fuel_system = *v,
            _ => {}
        }
    }

    /// Every reading paired with the PID it came from, in PID order
    pub fn values(&self) -> Vec<(Pid, PidValue)> {
        vec![
            (Pid::FuelSystemStatus, PidValue::FuelSystem(self.fuel_system)),
            (Pid::EngineLoad, PidValue::Percent(self.engine_load)),
            (Pid::CoolantTemp, PidValue::Temperature(self.coolant_temp)),
            (Pid::IntakeManifoldPressure, PidValue::Pressure(self.manifold_pressure)),
            (Pid::Rpm, PidValue::Rpm(self.rpm)),
            (Pid::Speed, PidValue::Speed(self.speed)),
            (Pid::IntakeAirTemp, PidValue::Temperature(self.intake_air_temp)),
            (Pid::ThrottlePosition, PidValue::Percent(self.throttle_position)),
            (Pid::DistanceWithMil, PidValue::Distance(self.distance_with_mil)),
        ]
    }
}
