//! OBD-II Client for ELM327 Adapters
//!
//! Drives the adapter handshake and exposes Mode 01 readings. Every query
//! is a single blocking transaction; a reading that cannot be obtained is
//! reported as its "unavailable" value rather than as an error.

use crate::at;
use crate::config::LinkConfig;
use crate::error::ObdError;
use crate::monitor::MonitorStatus;
use crate::pid::{FuelSystemStatus, Pid, PidResponse, PidValue, SensorFrame};
use crate::supported::{self, SupportedPids};
use crate::transaction::{Channel, Echo, ReceiveOptions};
use crate::transport::{SerialTransport, Transport};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Prefix every genuine (or clone) adapter puts in its reset banner
pub const ADAPTER_MARKER: &str = "ELM327";

/// Lines read after `ATZ` while looking for the banner: echo, two blanks, banner
const MAX_RESET_LINES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Disconnected,
    Connected,
}

/// OBD-II client for communicating with ELM327-compatible adapters
pub struct ObdClient<T: Transport = SerialTransport> {
    channel: Channel<T>,
    state: LinkState,
    /// Reset banner, e.g. "ELM327 v1.5"
    version: String,
    baud_rate: u32,
}

impl ObdClient<SerialTransport> {
    /// Open the configured serial port and perform the handshake
    pub fn connect(config: &LinkConfig) -> Result<Self, ObdError> {
        let transport =
            SerialTransport::open(&config.port, config.baud_rate, config.command_timeout())?;
        Self::handshake(transport, config)
    }
}

impl<T: Transport> ObdClient<T> {
    /// Verify that `transport` leads to an ELM327 and select automatic protocol detection
    pub fn handshake(transport: T, config: &LinkConfig) -> Result<Self, ObdError> {
        let mut channel =
            Channel::with_timeouts(transport, config.command_timeout(), config.flush_timeout());

        if let Err(e) = channel.discard_input() {
            debug!("Could not discard stale input: {}", e);
        }

        let version = reset(&mut channel)?;
        select_protocol(&mut channel)?;

        info!("Connected to {} at {} baud", version, config.baud_rate);
        Ok(Self {
            channel,
            state: LinkState::Connected,
            version,
            baud_rate: config.baud_rate,
        })
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Check if client is connected
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Adapter identification captured during the handshake
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Baud rate the link was opened at
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Fail with [`ObdError::NotConnected`] once the link has been dropped
    pub fn ensure_connected(&self) -> Result<(), ObdError> {
        match self.state {
            LinkState::Connected => Ok(()),
            LinkState::Disconnected => Err(ObdError::NotConnected),
        }
    }

    /// Borrow the underlying transport
    pub fn transport(&self) -> &T {
        self.channel.transport()
    }

    /// Mark the link disconnected; later queries return unavailable values
    pub fn disconnect(&mut self) {
        if self.is_connected() {
            info!("Disconnecting OBD client");
            self.state = LinkState::Disconnected;
        }
    }

    /// Release the transport
    pub fn into_transport(self) -> T {
        self.channel.into_inner()
    }

    /// Persist 115200 baud in the adapter's programmable parameters.
    ///
    /// Returns `false` at the first command not answered with `OK`; commands
    /// already accepted are not rolled back. The new rate takes effect after
    /// the adapter resets, so the caller must reconnect with
    /// [`LinkConfig::high_speed`].
    pub fn switch_to_high_baud(&mut self) -> bool {
        if !self.is_connected() {
            return false;
        }

        for command in [at::SET_BAUD_PARAMETER, at::ENABLE_BAUD_PARAMETER] {
            let reply = self
                .channel
                .exchange(command, ReceiveOptions::flushed(self.channel.command_timeout()));
            if reply.as_deref() != Some("OK") {
                warn!("{} answered {:?}, high baud switch aborted", command, reply);
                return false;
            }
        }

        info!("High baud rate persisted, reset the adapter to apply it");
        true
    }

    /// Battery voltage exactly as the adapter formats it, e.g. "12.6V"
    pub fn read_battery_voltage(&mut self) -> Option<String> {
        self.ensure_connected().ok()?;
        self.channel
            .exchange(at::READ_VOLTAGE, ReceiveOptions::flushed(self.channel.command_timeout()))
            .filter(|reply| !reply.is_empty())
    }

    /// Query a PID and return the decoded response
    pub fn query_pid(&mut self, pid: Pid) -> Option<PidResponse> {
        if let Err(e) = self.ensure_connected() {
            debug!("{} not queried: {}", pid.name(), e);
            return None;
        }

        debug!("Querying {} ({:02X})", pid.name(), pid.as_hex());
        let payload = self.channel.exchange(
            &pid.request(),
            ReceiveOptions::payload(self.channel.command_timeout()),
        )?;

        let response = PidResponse::decode(pid, &payload, timestamp_ms());
        if response.is_none() {
            debug!("PID {:02X} payload unusable: {:?}", pid.as_hex(), payload);
        }
        response
    }

    fn query_value(&mut self, pid: Pid) -> Option<PidValue> {
        self.query_pid(pid).map(|response| response.value)
    }

    /// Engine RPM, 0 when unavailable
    pub fn engine_rpm(&mut self) -> u16 {
        match self.query_value(Pid::Rpm) {
            Some(PidValue::Rpm(v)) => v,
            _ => 0,
        }
    }

    /// Vehicle speed in km/h, 0 when unavailable
    pub fn vehicle_speed(&mut self) -> u8 {
        match self.query_value(Pid::Speed) {
            Some(PidValue::Speed(v)) => v,
            _ => 0,
        }
    }

    /// Intake manifold absolute pressure in kPa, 0 when unavailable
    pub fn manifold_pressure(&mut self) -> u8 {
        match self.query_value(Pid::IntakeManifoldPressure) {
            Some(PidValue::Pressure(v)) => v,
            _ => 0,
        }
    }

    /// Distance traveled with the MIL on in km, 0 when unavailable
    pub fn distance_with_mil(&mut self) -> u16 {
        match self.query_value(Pid::DistanceWithMil) {
            Some(PidValue::Distance(v)) => v,
            _ => 0,
        }
    }

    /// Calculated engine load in percent, 0 when unavailable
    pub fn engine_load(&mut self) -> u8 {
        match self.query_value(Pid::EngineLoad) {
            Some(PidValue::Percent(v)) => v,
            _ => 0,
        }
    }

    /// Throttle position in percent, 0 when unavailable
    pub fn throttle_position(&mut self) -> u8 {
        match self.query_value(Pid::ThrottlePosition) {
            Some(PidValue::Percent(v)) => v,
            _ => 0,
        }
    }

    /// Coolant temperature in °C, 0 when unavailable
    pub fn coolant_temperature(&mut self) -> i16 {
        match self.query_value(Pid::CoolantTemp) {
            Some(PidValue::Temperature(v)) => v,
            _ => 0,
        }
    }

    /// Intake air temperature in °C, 0 when unavailable
    pub fn intake_air_temperature(&mut self) -> i16 {
        match self.query_value(Pid::IntakeAirTemp) {
            Some(PidValue::Temperature(v)) => v,
            _ => 0,
        }
    }

    /// Fuel system status, both banks `NotPresent` when unavailable
    pub fn fuel_system_status(&mut self) -> FuelSystemStatus {
        match self.query_value(Pid::FuelSystemStatus) {
            Some(PidValue::FuelSystem(v)) => v,
            _ => FuelSystemStatus::default(),
        }
    }

    /// MIL, DTC count and readiness tests
    pub fn monitor_status(&mut self) -> Option<MonitorStatus> {
        match self.query_value(Pid::MonitorStatus) {
            Some(PidValue::MonitorStatus(status)) => Some(status),
            _ => None,
        }
    }

    /// Read every live-data PID into one frame
    pub fn read_frame(&mut self) -> SensorFrame {
        let mut frame = SensorFrame::new(timestamp_ms());
        for pid in Pid::ALL {
            if pid == Pid::MonitorStatus {
                continue;
            }
            if let Some(response) = self.query_pid(pid) {
                frame.update_from_response(&response);
            }
        }
        frame
    }

    /// Discover which PIDs the vehicle supports
    pub fn scan_supported_pids(&mut self) -> SupportedPids {
        if !self.is_connected() {
            return SupportedPids::new();
        }
        supported::scan(&mut self.channel)
    }
}

/// Send `ATZ` and return the identification banner.
///
/// The reset echo is not verified: the adapter may emit it garbled while it
/// reboots. The echo and blank lines are skipped while looking for the banner.
fn reset<T: Transport>(channel: &mut Channel<T>) -> Result<String, ObdError> {
    let timeout = channel.command_timeout();
    let mut tx = channel
        .transmit(at::RESET, Echo::Ignore)
        .map_err(|e| ObdError::AdapterNotDetected(e.to_string()))?;

    let mut banner = None;
    for _ in 0..MAX_RESET_LINES {
        let Some(line) = tx.receive(ReceiveOptions::raw(timeout)) else {
            break;
        };
        let line = line.trim();
        if line.is_empty() || line.trim_end_matches('>') == at::RESET {
            continue;
        }
        banner = Some(line.to_string());
        break;
    }
    tx.finish();

    let banner = banner.ok_or_else(|| {
        ObdError::AdapterNotDetected("no identification after reset".to_string())
    })?;

    if !banner.starts_with(ADAPTER_MARKER) {
        warn!("Reset banner {:?} is not an ELM327", banner);
        return Err(ObdError::AdapterNotDetected(format!(
            "unexpected identification {:?}",
            banner
        )));
    }

    debug!("Adapter identified as {}", banner);
    Ok(banner)
}

/// Select automatic OBD protocol detection and consume the confirmation
fn select_protocol<T: Transport>(channel: &mut Channel<T>) -> Result<(), ObdError> {
    let timeout = channel.command_timeout();
    let reply = channel
        .transmit(at::AUTO_PROTOCOL, Echo::Expect)
        .map_err(|e| ObdError::AdapterNotDetected(e.to_string()))?
        .reply(ReceiveOptions::flushed(timeout));

    match reply.as_deref() {
        Some("OK") => Ok(()),
        other => Err(ObdError::AdapterNotDetected(format!(
            "{} answered {:?}",
            at::AUTO_PROTOCOL,
            other
        ))),
    }
}

fn timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAdapter;
    use crate::monitor::IgnitionType;
    use crate::pid::FuelSystemState;

    fn connected(adapter: MockAdapter) -> ObdClient<MockAdapter> {
        ObdClient::handshake(adapter, &LinkConfig::default()).unwrap()
    }

    #[test]
    fn test_handshake_with_elm327() {
        let client = connected(MockAdapter::new());
        assert_eq!(client.state(), LinkState::Connected);
        assert_eq!(client.version(), "ELM327 v1.5");
        assert_eq!(client.baud_rate(), 38400);
        assert_eq!(client.transport().sent(), &["ATZ", "ATSP0"]);
    }

    #[test]
    fn test_handshake_rejects_other_adapters() {
        let adapter = MockAdapter::new().with_version("STN1170 v1.0");
        match ObdClient::handshake(adapter, &LinkConfig::default()) {
            Err(ObdError::AdapterNotDetected(msg)) => assert!(msg.contains("STN1170")),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("non-ELM327 adapter accepted"),
        }
    }

    #[test]
    fn test_handshake_timeout_is_not_detected() {
        assert!(matches!(
            ObdClient::handshake(MockAdapter::silent(), &LinkConfig::default()),
            Err(ObdError::AdapterNotDetected(_))
        ));
    }

    #[test]
    fn test_handshake_requires_protocol_echo() {
        // The banner is still found without an ATZ echo, but ATSP0 is verified.
        let adapter = MockAdapter::new().without_echo();
        match ObdClient::handshake(adapter, &LinkConfig::default()) {
            Err(ObdError::AdapterNotDetected(msg)) => assert!(msg.contains("Echo mismatch")),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("handshake without echo accepted"),
        }
    }

    #[test]
    fn test_handshake_fails_when_protocol_rejected() {
        let adapter = MockAdapter::new().with_response("ATSP0", &["?"]);
        assert!(matches!(
            ObdClient::handshake(adapter, &LinkConfig::default()),
            Err(ObdError::AdapterNotDetected(_))
        ));
    }

    #[test]
    fn test_live_readings() {
        let mut client = connected(MockAdapter::new());
        assert_eq!(client.engine_rpm(), 1726);
        assert_eq!(client.vehicle_speed(), 40);
        assert_eq!(client.coolant_temperature(), 83);
        assert_eq!(client.intake_air_temperature(), 16);
        assert_eq!(client.engine_load(), 39);
        assert_eq!(client.throttle_position(), 27);
        assert_eq!(client.manifold_pressure(), 33);
        assert_eq!(client.distance_with_mil(), 10);

        let fuel = client.fuel_system_status();
        assert_eq!(fuel.bank1, FuelSystemState::ClosedLoop);
        assert_eq!(fuel.bank2, FuelSystemState::NotPresent);
    }

    #[test]
    fn test_unavailable_readings_are_zero() {
        let adapter = MockAdapter::new()
            .with_response("010C", &["NO DATA"])
            .with_response("0105", &["41 05"])
            .with_response("010D", &[]);
        let mut client = connected(adapter);
        assert_eq!(client.engine_rpm(), 0);
        assert_eq!(client.coolant_temperature(), 0);
        assert_eq!(client.vehicle_speed(), 0);
        // The link is still usable afterwards.
        assert_eq!(client.throttle_position(), 27);
    }

    #[test]
    fn test_echo_mismatch_is_unavailable() {
        let mut client = connected(MockAdapter::new().with_echo("010C", "0A0C"));
        assert_eq!(client.engine_rpm(), 0);
        assert_eq!(client.vehicle_speed(), 40);
    }

    #[test]
    fn test_monitor_status_query() {
        let mut client = connected(MockAdapter::new());
        let status = client.monitor_status().unwrap();
        assert!(!status.mil);
        assert_eq!(status.ignition, IgnitionType::Spark);
        assert_eq!(status.tests.len(), 11);
    }

    #[test]
    fn test_battery_voltage() {
        let mut client = connected(MockAdapter::new());
        assert_eq!(client.read_battery_voltage().as_deref(), Some("12.6V"));
    }

    #[test]
    fn test_high_baud_switch() {
        let mut client = connected(MockAdapter::new());
        assert!(client.switch_to_high_baud());
        let sent = client.transport().sent();
        assert_eq!(&sent[2..], &["ATPP0CSV23", "ATPP0CON"]);
    }

    #[test]
    fn test_high_baud_switch_stops_at_first_failure() {
        let mut client = connected(MockAdapter::new().with_response("ATPP0CSV23", &["?"]));
        assert!(!client.switch_to_high_baud());
        assert!(!client.transport().sent().iter().any(|c| c == "ATPP0CON"));
    }

    #[test]
    fn test_read_frame() {
        let mut client = connected(MockAdapter::new());
        let frame = client.read_frame();
        assert!(frame.timestamp_ms > 0);
        assert_eq!(frame.rpm, 1726);
        assert_eq!(frame.speed, 40);
        assert_eq!(frame.manifold_pressure, 33);
        assert_eq!(frame.fuel_system.bank1, FuelSystemState::ClosedLoop);
    }

    #[test]
    fn test_disconnected_client_does_not_talk() {
        let mut client = connected(MockAdapter::new());
        assert!(client.ensure_connected().is_ok());
        client.disconnect();
        assert_eq!(client.state(), LinkState::Disconnected);
        assert!(matches!(client.ensure_connected(), Err(ObdError::NotConnected)));
        assert_eq!(client.engine_rpm(), 0);
        assert!(client.read_battery_voltage().is_none());
        assert!(!client.switch_to_high_baud());
        assert!(client.scan_supported_pids().is_empty());
        assert_eq!(client.into_transport().sent().len(), 2);
    }
}
