//! Line-oriented byte channel to the adapter
//!
//! The ELM327 speaks CR-terminated ASCII lines and ends every reply with a
//! `>` prompt that is not followed by a terminator. [`Transport`] hides the
//! byte-level details: callers only see whole lines.

use crate::error::ObdError;
use serialport::{ClearBuffer, DataBits, ErrorKind, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Line terminator used in both directions
pub const LINE_TERMINATOR: u8 = b'\r';

/// Prompt the adapter prints when it is ready for the next command
pub const PROMPT: u8 = b'>';

/// Longest unterminated line kept; a longer run of bytes is dropped as noise
pub const MAX_LINE_LEN: usize = 512;

/// A CR-terminated line channel with a settable read timeout
pub trait Transport {
    /// Write `line` followed by the CR terminator
    fn write_line(&mut self, line: &str) -> Result<(), ObdError>;

    /// Read one line, without its terminator.
    ///
    /// A bare prompt is returned as its own line (`">"`), and a prompt that
    /// directly follows text stays attached to it (`"010C>"`). Fails with
    /// [`ObdError::Timeout`] when nothing completes within the read timeout.
    fn read_line(&mut self) -> Result<String, ObdError>;

    /// Change the read timeout used by subsequent [`Transport::read_line`] calls
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ObdError>;

    /// Drop any bytes the adapter has sent but nobody has read yet
    fn discard_input(&mut self) -> Result<(), ObdError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_line(&mut self, line: &str) -> Result<(), ObdError> {
        (**self).write_line(line)
    }

    fn read_line(&mut self) -> Result<String, ObdError> {
        (**self).read_line()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ObdError> {
        (**self).set_timeout(timeout)
    }

    fn discard_input(&mut self) -> Result<(), ObdError> {
        (**self).discard_input()
    }
}

/// [`Transport`] over a physical or USB virtual serial port.
///
/// Fixed framing: 8 data bits, no parity, 1 stop bit, no flow control.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    lines: LineBuffer,
    timeout: Duration,
}

/// Splits the adapter's byte stream into lines.
///
/// CR ends a line and is dropped; LF is ignored; the `>` prompt ends a line
/// and is kept, so a bare prompt reads as `">"`.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the port.
    ///
    /// An unterminated tail longer than [`MAX_LINE_LEN`] is discarded.
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending
            .extend(bytes.iter().copied().filter(|&b| b != b'\n'));

        let tail_start = self
            .pending
            .iter()
            .rposition(|&b| b == LINE_TERMINATOR || b == PROMPT)
            .map_or(0, |end| end + 1);
        if self.pending.len() - tail_start > MAX_LINE_LEN {
            warn!(
                "Dropping {} bytes without a line terminator",
                self.pending.len() - tail_start
            );
            self.pending.truncate(tail_start);
        }
    }

    /// Pop the next complete line, if there is one
    pub fn next_line(&mut self) -> Option<String> {
        let end = self
            .pending
            .iter()
            .position(|&b| b == LINE_TERMINATOR || b == PROMPT)?;

        let keep = if self.pending[end] == PROMPT { end + 1 } else { end };
        let line: Vec<u8> = self.pending.drain(..=end).take(keep).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl SerialTransport {
    /// Open `path` at `baud_rate`, classifying failures the way callers care about
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self, ObdError> {
        info!("Opening serial port {} at {} baud", path, baud_rate);

        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| classify_open_error(path, e))?;

        Ok(Self::from_port(port, timeout))
    }

    /// Wrap a port that is already open and configured
    pub fn from_port(port: Box<dyn SerialPort>, timeout: Duration) -> Self {
        Self {
            port,
            lines: LineBuffer::new(),
            timeout,
        }
    }

    /// Current baud rate as reported by the driver
    pub fn baud_rate(&self) -> Result<u32, ObdError> {
        self.port
            .baud_rate()
            .map_err(|e| ObdError::SerialError(e.to_string()))
    }

    fn timed_out(&self) -> ObdError {
        ObdError::Timeout(self.timeout.as_millis() as u64)
    }
}

impl Transport for SerialTransport {
    fn write_line(&mut self, line: &str) -> Result<(), ObdError> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(LINE_TERMINATOR);
        self.port.write_all(&bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, ObdError> {
        // The bound covers the whole line, not each read.
        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; 64];
        loop {
            if let Some(line) = self.lines.next_line() {
                return Ok(line);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.timed_out());
            }
            self.port
                .set_timeout(remaining)
                .map_err(|e| ObdError::SerialError(e.to_string()))?;

            match self.port.read(&mut buf) {
                Ok(0) => return Err(self.timed_out()),
                Ok(n) => self.lines.push(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Err(self.timed_out()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ObdError> {
        self.timeout = timeout;
        Ok(())
    }

    fn discard_input(&mut self) -> Result<(), ObdError> {
        self.lines.clear();
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|e| ObdError::SerialError(e.to_string()))
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        debug!("Closing serial port {:?}", self.port.name());
    }
}

/// Map a port-open failure onto the three outcomes callers distinguish
fn classify_open_error(path: &str, err: serialport::Error) -> ObdError {
    let description = err.description.to_lowercase();
    // Windows reports a COM port held by another process as "Access is denied".
    let held_elsewhere = cfg!(windows)
        && matches!(err.kind, ErrorKind::Io(io::ErrorKind::PermissionDenied));
    let already_open =
        held_elsewhere || description.contains("busy") || description.contains("in use");

    match err.kind {
        ErrorKind::Io(io::ErrorKind::PermissionDenied) if !already_open => {
            ObdError::PermissionDenied(path.to_string())
        }
        _ if already_open => ObdError::AlreadyOpen(path.to_string()),
        ErrorKind::NoDevice | ErrorKind::InvalidInput | ErrorKind::Io(io::ErrorKind::NotFound) => {
            ObdError::InvalidAddress(path.to_string())
        }
        _ => ObdError::SerialError(format!("{}: {}", path, err.description)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;

    fn open_error(kind: ErrorKind, description: &str) -> ObdError {
        classify_open_error("/dev/ttyUSB0", serialport::Error::new(kind, description))
    }

    /// Serial port stand-in that delivers scripted chunks, each after `delay`
    struct FakePort {
        chunks: VecDeque<Vec<u8>>,
        delay: Duration,
        timeout: Duration,
    }

    impl FakePort {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                delay: Duration::ZERO,
                timeout: Duration::from_millis(1000),
            }
        }

        /// `count` single bytes, one every `delay`, never a terminator
        fn trickle(byte: u8, delay: Duration, count: usize) -> Self {
            Self {
                chunks: (0..count).map(|_| vec![byte]).collect(),
                delay,
                timeout: Duration::from_millis(1000),
            }
        }
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() || self.delay > self.timeout {
                std::thread::sleep(self.timeout.min(self.delay));
                return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
            }
            std::thread::sleep(self.delay);
            let chunk = self.chunks.pop_front().unwrap_or_default();
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            Ok(n)
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialPort for FakePort {
        fn name(&self) -> Option<String> {
            Some("fake".to_string())
        }
        fn baud_rate(&self) -> serialport::Result<u32> {
            Ok(38400)
        }
        fn data_bits(&self) -> serialport::Result<DataBits> {
            Ok(DataBits::Eight)
        }
        fn flow_control(&self) -> serialport::Result<FlowControl> {
            Ok(FlowControl::None)
        }
        fn parity(&self) -> serialport::Result<Parity> {
            Ok(Parity::None)
        }
        fn stop_bits(&self) -> serialport::Result<StopBits> {
            Ok(StopBits::One)
        }
        fn timeout(&self) -> Duration {
            self.timeout
        }
        fn set_baud_rate(&mut self, _: u32) -> serialport::Result<()> {
            Ok(())
        }
        fn set_data_bits(&mut self, _: DataBits) -> serialport::Result<()> {
            Ok(())
        }
        fn set_flow_control(&mut self, _: FlowControl) -> serialport::Result<()> {
            Ok(())
        }
        fn set_parity(&mut self, _: Parity) -> serialport::Result<()> {
            Ok(())
        }
        fn set_stop_bits(&mut self, _: StopBits) -> serialport::Result<()> {
            Ok(())
        }
        fn set_timeout(&mut self, timeout: Duration) -> serialport::Result<()> {
            self.timeout = timeout;
            Ok(())
        }
        fn write_request_to_send(&mut self, _: bool) -> serialport::Result<()> {
            Ok(())
        }
        fn write_data_terminal_ready(&mut self, _: bool) -> serialport::Result<()> {
            Ok(())
        }
        fn read_clear_to_send(&mut self) -> serialport::Result<bool> {
            Ok(true)
        }
        fn read_data_set_ready(&mut self) -> serialport::Result<bool> {
            Ok(true)
        }
        fn read_ring_indicator(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }
        fn read_carrier_detect(&mut self) -> serialport::Result<bool> {
            Ok(true)
        }
        fn bytes_to_read(&self) -> serialport::Result<u32> {
            Ok(self.chunks.iter().map(|c| c.len() as u32).sum())
        }
        fn bytes_to_write(&self) -> serialport::Result<u32> {
            Ok(0)
        }
        fn clear(&self, _: ClearBuffer) -> serialport::Result<()> {
            Ok(())
        }
        fn try_clone(&self) -> serialport::Result<Box<dyn SerialPort>> {
            Err(serialport::Error::new(ErrorKind::Unknown, "fake port cannot be cloned"))
        }
        fn set_break(&self) -> serialport::Result<()> {
            Ok(())
        }
        fn clear_break(&self) -> serialport::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_line_splitting() {
        let mut lines = LineBuffer::new();
        lines.push(b"ATZ\r\r\rELM327 v1.5\r\r>");
        let got: Vec<String> = std::iter::from_fn(|| lines.next_line()).collect();
        assert_eq!(got, vec!["ATZ", "", "", "ELM327 v1.5", "", ">"]);
    }

    #[test]
    fn test_partial_line_waits_for_terminator() {
        let mut lines = LineBuffer::new();
        lines.push(b"41 0C 1A");
        assert_eq!(lines.next_line(), None);
        lines.push(b" F8\r\n");
        assert_eq!(lines.next_line().as_deref(), Some("41 0C 1A F8"));
        assert_eq!(lines.next_line(), None);
    }

    #[test]
    fn test_prompt_stays_attached() {
        let mut lines = LineBuffer::new();
        lines.push(b"010C>");
        assert_eq!(lines.next_line().as_deref(), Some("010C>"));
        lines.push(b"junk");
        lines.clear();
        assert_eq!(lines.next_line(), None);
    }

    #[test]
    fn test_runaway_line_is_dropped() {
        let mut lines = LineBuffer::new();
        lines.push(b"41 0D 32\r");
        lines.push(&[b'A'; MAX_LINE_LEN + 1]);
        assert_eq!(lines.pending.len(), 9);
        assert_eq!(lines.next_line().as_deref(), Some("41 0D 32"));
        assert_eq!(lines.next_line(), None);

        lines.push(b"OK\r");
        assert_eq!(lines.next_line().as_deref(), Some("OK"));
    }

    #[test]
    fn test_read_line_across_chunks() {
        let port = FakePort::new(&[b"010C\r41 0C", b" 1A F8\r\r", b">"]);
        let mut transport = SerialTransport::from_port(Box::new(port), Duration::from_millis(100));

        assert_eq!(transport.read_line().unwrap(), "010C");
        assert_eq!(transport.read_line().unwrap(), "41 0C 1A F8");
        assert_eq!(transport.read_line().unwrap(), "");
        assert_eq!(transport.read_line().unwrap(), ">");
        assert!(transport.read_line().unwrap_err().is_timeout());
        assert_eq!(transport.baud_rate().unwrap(), 38400);
    }

    #[test]
    fn test_trickling_bytes_cannot_extend_the_timeout() {
        let port = FakePort::trickle(b'A', Duration::from_millis(20), 40);
        let mut transport = SerialTransport::from_port(Box::new(port), Duration::from_millis(100));

        let started = Instant::now();
        let err = transport.read_line().unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, ObdError::Timeout(100)));
        assert!(elapsed < Duration::from_millis(400), "blocked for {:?}", elapsed);
    }

    #[test]
    fn test_discard_input_drops_partial_line() {
        let port = FakePort::new(&[b"41 0C", b"OK\r"]);
        let mut transport = SerialTransport::from_port(Box::new(port), Duration::from_millis(100));
        transport.lines.push(b"stale");
        transport.discard_input().unwrap();
        assert_eq!(transport.read_line().unwrap(), "41 0COK");
    }

    #[cfg(not(windows))]
    #[test]
    fn test_permission_denied_classification() {
        let err = open_error(ErrorKind::Io(io::ErrorKind::PermissionDenied), "Permission denied");
        assert!(matches!(err, ObdError::PermissionDenied(p) if p == "/dev/ttyUSB0"));
    }

    #[cfg(windows)]
    #[test]
    fn test_access_denied_is_already_open_on_windows() {
        assert!(matches!(
            open_error(ErrorKind::Io(io::ErrorKind::PermissionDenied), "Access is denied."),
            ObdError::AlreadyOpen(_)
        ));
    }

    #[test]
    fn test_missing_device_is_invalid_address() {
        assert!(matches!(
            open_error(ErrorKind::NoDevice, "No such file or directory"),
            ObdError::InvalidAddress(_)
        ));
        assert!(matches!(
            open_error(ErrorKind::InvalidInput, "bad path"),
            ObdError::InvalidAddress(_)
        ));
    }

    #[test]
    fn test_busy_port_is_already_open() {
        assert!(matches!(
            open_error(ErrorKind::NoDevice, "Device or resource busy"),
            ObdError::AlreadyOpen(_)
        ));
    }

    #[test]
    fn test_other_failures_are_serial_errors() {
        assert!(matches!(
            open_error(ErrorKind::Unknown, "weird"),
            ObdError::SerialError(_)
        ));
    }
}
