//! Command/response discipline on top of a [`Transport`]
//!
//! Every exchange with the adapter follows the same shape: write a command,
//! read back its echo, read the reply, then drain whatever chatter is left
//! (blank lines, the `>` prompt) so the next command starts clean.
//!
//! A [`Transaction`] mutably borrows its [`Channel`], so a second command
//! cannot be written while the reply to the first is still being read.

use crate::error::ObdError;
use crate::transport::Transport;
use std::time::Duration;
use tracing::{debug, warn};

/// Bound on a normal command/response step
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Bound on each read while draining leftover lines
pub const FLUSH_TIMEOUT: Duration = Duration::from_millis(100);

/// Bound on the reply that follows `SEARCHING...` while the adapter probes the bus
pub const SEARCH_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Length of the `"41 0C "` mode/PID echo at the start of a Mode 01 reply
pub const RESPONSE_PREFIX_LEN: usize = 6;

/// Safety cap on lines discarded by a single flush
const MAX_FLUSH_LINES: usize = 256;

/// How a single receive behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// Read timeout for the line
    pub timeout: Duration,
    /// Drain and discard everything after the line
    pub flush_after: bool,
    /// Remove the mode/PID echo and all spaces, leaving bare hex
    pub strip_prefix: bool,
}

impl ReceiveOptions {
    /// Read one line and leave everything else in place
    pub fn raw(timeout: Duration) -> Self {
        Self {
            timeout,
            flush_after: false,
            strip_prefix: false,
        }
    }

    /// Read one line and drain the rest
    pub fn flushed(timeout: Duration) -> Self {
        Self {
            timeout,
            flush_after: true,
            strip_prefix: false,
        }
    }

    /// Read one Mode 01 reply, drain the rest and return its hex payload
    pub fn payload(timeout: Duration) -> Self {
        Self {
            timeout,
            flush_after: true,
            strip_prefix: true,
        }
    }
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self::flushed(DEFAULT_TIMEOUT)
    }
}

/// Whether a transmit should verify the adapter's echo of the command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    /// Read one line right after writing and require it to match the command
    Expect,
    /// Do not read an echo; the caller handles whatever comes back
    Ignore,
}

/// Owns the transport and serializes exchanges on it
pub struct Channel<T: Transport> {
    transport: T,
    command_timeout: Duration,
    flush_timeout: Duration,
}

impl<T: Transport> Channel<T> {
    /// Wrap `transport` with the default timeouts
    pub fn new(transport: T) -> Self {
        Self::with_timeouts(transport, DEFAULT_TIMEOUT, FLUSH_TIMEOUT)
    }

    /// Wrap `transport` with explicit command and flush timeouts
    pub fn with_timeouts(transport: T, command_timeout: Duration, flush_timeout: Duration) -> Self {
        Self {
            transport,
            command_timeout,
            flush_timeout,
        }
    }

    /// Timeout used for echoes and ordinary replies
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Borrow the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Give the transport back
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Write `command` and, if asked, verify its echo.
    ///
    /// The returned [`Transaction`] is the only way to read the reply.
    pub fn transmit(&mut self, command: &str, echo: Echo) -> Result<Transaction<'_, T>, ObdError> {
        debug!("TX: {}", command);
        self.transport.write_line(command)?;

        if echo == Echo::Expect {
            let received = self
                .read(ReceiveOptions::raw(self.command_timeout))
                .ok_or(ObdError::Timeout(self.command_timeout.as_millis() as u64))?;

            if received.trim_end_matches('>') != command {
                warn!("Echo mismatch: sent {:?}, received {:?}", command, received);
                return Err(ObdError::EchoMismatch {
                    sent: command.to_string(),
                    received,
                });
            }
        }

        Ok(Transaction {
            channel: self,
            command: command.to_string(),
        })
    }

    /// Send `command` with echo verification and read one reply line.
    ///
    /// Any failure is "no data". After a failed transmit the channel is
    /// flushed so a stray reply cannot leak into the next exchange.
    pub fn exchange(&mut self, command: &str, options: ReceiveOptions) -> Option<String> {
        match self.transmit(command, Echo::Expect) {
            Ok(transaction) => transaction.reply(options),
            Err(e) => {
                debug!("{} failed: {}", command, e);
                self.flush();
                None
            }
        }
    }

    /// Discard every line the adapter has queued, stopping at the first read timeout
    pub fn flush(&mut self) {
        if let Err(e) = self.transport.set_timeout(self.flush_timeout) {
            debug!("Could not set flush timeout: {}", e);
            return;
        }

        let mut discarded = 0;
        while discarded < MAX_FLUSH_LINES {
            match self.transport.read_line() {
                Ok(line) => {
                    debug!("RX (flushed): {:?}", line);
                    discarded += 1;
                }
                Err(_) => return,
            }
        }
        warn!("Flush gave up after {} lines", MAX_FLUSH_LINES);
    }

    /// Drop unread bytes at the driver level, without waiting
    pub fn discard_input(&mut self) -> Result<(), ObdError> {
        self.transport.discard_input()
    }

    fn read(&mut self, options: ReceiveOptions) -> Option<String> {
        if let Err(e) = self.transport.set_timeout(options.timeout) {
            debug!("Could not set read timeout: {}", e);
            return None;
        }

        let line = match self.transport.read_line() {
            Ok(line) => line,
            Err(e) => {
                debug!("No data: {}", e);
                return None;
            }
        };
        debug!("RX: {:?}", line);

        if options.flush_after {
            self.flush();
        }

        if options.strip_prefix {
            Some(strip_response_prefix(&line))
        } else {
            Some(line)
        }
    }
}

/// One outstanding command and the right to read its reply
pub struct Transaction<'a, T: Transport> {
    channel: &'a mut Channel<T>,
    command: String,
}

impl<'a, T: Transport> Transaction<'a, T> {
    /// The command this transaction was opened with
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Read the next reply line. `None` means timeout or I/O failure.
    pub fn receive(&mut self, options: ReceiveOptions) -> Option<String> {
        self.channel.read(options)
    }

    /// Read a single reply line and close the transaction
    pub fn reply(mut self, options: ReceiveOptions) -> Option<String> {
        self.receive(options)
    }

    /// Drain the rest of the reply and close the transaction
    pub fn finish(self) {
        self.channel.flush();
    }
}

/// Drop the 6-character mode/PID echo and all spaces from a reply line.
///
/// `"41 0C 1A F8"` becomes `"1AF8"`. Lines too short to carry a payload
/// come back empty.
pub fn strip_response_prefix(line: &str) -> String {
    line.get(RESPONSE_PREFIX_LEN..)
        .unwrap_or("")
        .chars()
        .filter(|c| *c != ' ')
        .collect()
}
