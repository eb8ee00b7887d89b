//! Simulated ELM327 adapter
//!
//! [`MockAdapter`] implements [`Transport`] by answering each written command
//! from a response table, the way a real ELM327 with echo enabled would:
//! echo line, reply lines, a blank line and the `>` prompt. It lets the
//! handshake, transaction and scan logic run without hardware.
//!
//! # Example
//!
//! ```
//! use obd_protocol::{LinkConfig, MockAdapter, ObdClient};
//!
//! let adapter = MockAdapter::new().with_response("010D", &["41 0D 32"]);
//! let mut client = ObdClient::handshake(adapter, &LinkConfig::default()).unwrap();
//! assert_eq!(client.vehicle_speed(), 50);
//! ```

use crate::at;
use crate::error::ObdError;
use crate::transport::Transport;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Version line reported after `ATZ` unless overridden
pub const DEFAULT_VERSION: &str = "ELM327 v1.5";

/// Stock replies for every command the link and codec issue
const DEFAULT_RESPONSES: &[(&str, &str)] = &[
    ("ATSP0", "OK"),
    ("ATRV", "12.6V"),
    ("ATPP0CSV23", "OK"),
    ("ATPP0CON", "OK"),
    ("0100", "41 00 BE 3E F8 11"),
    ("0120", "41 20 80 01 80 01"),
    ("0140", "41 40 44 00 00 00"),
    ("0101", "41 01 00 07 65 00"),
    ("0103", "41 03 02 00"),
    ("0104", "41 04 64"),
    ("0105", "41 05 7B"),
    ("010B", "41 0B 21"),
    ("010C", "41 0C 1A F8"),
    ("010D", "41 0D 28"),
    ("010F", "41 0F 38"),
    ("0111", "41 11 45"),
    ("0121", "41 21 00 0A"),
];

/// In-memory ELM327 that answers from a response table
#[derive(Debug, Clone)]
pub struct MockAdapter {
    version: String,
    responses: HashMap<String, Vec<String>>,
    /// Commands whose echo should come back altered
    echo_overrides: HashMap<String, String>,
    echo: bool,
    silent: bool,
    /// Lines waiting to be read
    outbox: VecDeque<String>,
    timeout: Duration,
    /// Every line written, in order
    sent: Vec<String>,
    /// Every timeout set, in order
    timeouts: Vec<Duration>,
}

impl MockAdapter {
    /// A well-behaved ELM327 v1.5 with the stock response table
    pub fn new() -> Self {
        let responses = DEFAULT_RESPONSES
            .iter()
            .map(|(cmd, reply)| (cmd.to_string(), vec![reply.to_string()]))
            .collect();

        Self {
            version: DEFAULT_VERSION.to_string(),
            responses,
            echo_overrides: HashMap::new(),
            echo: true,
            silent: false,
            outbox: VecDeque::new(),
            timeout: Duration::from_millis(1000),
            sent: Vec::new(),
            timeouts: Vec::new(),
        }
    }

    /// An adapter that never answers anything
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::new()
        }
    }

    /// Report `version` after reset instead of [`DEFAULT_VERSION`]
    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    /// Replace the reply lines for `command`
    pub fn with_response(mut self, command: &str, lines: &[&str]) -> Self {
        self.responses.insert(
            command.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
        );
        self
    }

    /// Echo `echo` instead of `command` when `command` is written
    pub fn with_echo(mut self, command: &str, echo: &str) -> Self {
        self.echo_overrides
            .insert(command.to_string(), echo.to_string());
        self
    }

    /// Stop echoing commands (as after `ATE0`)
    pub fn without_echo(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Lines written so far
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    /// Read timeouts set so far
    pub fn timeouts(&self) -> &[Duration] {
        &self.timeouts
    }

    fn queue_reply(&mut self, command: &str) {
        if self.echo {
            let echo = self
                .echo_overrides
                .get(command)
                .cloned()
                .unwrap_or_else(|| command.to_string());
            self.outbox.push_back(echo);
        }

        if command == at::RESET {
            // Reset output: two blank lines, then the identification banner.
            self.outbox.push_back(String::new());
            self.outbox.push_back(String::new());
            self.outbox.push_back(self.version.clone());
        } else {
            match self.responses.get(command) {
                Some(lines) => self.outbox.extend(lines.iter().cloned()),
                None => self.outbox.push_back("?".to_string()),
            }
        }

        self.outbox.push_back(String::new());
        self.outbox.push_back(">".to_string());
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockAdapter {
    fn write_line(&mut self, line: &str) -> Result<(), ObdError> {
        self.sent.push(line.to_string());
        if !self.silent {
            self.queue_reply(line);
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, ObdError> {
        self.outbox
            .pop_front()
            .ok_or(ObdError::Timeout(self.timeout.as_millis() as u64))
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ObdError> {
        self.timeout = timeout;
        self.timeouts.push(timeout);
        Ok(())
    }

    fn discard_input(&mut self) -> Result<(), ObdError> {
        self.outbox.clear();
        Ok(())
    }
}
