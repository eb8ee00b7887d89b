//! Supported-PID discovery
//!
//! PIDs 00, 20, 40, ... each return a 32-bit mask. Reading MSB first, bit
//! `i` (0..=30) says PID `offset + i + 1` is supported; the least significant
//! bit says the next group can be queried. The number of groups is not known
//! up front: the scan runs until a group clears its continuation bit.

use crate::pid::{parse_payload, request_for};
use crate::transaction::{
    strip_response_prefix, Channel, Echo, ReceiveOptions, SEARCH_TIMEOUT,
};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// PIDs covered by one supported-PID query
pub const GROUP_SIZE: u8 = 0x20;

/// Offset of the last group that fits in a one-byte PID
pub const LAST_GROUP_OFFSET: u8 = 0xE0;

/// Interim line the adapter prints while it negotiates the vehicle bus
pub const SEARCHING: &str = "SEARCHING...";

/// PIDs `offset + 1 ..= offset + 31` whose bit is set in `mask`
pub fn group_pids(offset: u8, mask: u32) -> impl Iterator<Item = u8> {
    (0..31u8)
        .filter(move |i| mask & (1 << (31 - i)) != 0)
        .map(move |i| offset.wrapping_add(i + 1))
}

/// Whether the group mask asks for the next group to be queried
pub fn has_more_groups(mask: u32) -> bool {
    mask & 1 != 0
}

/// The set of PIDs the vehicle reported as supported
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedPids {
    pids: BTreeSet<u8>,
    /// Raw group masks in scan order
    groups: Vec<u32>,
}

impl SupportedPids {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the mask for the group at `offset`; returns whether another group follows
    pub fn add_group(&mut self, offset: u8, mask: u32) -> bool {
        self.pids.extend(group_pids(offset, mask));
        self.groups.push(mask);
        has_more_groups(mask)
    }

    pub fn contains(&self, pid: u8) -> bool {
        self.pids.contains(&pid)
    }

    /// Supported PIDs in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.pids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    pub fn groups(&self) -> &[u32] {
        &self.groups
    }
}

/// Query supported-PID groups until one clears its continuation bit.
///
/// A group that cannot be read (timeout, echo mismatch, `NO DATA`, garbage)
/// ends the scan with whatever was collected so far.
pub fn scan<T: Transport>(channel: &mut Channel<T>) -> SupportedPids {
    let mut supported = SupportedPids::new();
    let mut offset: u8 = 0;

    loop {
        let command = request_for(offset);
        let timeout = channel.command_timeout();

        let line = match channel.transmit(&command, Echo::Expect) {
            Ok(mut tx) => {
                let mut line = tx.receive(ReceiveOptions::raw(timeout));
                if line.as_deref() == Some(SEARCHING) {
                    debug!("Adapter searching for a protocol, waiting up to {:?}", SEARCH_TIMEOUT);
                    line = tx.receive(ReceiveOptions::raw(SEARCH_TIMEOUT));
                }
                tx.finish();
                line
            }
            Err(e) => {
                warn!("Supported PID query {} failed: {}", command, e);
                None
            }
        };

        let Some(line) = line else {
            channel.flush();
            break;
        };

        let Some(mask) = parse_payload(&strip_response_prefix(&line), 4) else {
            warn!("Unusable reply to {}: {:?}", command, line);
            break;
        };

        debug!("PID group {:02X}: {:08X}", offset, mask);
        if !supported.add_group(offset, mask) || offset >= LAST_GROUP_OFFSET {
            break;
        }
        offset += GROUP_SIZE;
    }

    info!(
        "Vehicle supports {} PIDs across {} group(s)",
        supported.len(),
        supported.groups().len()
    );
    supported
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAdapter;
    use proptest::prelude::*;
    use std::time::Duration;

    #[test]
    fn test_group_zero_bits() {
        let pids: Vec<u8> = group_pids(0, 0xBE3EF811).collect();
        assert_eq!(
            pids,
            vec![
                0x01, 0x03, 0x04, 0x05, 0x06, 0x07, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x11, 0x12,
                0x13, 0x14, 0x15, 0x1C
            ]
        );
        assert!(has_more_groups(0xBE3EF811));
    }

    #[test]
    fn test_continuation_bit_not_reported_as_pid() {
        let mut supported = SupportedPids::new();
        assert!(supported.add_group(0x20, 0x00000001));
        assert!(supported.is_empty());
        assert!(!supported.contains(0x40));
    }

    #[test]
    fn test_last_group_reaches_ff() {
        let pids: Vec<u8> = group_pids(LAST_GROUP_OFFSET, 0x00000002).collect();
        assert_eq!(pids, vec![0xFF]);
    }

    #[test]
    fn test_scan_follows_continuation() {
        let mut channel = Channel::new(MockAdapter::new());
        let supported = scan(&mut channel);

        assert_eq!(supported.groups(), &[0xBE3EF811u32, 0x80018001, 0x44000000]);
        assert!(supported.contains(0x0C));
        assert!(supported.contains(0x21));
        assert!(supported.contains(0x30));
        assert!(supported.contains(0x31));
        assert!(supported.contains(0x42));
        assert!(supported.contains(0x46));
        assert!(!supported.contains(0x20));
        assert!(!supported.contains(0x40));

        let sent = channel.transport().sent();
        assert_eq!(sent, &["0100", "0120", "0140"]);
    }

    #[test]
    fn test_scan_stops_without_continuation() {
        let adapter = MockAdapter::new().with_response("0100", &["41 00 BE 3E F8 10"]);
        let mut channel = Channel::new(adapter);
        let supported = scan(&mut channel);

        assert_eq!(supported.groups(), &[0xBE3EF810u32]);
        assert_eq!(channel.transport().sent(), &["0100"]);
    }

    #[test]
    fn test_scan_waits_through_searching() {
        let adapter = MockAdapter::new()
            .with_response("0100", &[SEARCHING, "41 00 80 00 00 00"]);
        let mut channel = Channel::new(adapter);
        let supported = scan(&mut channel);

        assert_eq!(supported.iter().collect::<Vec<_>>(), vec![0x01]);
        assert!(channel
            .transport()
            .timeouts()
            .contains(&Duration::from_millis(10_000)));
    }

    #[test]
    fn test_scan_stops_on_no_data() {
        let adapter = MockAdapter::new().with_response("0120", &["NO DATA"]);
        let mut channel = Channel::new(adapter);
        let supported = scan(&mut channel);

        assert_eq!(supported.groups(), &[0xBE3EF811u32]);
        assert_eq!(channel.transport().sent(), &["0100", "0120"]);
    }

    #[test]
    fn test_scan_on_silent_adapter() {
        let mut channel = Channel::new(MockAdapter::silent());
        assert!(scan(&mut channel).is_empty());
    }

    #[test]
    fn test_scan_bounded_by_pid_range() {
        let mut adapter = MockAdapter::new();
        for offset in (0..=LAST_GROUP_OFFSET).step_by(GROUP_SIZE as usize) {
            adapter = adapter.with_response(&request_for(offset), &["41 00 00 00 00 01"]);
        }
        let mut channel = Channel::new(adapter);
        let supported = scan(&mut channel);
        assert_eq!(supported.groups().len(), 8);
        assert_eq!(channel.transport().sent().last().map(String::as_str), Some("01E0"));
    }

    proptest! {
        #[test]
        fn prop_group_pids_match_bits(offset in 0u8..=7, mask in any::<u32>()) {
            let offset = offset * GROUP_SIZE;
            let pids: Vec<u8> = group_pids(offset, mask).collect();
            prop_assert_eq!(pids.len() as u32, (mask & !1).count_ones());
            for pid in pids {
                let i = pid - offset - 1;
                prop_assert!(mask & (1 << (31 - i)) != 0);
            }
        }
    }
}
