//! Radio transmission subsystem.
//!
//! - [`headers`] - one-byte packet headers
//! - [`message`] - outbound messages and their framing
//! - [`queue`] - bounded priority queue of outbound messages
//! - [`reassembly`] - inbound chunk reassembly
//! - [`command`] - authenticated command dispatch
//! - [`task`] - the scheduler task that drives the link
//! - [`sim`] - in-process link used by tests and simulations

pub mod command;
pub mod headers;
pub mod message;
pub mod queue;
pub mod reassembly;
pub mod sim;
pub mod task;

pub use command::{CommandDispatcher, CommandTable, DispatchOutcome};
pub use headers::{ChunkFamily, ChunkPosition, Header};
pub use message::OutboundMessage;
pub use queue::{QueueError, TransmissionQueue};
pub use reassembly::{Reassembled, Reassembler};
pub use sim::{SentPacket, SimulatedRadio};
pub use task::RadioTask;

use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::path::PathBuf;

/// Largest packet any supported transceiver can carry, header included.
pub const MAX_PACKET_LEN: usize = 256;
/// RFM9x LoRa FIFO limit minus its own 4-byte link header.
pub const DEFAULT_PACKET_LEN: usize = 252;
pub const DOWNLINK_QUEUE_CAPACITY: usize = 32;

const_assert!(DEFAULT_PACKET_LEN <= MAX_PACKET_LEN);
// header byte plus secret and opcode must fit in the smallest useful packet
const_assert!(1 + command::SECRET_LEN + command::OPCODE_LEN < 16);

pub type Packet = heapless::Vec<u8, MAX_PACKET_LEN>;

pub const DEFAULT_SECRET: [u8; 4] = [0x70, 0xba, 0xb8, 0x43];
pub const DEFAULT_SHUTDOWN_SECRET: [u8; 4] = [0x0b, 0xfd, 0x49, 0xec];

#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("payload of {len} bytes does not fit in a {capacity}-byte frame")]
    MessageTooLarge { len: usize, capacity: usize },
    #[error("packet length {0} outside 16..={max}", max = MAX_PACKET_LEN)]
    InvalidPacketLen(usize),
    #[error("empty packet")]
    EmptyPacket,
    #[error("unknown header byte 0x{0:02x}")]
    UnknownHeader(u8),
    #[error("reassembly buffer limit of {0} bytes exceeded")]
    ReassemblyOverflow(usize),
    #[error("no disk inbox configured for disk-chunked messages")]
    NoDiskInbox,
    #[error("link failure: {0}")]
    Link(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transceiver driver.
///
/// `send_with_ack` waits for the link acknowledgement inside the call. The
/// wait is bounded by `timeout_ms`, but nothing else runs while it lasts.
pub trait RadioDriver {
    fn send(&mut self, packet: &[u8]) -> Result<(), RadioError>;
    fn send_with_ack(&mut self, packet: &[u8], timeout_ms: u64) -> Result<bool, RadioError>;
    /// Non-blocking check for a received packet.
    fn rx_waiting(&mut self) -> bool;
    fn try_receive(&mut self) -> Result<Option<Packet>, RadioError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub packet_len: usize,
    pub ack_timeout_ms: u64,
    pub listen_window_ms: u64,
    pub follow_up_timeout_ms: u64,
    pub max_retries: u8,
    pub queue_capacity: usize,
    pub secret: [u8; 4],
    pub shutdown_secret: [u8; 4],
    pub file_root: PathBuf,
    pub disk_inbox: Option<PathBuf>,
    pub max_reassembly_len: usize,
    pub reply_priority: u8,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            packet_len: DEFAULT_PACKET_LEN,
            ack_timeout_ms: 1000,
            listen_window_ms: 2000,
            follow_up_timeout_ms: 5000,
            max_retries: 5,
            queue_capacity: DOWNLINK_QUEUE_CAPACITY,
            secret: DEFAULT_SECRET,
            shutdown_secret: DEFAULT_SHUTDOWN_SECRET,
            file_root: PathBuf::from("."),
            disk_inbox: None,
            max_reassembly_len: 64 * 1024,
            reply_priority: 200,
        }
    }
}

impl RadioConfig {
    /// Payload bytes available per packet after the header.
    pub fn frame_capacity(&self) -> usize {
        self.packet_len - 1
    }

    pub fn validate(&self) -> Result<(), RadioError> {
        if !(16..=MAX_PACKET_LEN).contains(&self.packet_len) {
            return Err(RadioError::InvalidPacketLen(self.packet_len));
        }
        Ok(())
    }
}
