//! In-process radio for tests and host simulation.
//!
//! Clones share one link, so a test keeps a handle while the radio task owns
//! the other.

use super::{Packet, RadioDriver, RadioError, MAX_PACKET_LEN};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub bytes: Vec<u8>,
    pub wanted_ack: bool,
}

#[derive(Debug)]
struct SimulatedLink {
    inbound: VecDeque<Vec<u8>>,
    sent: Vec<SentPacket>,
    scripted_acks: VecDeque<bool>,
    default_ack: bool,
    failing: bool,
}

impl Default for SimulatedLink {
    fn default() -> Self {
        Self {
            inbound: VecDeque::new(),
            sent: Vec::new(),
            scripted_acks: VecDeque::new(),
            default_ack: true,
            failing: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedRadio {
    link: Rc<RefCell<SimulatedLink>>,
}

impl SimulatedRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packet "received from the ground" on a later `try_receive`.
    pub fn queue_inbound(&self, bytes: impl Into<Vec<u8>>) {
        self.link.borrow_mut().inbound.push_back(bytes.into());
    }

    pub fn inbound_len(&self) -> usize {
        self.link.borrow().inbound.len()
    }

    /// Acks returned by the next `send_with_ack` calls, in order. Once the
    /// script runs out the default applies.
    pub fn script_acks(&self, acks: impl IntoIterator<Item = bool>) {
        self.link.borrow_mut().scripted_acks.extend(acks);
    }

    pub fn set_default_ack(&self, ack: bool) {
        self.link.borrow_mut().default_ack = ack;
    }

    /// Every send fails with a link error while set.
    pub fn set_failing(&self, failing: bool) {
        self.link.borrow_mut().failing = failing;
    }

    pub fn sent(&self) -> Vec<SentPacket> {
        self.link.borrow().sent.clone()
    }

    pub fn sent_bytes(&self) -> Vec<Vec<u8>> {
        self.link.borrow().sent.iter().map(|p| p.bytes.clone()).collect()
    }

    pub fn take_sent(&self) -> Vec<SentPacket> {
        std::mem::take(&mut self.link.borrow_mut().sent)
    }
}

impl RadioDriver for SimulatedRadio {
    fn send(&mut self, packet: &[u8]) -> Result<(), RadioError> {
        let mut link = self.link.borrow_mut();
        if link.failing {
            return Err(RadioError::Link("simulated link down".into()));
        }
        link.sent.push(SentPacket {
            bytes: packet.to_vec(),
            wanted_ack: false,
        });
        Ok(())
    }

    fn send_with_ack(&mut self, packet: &[u8], _timeout_ms: u64) -> Result<bool, RadioError> {
        let mut link = self.link.borrow_mut();
        if link.failing {
            return Err(RadioError::Link("simulated link down".into()));
        }
        link.sent.push(SentPacket {
            bytes: packet.to_vec(),
            wanted_ack: true,
        });
        let default_ack = link.default_ack;
        Ok(link.scripted_acks.pop_front().unwrap_or(default_ack))
    }

    fn rx_waiting(&mut self) -> bool {
        !self.link.borrow().inbound.is_empty()
    }

    fn try_receive(&mut self) -> Result<Option<Packet>, RadioError> {
        let Some(bytes) = self.link.borrow_mut().inbound.pop_front() else {
            return Ok(None);
        };
        Packet::from_slice(&bytes)
            .map(Some)
            .map_err(|()| RadioError::MessageTooLarge {
                len: bytes.len(),
                capacity: MAX_PACKET_LEN,
            })
    }
}
