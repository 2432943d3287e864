//! Outbound messages and how they are cut into packets.
//!
//! A message hands out one packet at a time and only moves its cursor when
//! that packet is acknowledged, so a lost packet is resent as-is on the next
//! radio tick and at most one chunk is ever in flight.

use super::headers::{ChunkFamily, ChunkPosition, Header};
use super::{Packet, RadioError, MAX_PACKET_LEN};
use arrayvec::ArrayString;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(Debug)]
enum Source {
    Memory(Vec<u8>),
    Disk { file: File, path: PathBuf },
}

#[derive(Debug, Clone, Copy)]
enum Framing {
    /// Whole payload in one packet under a fixed header.
    Single(Header),
    Chunked(ChunkFamily),
}

#[derive(Debug)]
pub struct OutboundMessage {
    priority: u8,
    requires_ack: bool,
    framing: Framing,
    source: Source,
    capacity: usize,
    cursor: usize,
    total: usize,
    in_flight: usize,
    finished: bool,
    consecutive_failures: u8,
    abandoned: bool,
}

impl OutboundMessage {
    fn build(
        priority: u8,
        framing: Framing,
        source: Source,
        total: usize,
        capacity: usize,
    ) -> Result<Self, RadioError> {
        if capacity == 0 || capacity >= MAX_PACKET_LEN {
            return Err(RadioError::InvalidPacketLen(capacity + 1));
        }
        Ok(Self {
            priority,
            requires_ack: true,
            framing,
            source,
            capacity,
            cursor: 0,
            total,
            in_flight: 0,
            finished: false,
            consecutive_failures: 0,
            abandoned: false,
        })
    }

    /// Single-packet message with no chunk header.
    pub fn single(priority: u8, payload: Vec<u8>, capacity: usize) -> Result<Self, RadioError> {
        Self::single_with_header(priority, Header::Single, payload, capacity)
    }

    pub fn single_with_header(
        priority: u8,
        header: Header,
        payload: Vec<u8>,
        capacity: usize,
    ) -> Result<Self, RadioError> {
        if payload.len() > capacity {
            return Err(RadioError::MessageTooLarge {
                len: payload.len(),
                capacity,
            });
        }
        let total = payload.len();
        Self::build(priority, Framing::Single(header), Source::Memory(payload), total, capacity)
    }

    /// Error text for the ground, truncated to one frame on a char boundary.
    pub fn diagnostic(priority: u8, text: &str, capacity: usize) -> Result<Self, RadioError> {
        let mut buffer = ArrayString::<MAX_PACKET_LEN>::new();
        for ch in text.chars() {
            if buffer.len() + ch.len_utf8() > capacity.min(MAX_PACKET_LEN) {
                break;
            }
            buffer.push(ch);
        }
        Self::single_with_header(
            priority,
            Header::Diagnostic,
            buffer.as_bytes().to_vec(),
            capacity,
        )
    }

    /// In-memory payload split into START/MID/END packets.
    pub fn chunked(priority: u8, payload: Vec<u8>, capacity: usize) -> Result<Self, RadioError> {
        let total = payload.len();
        Self::build(
            priority,
            Framing::Chunked(ChunkFamily::Memory),
            Source::Memory(payload),
            total,
            capacity,
        )
    }

    /// Single packet when it fits, memory-chunked otherwise.
    pub fn auto(priority: u8, payload: Vec<u8>, capacity: usize) -> Result<Self, RadioError> {
        if payload.len() <= capacity {
            Self::single(priority, payload, capacity)
        } else {
            Self::chunked(priority, payload, capacity)
        }
    }

    /// Payload streamed from a file one slice at a time, so it never has to
    /// fit in memory.
    pub fn from_file(
        priority: u8,
        path: impl AsRef<Path>,
        capacity: usize,
    ) -> Result<Self, RadioError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let total = usize::try_from(file.metadata()?.len())
            .map_err(|_| RadioError::MessageTooLarge { len: usize::MAX, capacity })?;
        Self::build(
            priority,
            Framing::Chunked(ChunkFamily::Disk),
            Source::Disk { file, path },
            total,
            capacity,
        )
    }

    #[must_use]
    pub fn with_ack(mut self, requires_ack: bool) -> Self {
        self.requires_ack = requires_ack;
        self
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn requires_ack(&self) -> bool {
        self.requires_ack
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn total_len(&self) -> usize {
        self.total
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    pub fn source_path(&self) -> Option<&Path> {
        match &self.source {
            Source::Disk { path, .. } => Some(path),
            Source::Memory(_) => None,
        }
    }

    /// Next packet to send. Calling it again without an ack yields the same packet.
    pub fn packet(&mut self) -> Result<Packet, RadioError> {
        let len = (self.total - self.cursor).min(self.capacity);
        let header = match self.framing {
            Framing::Single(header) => header,
            Framing::Chunked(family) => {
                let position = if self.cursor + len >= self.total {
                    ChunkPosition::End
                } else if self.cursor == 0 {
                    ChunkPosition::Start
                } else {
                    ChunkPosition::Mid
                };
                Header::Chunk { family, position }
            }
        };

        let overflow = RadioError::MessageTooLarge {
            len: len + 1,
            capacity: MAX_PACKET_LEN,
        };
        let mut packet = Packet::new();
        if packet.push(header.to_byte()).is_err() {
            return Err(overflow);
        }

        match &mut self.source {
            Source::Memory(bytes) => {
                packet
                    .extend_from_slice(&bytes[self.cursor..self.cursor + len])
                    .map_err(|()| overflow)?;
            }
            Source::Disk { file, .. } => {
                let mut slice = [0u8; MAX_PACKET_LEN];
                file.seek(SeekFrom::Start(self.cursor as u64))?;
                file.read_exact(&mut slice[..len])?;
                packet.extend_from_slice(&slice[..len]).map_err(|()| overflow)?;
            }
        }

        self.in_flight = len;
        Ok(packet)
    }

    /// The last packet arrived; move past it.
    pub fn ack(&mut self) {
        self.cursor += self.in_flight;
        self.in_flight = 0;
        self.consecutive_failures = 0;
        if self.cursor >= self.total {
            self.finished = true;
        }
    }

    /// The last packet was not acknowledged. The cursor stays put so the same
    /// chunk goes out again; after `max_retries` consecutive misses the
    /// message is abandoned. Returns true when that happens.
    pub fn no_ack(&mut self, max_retries: u8) -> bool {
        self.in_flight = 0;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures > max_retries {
            self.abandoned = true;
        }
        self.abandoned
    }

    pub fn done(&self) -> bool {
        self.finished || self.abandoned
    }
}
