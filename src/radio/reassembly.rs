//! Inbound chunk reassembly.
//!
//! A retransmitted chunk is byte-identical to the one before it, so a chunk
//! equal to the previous chunk of the same family is dropped. The flip side is
//! that a message can't legitimately contain two identical consecutive chunks.

use super::headers::{ChunkFamily, ChunkPosition};
use super::{Packet, RadioError};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembled {
    Memory(Vec<u8>),
    File { path: PathBuf, len: usize },
}

#[derive(Debug)]
struct DiskSink {
    file: File,
    path: PathBuf,
    len: usize,
}

#[derive(Debug)]
pub struct Reassembler {
    memory: Vec<u8>,
    disk: Option<DiskSink>,
    disk_inbox: Option<PathBuf>,
    last_memory: Option<(ChunkPosition, Packet)>,
    last_disk: Option<(ChunkPosition, Packet)>,
    max_len: usize,
    next_file_id: u32,
    duplicates: u32,
}

impl Reassembler {
    pub fn new(max_len: usize, disk_inbox: Option<PathBuf>) -> Self {
        Self {
            memory: Vec::new(),
            disk: None,
            disk_inbox,
            last_memory: None,
            last_disk: None,
            max_len,
            next_file_id: 0,
            duplicates: 0,
        }
    }

    pub fn duplicates_dropped(&self) -> u32 {
        self.duplicates
    }

    /// Bytes buffered for the in-progress memory message.
    pub fn pending_len(&self) -> usize {
        self.memory.len()
    }

    pub fn accept(
        &mut self,
        family: ChunkFamily,
        position: ChunkPosition,
        payload: &[u8],
    ) -> Result<Option<Reassembled>, RadioError> {
        let last = match family {
            ChunkFamily::Memory => &mut self.last_memory,
            ChunkFamily::Disk => &mut self.last_disk,
        };
        if matches!(last, Some((p, bytes)) if *p == position && bytes.as_slice() == payload) {
            self.duplicates = self.duplicates.saturating_add(1);
            tracing::debug!("dropping repeated {:?} {:?} chunk", family, position);
            return Ok(None);
        }
        let mut copy = Packet::new();
        copy.extend_from_slice(payload)
            .map_err(|()| RadioError::MessageTooLarge {
                len: payload.len(),
                capacity: super::MAX_PACKET_LEN,
            })?;
        *last = Some((position, copy));

        match family {
            ChunkFamily::Memory => self.accept_memory(position, payload),
            ChunkFamily::Disk => self.accept_disk(position, payload),
        }
    }

    fn accept_memory(
        &mut self,
        position: ChunkPosition,
        payload: &[u8],
    ) -> Result<Option<Reassembled>, RadioError> {
        if position == ChunkPosition::Start {
            self.memory.clear();
        }
        if self.memory.len() + payload.len() > self.max_len {
            self.memory.clear();
            return Err(RadioError::ReassemblyOverflow(self.max_len));
        }
        self.memory.extend_from_slice(payload);

        if position == ChunkPosition::End {
            Ok(Some(Reassembled::Memory(std::mem::take(&mut self.memory))))
        } else {
            Ok(None)
        }
    }

    fn accept_disk(
        &mut self,
        position: ChunkPosition,
        payload: &[u8],
    ) -> Result<Option<Reassembled>, RadioError> {
        if position == ChunkPosition::Start || self.disk.is_none() {
            self.disk = Some(self.open_sink()?);
        }
        let Some(sink) = self.disk.as_mut() else {
            return Err(RadioError::NoDiskInbox);
        };
        if sink.len + payload.len() > self.max_len {
            if let Some(sink) = self.disk.take() {
                drop(sink.file);
                if let Err(err) = std::fs::remove_file(&sink.path) {
                    tracing::warn!("could not remove partial {}: {}", sink.path.display(), err);
                }
            }
            return Err(RadioError::ReassemblyOverflow(self.max_len));
        }
        sink.file.write_all(payload)?;
        sink.len += payload.len();

        if position == ChunkPosition::End {
            if let Some(mut sink) = self.disk.take() {
                sink.file.flush()?;
                return Ok(Some(Reassembled::File {
                    path: sink.path,
                    len: sink.len,
                }));
            }
        }
        Ok(None)
    }

    fn open_sink(&mut self) -> Result<DiskSink, RadioError> {
        let inbox = self.disk_inbox.as_ref().ok_or(RadioError::NoDiskInbox)?;
        std::fs::create_dir_all(inbox)?;
        let path = inbox.join(format!("uplink_{:04}.bin", self.next_file_id));
        self.next_file_id = self.next_file_id.wrapping_add(1);
        let file = File::create(&path)?;
        Ok(DiskSink { file, path, len: 0 })
    }
}
