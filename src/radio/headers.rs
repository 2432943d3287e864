//! One-byte packet headers.

pub const SINGLE: u8 = 0x00;
pub const MEMORY_START: u8 = 0x01;
pub const MEMORY_MID: u8 = 0x02;
pub const MEMORY_END: u8 = 0x03;
pub const DISK_START: u8 = 0x04;
pub const DISK_MID: u8 = 0x05;
pub const DISK_END: u8 = 0x06;
pub const COMMAND: u8 = 0x07;
pub const DIAGNOSTIC: u8 = 0x08;

/// Set on a COMMAND header when the sender will follow up with one more packet.
pub const MULTI_MESSAGE: u8 = 0x80;
const MULTI_COMMAND: u8 = COMMAND | MULTI_MESSAGE;

/// Where the receiver accumulates a chunked message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkFamily {
    Memory,
    Disk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPosition {
    Start,
    Mid,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// The whole message fits in this packet.
    Single,
    Chunk {
        family: ChunkFamily,
        position: ChunkPosition,
    },
    Command {
        multi_message: bool,
    },
    /// Short human-readable error text sent back to the ground.
    Diagnostic,
}

impl Header {
    pub const fn to_byte(self) -> u8 {
        match self {
            Header::Single => SINGLE,
            Header::Chunk { family, position } => {
                let base = match family {
                    ChunkFamily::Memory => MEMORY_START,
                    ChunkFamily::Disk => DISK_START,
                };
                base + match position {
                    ChunkPosition::Start => 0,
                    ChunkPosition::Mid => 1,
                    ChunkPosition::End => 2,
                }
            }
            Header::Command { multi_message } => {
                if multi_message {
                    COMMAND | MULTI_MESSAGE
                } else {
                    COMMAND
                }
            }
            Header::Diagnostic => DIAGNOSTIC,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Header> {
        let chunk = |family, position| Some(Header::Chunk { family, position });
        match byte {
            SINGLE => Some(Header::Single),
            MEMORY_START => chunk(ChunkFamily::Memory, ChunkPosition::Start),
            MEMORY_MID => chunk(ChunkFamily::Memory, ChunkPosition::Mid),
            MEMORY_END => chunk(ChunkFamily::Memory, ChunkPosition::End),
            DISK_START => chunk(ChunkFamily::Disk, ChunkPosition::Start),
            DISK_MID => chunk(ChunkFamily::Disk, ChunkPosition::Mid),
            DISK_END => chunk(ChunkFamily::Disk, ChunkPosition::End),
            COMMAND => Some(Header::Command { multi_message: false }),
            MULTI_COMMAND => Some(Header::Command { multi_message: true }),
            DIAGNOSTIC => Some(Header::Diagnostic),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_defined_byte_decodes_to_itself() {
        for byte in 0u8..=0xFF {
            if let Some(header) = Header::from_byte(byte) {
                assert_eq!(header.to_byte(), byte);
            }
        }
    }

    #[test]
    fn test_multi_message_bit() {
        assert_eq!(
            Header::from_byte(0x87),
            Some(Header::Command { multi_message: true })
        );
        assert_eq!(Header::from_byte(0x81), None);
    }
}
