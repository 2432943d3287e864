//! Reset-surviving counters and flags.
//!
//! Fields are packed into a small byte-addressable store. Every accessor is a
//! single read/modify/write on the store, so no task can observe a field half
//! updated (the core is single threaded and never suspends in here).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const REGISTER_SPACE_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("address {addr} outside register space of {len} bytes")]
    OutOfRange { addr: usize, len: usize },
    #[error("value {value} does not fit in {width} bits")]
    ValueTooWide { value: u8, width: u8 },
    #[error("unknown register '{0}'")]
    UnknownRegister(String),
    #[error("register store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Location of a field inside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub addr: usize,
    pub offset: u8,
    pub width: u8,
}

impl BitField {
    const fn mask(self) -> u8 {
        if self.width >= 8 {
            0xFF
        } else {
            ((1u16 << self.width) - 1) as u8
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Register {
    BootCount,
    StateErrorCount,
    VbusResetCount,
    DownlinkResponseCount,
    LowBatteryTimeout,
    ContactEstablished,
    BurnPerformed,
}

impl Register {
    pub const ALL: [Register; 7] = [
        Register::BootCount,
        Register::StateErrorCount,
        Register::VbusResetCount,
        Register::DownlinkResponseCount,
        Register::LowBatteryTimeout,
        Register::ContactEstablished,
        Register::BurnPerformed,
    ];

    pub const fn field(self) -> BitField {
        match self {
            Register::BootCount => BitField { addr: 0, offset: 0, width: 8 },
            Register::StateErrorCount => BitField { addr: 1, offset: 0, width: 8 },
            Register::VbusResetCount => BitField { addr: 2, offset: 0, width: 8 },
            Register::DownlinkResponseCount => BitField { addr: 3, offset: 0, width: 8 },
            Register::LowBatteryTimeout => BitField { addr: 4, offset: 0, width: 1 },
            Register::ContactEstablished => BitField { addr: 4, offset: 1, width: 1 },
            Register::BurnPerformed => BitField { addr: 4, offset: 2, width: 1 },
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Register::BootCount => "boot_count",
            Register::StateErrorCount => "state_errors",
            Register::VbusResetCount => "vbus_resets",
            Register::DownlinkResponseCount => "responses",
            Register::LowBatteryTimeout => "low_battery_timeout",
            Register::ContactEstablished => "contact_established",
            Register::BurnPerformed => "burn_performed",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, RegisterError> {
        Self::ALL
            .iter()
            .copied()
            .find(|reg| reg.name() == name)
            .ok_or_else(|| RegisterError::UnknownRegister(name.to_string()))
    }

    pub const fn is_flag(self) -> bool {
        self.field().width == 1
    }
}

/// Byte-addressable persistent medium (battery-backed RAM, flash page, file).
pub trait NvmStore {
    fn len(&self) -> usize;
    fn read(&self, addr: usize) -> Result<u8, RegisterError>;
    fn write(&mut self, addr: usize, value: u8) -> Result<(), RegisterError>;
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    bytes: Vec<u8>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; REGISTER_SPACE_LEN],
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NvmStore for MemoryStore {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, addr: usize) -> Result<u8, RegisterError> {
        self.bytes.get(addr).copied().ok_or(RegisterError::OutOfRange {
            addr,
            len: self.bytes.len(),
        })
    }

    fn write(&mut self, addr: usize, value: u8) -> Result<(), RegisterError> {
        let len = self.bytes.len();
        let slot = self
            .bytes
            .get_mut(addr)
            .ok_or(RegisterError::OutOfRange { addr, len })?;
        *slot = value;
        Ok(())
    }
}

/// Write-through store backed by a small file, used by host runs.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegisterError> {
        let path = path.as_ref().to_path_buf();
        let mut bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        bytes.resize(REGISTER_SPACE_LEN, 0);
        Ok(Self { path, bytes })
    }
}

impl NvmStore for FileStore {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, addr: usize) -> Result<u8, RegisterError> {
        self.bytes.get(addr).copied().ok_or(RegisterError::OutOfRange {
            addr,
            len: self.bytes.len(),
        })
    }

    fn write(&mut self, addr: usize, value: u8) -> Result<(), RegisterError> {
        let len = self.bytes.len();
        let slot = self
            .bytes
            .get_mut(addr)
            .ok_or(RegisterError::OutOfRange { addr, len })?;
        *slot = value;
        std::fs::write(&self.path, &self.bytes)?;
        Ok(())
    }
}

/// Typed accessor layer over an [`NvmStore`].
pub struct RegisterSpace {
    store: Box<dyn NvmStore>,
}

impl RegisterSpace {
    pub fn new(store: Box<dyn NvmStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()))
    }

    pub fn get(&self, register: Register) -> Result<u8, RegisterError> {
        let field = register.field();
        let byte = self.store.read(field.addr)?;
        Ok((byte >> field.offset) & field.mask())
    }

    pub fn set(&mut self, register: Register, value: u8) -> Result<(), RegisterError> {
        let field = register.field();
        if value & !field.mask() != 0 {
            return Err(RegisterError::ValueTooWide {
                value,
                width: field.width,
            });
        }
        let byte = self.store.read(field.addr)?;
        let cleared = byte & !(field.mask() << field.offset);
        self.store.write(field.addr, cleared | (value << field.offset))
    }

    /// Increment a counter, wrapping within the field width. Returns the new value.
    pub fn increment(&mut self, register: Register) -> Result<u8, RegisterError> {
        let mask = register.field().mask();
        let next = self.get(register)?.wrapping_add(1) & mask;
        self.set(register, next)?;
        Ok(next)
    }

    pub fn flag(&self, register: Register) -> Result<bool, RegisterError> {
        Ok(self.get(register)? != 0)
    }

    pub fn set_flag(&mut self, register: Register, on: bool) -> Result<(), RegisterError> {
        self.set(register, u8::from(on))
    }

    /// Maintenance reset of a single field.
    pub fn reset(&mut self, register: Register) -> Result<(), RegisterError> {
        self.set(register, 0)
    }
}

impl core::fmt::Debug for RegisterSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegisterSpace")
            .field("len", &self.store.len())
            .finish()
    }
}
