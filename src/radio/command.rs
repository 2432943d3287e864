//! Authenticated command dispatch.
//!
//! A command payload (after the header byte) is laid out as
//! `secret[4] | opcode[2] | args...`. The table is built once at startup and
//! never changes afterwards.

use super::headers::Header;
use super::message::OutboundMessage;
use super::{Packet, RadioConfig, RadioError, MAX_PACKET_LEN};
use crate::hardware::SensorError;
use crate::registers::{Register, RegisterError};
use crate::state_machine::TransitionError;
use crate::task::Context;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

pub const SECRET_LEN: usize = 4;
pub const OPCODE_LEN: usize = 2;

pub type Opcode = [u8; OPCODE_LEN];

pub mod opcodes {
    use super::Opcode;

    pub const NO_OP: Opcode = [0x8e, 0x62];
    pub const HARD_RESET: Opcode = [0xd4, 0x9f];
    pub const SHUTDOWN: Opcode = [0x12, 0x06];
    pub const QUERY: Opcode = [0x38, 0x93];
    pub const EXEC: Opcode = [0x96, 0xa2];
    pub const REQUEST_FILE: Opcode = [0x54, 0x4b];
    pub const LIST_DIR: Opcode = [0x4c, 0x53];
    pub const QUEUE_LENGTH: Opcode = [0x51, 0x4c];
}

/// Prefix of the reply sent for an authenticated but unknown opcode. The two
/// opcode bytes follow it.
pub const INVALID_COMMAND_MARKER: &[u8] = b"invalid cmd ";

/// Priority of file transfers started by `REQUEST_FILE`; below command replies.
const BULK_PRIORITY: u8 = 50;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("bad arguments: {0}")]
    BadArguments(String),
    #[error("shutdown secret mismatch")]
    ShutdownRefused,
    #[error("unknown query '{0}'")]
    UnknownQuery(String),
    #[error("path outside file root: {0}")]
    PathOutsideRoot(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Register(#[from] RegisterError),
    #[error(transparent)]
    Radio(#[from] RadioError),
    #[error(transparent)]
    Queue(#[from] super::QueueError),
    #[error(transparent)]
    Sensor(#[from] SensorError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    /// Nothing goes back to the ground.
    Silent,
    Data(Vec<u8>),
}

impl CommandReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Data(text.into().into_bytes())
    }
}

pub type CommandHandler =
    Box<dyn Fn(&mut Context<'_>, &[u8]) -> Result<CommandReply, CommandError>>;

struct CommandEntry {
    name: &'static str,
    handler: CommandHandler,
}

/// Opcode to handler map.
pub struct CommandTable {
    commands: BTreeMap<Opcode, CommandEntry>,
}

impl CommandTable {
    pub fn builder() -> CommandTableBuilder {
        CommandTableBuilder {
            commands: BTreeMap::new(),
        }
    }

    /// The standard command set.
    pub fn standard(config: &RadioConfig) -> Self {
        CommandTableBuilder::standard(config).build()
    }

    pub fn name(&self, opcode: Opcode) -> Option<&'static str> {
        self.commands.get(&opcode).map(|entry| entry.name)
    }

    pub fn contains(&self, opcode: Opcode) -> bool {
        self.commands.contains_key(&opcode)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl core::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map()
            .entries(self.commands.iter().map(|(op, entry)| (op, entry.name)))
            .finish()
    }
}

pub struct CommandTableBuilder {
    commands: BTreeMap<Opcode, CommandEntry>,
}

impl CommandTableBuilder {
    /// Starts from the standard command set so deployments can add or
    /// override entries.
    pub fn standard(config: &RadioConfig) -> Self {
        let capacity = config.frame_capacity();
        let shutdown_secret = config.shutdown_secret;
        let file_root = config.file_root.clone();
        let list_root = config.file_root.clone();

        CommandTable::builder()
            .register(opcodes::NO_OP, "no_op", |_, _| Ok(CommandReply::Silent))
            .register(opcodes::HARD_RESET, "hard_reset", |ctx, _| {
                tracing::warn!("hard reset commanded");
                ctx.services.system.reset();
                Ok(CommandReply::Silent)
            })
            .register(opcodes::SHUTDOWN, "shutdown", move |ctx, args| {
                if args.len() < SECRET_LEN || args[..SECRET_LEN] != shutdown_secret {
                    return Err(CommandError::ShutdownRefused);
                }
                tracing::warn!("shutdown commanded");
                ctx.services.system.shutdown();
                ctx.services.request_halt();
                Ok(CommandReply::text("shutting down"))
            })
            .register(opcodes::QUERY, "query", |ctx, args| {
                let key = utf8_args(args)?;
                query(ctx, key.trim()).map(CommandReply::text)
            })
            .register(opcodes::EXEC, "exec", |ctx, args| {
                let action = utf8_args(args)?;
                exec(ctx, action.trim())?;
                Ok(CommandReply::text("ok"))
            })
            .register(opcodes::REQUEST_FILE, "request_file", move |ctx, args| {
                let path = confined_path(&file_root, utf8_args(args)?.trim())?;
                let message = OutboundMessage::from_file(BULK_PRIORITY, &path, capacity)?;
                ctx.services.downlink.push(message)?;
                tracing::info!("queued {} for downlink", path.display());
                Ok(CommandReply::Silent)
            })
            .register(opcodes::LIST_DIR, "list_dir", move |_, args| {
                let path = confined_path(&list_root, utf8_args(args)?.trim())?;
                list_dir(&path).map(CommandReply::Data)
            })
            .register(opcodes::QUEUE_LENGTH, "queue_length", |ctx, _| {
                Ok(CommandReply::text(ctx.services.downlink.len().to_string()))
            })
    }

    /// Adds a handler, replacing any earlier one for the same opcode.
    #[must_use]
    pub fn register<F>(mut self, opcode: Opcode, name: &'static str, handler: F) -> Self
    where
        F: Fn(&mut Context<'_>, &[u8]) -> Result<CommandReply, CommandError> + 'static,
    {
        self.commands.insert(
            opcode,
            CommandEntry {
                name,
                handler: Box::new(handler),
            },
        );
        self
    }

    pub fn build(self) -> CommandTable {
        CommandTable {
            commands: self.commands,
        }
    }
}

fn utf8_args(args: &[u8]) -> Result<&str, CommandError> {
    std::str::from_utf8(args).map_err(|_| CommandError::BadArguments("arguments are not UTF-8".into()))
}

fn query(ctx: &mut Context<'_>, key: &str) -> Result<String, CommandError> {
    let registers = &ctx.services.registers;
    let value = match key {
        "state" => ctx.current_state().to_string(),
        "previous_state" => ctx.previous_state().unwrap_or("").to_string(),
        "boot_count" => registers.get(Register::BootCount)?.to_string(),
        "state_errors" => registers.get(Register::StateErrorCount)?.to_string(),
        "vbus_resets" => registers.get(Register::VbusResetCount)?.to_string(),
        "responses" => registers.get(Register::DownlinkResponseCount)?.to_string(),
        "queue_len" => ctx.services.downlink.len().to_string(),
        "uptime_ms" => ctx.now_ms().to_string(),
        "battery_mv" => ctx.services.power.battery_mv()?.to_string(),
        other => {
            let register = Register::from_name(other)
                .map_err(|_| CommandError::UnknownQuery(other.to_string()))?;
            registers.get(register)?.to_string()
        }
    };
    Ok(value)
}

fn exec(ctx: &mut Context<'_>, action: &str) -> Result<(), CommandError> {
    let (verb, operand) = action
        .split_once(char::is_whitespace)
        .map(|(verb, rest)| (verb, rest.trim()))
        .ok_or_else(|| CommandError::BadArguments(format!("expected '<verb> <operand>', got '{action}'")))?;

    match verb {
        "switch" => ctx.request_transition(operand, false)?,
        "force" => ctx.request_transition(operand, true)?,
        "reset" => {
            let register = Register::from_name(operand)?;
            ctx.services.registers.reset(register)?;
        }
        "set" => {
            let register = Register::from_name(operand)
                .ok()
                .filter(|r| r.is_flag())
                .ok_or_else(|| CommandError::BadArguments(format!("unknown flag '{operand}'")))?;
            ctx.services.registers.set_flag(register, true)?;
        }
        other => return Err(CommandError::BadArguments(format!("unknown verb '{other}'"))),
    }
    Ok(())
}

/// Resolves `requested` under `root`, refusing absolute paths and `..`.
fn confined_path(root: &Path, requested: &str) -> Result<PathBuf, CommandError> {
    let relative = Path::new(requested);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(CommandError::PathOutsideRoot(requested.to_string()));
    }
    Ok(root.join(relative))
}

fn list_dir(path: &Path) -> Result<Vec<u8>, CommandError> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();
    Ok(names.join("\n").into_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TooShort(usize),
    BadSecret,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not authenticated. Nothing ran and nothing is sent back.
    Rejected(RejectReason),
    /// Authenticated, but no handler is registered.
    Unknown(Opcode),
    Handled { opcode: Opcode, reply: CommandReply },
    /// The handler ran and failed; `diagnostic` goes back to the ground.
    Failed { opcode: Opcode, diagnostic: String },
}

impl DispatchOutcome {
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DispatchStats {
    pub rejected: u32,
    pub unknown: u32,
    pub handled: u32,
    pub failed: u32,
}

#[derive(Debug)]
pub struct CommandDispatcher {
    secret: [u8; SECRET_LEN],
    table: CommandTable,
    stats: DispatchStats,
}

impl CommandDispatcher {
    pub fn new(secret: [u8; SECRET_LEN], table: CommandTable) -> Self {
        Self {
            secret,
            table,
            stats: DispatchStats::default(),
        }
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Authenticates and runs one command. `payload` excludes the header byte.
    pub fn dispatch(&mut self, ctx: &mut Context<'_>, payload: &[u8]) -> DispatchOutcome {
        if payload.len() < SECRET_LEN + OPCODE_LEN {
            self.stats.rejected += 1;
            tracing::warn!("command too short ({} bytes)", payload.len());
            return DispatchOutcome::Rejected(RejectReason::TooShort(payload.len()));
        }
        if payload[..SECRET_LEN] != self.secret {
            self.stats.rejected += 1;
            tracing::warn!("command with bad secret dropped");
            return DispatchOutcome::Rejected(RejectReason::BadSecret);
        }

        let opcode = [payload[SECRET_LEN], payload[SECRET_LEN + 1]];
        let args = &payload[SECRET_LEN + OPCODE_LEN..];
        let Some(entry) = self.table.commands.get(&opcode) else {
            self.stats.unknown += 1;
            tracing::warn!("unknown opcode {:02x}{:02x}", opcode[0], opcode[1]);
            return DispatchOutcome::Unknown(opcode);
        };

        tracing::info!("command {} ({} arg bytes)", entry.name, args.len());
        match (entry.handler)(ctx, args) {
            Ok(reply) => {
                self.stats.handled += 1;
                DispatchOutcome::Handled { opcode, reply }
            }
            Err(err) => {
                self.stats.failed += 1;
                tracing::error!("command {} failed: {}", entry.name, err);
                DispatchOutcome::Failed {
                    opcode,
                    diagnostic: format!("{}: {}", entry.name, err),
                }
            }
        }
    }
}

/// Builds a command packet as the ground station sends it.
pub fn command_packet(
    multi_message: bool,
    secret: [u8; SECRET_LEN],
    opcode: Opcode,
    args: &[u8],
) -> Result<Packet, RadioError> {
    let len = 1 + SECRET_LEN + OPCODE_LEN + args.len();
    let overflow = || RadioError::MessageTooLarge {
        len,
        capacity: MAX_PACKET_LEN,
    };
    let mut packet = Packet::new();
    packet
        .push(Header::Command { multi_message }.to_byte())
        .map_err(|_| overflow())?;
    packet.extend_from_slice(&secret).map_err(|()| overflow())?;
    packet.extend_from_slice(&opcode).map_err(|()| overflow())?;
    packet.extend_from_slice(args).map_err(|()| overflow())?;
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confined_path_rejects_escapes() {
        let root = Path::new("/srv/data");
        assert!(confined_path(root, "../etc/passwd").is_err());
        assert!(confined_path(root, "/etc/passwd").is_err());
        assert!(confined_path(root, "logs/../../x").is_err());
        assert_eq!(
            confined_path(root, "logs/today.txt").unwrap(),
            PathBuf::from("/srv/data/logs/today.txt")
        );
    }

    #[test]
    fn test_command_packet_layout() {
        let packet = command_packet(true, [1, 2, 3, 4], opcodes::QUERY, b"state").unwrap();
        assert_eq!(packet[0], 0x87);
        assert_eq!(&packet[1..5], &[1, 2, 3, 4]);
        assert_eq!(&packet[5..7], &opcodes::QUERY);
        assert_eq!(&packet[7..], b"state");
    }

    #[test]
    fn test_standard_table_has_every_opcode() {
        let table = CommandTable::standard(&RadioConfig::default());
        for op in [
            opcodes::NO_OP,
            opcodes::HARD_RESET,
            opcodes::SHUTDOWN,
            opcodes::QUERY,
            opcodes::EXEC,
            opcodes::REQUEST_FILE,
            opcodes::LIST_DIR,
            opcodes::QUEUE_LENGTH,
        ] {
            assert!(table.contains(op), "missing {op:02x?}");
        }
        assert_eq!(table.len(), 8);
    }
}
