//! The scheduler task that drives the link.
//!
//! Each invocation does one of: send the next packet of the queue head, or
//! (queue empty) handle one inbound packet, parking on `AwaitEvent` while the
//! receive window is open.

use super::command::{CommandDispatcher, CommandReply, CommandTable, DispatchOutcome, INVALID_COMMAND_MARKER};
use super::headers::Header;
use super::message::OutboundMessage;
use super::reassembly::{Reassembled, Reassembler};
use super::{RadioConfig, RadioDriver, RadioError};
use crate::registers::Register;
use crate::task::{Context, Task, TaskError, TaskResult, TaskStep};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Listening,
    /// A multi-message command arrived; exactly one more packet is expected.
    AwaitingFollowUp,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkStats {
    pub packets_sent: u32,
    pub packets_acked: u32,
    pub ack_failures: u32,
    pub messages_completed: u32,
    pub messages_abandoned: u32,
    pub packets_received: u32,
    pub follow_up_timeouts: u32,
}

pub struct RadioTask {
    name: String,
    driver: Box<dyn RadioDriver>,
    dispatcher: CommandDispatcher,
    reassembler: Reassembler,
    config: RadioConfig,
    phase: Phase,
    stats: LinkStats,
}

impl RadioTask {
    pub fn new(name: impl Into<String>, driver: Box<dyn RadioDriver>, config: &RadioConfig) -> Self {
        Self::with_commands(name, driver, config, CommandTable::standard(config))
    }

    pub fn with_commands(
        name: impl Into<String>,
        driver: Box<dyn RadioDriver>,
        config: &RadioConfig,
        commands: CommandTable,
    ) -> Self {
        Self {
            name: name.into(),
            driver,
            dispatcher: CommandDispatcher::new(config.secret, commands),
            reassembler: Reassembler::new(config.max_reassembly_len, config.disk_inbox.clone()),
            config: config.clone(),
            phase: Phase::Idle,
            stats: LinkStats::default(),
        }
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    fn transmit(&mut self, ctx: &mut Context<'_>) -> Result<(), TaskError> {
        let outcome = {
            let Some(message) = ctx.services.downlink.front_mut() else {
                return Ok(());
            };
            self.send_next(message)
        };

        match outcome {
            Ok(false) => Ok(()),
            Ok(true) => {
                if let Some(message) = ctx.services.downlink.pop() {
                    if message.is_abandoned() {
                        self.stats.messages_abandoned += 1;
                        warn!(
                            "abandoned message after {} of {} bytes",
                            message.cursor(),
                            message.total_len()
                        );
                    } else {
                        self.stats.messages_completed += 1;
                        debug!("message of {} bytes delivered", message.total_len());
                    }
                }
                Ok(())
            }
            Err(err) => {
                // the message can't produce packets (file vanished, read failed)
                ctx.services.downlink.pop();
                self.stats.messages_abandoned += 1;
                Err(err.into())
            }
        }
    }

    /// Sends one packet of `message`. Returns true once the message is done.
    fn send_next(&mut self, message: &mut OutboundMessage) -> Result<bool, RadioError> {
        let packet = message.packet()?;
        let delivered = if message.requires_ack() {
            self.driver.send_with_ack(&packet, self.config.ack_timeout_ms)
        } else {
            self.driver.send(&packet).map(|()| true)
        };
        self.stats.packets_sent += 1;

        match delivered {
            Ok(true) => {
                self.stats.packets_acked += 1;
                message.ack();
            }
            Ok(false) => {
                self.stats.ack_failures += 1;
                if message.no_ack(self.config.max_retries) {
                    warn!("no ack after {} retries", self.config.max_retries);
                }
            }
            Err(err) => {
                self.stats.ack_failures += 1;
                warn!("radio send failed: {}", err);
                message.no_ack(self.config.max_retries);
            }
        }
        Ok(message.done())
    }

    fn receive(&mut self, ctx: &mut Context<'_>, allow_follow_up: bool) -> TaskResult {
        let Some(packet) = self.driver.try_receive()? else {
            return Ok(TaskStep::Complete);
        };
        self.stats.packets_received += 1;

        let wants_follow_up = self.handle_packet(ctx, &packet)?;
        if wants_follow_up {
            if allow_follow_up {
                self.phase = Phase::AwaitingFollowUp;
                return Ok(TaskStep::AwaitEvent {
                    timeout_ms: self.config.follow_up_timeout_ms,
                });
            }
            debug!("multi-message flag on a follow-up packet ignored");
        }
        Ok(TaskStep::Complete)
    }

    /// Returns true when the packet was an authenticated multi-message command.
    fn handle_packet(&mut self, ctx: &mut Context<'_>, packet: &[u8]) -> Result<bool, TaskError> {
        let Some((&first, payload)) = packet.split_first() else {
            debug!("empty packet ignored");
            return Ok(false);
        };
        let Some(header) = Header::from_byte(first) else {
            warn!("{}", RadioError::UnknownHeader(first));
            return Ok(false);
        };

        match header {
            Header::Command { multi_message } => {
                let authenticated = self.handle_command(ctx, payload)?;
                Ok(multi_message && authenticated)
            }
            Header::Chunk { family, position } => {
                if let Some(message) = self.reassembler.accept(family, position, payload)? {
                    log_uplink(&message);
                    ctx.services.store_uplink(message);
                }
                Ok(false)
            }
            Header::Single => {
                let message = Reassembled::Memory(payload.to_vec());
                log_uplink(&message);
                ctx.services.store_uplink(message);
                Ok(false)
            }
            Header::Diagnostic => {
                warn!("ground diagnostic: {}", String::from_utf8_lossy(payload));
                Ok(false)
            }
        }
    }

    fn handle_command(&mut self, ctx: &mut Context<'_>, payload: &[u8]) -> Result<bool, TaskError> {
        let outcome = self.dispatcher.dispatch(ctx, payload);
        if !outcome.is_authenticated() {
            return Ok(false);
        }
        ctx.services.registers.set_flag(Register::ContactEstablished, true)?;

        let capacity = self.config.frame_capacity();
        let priority = self.config.reply_priority;
        let reply = match outcome {
            DispatchOutcome::Handled {
                reply: CommandReply::Data(bytes),
                ..
            } => Some(OutboundMessage::auto(priority, bytes, capacity)?),
            DispatchOutcome::Handled {
                reply: CommandReply::Silent,
                ..
            }
            | DispatchOutcome::Rejected(_) => None,
            DispatchOutcome::Unknown(opcode) => {
                let mut body = INVALID_COMMAND_MARKER.to_vec();
                body.extend_from_slice(&opcode);
                Some(OutboundMessage::single(priority, body, capacity)?)
            }
            DispatchOutcome::Failed { diagnostic, .. } => {
                Some(OutboundMessage::diagnostic(priority, &diagnostic, capacity)?)
            }
        };

        if let Some(reply) = reply {
            ctx.services.downlink.push(reply)?;
            ctx.services.registers.increment(Register::DownlinkResponseCount)?;
        }
        Ok(true)
    }
}

fn log_uplink(message: &Reassembled) {
    match message {
        Reassembled::Memory(bytes) => info!("uplink message of {} bytes", bytes.len()),
        Reassembled::File { path, len } => info!("uplink file {} ({} bytes)", path.display(), len),
    }
}

impl Task for RadioTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> TaskResult {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => {
                if !ctx.services.downlink.is_empty() {
                    self.transmit(ctx)?;
                    return Ok(TaskStep::Complete);
                }
                if self.driver.rx_waiting() {
                    return self.receive(ctx, true);
                }
                self.phase = Phase::Listening;
                Ok(TaskStep::AwaitEvent {
                    timeout_ms: self.config.listen_window_ms,
                })
            }
            // woken by a packet or by the end of the listen window
            Phase::Listening => self.receive(ctx, true),
            Phase::AwaitingFollowUp => {
                if !self.driver.rx_waiting() {
                    self.stats.follow_up_timeouts += 1;
                    debug!("no follow-up packet within {} ms", self.config.follow_up_timeout_ms);
                    return Ok(TaskStep::Complete);
                }
                self.receive(ctx, false)
            }
        }
    }

    fn event_ready(&mut self) -> bool {
        self.driver.rx_waiting()
    }

    fn cancelled(&mut self) {
        if self.phase != Phase::Idle {
            debug!("radio {:?} cancelled", self.phase);
        }
        self.phase = Phase::Idle;
    }
}
