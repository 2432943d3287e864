use crate::radio::OutboundMessage;
use crate::registers::Register;
use crate::task::{Context, Task, TaskResult, TaskStep};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub callsign: String,
    pub priority: u8,
    pub requires_ack: bool,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            callsign: "CUBESAT".to_string(),
            priority: 1,
            requires_ack: false,
        }
    }
}

/// Health summary sent on every beacon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub callsign: String,
    pub seq: u32,
    pub state: String,
    pub uptime_ms: u64,
    pub boot_count: u8,
    pub state_errors: u8,
    pub responses: u8,
    pub battery_mv: Option<u16>,
    pub queue_len: usize,
    pub contact: bool,
}

/// Periodically queues a JSON beacon on the downlink.
pub struct BeaconTask {
    name: String,
    config: BeaconConfig,
    frame_capacity: usize,
    seq: u32,
}

impl BeaconTask {
    pub fn new(name: impl Into<String>, config: BeaconConfig, frame_capacity: usize) -> Self {
        Self {
            name: name.into(),
            config,
            frame_capacity,
            seq: 0,
        }
    }

    fn snapshot(&self, ctx: &mut Context<'_>) -> Result<Beacon, crate::task::TaskError> {
        let battery_mv = match ctx.services.power.battery_mv() {
            Ok(mv) => Some(mv),
            Err(err) => {
                tracing::debug!("beacon without battery reading: {}", err);
                None
            }
        };
        let registers = &ctx.services.registers;
        Ok(Beacon {
            callsign: self.config.callsign.clone(),
            seq: self.seq,
            state: ctx.current_state().to_string(),
            uptime_ms: ctx.now_ms(),
            boot_count: registers.get(Register::BootCount)?,
            state_errors: registers.get(Register::StateErrorCount)?,
            responses: registers.get(Register::DownlinkResponseCount)?,
            battery_mv,
            queue_len: ctx.services.downlink.len(),
            contact: registers.flag(Register::ContactEstablished)?,
        })
    }
}

impl Task for BeaconTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> TaskResult {
        let beacon = self.snapshot(ctx)?;
        let payload = serde_json::to_vec(&beacon)?;
        let message = OutboundMessage::auto(self.config.priority, payload, self.frame_capacity)?
            .with_ack(self.config.requires_ack);
        ctx.services.downlink.push(message)?;
        self.seq = self.seq.wrapping_add(1);
        Ok(TaskStep::Complete)
    }
}
