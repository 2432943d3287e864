//! Battery supervision.
//!
//! Each run takes two readings a short settle time apart and acts on their
//! mean. Below `low_mv` the spacecraft goes to the low-power state. While
//! there it returns once the battery recovers past `recovered_mv`, or after
//! `low_power_timeout_s`, in which case the timeout flag is latched.

use crate::registers::Register;
use crate::task::{Context, Task, TaskResult, TaskStep};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub low_mv: u16,
    pub recovered_mv: u16,
    pub settle_ms: u64,
    pub low_power_timeout_s: u64,
    pub low_power_state: String,
    /// Where to go on recovery; the previous state when unset.
    pub recovery_state: Option<String>,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            low_mv: 3200,
            recovered_mv: 3400,
            settle_ms: 100,
            low_power_timeout_s: 3600,
            low_power_state: "LowPower".to_string(),
            recovery_state: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Sample,
    Settling { first_mv: u16 },
}

pub struct BatteryTask {
    name: String,
    config: BatteryConfig,
    phase: Phase,
    low_power_since_ms: Option<u64>,
}

impl BatteryTask {
    pub fn new(name: impl Into<String>, config: BatteryConfig) -> Self {
        Self {
            name: name.into(),
            config,
            phase: Phase::Sample,
            low_power_since_ms: None,
        }
    }

    fn evaluate(&mut self, ctx: &mut Context<'_>, mv: u16) -> TaskResult {
        if ctx.current_state() != self.config.low_power_state {
            self.low_power_since_ms = None;
            if mv < self.config.low_mv {
                warn!("battery {} mV below {} mV", mv, self.config.low_mv);
                ctx.request_transition(&self.config.low_power_state, false)?;
            }
            return Ok(TaskStep::Complete);
        }

        let now = ctx.now_ms();
        let since = *self.low_power_since_ms.get_or_insert(now);
        let Some(back) = self
            .config
            .recovery_state
            .clone()
            .or_else(|| ctx.previous_state().map(str::to_string))
            .filter(|state| *state != self.config.low_power_state)
        else {
            return Ok(TaskStep::Complete);
        };

        if mv >= self.config.recovered_mv {
            info!("battery recovered to {} mV", mv);
            self.low_power_since_ms = None;
            ctx.request_transition(&back, false)?;
        } else if now.saturating_sub(since) >= self.config.low_power_timeout_s.saturating_mul(1000) {
            warn!("low power for {} s without recovery", self.config.low_power_timeout_s);
            ctx.services.registers.set_flag(Register::LowBatteryTimeout, true)?;
            self.low_power_since_ms = None;
            ctx.request_transition(&back, true)?;
        }
        Ok(TaskStep::Complete)
    }
}

impl Task for BatteryTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> TaskResult {
        match self.phase {
            Phase::Sample => {
                let first_mv = ctx.services.power.battery_mv()?;
                self.phase = Phase::Settling { first_mv };
                Ok(TaskStep::Sleep {
                    ms: self.config.settle_ms,
                })
            }
            Phase::Settling { first_mv } => {
                self.phase = Phase::Sample;
                let second_mv = ctx.services.power.battery_mv()?;
                let mean = ((u32::from(first_mv) + u32::from(second_mv)) / 2) as u16;
                self.evaluate(ctx, mean)
            }
        }
    }

    fn cancelled(&mut self) {
        self.phase = Phase::Sample;
    }
}
