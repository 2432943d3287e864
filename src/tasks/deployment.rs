use crate::hardware::BurnWire;
use crate::registers::Register;
use crate::task::{Context, Task, TaskResult, TaskStep};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub burn_ms: u64,
    pub next_state: String,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            burn_ms: 5000,
            next_state: "Normal".to_string(),
        }
    }
}

/// Antenna release: heats the burn wire once, then moves on.
///
/// The burn-performed flag survives resets, so a reboot after deployment
/// goes straight to `next_state`.
pub struct DeploymentTask {
    name: String,
    config: DeploymentConfig,
    wire: Box<dyn BurnWire>,
    burning: bool,
}

impl DeploymentTask {
    pub fn new(name: impl Into<String>, config: DeploymentConfig, wire: Box<dyn BurnWire>) -> Self {
        Self {
            name: name.into(),
            config,
            wire,
            burning: false,
        }
    }
}

impl Task for DeploymentTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> TaskResult {
        if !self.burning {
            if ctx.services.registers.flag(Register::BurnPerformed)? {
                info!("antenna already deployed");
                ctx.request_transition(&self.config.next_state, false)?;
                return Ok(TaskStep::Complete);
            }
            self.wire.set_burning(true)?;
            self.burning = true;
            info!("burn wire on for {} ms", self.config.burn_ms);
            return Ok(TaskStep::Sleep {
                ms: self.config.burn_ms,
            });
        }

        self.wire.set_burning(false)?;
        self.burning = false;
        ctx.services.registers.set_flag(Register::BurnPerformed, true)?;
        info!("antenna deployed");
        ctx.request_transition(&self.config.next_state, false)?;
        Ok(TaskStep::Complete)
    }

    fn cancelled(&mut self) {
        if self.burning {
            // never leave the wire hot once the state is gone
            if let Err(err) = self.wire.set_burning(false) {
                warn!("cannot switch burn wire off: {}", err);
            }
            self.burning = false;
        }
    }
}
