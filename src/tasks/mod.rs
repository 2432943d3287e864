//! Flight tasks and transition hooks.

pub mod battery;
pub mod beacon;
pub mod deployment;

pub use battery::{BatteryConfig, BatteryTask};
pub use beacon::{BeaconConfig, BeaconTask};
pub use deployment::{DeploymentConfig, DeploymentTask};

use crate::config::ConfigError;
use crate::radio::OutboundMessage;
use crate::state_machine::HookRegistry;

/// Hooks the stock state documents refer to:
///
/// - `log_transition`: logs every hook-visible transition
/// - `announce`: queues a one-packet `state:<from>-><to>` downlink
pub fn standard_hooks(frame_capacity: usize, priority: u8) -> Result<HookRegistry, ConfigError> {
    let mut hooks = HookRegistry::new();
    hooks.register("log_transition", |_, from, to| {
        tracing::info!("entering {} from {}", to, from.unwrap_or("<boot>"));
        Ok(())
    })?;
    hooks.register("announce", move |services, from, to| {
        let mut text = format!("state:{}->{}", from.unwrap_or("boot"), to).into_bytes();
        text.truncate(frame_capacity);
        let message = OutboundMessage::single(priority, text, frame_capacity)?.with_ack(false);
        services.downlink.push(message)?;
        Ok(())
    })?;
    Ok(hooks)
}
