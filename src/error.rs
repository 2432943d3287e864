use crate::config::ConfigError;
use crate::radio::RadioError;
use crate::registers::RegisterError;
use crate::scheduler::SchedulerError;
use crate::state_machine::TransitionError;

/// Errors that escape the run loop. Anything reaching this level goes to the
/// fail-safe (see [`crate::failsafe`]).
#[derive(Debug, thiserror::Error)]
pub enum FlightError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("transition failed: {0}")]
    Transition(#[from] TransitionError),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("register store error: {0}")]
    Register(#[from] RegisterError),
    #[error("radio error: {0}")]
    Radio(#[from] RadioError),
}
