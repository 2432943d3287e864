//! Last line of defence for errors that escape the run loop.

use crate::error::FlightError;
use crate::hardware::SystemControl;
use crate::registers::{Register, RegisterSpace};
use crate::state_machine::StateMachine;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info};

/// Where fatal errors are written before the reset.
pub trait CrashLog {
    fn record(&mut self, entry: &str) -> std::io::Result<()>;
}

/// Appends one line per crash to a file.
#[derive(Debug, Clone)]
pub struct FileCrashLog {
    path: PathBuf,
}

impl FileCrashLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CrashLog for FileCrashLog {
    fn record(&mut self, entry: &str) -> std::io::Result<()> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{stamp} {entry}")?;
        file.flush()
    }
}

/// Logs the error (best effort), counts it, and resets. The reset happens
/// exactly once even when logging or counting fails.
pub fn fail_safe(
    err: &FlightError,
    log: &mut dyn CrashLog,
    registers: &mut RegisterSpace,
    system: &mut dyn SystemControl,
) {
    error!("fatal: {}", err);
    if let Err(log_err) = log.record(&format!("fatal: {err}")) {
        error!("crash log unavailable: {}", log_err);
    }
    if let Err(reg_err) = registers.increment(Register::StateErrorCount) {
        error!("cannot count fatal error: {}", reg_err);
    }
    system.reset();
}

/// Starts the machine in `initial` and routes any fatal error to
/// [`fail_safe`]. Returns true when the run ended by a requested halt.
pub fn run_with_fail_safe(machine: &mut StateMachine, initial: &str, log: &mut dyn CrashLog) -> bool {
    match machine.start(initial) {
        Ok(()) => {
            info!("flight software halted");
            true
        }
        Err(err) => {
            let services = machine.services_mut();
            fail_safe(&err, log, &mut services.registers, services.system.as_mut());
            false
        }
    }
}
