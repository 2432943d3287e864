//! Interfaces to the hardware the core drives but does not own.
//!
//! Everything here is synchronous and cheap: the core asks for a reading or
//! an action and gets an answer in the same call.

use std::cell::Cell;
use std::rc::Rc;

/// Exit code the host binary uses to ask its supervisor for a restart.
pub const REBOOT_EXIT_CODE: i32 = 75;

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("sensor '{0}' not responding")]
    NotResponding(&'static str),
    #[error("reading out of range: {0}")]
    OutOfRange(f32),
}

pub trait SystemControl {
    /// Full system reset. On hardware this does not return.
    fn reset(&mut self);
    fn shutdown(&mut self);
}

pub trait PowerMonitor {
    fn battery_mv(&mut self) -> Result<u16, SensorError>;
    fn vbus_present(&mut self) -> Result<bool, SensorError>;
}

/// Deployment actuator (antenna/panel burn wire).
pub trait BurnWire {
    fn set_burning(&mut self, on: bool) -> Result<(), SensorError>;
}

/// Host process stand-in for the reset controller.
#[derive(Debug, Default)]
pub struct HostSystem;

impl SystemControl for HostSystem {
    fn reset(&mut self) {
        tracing::error!("hard reset requested, exiting with code {}", REBOOT_EXIT_CODE);
        std::process::exit(REBOOT_EXIT_CODE);
    }

    fn shutdown(&mut self) {
        tracing::warn!("shutdown requested, exiting");
        std::process::exit(0);
    }
}

/// Records resets and shutdowns instead of performing them.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSystem {
    resets: Rc<Cell<u32>>,
    shutdowns: Rc<Cell<u32>>,
}

impl SimulatedSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resets(&self) -> u32 {
        self.resets.get()
    }

    pub fn shutdowns(&self) -> u32 {
        self.shutdowns.get()
    }
}

impl SystemControl for SimulatedSystem {
    fn reset(&mut self) {
        self.resets.set(self.resets.get() + 1);
    }

    fn shutdown(&mut self) {
        self.shutdowns.set(self.shutdowns.get() + 1);
    }
}

/// Battery model whose voltage is set from outside (tests, host simulation).
#[derive(Debug, Clone)]
pub struct SimulatedPower {
    battery_mv: Rc<Cell<u16>>,
    vbus: Rc<Cell<bool>>,
    failing: Rc<Cell<bool>>,
}

impl SimulatedPower {
    pub fn new(battery_mv: u16) -> Self {
        Self {
            battery_mv: Rc::new(Cell::new(battery_mv)),
            vbus: Rc::new(Cell::new(false)),
            failing: Rc::new(Cell::new(false)),
        }
    }

    pub fn set_battery_mv(&self, mv: u16) {
        self.battery_mv.set(mv);
    }

    pub fn set_vbus(&self, present: bool) {
        self.vbus.set(present);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }
}

impl PowerMonitor for SimulatedPower {
    fn battery_mv(&mut self) -> Result<u16, SensorError> {
        if self.failing.get() {
            return Err(SensorError::NotResponding("battery"));
        }
        Ok(self.battery_mv.get())
    }

    fn vbus_present(&mut self) -> Result<bool, SensorError> {
        Ok(self.vbus.get())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedBurnWire {
    burning: Rc<Cell<bool>>,
    activations: Rc<Cell<u32>>,
}

impl SimulatedBurnWire {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_burning(&self) -> bool {
        self.burning.get()
    }

    pub fn activations(&self) -> u32 {
        self.activations.get()
    }
}

impl BurnWire for SimulatedBurnWire {
    fn set_burning(&mut self, on: bool) -> Result<(), SensorError> {
        if on && !self.burning.get() {
            self.activations.set(self.activations.get() + 1);
        }
        self.burning.set(on);
        Ok(())
    }
}
