//! # CubeSat Core
//!
//! Onboard control core for a small satellite: a cooperative task scheduler,
//! an operational state machine that decides which tasks run, and a radio
//! subsystem that moves prioritized, chunked messages over a lossy link.
//!
//! ## Features
//!
//! - **Cooperative scheduling**: fixed-period tasks on one thread that yield with sleeps and event waits
//! - **State machine**: per-state task tables, legal transitions, enter/exit hooks
//! - **Radio protocol**: one-byte headers, START/MID/END chunking, ack-driven retransmission
//! - **Command dispatch**: shared-secret authentication and a fixed opcode table
//! - **Reset-surviving registers**: boot count, error counters and flags in a small byte store
//! - **Fail-safe**: fatal errors are logged, counted and answered with a reset
//!
//! ## Quick Start
//!
//! ```rust
//! use cubesat_core::clock::ManualClock;
//! use cubesat_core::config::StateTable;
//! use cubesat_core::hardware::{SimulatedPower, SimulatedSystem};
//! use cubesat_core::registers::RegisterSpace;
//! use cubesat_core::scheduler::{Scheduler, SchedulerConfig};
//! use cubesat_core::state_machine::{HookRegistry, StateMachine};
//! use cubesat_core::task::{Services, TaskRegistry};
//! use cubesat_core::tasks::{BeaconConfig, BeaconTask};
//! use std::rc::Rc;
//!
//! let states = StateTable::from_json(
//!     r#"{"Normal": {"Tasks": {"beacon": {"Interval": 10, "Priority": 1}}, "StepsTo": []}}"#,
//! ).unwrap();
//!
//! let mut tasks = TaskRegistry::new();
//! tasks.add(BeaconTask::new("beacon", BeaconConfig::default(), 251)).unwrap();
//!
//! let services = Services::new(
//!     RegisterSpace::in_memory(),
//!     Box::new(SimulatedSystem::new()),
//!     Box::new(SimulatedPower::new(3900)),
//! );
//! let clock = Rc::new(ManualClock::new(0));
//! let scheduler = Scheduler::new(clock, SchedulerConfig::default());
//!
//! let mut machine = StateMachine::new(states, tasks, HookRegistry::new(), services, scheduler);
//! machine.activate("Normal").unwrap();
//! machine.tick().unwrap();
//! assert_eq!(machine.services().downlink.len(), 1);
//! ```
//!
//! ## Architecture
//!
//! - [`scheduler`] - cooperative periodic scheduler
//! - [`task`] - task trait, registry and the context tasks run with
//! - [`state_machine`] - operational states and transitions
//! - [`config`] - state documents and flight configuration
//! - [`radio`] - packet framing, queueing, reassembly and commands
//! - [`registers`] - reset-surviving counters and flags
//! - [`tasks`] - beacon, battery and deployment tasks
//! - [`failsafe`] - crash logging and reset
//! - [`link`] - TCP transport for host runs

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]

pub mod clock;
pub mod config;
pub mod error;
pub mod failsafe;
pub mod hardware;
pub mod link;
pub mod radio;
pub mod registers;
pub mod scheduler;
pub mod state_machine;
pub mod task;
pub mod tasks;

pub use config::{ConfigError, FlightConfig, StateTable};
pub use error::FlightError;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use state_machine::{HookRegistry, StateMachine, TransitionError};
pub use task::{Context, Services, Task, TaskError, TaskRegistry, TaskStep};
