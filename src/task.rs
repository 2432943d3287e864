//! Task model: what a task is, what it may touch, and what it tells the
//! scheduler when it hands control back.

use crate::config::{ConfigError, StateTable};
use crate::hardware::{PowerMonitor, SensorError, SystemControl};
use crate::radio::{QueueError, RadioError, Reassembled, TransmissionQueue};
use crate::registers::{RegisterError, RegisterSpace};
use crate::state_machine::TransitionError;
use std::collections::BTreeMap;

pub const MAX_INBOX: usize = 8;

/// How a task body hands control back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStep {
    /// Invocation finished; re-arm for the next period.
    Complete,
    /// Resume this invocation after `ms`.
    Sleep { ms: u64 },
    /// Resume when [`Task::event_ready`] reports true or after `timeout_ms`.
    AwaitEvent { timeout_ms: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Radio(#[from] RadioError),
    #[error(transparent)]
    Register(#[from] RegisterError),
    #[error(transparent)]
    Sensor(#[from] SensorError),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type TaskResult = Result<TaskStep, TaskError>;

/// A named unit of recurring work.
///
/// A body that blocks (long synchronous I/O, busy loops) stalls every other
/// task: there is no preemption. Long waits must be expressed as
/// [`TaskStep::Sleep`] or [`TaskStep::AwaitEvent`].
pub trait Task {
    fn name(&self) -> &str;

    fn run(&mut self, ctx: &mut Context<'_>) -> TaskResult;

    /// Polled while the task is parked in [`TaskStep::AwaitEvent`].
    fn event_ready(&mut self) -> bool {
        false
    }

    /// The schedule entry was removed while this task may have been suspended.
    /// The suspended invocation will never resume; reset any in-progress phase.
    fn cancelled(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(usize);

impl TaskId {
    pub const fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

/// Every task object, constructed once at startup and kept for the life of
/// the process. States only decide which of them are scheduled.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Vec<Box<dyn Task>>,
    names: BTreeMap<String, TaskId>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task: Box<dyn Task>) -> Result<TaskId, ConfigError> {
        let name = task.name().to_string();
        if self.names.contains_key(&name) {
            return Err(ConfigError::DuplicateTask(name));
        }
        let id = TaskId(self.tasks.len());
        self.tasks.push(task);
        self.names.insert(name, id);
        Ok(id)
    }

    pub fn add<T: Task + 'static>(&mut self, task: T) -> Result<TaskId, ConfigError> {
        self.register(Box::new(task))
    }

    pub fn id(&self, name: &str) -> Option<TaskId> {
        self.names.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn name(&self, id: TaskId) -> &str {
        self.tasks.get(id.0).map_or("<unknown>", |task| task.name())
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut (dyn Task + 'static)> {
        self.tasks.get_mut(id.0).map(|task| task.as_mut())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl core::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Shared resources. Each has exactly one owner here and is only ever
/// touched from the scheduler's thread.
pub struct Services {
    pub downlink: TransmissionQueue,
    pub registers: RegisterSpace,
    pub system: Box<dyn SystemControl>,
    pub power: Box<dyn PowerMonitor>,
    inbox: heapless::Deque<Reassembled, MAX_INBOX>,
    halt_requested: bool,
}

impl Services {
    pub fn new(
        registers: RegisterSpace,
        system: Box<dyn SystemControl>,
        power: Box<dyn PowerMonitor>,
    ) -> Self {
        Self {
            downlink: TransmissionQueue::new(),
            registers,
            system,
            power,
            inbox: heapless::Deque::new(),
            halt_requested: false,
        }
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.downlink = TransmissionQueue::with_capacity(capacity);
        self
    }

    /// Keep a reassembled uplink message, dropping the oldest when full.
    pub fn store_uplink(&mut self, message: Reassembled) {
        if self.inbox.is_full() {
            let _ = self.inbox.pop_front();
            tracing::warn!("uplink inbox full, dropped oldest message");
        }
        let _ = self.inbox.push_back(message);
    }

    pub fn take_uplink(&mut self) -> Option<Reassembled> {
        self.inbox.pop_front()
    }

    pub fn uplink_len(&self) -> usize {
        self.inbox.len()
    }

    /// Ask the run loop to return after the current task.
    pub fn request_halt(&mut self) {
        self.halt_requested = true;
    }

    pub fn halt_requested(&self) -> bool {
        self.halt_requested
    }
}

impl core::fmt::Debug for Services {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Services")
            .field("downlink", &self.downlink.len())
            .field("registers", &self.registers)
            .field("inbox", &self.inbox.len())
            .field("halt_requested", &self.halt_requested)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub target: String,
    pub force: bool,
}

/// What a task body sees while it runs.
pub struct Context<'a> {
    pub services: &'a mut Services,
    now_ms: u64,
    states: &'a StateTable,
    current_state: &'a str,
    previous_state: Option<&'a str>,
    pending: &'a mut Option<TransitionRequest>,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        now_ms: u64,
        services: &'a mut Services,
        states: &'a StateTable,
        current_state: &'a str,
        previous_state: Option<&'a str>,
        pending: &'a mut Option<TransitionRequest>,
    ) -> Self {
        Self {
            services,
            now_ms,
            states,
            current_state,
            previous_state,
            pending,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn current_state(&self) -> &str {
        self.current_state
    }

    pub fn previous_state(&self) -> Option<&str> {
        self.previous_state
    }

    /// Queue a transition to run as soon as this task body returns.
    ///
    /// Legality is checked now, so an illegal request fails here and nothing
    /// is queued. A later request in the same invocation replaces an earlier one.
    pub fn request_transition(&mut self, target: &str, force: bool) -> Result<(), TransitionError> {
        if !self.states.contains(target) {
            return Err(TransitionError::UnknownState(target.to_string()));
        }
        if !force && !self.states.can_step(self.current_state, target) {
            return Err(TransitionError::Illegal {
                from: self.current_state.to_string(),
                to: target.to_string(),
            });
        }
        if let Some(previous) = self.pending.as_ref() {
            tracing::debug!("transition to '{}' replaced by '{}'", previous.target, target);
        }
        *self.pending = Some(TransitionRequest {
            target: target.to_string(),
            force,
        });
        Ok(())
    }

    pub fn pending_transition(&self) -> Option<&TransitionRequest> {
        self.pending.as_ref()
    }
}
