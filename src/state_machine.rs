//! Operational state machine.
//!
//! A state is a named task table plus the set of states it may move to.
//! Switching state replaces the whole schedule: every entry of the old state
//! is removed (parked invocations are cancelled, never resumed) and the
//! target's table is scheduled fresh.

use crate::config::{ConfigError, StateTable};
use crate::error::FlightError;
use crate::registers::Register;
use crate::scheduler::{Scheduler, SchedulerError, TaskHost, TickReport};
use crate::task::{Context, Services, TaskError, TaskId, TaskRegistry, TaskResult, TaskStep, TransitionRequest};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("unknown state '{0}'")]
    UnknownState(String),
    #[error("illegal transition from '{from}' to '{to}'")]
    Illegal { from: String, to: String },
    #[error("state '{state}' schedules unregistered task '{task}'")]
    UnknownTask { state: String, task: String },
    #[error("state '{state}' needs {needed} schedule slots, scheduler holds {capacity}")]
    Capacity {
        state: String,
        needed: usize,
        capacity: usize,
    },
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Hook body: `(services, from, to)`. `from` is `None` for the boot transition.
pub type Hook = Box<dyn FnMut(&mut Services, Option<&str>, &str) -> Result<(), TaskError>>;

#[derive(Default)]
pub struct HookRegistry {
    hooks: BTreeMap<String, Hook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, hook: F) -> Result<(), ConfigError>
    where
        F: FnMut(&mut Services, Option<&str>, &str) -> Result<(), TaskError> + 'static,
    {
        let name = name.into();
        if self.hooks.contains_key(&name) {
            return Err(ConfigError::DuplicateHook(name));
        }
        self.hooks.insert(name, Box::new(hook));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }
}

impl core::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.hooks.keys()).finish()
    }
}

/// Everything except the scheduler, so the scheduler can drive it as a
/// [`TaskHost`] while tasks still reach the state machine.
struct MachineCore {
    states: StateTable,
    tasks: TaskRegistry,
    hooks: HookRegistry,
    services: Services,
    current: Option<String>,
    previous: Option<String>,
    pending: Option<TransitionRequest>,
    transitions: u32,
}

impl MachineCore {
    fn switch_to(&mut self, scheduler: &mut Scheduler, target: &str, force: bool) -> Result<(), TransitionError> {
        let Some(definition) = self.states.get(target) else {
            return Err(TransitionError::UnknownState(target.to_string()));
        };
        if let Some(current) = self.current.as_deref() {
            if !force && !self.states.can_step(current, target) {
                return Err(TransitionError::Illegal {
                    from: current.to_string(),
                    to: target.to_string(),
                });
            }
        }

        // resolve everything before touching the running schedule
        let mut plan = Vec::with_capacity(definition.tasks.len());
        for (name, schedule) in &definition.tasks {
            let id = self.tasks.id(name).ok_or_else(|| TransitionError::UnknownTask {
                state: target.to_string(),
                task: name.clone(),
            })?;
            plan.push((id, schedule.period_ms(), schedule.priority, schedule.schedule_later));
        }
        if plan.len() > scheduler.capacity() {
            return Err(TransitionError::Capacity {
                state: target.to_string(),
                needed: plan.len(),
                capacity: scheduler.capacity(),
            });
        }

        let from = self.current.take();
        self.previous.clone_from(&from);
        if from.as_deref() != Some(target) {
            if let Some(exit) = from.as_deref().and_then(|name| self.states.get(name)) {
                run_hooks(&mut self.hooks, &mut self.services, &exit.exit_functions, from.as_deref(), target);
            }
            if let Some(enter) = self.states.get(target) {
                run_hooks(&mut self.hooks, &mut self.services, &enter.enter_functions, from.as_deref(), target);
            }
        }

        for id in scheduler.stop_all() {
            if let Some(task) = self.tasks.get_mut(id) {
                task.cancelled();
            }
        }
        self.current = Some(target.to_string());
        self.transitions += 1;
        info!(
            "state {} -> {}{}",
            from.as_deref().unwrap_or("<boot>"),
            target,
            if force { " (forced)" } else { "" }
        );

        for (id, period_ms, priority, defer) in plan {
            scheduler.schedule(id, period_ms, priority, defer)?;
        }
        Ok(())
    }

    fn count_error(&mut self) {
        if let Err(err) = self.services.registers.increment(Register::StateErrorCount) {
            error!("cannot count state error: {}", err);
        }
    }
}

fn run_hooks(
    hooks: &mut HookRegistry,
    services: &mut Services,
    names: &[String],
    from: Option<&str>,
    to: &str,
) {
    for name in names {
        let Some(hook) = hooks.hooks.get_mut(name) else {
            warn!("hook '{}' not registered", name);
            continue;
        };
        debug!("running hook '{}'", name);
        if let Err(err) = hook(services, from, to) {
            error!("hook '{}' failed: {}", name, err);
            if let Err(err) = services.registers.increment(Register::StateErrorCount) {
                error!("cannot count state error: {}", err);
            }
        }
    }
}

impl TaskHost for MachineCore {
    fn run_task(
        &mut self,
        task: TaskId,
        scheduler: &mut Scheduler,
        now_ms: u64,
    ) -> Result<TaskResult, FlightError> {
        let Some(current) = self.current.as_deref() else {
            return Ok(Ok(TaskStep::Complete));
        };
        let Some(body) = self.tasks.get_mut(task) else {
            warn!("scheduled task {:?} is not registered", task);
            return Ok(Ok(TaskStep::Complete));
        };

        let result = {
            let mut ctx = Context::new(
                now_ms,
                &mut self.services,
                &self.states,
                current,
                self.previous.as_deref(),
                &mut self.pending,
            );
            body.run(&mut ctx)
        };

        if let Some(request) = self.pending.take() {
            // legality was checked when the task asked
            self.switch_to(scheduler, &request.target, request.force)?;
        }
        Ok(result)
    }

    fn event_ready(&mut self, task: TaskId) -> bool {
        self.tasks.get_mut(task).is_some_and(|t| t.event_ready())
    }

    fn task_failed(&mut self, _task: TaskId, _error: &TaskError) {
        self.count_error();
    }

    fn task_name(&self, task: TaskId) -> &str {
        self.tasks.name(task)
    }

    fn halted(&self) -> bool {
        self.services.halt_requested()
    }
}

pub struct StateMachine {
    scheduler: Scheduler,
    core: MachineCore,
}

impl StateMachine {
    pub fn new(
        states: StateTable,
        tasks: TaskRegistry,
        hooks: HookRegistry,
        services: Services,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            scheduler,
            core: MachineCore {
                states,
                tasks,
                hooks,
                services,
                current: None,
                previous: None,
                pending: None,
                transitions: 0,
            },
        }
    }

    /// Checks the state table against the registered tasks and hooks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let core = &self.core;
        core.states.validate(
            |task| core.tasks.contains(task),
            |hook| core.hooks.contains(hook),
            self.scheduler.capacity(),
        )
    }

    /// Validates, then enters `initial` without running anything.
    pub fn activate(&mut self, initial: &str) -> Result<(), FlightError> {
        self.validate()?;
        if !self.core.states.contains(initial) {
            return Err(ConfigError::UnknownInitialState(initial.to_string()).into());
        }
        self.core.switch_to(&mut self.scheduler, initial, true)?;
        Ok(())
    }

    /// Activates `initial` and runs until a halt is requested.
    pub fn start(&mut self, initial: &str) -> Result<(), FlightError> {
        self.activate(initial)?;
        self.run()
    }

    pub fn run(&mut self) -> Result<(), FlightError> {
        self.scheduler.run(&mut self.core)
    }

    pub fn tick(&mut self) -> Result<TickReport, FlightError> {
        self.scheduler.tick(&mut self.core)
    }

    /// Ticks until the clock reaches `deadline_ms` or a halt is requested.
    pub fn run_until(&mut self, deadline_ms: u64) -> Result<(), FlightError> {
        while self.scheduler.now_ms() < deadline_ms && !self.core.halted() {
            self.tick()?;
        }
        Ok(())
    }

    /// Moves to `target`. Without `force` the move must be listed in the
    /// current state's `StepsTo`. On error nothing has changed.
    pub fn switch_to(&mut self, target: &str, force: bool) -> Result<(), TransitionError> {
        self.core.switch_to(&mut self.scheduler, target, force)
    }

    pub fn current_state(&self) -> Option<&str> {
        self.core.current.as_deref()
    }

    pub fn previous_state(&self) -> Option<&str> {
        self.core.previous.as_deref()
    }

    pub fn transition_count(&self) -> u32 {
        self.core.transitions
    }

    pub fn states(&self) -> &StateTable {
        &self.core.states
    }

    pub fn task_id(&self, name: &str) -> Option<TaskId> {
        self.core.tasks.id(name)
    }

    /// Names of the tasks scheduled right now, sorted.
    pub fn scheduled_tasks(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .scheduler
            .entries()
            .iter()
            .map(|entry| self.core.tasks.name(entry.task).to_string())
            .collect();
        names.sort();
        names
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn services(&self) -> &Services {
        &self.core.services
    }

    pub fn services_mut(&mut self) -> &mut Services {
        &mut self.core.services
    }
}

impl core::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StateMachine")
            .field("current", &self.core.current)
            .field("previous", &self.core.previous)
            .field("tasks", &self.core.tasks)
            .field("hooks", &self.core.hooks)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
