#![allow(dead_code)]

use cubesat_core::clock::ManualClock;
use cubesat_core::config::StateTable;
use cubesat_core::hardware::{SimulatedPower, SimulatedSystem};
use cubesat_core::registers::RegisterSpace;
use cubesat_core::scheduler::{PriorityOrder, Scheduler, SchedulerConfig};
use cubesat_core::state_machine::{HookRegistry, StateMachine};
use cubesat_core::task::{Context, Services, Task, TaskRegistry, TaskResult, TaskStep};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// `(task name, clock time)` for every task invocation.
pub type RunLog = Rc<RefCell<Vec<(String, u64)>>>;

pub type Body = Box<dyn FnMut(&mut Context<'_>, u32) -> TaskResult>;

/// Test task driven by a closure that gets the context and its call number.
pub struct ScriptTask {
    name: String,
    log: RunLog,
    body: Body,
    calls: u32,
    event: Option<Rc<Cell<bool>>>,
    cancels: Rc<Cell<u32>>,
}

impl ScriptTask {
    pub fn new(
        name: &str,
        log: &RunLog,
        body: impl FnMut(&mut Context<'_>, u32) -> TaskResult + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            log: Rc::clone(log),
            body: Box::new(body),
            calls: 0,
            event: None,
            cancels: Rc::new(Cell::new(0)),
        }
    }

    /// Always completes.
    pub fn periodic(name: &str, log: &RunLog) -> Self {
        Self::new(name, log, |_, _| Ok(TaskStep::Complete))
    }

    pub fn with_event(mut self, flag: &Rc<Cell<bool>>) -> Self {
        self.event = Some(Rc::clone(flag));
        self
    }

    pub fn cancel_counter(&self) -> Rc<Cell<u32>> {
        Rc::clone(&self.cancels)
    }
}

impl Task for ScriptTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> TaskResult {
        self.log.borrow_mut().push((self.name.clone(), ctx.now_ms()));
        let call = self.calls;
        self.calls += 1;
        (self.body)(ctx, call)
    }

    fn event_ready(&mut self) -> bool {
        self.event.as_ref().is_some_and(|flag| flag.get())
    }

    fn cancelled(&mut self) {
        self.cancels.set(self.cancels.get() + 1);
    }
}

pub struct Harness {
    pub machine: StateMachine,
    pub clock: Rc<ManualClock>,
    pub system: SimulatedSystem,
    pub power: SimulatedPower,
}

pub fn new_log() -> RunLog {
    Rc::new(RefCell::new(Vec::new()))
}

pub fn runs_of(log: &RunLog, name: &str) -> Vec<u64> {
    log.borrow()
        .iter()
        .filter(|(task, _)| task == name)
        .map(|(_, at)| *at)
        .collect()
}

pub fn harness(states: &str, tasks: Vec<Box<dyn Task>>, hooks: HookRegistry) -> Harness {
    harness_with_order(states, tasks, hooks, PriorityOrder::LowerFirst)
}

pub fn harness_with_order(
    states: &str,
    tasks: Vec<Box<dyn Task>>,
    hooks: HookRegistry,
    priority_order: PriorityOrder,
) -> Harness {
    let states = StateTable::from_json(states).expect("state document parses");
    let mut registry = TaskRegistry::new();
    for task in tasks {
        registry.register(task).expect("unique task names");
    }

    let system = SimulatedSystem::new();
    let power = SimulatedPower::new(3900);
    let services = Services::new(
        RegisterSpace::in_memory(),
        Box::new(system.clone()),
        Box::new(power.clone()),
    );

    let clock = Rc::new(ManualClock::new(0));
    let config = SchedulerConfig {
        priority_order,
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::new(clock.clone(), config);

    Harness {
        machine: StateMachine::new(states, registry, hooks, services, scheduler),
        clock,
        system,
        power,
    }
}
