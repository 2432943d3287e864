//! Cooperative periodic scheduler.
//!
//! One thread, no preemption. Every tick collects the entries that are due,
//! orders them by priority (task registration order among ties) and runs each task
//! body to its next yield. A task that returns `Sleep` or `AwaitEvent` keeps
//! its entry but is parked until it may resume; other tasks run meanwhile.

use crate::clock::Clock;
use crate::error::FlightError;
use crate::task::{TaskError, TaskId, TaskResult, TaskStep};
use core::cmp::Ordering;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use tracing::{debug, error, info};

pub const MAX_SCHEDULED_TASKS: usize = 32;

/// Which end of the priority scale runs first when several tasks are due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityOrder {
    #[default]
    LowerFirst,
    HigherFirst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub priority_order: PriorityOrder,
    /// Longest idle sleep while some task awaits an event.
    pub event_poll_ms: u64,
    /// Idle sleep when nothing at all is scheduled.
    pub idle_sleep_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            priority_order: PriorityOrder::LowerFirst,
            event_poll_ms: 50,
            idle_sleep_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspension {
    None,
    Sleeping { resume_at_ms: u64 },
    Awaiting { deadline_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub task: TaskId,
    pub period_ms: u64,
    pub priority: f64,
    pub next_due_ms: u64,
    pub suspension: Suspension,
    generation: u64,
    seq: u64,
}

impl ScheduleEntry {
    fn is_due(&self, now_ms: u64) -> bool {
        match self.suspension {
            Suspension::None => self.next_due_ms <= now_ms,
            Suspension::Sleeping { resume_at_ms } => resume_at_ms <= now_ms,
            Suspension::Awaiting { deadline_ms } => deadline_ms <= now_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub runs: u64,
    pub idle_ticks: u64,
    pub task_failures: u32,
    pub total_scheduled: u32,
    pub total_stopped: u32,
    pub currently_scheduled: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub ran: usize,
    pub failed: usize,
    pub slept_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("schedule table full ({0} entries)")]
    Full(usize),
    #[error("period must be at least 1 ms")]
    ZeroPeriod,
}

/// What the scheduler runs tasks against.
pub trait TaskHost {
    /// Run one step of the task body. An `Err` here is fatal and stops the
    /// scheduler; a failed task body is the inner `Err`.
    fn run_task(
        &mut self,
        task: TaskId,
        scheduler: &mut Scheduler,
        now_ms: u64,
    ) -> Result<TaskResult, FlightError>;

    fn event_ready(&mut self, task: TaskId) -> bool;

    fn task_failed(&mut self, task: TaskId, error: &TaskError);

    fn task_name(&self, task: TaskId) -> &str;

    fn halted(&self) -> bool;
}

pub struct Scheduler {
    clock: Rc<dyn Clock>,
    entries: Vec<ScheduleEntry, MAX_SCHEDULED_TASKS>,
    config: SchedulerConfig,
    stats: SchedulerStats,
    next_generation: u64,
    next_seq: u64,
}

impl Scheduler {
    pub fn new(clock: Rc<dyn Clock>, config: SchedulerConfig) -> Self {
        Self {
            clock,
            entries: Vec::new(),
            config,
            stats: SchedulerStats::default(),
            next_generation: 0,
            next_seq: 0,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn capacity(&self) -> usize {
        MAX_SCHEDULED_TASKS
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Adds `task` with a fixed period. Without `defer` the first run is due
    /// immediately; with it, one period from now. Scheduling a task that is
    /// already scheduled replaces its entry.
    pub fn schedule(
        &mut self,
        task: TaskId,
        period_ms: u64,
        priority: f64,
        defer: bool,
    ) -> Result<(), SchedulerError> {
        if period_ms == 0 {
            return Err(SchedulerError::ZeroPeriod);
        }
        self.stop(task);
        if self.entries.is_full() {
            return Err(SchedulerError::Full(MAX_SCHEDULED_TASKS));
        }

        let now = self.clock.now_ms();
        let entry = ScheduleEntry {
            task,
            period_ms,
            priority,
            next_due_ms: if defer { now.saturating_add(period_ms) } else { now },
            suspension: Suspension::None,
            generation: self.next_generation,
            seq: self.next_seq,
        };
        self.next_generation += 1;
        self.next_seq += 1;
        if self.entries.push(entry).is_err() {
            return Err(SchedulerError::Full(MAX_SCHEDULED_TASKS));
        }

        self.stats.total_scheduled += 1;
        self.stats.currently_scheduled = self.entries.len() as u8;
        Ok(())
    }

    /// Removes the entry for `task`, dropping any parked invocation with it.
    pub fn stop(&mut self, task: TaskId) -> bool {
        let Some(index) = self.entries.iter().position(|e| e.task == task) else {
            return false;
        };
        self.entries.remove(index);
        self.stats.total_stopped += 1;
        self.stats.currently_scheduled = self.entries.len() as u8;
        true
    }

    /// Removes every entry and returns the tasks that were scheduled.
    pub fn stop_all(&mut self) -> std::vec::Vec<TaskId> {
        let stopped: std::vec::Vec<TaskId> = self.entries.iter().map(|e| e.task).collect();
        self.stats.total_stopped += stopped.len() as u32;
        self.entries.clear();
        self.stats.currently_scheduled = 0;
        stopped
    }

    pub fn is_scheduled(&self, task: TaskId) -> bool {
        self.entries.iter().any(|e| e.task == task)
    }

    pub fn entry(&self, task: TaskId) -> Option<&ScheduleEntry> {
        self.entries.iter().find(|e| e.task == task)
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Runs every task that is due now, or sleeps until something will be.
    pub fn tick<H: TaskHost + ?Sized>(&mut self, host: &mut H) -> Result<TickReport, FlightError> {
        let now = self.clock.now_ms();
        self.stats.ticks += 1;
        let mut report = TickReport::default();

        let due = self.collect_due(now, host);
        if due.is_empty() {
            let wake = self.next_wakeup_ms(now);
            report.slept_ms = wake - now;
            self.stats.idle_ticks += 1;
            self.clock.sleep_ms(report.slept_ms);
            return Ok(report);
        }

        for (task, generation) in due {
            // an earlier task this tick may have switched state
            if !self.is_live(task, generation) {
                continue;
            }
            let started = self.clock.now_ms();
            let outcome = host.run_task(task, self, started)?;
            self.stats.runs += 1;
            report.ran += 1;

            let step = match outcome {
                Ok(step) => step,
                Err(err) => {
                    error!("task '{}' failed: {}", host.task_name(task), err);
                    self.stats.task_failures += 1;
                    report.failed += 1;
                    host.task_failed(task, &err);
                    TaskStep::Complete
                }
            };
            let finished = self.clock.now_ms();
            self.settle(task, generation, step, finished);

            if host.halted() {
                break;
            }
        }
        Ok(report)
    }

    /// Ticks until the host reports it has halted.
    pub fn run<H: TaskHost + ?Sized>(&mut self, host: &mut H) -> Result<(), FlightError> {
        info!("scheduler running with {} tasks", self.entries.len());
        while !host.halted() {
            self.tick(host)?;
        }
        info!("scheduler halted after {} ticks", self.stats.ticks);
        Ok(())
    }

    fn collect_due<H: TaskHost + ?Sized>(
        &self,
        now: u64,
        host: &mut H,
    ) -> std::vec::Vec<(TaskId, u64)> {
        let mut due: std::vec::Vec<&ScheduleEntry> = self
            .entries
            .iter()
            .filter(|e| {
                e.is_due(now)
                    || (matches!(e.suspension, Suspension::Awaiting { .. }) && host.event_ready(e.task))
            })
            .collect();
        due.sort_by(|a, b| self.compare(a, b));
        due.into_iter().map(|e| (e.task, e.generation)).collect()
    }

    fn compare(&self, a: &ScheduleEntry, b: &ScheduleEntry) -> Ordering {
        let by_priority = match self.config.priority_order {
            PriorityOrder::LowerFirst => a.priority.total_cmp(&b.priority),
            PriorityOrder::HigherFirst => b.priority.total_cmp(&a.priority),
        };
        by_priority
            .then(a.task.cmp(&b.task))
            .then(a.seq.cmp(&b.seq))
    }

    fn is_live(&self, task: TaskId, generation: u64) -> bool {
        self.entries
            .iter()
            .any(|e| e.task == task && e.generation == generation)
    }

    fn settle(&mut self, task: TaskId, generation: u64, step: TaskStep, now: u64) {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.task == task && e.generation == generation)
        else {
            debug!("entry for {:?} replaced while it ran", task);
            return;
        };

        entry.suspension = match step {
            TaskStep::Complete => {
                entry.next_due_ms = rearm(entry.next_due_ms, entry.period_ms, now);
                Suspension::None
            }
            TaskStep::Sleep { ms } => Suspension::Sleeping {
                resume_at_ms: now.saturating_add(ms),
            },
            TaskStep::AwaitEvent { timeout_ms } => Suspension::Awaiting {
                deadline_ms: now.saturating_add(timeout_ms),
            },
        };
        debug_assert!(
            entry.suspension != Suspension::None || entry.next_due_ms >= now,
            "task re-armed into the past"
        );
    }

    fn next_wakeup_ms(&self, now: u64) -> u64 {
        let poll_until = now.saturating_add(self.config.event_poll_ms.max(1));
        self.entries
            .iter()
            .map(|e| match e.suspension {
                Suspension::None => e.next_due_ms,
                Suspension::Sleeping { resume_at_ms } => resume_at_ms,
                Suspension::Awaiting { deadline_ms } => deadline_ms.min(poll_until),
            })
            .min()
            .unwrap_or(now.saturating_add(self.config.idle_sleep_ms.max(1)))
            .max(now)
    }
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("entries", &self.entries)
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Next due time on a fixed grid: one period after the previous due time,
/// skipping whole periods that have already passed.
pub(crate) fn rearm(next_due_ms: u64, period_ms: u64, now_ms: u64) -> u64 {
    let next = next_due_ms.saturating_add(period_ms);
    if next >= now_ms {
        return next;
    }
    let behind = (now_ms - next).div_ceil(period_ms);
    next.saturating_add(behind.saturating_mul(period_ms))
}
