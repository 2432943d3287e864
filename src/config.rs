//! State and flight configuration.
//!
//! The state document is a JSON object keyed by state name:
//!
//! ```json
//! {
//!   "Normal": {
//!     "Tasks": { "beacon": { "Interval": 30.0, "Priority": 5, "ScheduleLater": true } },
//!     "StepsTo": ["LowPower"],
//!     "EnterFunctions": ["announce"],
//!     "ExitFunctions": []
//!   }
//! }
//! ```
//!
//! Intervals are in seconds. Unknown keys are rejected.

use crate::radio::RadioConfig;
use crate::scheduler::SchedulerConfig;
use crate::tasks::{BatteryConfig, BeaconConfig, DeploymentConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("no states declared")]
    Empty,
    #[error("state '{state}' schedules unknown task '{task}'")]
    UnknownTask { state: String, task: String },
    #[error("state '{state}' steps to undeclared state '{target}'")]
    UnknownTransition { state: String, target: String },
    #[error("state '{state}' references unknown hook '{hook}'")]
    UnknownHook { state: String, hook: String },
    #[error("task '{task}' in state '{state}' has invalid interval {interval}")]
    InvalidInterval { state: String, task: String, interval: f64 },
    #[error("task '{task}' in state '{state}' has invalid priority {priority}")]
    InvalidPriority { state: String, task: String, priority: f64 },
    #[error("state '{state}' schedules {count} tasks, limit is {limit}")]
    TooManyTasks { state: String, count: usize, limit: usize },
    #[error("initial state '{0}' is not declared")]
    UnknownInitialState(String),
    #[error("task '{0}' registered twice")]
    DuplicateTask(String),
    #[error("hook '{0}' registered twice")]
    DuplicateHook(String),
}

/// Longest accepted `Interval`, in seconds: periods stay within `u32::MAX` ms.
pub const MAX_INTERVAL_S: f64 = 4_294_967.295;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSchedule {
    #[serde(rename = "Interval")]
    pub interval: f64,
    #[serde(rename = "Priority")]
    pub priority: f64,
    #[serde(rename = "ScheduleLater", default)]
    pub schedule_later: bool,
}

impl TaskSchedule {
    /// Interval in whole milliseconds, never zero.
    pub fn period_ms(&self) -> u64 {
        ((self.interval * 1000.0).round() as u64).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateDefinition {
    #[serde(rename = "Tasks")]
    pub tasks: BTreeMap<String, TaskSchedule>,
    #[serde(rename = "StepsTo")]
    pub steps_to: Vec<String>,
    #[serde(rename = "EnterFunctions", default)]
    pub enter_functions: Vec<String>,
    #[serde(rename = "ExitFunctions", default)]
    pub exit_functions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateTable {
    states: BTreeMap<String, StateDefinition>,
}

impl StateTable {
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(document)?)
    }

    pub fn insert(&mut self, name: impl Into<String>, state: StateDefinition) {
        self.states.insert(name.into(), state);
    }

    pub fn get(&self, name: &str) -> Option<&StateDefinition> {
        self.states.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    /// Whether `to` is listed in the `StepsTo` of `from`.
    pub fn can_step(&self, from: &str, to: &str) -> bool {
        self.states
            .get(from)
            .is_some_and(|state| state.steps_to.iter().any(|s| s == to))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StateDefinition)> {
        self.states.iter().map(|(name, state)| (name.as_str(), state))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Checks every reference in the table. `has_task` and `has_hook` answer
    /// whether a name is registered; `max_tasks` bounds each state's table.
    pub fn validate(
        &self,
        has_task: impl Fn(&str) -> bool,
        has_hook: impl Fn(&str) -> bool,
        max_tasks: usize,
    ) -> Result<(), ConfigError> {
        if self.states.is_empty() {
            return Err(ConfigError::Empty);
        }

        for (name, state) in &self.states {
            if state.tasks.len() > max_tasks {
                return Err(ConfigError::TooManyTasks {
                    state: name.clone(),
                    count: state.tasks.len(),
                    limit: max_tasks,
                });
            }
            for (task, schedule) in &state.tasks {
                if !has_task(task.as_str()) {
                    return Err(ConfigError::UnknownTask {
                        state: name.clone(),
                        task: task.clone(),
                    });
                }
                if !schedule.interval.is_finite()
                    || schedule.interval <= 0.0
                    || schedule.interval > MAX_INTERVAL_S
                {
                    return Err(ConfigError::InvalidInterval {
                        state: name.clone(),
                        task: task.clone(),
                        interval: schedule.interval,
                    });
                }
                if !schedule.priority.is_finite() {
                    return Err(ConfigError::InvalidPriority {
                        state: name.clone(),
                        task: task.clone(),
                        priority: schedule.priority,
                    });
                }
            }
            if let Some(target) = state.steps_to.iter().find(|t| !self.states.contains_key(*t)) {
                return Err(ConfigError::UnknownTransition {
                    state: name.clone(),
                    target: target.clone(),
                });
            }
            let mut hooks = state.enter_functions.iter().chain(&state.exit_functions);
            if let Some(hook) = hooks.find(|h| !has_hook(h.as_str())) {
                return Err(ConfigError::UnknownHook {
                    state: name.clone(),
                    hook: hook.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Parses and checks a state document against the registered names.
pub fn validate_config(
    document: &str,
    task_names: &[&str],
    hook_names: &[&str],
) -> Result<StateTable, ConfigError> {
    let table = StateTable::from_json(document)?;
    table.validate(
        |task| task_names.iter().any(|name| *name == task),
        |hook| hook_names.iter().any(|name| *name == hook),
        crate::scheduler::MAX_SCHEDULED_TASKS,
    )?;
    Ok(table)
}

/// Everything the flight binary reads at boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightConfig {
    pub initial_state: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub beacon: BeaconConfig,
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    pub states: StateTable,
}

impl FlightConfig {
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(document)?;
        if !config.states.contains(&config.initial_state) {
            return Err(ConfigError::UnknownInitialState(config.initial_state));
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let document = std::fs::read_to_string(path)?;
        Self::from_json(&document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_rounds_to_milliseconds() {
        let schedule = TaskSchedule {
            interval: 0.0004,
            priority: 1.0,
            schedule_later: false,
        };
        assert_eq!(schedule.period_ms(), 1);

        let schedule = TaskSchedule {
            interval: 2.5,
            ..schedule
        };
        assert_eq!(schedule.period_ms(), 2500);
    }

    #[test]
    fn test_optional_keys_default() {
        let table = StateTable::from_json(
            r#"{"Idle": {"Tasks": {"t": {"Interval": 1, "Priority": 0}}, "StepsTo": []}}"#,
        )
        .unwrap();
        let idle = table.get("Idle").unwrap();
        assert!(!idle.tasks["t"].schedule_later);
        assert!(idle.enter_functions.is_empty());
        assert!(idle.exit_functions.is_empty());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result = StateTable::from_json(r#"{"Idle": {"Tasks": {}, "StepsTo": [], "Extra": 1}}"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
