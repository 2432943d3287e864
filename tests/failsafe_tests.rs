mod common;

use common::{harness, new_log, ScriptTask};
use cubesat_core::config::ConfigError;
use cubesat_core::failsafe::{fail_safe, run_with_fail_safe, CrashLog, FileCrashLog};
use cubesat_core::hardware::SimulatedSystem;
use cubesat_core::registers::{Register, RegisterSpace};
use cubesat_core::scheduler::SchedulerError;
use cubesat_core::state_machine::HookRegistry;
use cubesat_core::task::TaskStep;
use cubesat_core::FlightError;

#[derive(Default)]
struct MemoryLog {
    entries: Vec<String>,
    broken: bool,
}

impl CrashLog for MemoryLog {
    fn record(&mut self, entry: &str) -> std::io::Result<()> {
        if self.broken {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "flash worn out"));
        }
        self.entries.push(entry.to_string());
        Ok(())
    }
}

#[test]
fn test_fail_safe_records_counts_and_resets_once() {
    let mut log = MemoryLog::default();
    let mut registers = RegisterSpace::in_memory();
    let system = SimulatedSystem::new();
    let err = FlightError::Scheduler(SchedulerError::ZeroPeriod);

    fail_safe(&err, &mut log, &mut registers, &mut system.clone());

    assert_eq!(log.entries.len(), 1);
    assert!(log.entries[0].contains("period must be at least 1 ms"));
    assert_eq!(registers.get(Register::StateErrorCount).unwrap(), 1);
    assert_eq!(system.resets(), 1);
}

#[test]
fn test_fail_safe_resets_even_when_log_fails() {
    let mut log = MemoryLog {
        broken: true,
        ..MemoryLog::default()
    };
    let mut registers = RegisterSpace::in_memory();
    let system = SimulatedSystem::new();
    let err = FlightError::Config(ConfigError::Empty);

    fail_safe(&err, &mut log, &mut registers, &mut system.clone());

    assert!(log.entries.is_empty());
    assert_eq!(registers.get(Register::StateErrorCount).unwrap(), 1);
    assert_eq!(system.resets(), 1);
}

#[test]
fn test_bad_configuration_goes_to_fail_safe() {
    let states = r#"{"A": {"Tasks": {"missing": {"Interval": 1, "Priority": 1}}, "StepsTo": []}}"#;
    let mut h = harness(states, Vec::new(), HookRegistry::new());
    let mut log = MemoryLog::default();

    let halted = run_with_fail_safe(&mut h.machine, "A", &mut log);

    assert!(!halted);
    assert_eq!(h.system.resets(), 1);
    assert_eq!(log.entries.len(), 1);
    assert!(log.entries[0].contains("missing"));
    let errors = h.machine.services().registers.get(Register::StateErrorCount).unwrap();
    assert_eq!(errors, 1);
    assert_eq!(h.machine.current_state(), None);
}

#[test]
fn test_requested_halt_is_a_clean_exit() {
    let states = r#"{"A": {"Tasks": {"stopper": {"Interval": 1, "Priority": 1}}, "StepsTo": []}}"#;
    let runs = new_log();
    let stopper = ScriptTask::new("stopper", &runs, |ctx, call| {
        if call == 2 {
            ctx.services.request_halt();
        }
        Ok(TaskStep::Complete)
    });
    let mut h = harness(states, vec![Box::new(stopper)], HookRegistry::new());
    let mut log = MemoryLog::default();

    let halted = run_with_fail_safe(&mut h.machine, "A", &mut log);

    assert!(halted);
    assert_eq!(runs.borrow().len(), 3);
    assert_eq!(h.system.resets(), 0);
    assert!(log.entries.is_empty());
}

#[test]
fn test_file_crash_log_appends_lines() {
    let path = std::env::temp_dir().join(format!("cubesat-crash-{}.log", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let mut log = FileCrashLog::new(&path);

    log.record("fatal: first").unwrap();
    log.record("fatal: second").unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("fatal: first"));
    assert!(lines[1].ends_with("fatal: second"));
    let _ = std::fs::remove_file(&path);
}
