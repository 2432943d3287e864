use cubesat_core::config::{validate_config, ConfigError, FlightConfig, StateDefinition, StateTable, TaskSchedule};
use cubesat_core::scheduler::PriorityOrder;
use std::collections::BTreeMap;

const TASKS: &[&str] = &["radio", "beacon", "battery"];
const HOOKS: &[&str] = &["announce"];

#[test]
fn test_valid_document_passes() {
    let document = r#"{
        "Normal": {
            "Tasks": {
                "radio": { "Interval": 0.1, "Priority": 1 },
                "beacon": { "Interval": 30, "Priority": 5, "ScheduleLater": true }
            },
            "StepsTo": ["LowPower"],
            "EnterFunctions": ["announce"]
        },
        "LowPower": {
            "Tasks": { "battery": { "Interval": 10, "Priority": 1 } },
            "StepsTo": ["Normal"],
            "ExitFunctions": ["announce"]
        }
    }"#;

    let table = validate_config(document, TASKS, HOOKS).unwrap();

    assert_eq!(table.len(), 2);
    assert!(table.can_step("Normal", "LowPower"));
    assert!(!table.can_step("Normal", "Normal"));
    assert_eq!(table.get("Normal").unwrap().tasks["beacon"].period_ms(), 30_000);
}

#[test]
fn test_unknown_task_rejected() {
    let document = r#"{"Normal": {"Tasks": {"camera": {"Interval": 1, "Priority": 1}}, "StepsTo": []}}"#;

    let err = validate_config(document, TASKS, HOOKS).unwrap_err();

    assert!(matches!(err, ConfigError::UnknownTask { ref task, .. } if task == "camera"));
}

#[test]
fn test_undeclared_transition_target_rejected() {
    let document = r#"{"Normal": {"Tasks": {}, "StepsTo": ["Safe"]}}"#;

    let err = validate_config(document, TASKS, HOOKS).unwrap_err();

    assert!(matches!(
        err,
        ConfigError::UnknownTransition { ref state, ref target } if state == "Normal" && target == "Safe"
    ));
}

#[test]
fn test_unknown_hook_rejected() {
    let document = r#"{"Normal": {"Tasks": {}, "StepsTo": [], "ExitFunctions": ["power_down"]}}"#;

    let err = validate_config(document, TASKS, HOOKS).unwrap_err();

    assert!(matches!(err, ConfigError::UnknownHook { ref hook, .. } if hook == "power_down"));
}

#[test]
fn test_missing_required_key_rejected() {
    let document = r#"{"Normal": {"StepsTo": []}}"#;

    let err = validate_config(document, TASKS, HOOKS).unwrap_err();

    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_non_positive_interval_rejected() {
    for interval in ["0", "-1.5"] {
        let document = format!(
            r#"{{"Normal": {{"Tasks": {{"radio": {{"Interval": {}, "Priority": 1}}}}, "StepsTo": []}}}}"#,
            interval
        );

        let err = validate_config(&document, TASKS, HOOKS).unwrap_err();

        assert!(matches!(err, ConfigError::InvalidInterval { .. }), "interval {}", interval);
    }
}

#[test]
fn test_non_finite_priority_rejected() {
    let mut tasks = BTreeMap::new();
    tasks.insert(
        "radio".to_string(),
        TaskSchedule {
            interval: 1.0,
            priority: f64::INFINITY,
            schedule_later: false,
        },
    );
    let mut table = StateTable::default();
    table.insert(
        "Normal",
        StateDefinition {
            tasks,
            steps_to: Vec::new(),
            enter_functions: Vec::new(),
            exit_functions: Vec::new(),
        },
    );

    let err = table.validate(|t| TASKS.contains(&t), |_| true, 8).unwrap_err();

    assert!(matches!(err, ConfigError::InvalidPriority { .. }));
}

#[test]
fn test_state_over_schedule_capacity_rejected() {
    let document = r#"{"Normal": {"Tasks": {
        "radio": {"Interval": 1, "Priority": 1},
        "beacon": {"Interval": 1, "Priority": 2},
        "battery": {"Interval": 1, "Priority": 3}
    }, "StepsTo": []}}"#;
    let table = StateTable::from_json(document).unwrap();

    let err = table.validate(|t| TASKS.contains(&t), |_| true, 2).unwrap_err();

    assert!(matches!(err, ConfigError::TooManyTasks { count: 3, limit: 2, .. }));
}

#[test]
fn test_empty_document_rejected() {
    let err = validate_config("{}", TASKS, HOOKS).unwrap_err();
    assert!(matches!(err, ConfigError::Empty));
}

#[test]
fn test_flight_config_defaults_and_initial_state() {
    let document = r#"{
        "initial_state": "Normal",
        "scheduler": { "priority_order": "higher_first" },
        "states": { "Normal": { "Tasks": {}, "StepsTo": [] } }
    }"#;

    let config = FlightConfig::from_json(document).unwrap();

    assert_eq!(config.scheduler.priority_order, PriorityOrder::HigherFirst);
    assert_eq!(config.scheduler.event_poll_ms, 50);
    assert_eq!(config.battery.low_power_state, "LowPower");
    assert_eq!(config.beacon.callsign, "CUBESAT");
}

#[test]
fn test_flight_config_rejects_undeclared_initial_state() {
    let document = r#"{
        "initial_state": "Orbit",
        "states": { "Normal": { "Tasks": {}, "StepsTo": [] } }
    }"#;

    let err = FlightConfig::from_json(document).unwrap_err();

    assert!(matches!(err, ConfigError::UnknownInitialState(ref name) if name == "Orbit"));
}

#[test]
fn test_shipped_flight_config_loads() {
    let config = FlightConfig::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config/flight.json")).unwrap();
    let tasks = ["radio", "beacon", "battery", "deploy"];
    let hooks = ["log_transition", "announce"];

    config
        .states
        .validate(|t| tasks.contains(&t), |h| hooks.contains(&h), 32)
        .unwrap();
    assert!(config.radio.validate().is_ok());
}

#[test]
fn test_interval_beyond_clock_range_rejected() {
    let document = r#"{"Run": {"Tasks": {"radio": {"Interval": 1e17, "Priority": 1, "ScheduleLater": true}}, "StepsTo": []}}"#;

    let err = validate_config(document, TASKS, HOOKS).unwrap_err();

    assert!(matches!(err, ConfigError::InvalidInterval { ref task, .. } if task == "radio"));
}

#[test]
fn test_longest_allowed_interval_accepted() {
    let document = format!(
        r#"{{"Run": {{"Tasks": {{"radio": {{"Interval": {}, "Priority": 1}}}}, "StepsTo": []}}}}"#,
        cubesat_core::config::MAX_INTERVAL_S
    );

    let table = validate_config(&document, TASKS, HOOKS).unwrap();

    assert_eq!(table.get("Run").unwrap().tasks["radio"].period_ms(), u64::from(u32::MAX));
}

#[test]
fn test_misspelled_task_key_rejected() {
    let document = r#"{"Normal": {"Tasks": {"radio": {"Interval": 1, "Priorty": 1}}, "StepsTo": []}}"#;

    let err = validate_config(document, TASKS, HOOKS).unwrap_err();

    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_wrong_field_types_rejected() {
    let documents = [
        r#"{"Normal": {"Tasks": {"radio": {"Interval": "1", "Priority": 1}}, "StepsTo": []}}"#,
        r#"{"Normal": {"Tasks": {"radio": {"Interval": 1, "Priority": 1, "ScheduleLater": "yes"}}, "StepsTo": []}}"#,
        r#"{"Normal": {"Tasks": {}, "StepsTo": "Normal"}}"#,
    ];

    for document in documents {
        let err = validate_config(document, TASKS, HOOKS).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "{}", document);
    }
}

#[test]
fn test_integer_priority_becomes_float() {
    let document = r#"{"Normal": {"Tasks": {"radio": {"Interval": 2, "Priority": 3}}, "StepsTo": []}}"#;

    let table = validate_config(document, TASKS, HOOKS).unwrap();

    let schedule = &table.get("Normal").unwrap().tasks["radio"];
    assert_eq!(schedule.priority, 3.0_f64);
    assert_eq!(schedule.interval, 2.0_f64);
    assert!(!schedule.schedule_later);
}
