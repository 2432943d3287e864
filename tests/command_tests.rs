mod common;

use common::{harness, Harness};
use cubesat_core::radio::command::{
    command_packet, opcodes, CommandError, CommandReply, CommandTableBuilder, Opcode,
};
use cubesat_core::radio::headers;
use cubesat_core::radio::{RadioConfig, RadioTask, SimulatedRadio, DEFAULT_SECRET, DEFAULT_SHUTDOWN_SECRET};
use cubesat_core::registers::Register;
use cubesat_core::state_machine::HookRegistry;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

const STATES: &str = r#"{
    "Normal": {
        "Tasks": { "radio": { "Interval": 0.1, "Priority": 1 } },
        "StepsTo": ["LowPower"]
    },
    "LowPower": {
        "Tasks": { "radio": { "Interval": 0.1, "Priority": 1 } },
        "StepsTo": ["Normal"]
    },
    "Safe": {
        "Tasks": { "radio": { "Interval": 0.1, "Priority": 1 } },
        "StepsTo": []
    }
}"#;

const PING: Opcode = [0x70, 0x69];
const FAIL: Opcode = [0x66, 0x61];

fn machine_with(task: RadioTask) -> Harness {
    let mut h = harness(STATES, vec![Box::new(task)], HookRegistry::new());
    h.machine.activate("Normal").unwrap();
    h
}

fn standard_machine(radio: &SimulatedRadio, config: &RadioConfig) -> Harness {
    machine_with(RadioTask::new("radio", Box::new(radio.clone()), config))
}

fn send(radio: &SimulatedRadio, opcode: Opcode, args: &[u8]) {
    let packet = command_packet(false, DEFAULT_SECRET, opcode, args).unwrap();
    radio.queue_inbound(packet.to_vec());
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cubesat-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_registered_handler_runs_once_with_args() {
    let radio = SimulatedRadio::new();
    let config = RadioConfig::default();
    let calls: Rc<RefCell<Vec<Vec<u8>>>> = Rc::default();
    let seen = Rc::clone(&calls);
    let table = CommandTableBuilder::standard(&config)
        .register(PING, "ping", move |_, args| {
            seen.borrow_mut().push(args.to_vec());
            Ok(CommandReply::text("pong"))
        })
        .build();
    let task = RadioTask::with_commands("radio", Box::new(radio.clone()), &config, table);
    let mut h = machine_with(task);
    send(&radio, PING, b"payload");

    h.machine.run_until(150).unwrap();

    assert_eq!(*calls.borrow(), vec![b"payload".to_vec()]);
    assert_eq!(radio.sent_bytes(), vec![b"\x00pong".to_vec()]);
}

#[test]
fn test_handler_error_sends_diagnostic() {
    let radio = SimulatedRadio::new();
    let config = RadioConfig::default();
    let table = CommandTableBuilder::standard(&config)
        .register(FAIL, "selftest", |_, _| {
            Err(CommandError::BadArguments("gyro offline".into()))
        })
        .build();
    let task = RadioTask::with_commands("radio", Box::new(radio.clone()), &config, table);
    let mut h = machine_with(task);
    send(&radio, FAIL, b"");

    h.machine.run_until(150).unwrap();

    let sent = radio.sent_bytes();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][0], headers::DIAGNOSTIC);
    assert_eq!(&sent[0][1..], b"selftest: bad arguments: gyro offline");
    // the failed command still counts as contact and as a response
    let registers = &h.machine.services().registers;
    assert!(registers.flag(Register::ContactEstablished).unwrap());
    assert_eq!(registers.get(Register::DownlinkResponseCount).unwrap(), 1);
}

#[test]
fn test_no_op_sends_nothing_but_marks_contact() {
    let radio = SimulatedRadio::new();
    let mut h = standard_machine(&radio, &RadioConfig::default());
    send(&radio, opcodes::NO_OP, b"");

    h.machine.run_until(500).unwrap();

    assert!(radio.sent().is_empty());
    let registers = &h.machine.services().registers;
    assert!(registers.flag(Register::ContactEstablished).unwrap());
    assert_eq!(registers.get(Register::DownlinkResponseCount).unwrap(), 0);
}

#[test]
fn test_hard_reset_resets_the_system() {
    let radio = SimulatedRadio::new();
    let mut h = standard_machine(&radio, &RadioConfig::default());
    send(&radio, opcodes::HARD_RESET, b"");

    h.machine.run_until(50).unwrap();

    assert_eq!(h.system.resets(), 1);
}

#[test]
fn test_shutdown_with_wrong_secret_is_refused() {
    let radio = SimulatedRadio::new();
    let mut h = standard_machine(&radio, &RadioConfig::default());
    send(&radio, opcodes::SHUTDOWN, &[1, 2, 3, 4]);

    h.machine.run_until(150).unwrap();

    assert_eq!(h.system.shutdowns(), 0);
    assert!(!h.machine.services().halt_requested());
    let sent = radio.sent_bytes();
    assert_eq!(sent[0][0], headers::DIAGNOSTIC);
}

#[test]
fn test_shutdown_with_secret_halts_the_run_loop() {
    let radio = SimulatedRadio::new();
    let mut h = standard_machine(&radio, &RadioConfig::default());
    send(&radio, opcodes::SHUTDOWN, &DEFAULT_SHUTDOWN_SECRET);

    h.machine.run().unwrap();

    assert_eq!(h.system.shutdowns(), 1);
    assert!(h.machine.services().halt_requested());
}

#[test]
fn test_exec_switch_moves_state() {
    let radio = SimulatedRadio::new();
    let mut h = standard_machine(&radio, &RadioConfig::default());
    send(&radio, opcodes::EXEC, b"switch LowPower");

    h.machine.run_until(150).unwrap();

    assert_eq!(h.machine.current_state(), Some("LowPower"));
    assert_eq!(h.machine.previous_state(), Some("Normal"));
    assert_eq!(radio.sent_bytes(), vec![b"\x00ok".to_vec()]);
}

#[test]
fn test_exec_illegal_switch_reports_diagnostic() {
    let radio = SimulatedRadio::new();
    let mut h = standard_machine(&radio, &RadioConfig::default());
    send(&radio, opcodes::EXEC, b"switch Safe");

    h.machine.run_until(150).unwrap();

    assert_eq!(h.machine.current_state(), Some("Normal"));
    assert_eq!(radio.sent_bytes()[0][0], headers::DIAGNOSTIC);
}

#[test]
fn test_exec_force_ignores_steps_to() {
    let radio = SimulatedRadio::new();
    let mut h = standard_machine(&radio, &RadioConfig::default());
    send(&radio, opcodes::EXEC, b"force Safe");

    h.machine.run_until(50).unwrap();

    assert_eq!(h.machine.current_state(), Some("Safe"));
}

#[test]
fn test_exec_resets_register() {
    let radio = SimulatedRadio::new();
    let mut h = standard_machine(&radio, &RadioConfig::default());
    h.machine
        .services_mut()
        .registers
        .set(Register::StateErrorCount, 7)
        .unwrap();
    send(&radio, opcodes::EXEC, b"reset state_errors");

    h.machine.run_until(50).unwrap();

    assert_eq!(h.machine.services().registers.get(Register::StateErrorCount).unwrap(), 0);
}

#[test]
fn test_query_reads_registers_and_power() {
    let radio = SimulatedRadio::new();
    let mut h = standard_machine(&radio, &RadioConfig::default());
    h.power.set_battery_mv(3712);
    send(&radio, opcodes::QUERY, b"battery_mv");
    send(&radio, opcodes::QUERY, b"no_such_key");

    h.machine.run_until(450).unwrap();

    let sent = radio.sent_bytes();
    assert_eq!(sent[0], b"\x003712".to_vec());
    assert_eq!(sent[1][0], headers::DIAGNOSTIC);
}

#[test]
fn test_queue_length_reports_pending_messages() {
    let radio = SimulatedRadio::new();
    let mut h = standard_machine(&radio, &RadioConfig::default());
    send(&radio, opcodes::QUEUE_LENGTH, b"");

    h.machine.run_until(150).unwrap();

    assert_eq!(radio.sent_bytes(), vec![b"\x000".to_vec()]);
}

#[test]
fn test_request_file_streams_disk_chunks() {
    let root = scratch_dir("request-file");
    let content: Vec<u8> = (0..30).collect();
    std::fs::write(root.join("log.bin"), &content).unwrap();
    let config = RadioConfig {
        packet_len: 16,
        file_root: root.clone(),
        ..RadioConfig::default()
    };
    let radio = SimulatedRadio::new();
    let mut h = standard_machine(&radio, &config);
    send(&radio, opcodes::REQUEST_FILE, b"log.bin");

    h.machine.run_until(250).unwrap();

    let sent = radio.sent_bytes();
    let kinds: Vec<u8> = sent.iter().map(|p| p[0]).collect();
    assert_eq!(kinds, [headers::DISK_START, headers::DISK_END]);
    let joined: Vec<u8> = sent.iter().flat_map(|p| p[1..].to_vec()).collect();
    assert_eq!(joined, content);
    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn test_request_file_outside_root_is_refused() {
    let root = scratch_dir("escape");
    let config = RadioConfig {
        file_root: root.clone(),
        ..RadioConfig::default()
    };
    let radio = SimulatedRadio::new();
    let mut h = standard_machine(&radio, &config);
    send(&radio, opcodes::REQUEST_FILE, b"../etc/passwd");

    h.machine.run_until(150).unwrap();

    let sent = radio.sent_bytes();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][0], headers::DIAGNOSTIC);
    assert!(String::from_utf8_lossy(&sent[0][1..]).contains("outside file root"));
    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn test_list_dir_returns_sorted_names() {
    let root = scratch_dir("list-dir");
    std::fs::write(root.join("b.txt"), b"b").unwrap();
    std::fs::write(root.join("a.txt"), b"a").unwrap();
    std::fs::create_dir_all(root.join("images")).unwrap();
    let config = RadioConfig {
        file_root: root.clone(),
        ..RadioConfig::default()
    };
    let radio = SimulatedRadio::new();
    let mut h = standard_machine(&radio, &config);
    send(&radio, opcodes::LIST_DIR, b".");

    h.machine.run_until(150).unwrap();

    assert_eq!(radio.sent_bytes(), vec![b"\x00a.txt\nb.txt\nimages/".to_vec()]);
    let _ = std::fs::remove_dir_all(&root);
}
