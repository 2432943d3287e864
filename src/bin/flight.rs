use clap::{App, Arg};
use cubesat_core::clock::SystemClock;
use cubesat_core::config::FlightConfig;
use cubesat_core::failsafe::{run_with_fail_safe, FileCrashLog};
use cubesat_core::hardware::{HostSystem, SimulatedBurnWire, SimulatedPower};
use cubesat_core::link::TcpRadio;
use cubesat_core::radio::RadioTask;
use cubesat_core::registers::{FileStore, Register, RegisterSpace};
use cubesat_core::scheduler::Scheduler;
use cubesat_core::state_machine::StateMachine;
use cubesat_core::task::{Services, TaskRegistry};
use cubesat_core::tasks::{standard_hooks, BatteryTask, BeaconTask, DeploymentTask};
use std::rc::Rc;
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = "config/flight.json";
const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("cubesat-flight")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🛰️  CubeSat flight software running on a host, with the radio bridged over TCP")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Flight configuration (JSON)")
                .takes_value(true)
                .default_value(DEFAULT_CONFIG),
        )
        .arg(
            Arg::with_name("nvm")
                .long("nvm")
                .value_name("FILE")
                .help("File backing the reset-surviving registers")
                .takes_value(true)
                .default_value("nvm.bin"),
        )
        .arg(
            Arg::with_name("crash-log")
                .long("crash-log")
                .value_name("FILE")
                .help("Where fatal errors are recorded before reset")
                .takes_value(true)
                .default_value("crash.log"),
        )
        .arg(
            Arg::with_name("listen")
                .short("l")
                .long("listen")
                .value_name("ADDR")
                .help("Address the radio link listens on")
                .takes_value(true)
                .default_value(DEFAULT_LISTEN),
        )
        .arg(
            Arg::with_name("battery-mv")
                .long("battery-mv")
                .value_name("MV")
                .help("Simulated battery voltage")
                .takes_value(true)
                .default_value("3900")
                .validator(|v| match v.parse::<u16>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("battery voltage must be a number of millivolts".into()),
                }),
        )
        .get_matches();

    let config = FlightConfig::load(matches.value_of("config").unwrap_or(DEFAULT_CONFIG))?;
    config.radio.validate()?;

    let mut registers = RegisterSpace::new(Box::new(FileStore::open(
        matches.value_of("nvm").unwrap_or("nvm.bin"),
    )?));
    let boots = registers.increment(Register::BootCount)?;
    info!("boot {} into '{}'", boots, config.initial_state);

    let power = SimulatedPower::new(matches.value_of("battery-mv").unwrap_or("3900").parse()?);
    let services = Services::new(registers, Box::new(HostSystem), Box::new(power))
        .with_queue_capacity(config.radio.queue_capacity);

    let radio = TcpRadio::listen(matches.value_of("listen").unwrap_or(DEFAULT_LISTEN))?;
    let capacity = config.radio.frame_capacity();

    let mut tasks = TaskRegistry::new();
    tasks.add(RadioTask::new("radio", Box::new(radio), &config.radio))?;
    tasks.add(BeaconTask::new("beacon", config.beacon.clone(), capacity))?;
    tasks.add(BatteryTask::new("battery", config.battery.clone()))?;
    tasks.add(DeploymentTask::new(
        "deploy",
        config.deployment.clone(),
        Box::new(SimulatedBurnWire::new()),
    ))?;
    let hooks = standard_hooks(capacity, config.radio.reply_priority)?;

    let scheduler = Scheduler::new(Rc::new(SystemClock::new()), config.scheduler.clone());
    let mut machine = StateMachine::new(config.states.clone(), tasks, hooks, services, scheduler);

    let mut crash_log = FileCrashLog::new(matches.value_of("crash-log").unwrap_or("crash.log"));
    if !run_with_fail_safe(&mut machine, &config.initial_state, &mut crash_log) {
        warn!("fatal error recorded in {}", crash_log.path().display());
    }
    Ok(())
}
