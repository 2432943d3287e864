use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use cubesat_core::link::LinkFrame;
use cubesat_core::radio::command::{command_packet, opcodes, Opcode, INVALID_COMMAND_MARKER, SECRET_LEN};
use cubesat_core::radio::headers::Header;
use cubesat_core::radio::{OutboundMessage, Reassembled, Reassembler, DEFAULT_PACKET_LEN, DEFAULT_SECRET, DEFAULT_SHUTDOWN_SECRET};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8080";

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    let matches = App::new("cubesat-ground")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("📡 Ground station for the CubeSat flight software")
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Flight software host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Radio link port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("secret")
                .long("secret")
                .value_name("HEX")
                .help("Command secret as 8 hex digits")
                .takes_value(true)
                .global(true)
                .validator(|v| parse_secret(&v).map(|_| ())),
        )
        .arg(
            Arg::with_name("wait")
                .short("w")
                .long("wait")
                .value_name("SECONDS")
                .help("How long to listen for downlink after sending")
                .takes_value(true)
                .default_value("5")
                .global(true)
                .validator(|v| match v.parse::<u64>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("wait must be a whole number of seconds".into()),
                }),
        )
        .arg(
            Arg::with_name("downlink-dir")
                .long("downlink-dir")
                .value_name("DIR")
                .help("Where disk-chunked downlink files are written")
                .takes_value(true)
                .default_value("downlink")
                .global(true),
        )
        .subcommand(SubCommand::with_name("listen").about("👂 Only listen to the downlink"))
        .subcommand(SubCommand::with_name("noop").about("🏓 Send a no-op command"))
        .subcommand(SubCommand::with_name("reset").about("🔄 Command a hard reset"))
        .subcommand(
            SubCommand::with_name("shutdown")
                .about("🛑 Command a shutdown")
                .arg(
                    Arg::with_name("shutdown-secret")
                        .long("shutdown-secret")
                        .value_name("HEX")
                        .help("Shutdown secret as 8 hex digits")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("query")
                .about("🔎 Query a value (state, boot_count, battery_mv, ...)")
                .arg(Arg::with_name("key").required(true)),
        )
        .subcommand(
            SubCommand::with_name("exec")
                .about("⚙️  Run an action (switch <state>, force <state>, reset <reg>, set <flag>)")
                .arg(Arg::with_name("action").required(true).multiple(true))
                .arg(
                    Arg::with_name("then")
                        .long("then")
                        .value_name("ACTION")
                        .help("Second exec action sent as a follow-up in the same contact")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("request-file")
                .about("📥 Ask for a file to be downlinked")
                .arg(Arg::with_name("path").required(true)),
        )
        .subcommand(
            SubCommand::with_name("list-dir")
                .about("📂 List a directory under the file root")
                .arg(Arg::with_name("path").default_value(".")),
        )
        .subcommand(SubCommand::with_name("queue-len").about("📊 Ask for the downlink queue length"))
        .subcommand(
            SubCommand::with_name("upload")
                .about("📤 Uplink a file as a disk-chunked message")
                .arg(Arg::with_name("file").required(true)),
        )
        .subcommand(
            SubCommand::with_name("send-text")
                .about("✉️  Uplink text as a memory-chunked message")
                .arg(Arg::with_name("text").required(true)),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let secret = match matches.value_of("secret") {
        Some(hex) => parse_secret(hex)?,
        None => DEFAULT_SECRET,
    };
    let wait = Duration::from_secs(matches.value_of("wait").unwrap_or("5").parse()?);
    let downlink_dir = PathBuf::from(matches.value_of("downlink-dir").unwrap_or("downlink"));

    let uplink = match build_uplink(&matches, secret) {
        Ok(Some(packets)) => packets,
        Ok(None) => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} Listen to beacons", "cubesat-ground listen".bright_cyan());
            println!("  {} Ask for the current state", "cubesat-ground query state".bright_cyan());
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    run_session(host, port, &uplink, wait, downlink_dir).await
}

fn build_uplink(matches: &ArgMatches<'_>, secret: [u8; SECRET_LEN]) -> CliResult<Option<Vec<Vec<u8>>>> {
    let single = |opcode: Opcode, args: &[u8]| -> CliResult<Vec<Vec<u8>>> {
        Ok(vec![command_packet(false, secret, opcode, args)?.to_vec()])
    };

    let packets = match matches.subcommand() {
        ("listen", _) => Vec::new(),
        ("noop", _) => single(opcodes::NO_OP, &[])?,
        ("reset", _) => single(opcodes::HARD_RESET, &[])?,
        ("shutdown", Some(sub)) => {
            let shutdown_secret = match sub.value_of("shutdown-secret") {
                Some(hex) => parse_secret(hex)?,
                None => DEFAULT_SHUTDOWN_SECRET,
            };
            single(opcodes::SHUTDOWN, &shutdown_secret)?
        }
        ("query", Some(sub)) => single(opcodes::QUERY, sub.value_of("key").unwrap_or("state").as_bytes())?,
        ("exec", Some(sub)) => {
            let action = sub.values_of("action").map(|v| v.collect::<Vec<_>>().join(" ")).unwrap_or_default();
            match sub.value_of("then") {
                Some(then) => vec![
                    command_packet(true, secret, opcodes::EXEC, action.as_bytes())?.to_vec(),
                    command_packet(false, secret, opcodes::EXEC, then.as_bytes())?.to_vec(),
                ],
                None => single(opcodes::EXEC, action.as_bytes())?,
            }
        }
        ("request-file", Some(sub)) => single(opcodes::REQUEST_FILE, sub.value_of("path").unwrap_or("").as_bytes())?,
        ("list-dir", Some(sub)) => single(opcodes::LIST_DIR, sub.value_of("path").unwrap_or(".").as_bytes())?,
        ("queue-len", _) => single(opcodes::QUEUE_LENGTH, &[])?,
        ("upload", Some(sub)) => {
            let file = sub.value_of("file").unwrap_or("");
            drain(OutboundMessage::from_file(0, file, DEFAULT_PACKET_LEN - 1)?)?
        }
        ("send-text", Some(sub)) => {
            let text = sub.value_of("text").unwrap_or("").as_bytes().to_vec();
            drain(OutboundMessage::chunked(0, text, DEFAULT_PACKET_LEN - 1)?)?
        }
        _ => return Ok(None),
    };
    Ok(Some(packets))
}

/// Every packet of `message`, in order. TCP is reliable, so each counts as acked.
fn drain(mut message: OutboundMessage) -> CliResult<Vec<Vec<u8>>> {
    let mut packets = Vec::new();
    while !message.done() {
        packets.push(message.packet()?.to_vec());
        message.ack();
    }
    Ok(packets)
}

fn parse_secret(hex: &str) -> Result<[u8; SECRET_LEN], String> {
    let hex = hex.trim_start_matches("0x");
    if hex.len() != SECRET_LEN * 2 {
        return Err(format!("secret must be {} hex digits", SECRET_LEN * 2));
    }
    let mut secret = [0u8; SECRET_LEN];
    for (i, byte) in secret.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|e| e.to_string())?;
    }
    Ok(secret)
}

async fn run_session(
    host: &str,
    port: u16,
    uplink: &[Vec<u8>],
    wait: Duration,
    downlink_dir: PathBuf,
) -> CliResult<()> {
    let addr = format!("{}:{}", host, port);
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} Failed to reach flight software at {}", "❌".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Start it with:", "💡".yellow());
                eprintln!("   {}", "cargo run --bin cubesat-flight -- --config config/flight.json".bright_cyan());
            }
            return Err(e.into());
        }
    };
    let (reader, mut writer) = stream.into_split();

    for packet in uplink {
        let frame = LinkFrame::Data {
            payload: packet.clone(),
            want_ack: false,
        };
        writer.write_all(frame.encode()?.as_bytes()).await?;
        println!("{} {} bytes", "⬆️ ".bright_blue(), packet.len());
    }

    let mut reassembler = Reassembler::new(1 << 20, Some(downlink_dir));
    let mut lines = BufReader::new(reader).lines();
    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => break,
            line = lines.next_line() => {
                let Some(line) = line? else {
                    println!("{}", "link closed by flight software".yellow());
                    break;
                };
                match LinkFrame::decode(&line) {
                    Ok(LinkFrame::Data { payload, want_ack }) => {
                        if want_ack {
                            send_ack(&mut writer).await?;
                        }
                        print_downlink(&payload, &mut reassembler);
                    }
                    Ok(LinkFrame::Ack) => {}
                    Err(err) => eprintln!("{} bad frame: {}", "⚠️".yellow(), err),
                }
            }
        }
    }
    Ok(())
}

async fn send_ack(writer: &mut OwnedWriteHalf) -> CliResult<()> {
    writer.write_all(LinkFrame::Ack.encode()?.as_bytes()).await?;
    Ok(())
}

fn print_downlink(packet: &[u8], reassembler: &mut Reassembler) {
    let Some((&first, body)) = packet.split_first() else {
        return;
    };
    match Header::from_byte(first) {
        Some(Header::Single) => {
            if let Some(opcode) = body.strip_prefix(INVALID_COMMAND_MARKER) {
                println!("{} unknown opcode {:02x?}", "❌".red(), opcode);
            } else {
                println!("{} {}", "⬇️ ".bright_green(), String::from_utf8_lossy(body));
            }
        }
        Some(Header::Diagnostic) => {
            println!("{} {}", "⚠️ ".yellow(), String::from_utf8_lossy(body).bright_red());
        }
        Some(Header::Chunk { family, position }) => match reassembler.accept(family, position, body) {
            Ok(Some(Reassembled::Memory(bytes))) => {
                println!("{} {}", "⬇️ ".bright_green(), String::from_utf8_lossy(&bytes));
            }
            Ok(Some(Reassembled::File { path, len })) => {
                println!("{} saved {} ({} bytes)", "💾".green(), path.display().to_string().bright_white(), len);
            }
            Ok(None) => {}
            Err(err) => eprintln!("{} reassembly failed: {}", "⚠️".yellow(), err),
        },
        Some(Header::Command { .. }) => println!("{} unexpected command packet", "❓".blue()),
        None => println!("{} unknown header 0x{:02x}", "❓".blue(), first),
    }
}
