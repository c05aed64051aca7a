use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use killboard::messages::{InboundMessage, OutboundMessage};
use killboard::{AlarmEvent, KillSource, KillStatusMessage};
use std::process::Command;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8090";
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult {
    let matches = App::new("killboard")
        .version("0.1.0")
        .author("Vehicle Systems Engineering Team")
        .about("Client for the kill board bridge daemon")
        .setting(AppSettings::VersionlessSubcommands)
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Bridge host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Bridge port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output")
                .global(true),
        )
        .subcommand(SubCommand::with_name("status").about("Show the current kill status"))
        .subcommand(SubCommand::with_name("monitor").about("Stream status and alarms (Ctrl+C to stop)"))
        .subcommand(
            SubCommand::with_name("heartbeat")
                .about("Send one network heartbeat")
                .arg(
                    Arg::with_name("stamp")
                        .long("stamp")
                        .value_name("MS")
                        .help("Heartbeat stamp in Unix milliseconds (defaults to the bridge clock)")
                        .takes_value(true)
                        .validator(|v| match v.parse::<u64>() {
                            Ok(_) => Ok(()),
                            Err(_) => Err("Stamp must be a valid number".into()),
                        }),
                ),
        )
        .subcommand(
            SubCommand::with_name("keepalive")
                .about("Send heartbeats periodically")
                .arg(
                    Arg::with_name("interval")
                        .short("i")
                        .long("interval")
                        .value_name("MS")
                        .help("Milliseconds between heartbeats")
                        .takes_value(true)
                        .default_value("250")
                        .validator(|v| match v.parse::<u64>() {
                            Ok(ms) if ms > 0 => Ok(()),
                            _ => Err("Interval must be a positive number".into()),
                        }),
                )
                .arg(
                    Arg::with_name("count")
                        .short("n")
                        .long("count")
                        .value_name("N")
                        .help("Stop after N heartbeats")
                        .takes_value(true)
                        .validator(|v| match v.parse::<u64>() {
                            Ok(_) => Ok(()),
                            Err(_) => Err("Count must be a valid number".into()),
                        }),
                ),
        )
        .subcommand(
            SubCommand::with_name("mode")
                .about("Report which controller owns the vehicle")
                .arg(
                    Arg::with_name("controller")
                        .help("Controller name (autonomous, keyboard, rc, noop, ...)")
                        .required(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("computer-kill")
                .about("Raise or clear the computer kill alarm")
                .arg(
                    Arg::with_name("state")
                        .help("Alarm state")
                        .required(true)
                        .possible_values(&["raise", "clear"]),
                )
                .arg(
                    Arg::with_name("name")
                        .long("name")
                        .value_name("ALARM")
                        .help("Alarm name")
                        .takes_value(true)
                        .default_value("kill"),
                )
                .arg(
                    Arg::with_name("originator")
                        .long("originator")
                        .value_name("NODE")
                        .help("Node reported as the alarm originator")
                        .takes_value(true)
                        .default_value("killboard-cli"),
                ),
        )
        .subcommand(
            SubCommand::with_name("simulate")
                .about("Flip a kill source on a simulated board")
                .arg(
                    Arg::with_name("source")
                        .help("Kill source")
                        .required(true)
                        .possible_values(&["overall", "PF", "PA", "SF", "SA", "remote", "computer"]),
                )
                .arg(
                    Arg::with_name("state")
                        .help("Switch state")
                        .required(true)
                        .possible_values(&["on", "off"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("bridge")
                .about("Start the bridge daemon")
                .arg(
                    Arg::with_name("background")
                        .short("b")
                        .long("background")
                        .help("Run the daemon in background"),
                )
                .arg(
                    Arg::with_name("simulate")
                        .long("simulate")
                        .help("Use an in-memory kill board"),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let format = matches.value_of("format").unwrap_or("table");
    let verbose = matches.is_present("verbose");

    if verbose {
        println!("{}", "Kill Board Bridge client".bright_blue().bold());
        println!("{} {}:{}", "Connecting to".dimmed(), host, port);
    }

    match matches.subcommand() {
        ("status", _) => handle_status(host, port, format).await?,
        ("monitor", _) => handle_monitor(host, port, format).await?,
        ("heartbeat", Some(sub)) => {
            let stamp_ms = sub.value_of("stamp").map(str::parse::<u64>).transpose()?;
            let reply = send_message(host, port, &InboundMessage::Heartbeat { stamp_ms }).await?;
            print_reply("Heartbeat", &reply, format);
        }
        ("keepalive", Some(sub)) => handle_keepalive(sub, host, port, format).await?,
        ("mode", Some(sub)) => {
            let controller = sub.value_of("controller").unwrap_or_default().to_string();
            let reply = send_message(host, port, &InboundMessage::ControlMode { mode: controller }).await?;
            print_reply("Control mode", &reply, format);
        }
        ("computer-kill", Some(sub)) => {
            let name = sub.value_of("name").unwrap_or("kill");
            let originator = sub.value_of("originator").unwrap_or("killboard-cli");
            let event = if sub.value_of("state") == Some("raise") {
                AlarmEvent::raise(name, originator)
            } else {
                AlarmEvent::clear(name, originator)
            };
            let reply = send_message(host, port, &InboundMessage::Alarm(event)).await?;
            print_reply("Computer kill", &reply, format);
        }
        ("simulate", Some(sub)) => {
            let source = sub
                .value_of("source")
                .and_then(KillSource::from_label)
                .ok_or("Unknown kill source")?;
            let killed = sub.value_of("state") == Some("on");
            let reply = send_message(host, port, &InboundMessage::SimulateKill { source, killed }).await?;
            print_reply("Simulated switch", &reply, format);
        }
        ("bridge", Some(sub)) => handle_bridge(sub, port)?,
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} Start the daemon against a simulated board", "killboard bridge --simulate".bright_cyan());
            println!("  {} Keep the network heartbeat alive", "killboard keepalive".bright_cyan());
            println!("  {} Watch kill status", "killboard monitor".bright_cyan());
        }
    }

    Ok(())
}

async fn handle_status(host: &str, port: u16, format: &str) -> CliResult {
    match send_message(host, port, &InboundMessage::StatusRequest).await? {
        OutboundMessage::Status(status) => print_status(&status, format),
        other => print_reply("Status", &other, format),
    }
    Ok(())
}

async fn handle_keepalive(matches: &ArgMatches<'_>, host: &str, port: u16, format: &str) -> CliResult {
    let interval_ms = matches.value_of("interval").unwrap_or("250").parse::<u64>()?;
    let count = matches.value_of("count").map(str::parse::<u64>).transpose()?;

    let stream = connect(host, port).await?;
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader);
    let line = serde_json::to_string(&InboundMessage::Heartbeat { stamp_ms: None })?;

    println!(
        "{} Sending heartbeats every {}ms (Press Ctrl+C to stop)",
        "💓".bright_red(),
        interval_ms
    );

    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    let mut sent = 0u64;
    while count.map_or(true, |n| sent < n) {
        interval.tick().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        let reply = read_reply(&mut lines).await?;
        sent += 1;
        if format != "compact" {
            if let OutboundMessage::Reply { accepted: false, message } = &reply {
                println!("{} Heartbeat rejected: {}", "❌".red(), message.as_deref().unwrap_or("").bright_red());
            }
        }
    }

    println!("{} Sent {} heartbeats", "✅".green(), sent);
    Ok(())
}

async fn handle_monitor(host: &str, port: u16, format: &str) -> CliResult {
    println!("{}", "Monitoring kill board (Press Ctrl+C to stop)...".bright_blue().bold());

    let stream = connect(host, port).await?;
    let (reader, _writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    if format == "table" {
        println!("{}", "┌───────────┬─────────┬────┬────┬────┬────┬────────┬──────────┬─────────┐".bright_white());
        println!("{}", "│ Time      │ Overall │ PF │ PA │ SF │ SA │ Remote │ Computer │ Network │".bright_white());
        println!("{}", "├───────────┼─────────┼────┼────┼────┼────┼────────┼──────────┼─────────┤".bright_white());
    }

    while let Some(line) = lines.next_line().await? {
        if format == "json" {
            println!("{}", line);
            continue;
        }
        match serde_json::from_str::<OutboundMessage>(&line) {
            Ok(OutboundMessage::Status(status)) => {
                if format == "table" {
                    print_status_row(&status);
                } else {
                    print_status(&status, format);
                }
            }
            Ok(OutboundMessage::Alarm(event)) => print_alarm(&event),
            Ok(OutboundMessage::Reply { .. }) => {}
            Err(e) => println!("{} Unreadable update: {}", "❓".blue(), e),
        }
    }

    Ok(())
}

fn handle_bridge(matches: &ArgMatches<'_>, port: u16) -> CliResult {
    let background = matches.is_present("background");

    println!("{}", "Starting kill board bridge...".bright_green().bold());

    let listen = format!("127.0.0.1:{}", port);
    let mut cmd = Command::new("cargo");
    cmd.args(["run", "--bin", "killboard-bridge", "--", "--listen", &listen]);
    if matches.is_present("simulate") {
        cmd.arg("--simulate");
    }

    if background {
        cmd.spawn()?;
        println!("{} Bridge started in background on port {}", "✅".green(), port);
    } else {
        println!("{} Bridge starting on port {} (Press Ctrl+C to stop)", "🌐".bright_blue(), port);
        cmd.status()?;
    }

    Ok(())
}

fn kill_cell(killed: bool, width: usize) -> ColoredString {
    if killed {
        format!("{:>width$}", "KILL").bright_red()
    } else {
        format!("{:>width$}", "ok").bright_green()
    }
}

fn print_status_row(status: &KillStatusMessage) {
    println!(
        "│ {:>9} │ {} │ {} │ {} │ {} │ {} │ {} │ {} │ {} │",
        status.stamp_ms / 1000,
        kill_cell(status.overall, 7),
        kill_cell(status.pf, 2),
        kill_cell(status.pa, 2),
        kill_cell(status.sf, 2),
        kill_cell(status.sa, 2),
        kill_cell(status.remote, 6),
        kill_cell(status.computer, 8),
        if status.network_kill { "   STALE".bright_red() } else { "      ok".bright_green() },
    );
}

fn print_status(status: &KillStatusMessage, format: &str) {
    match format {
        "json" => match serde_json::to_string(status) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("{} {}", "❌".red(), e),
        },
        "compact" => {
            if status.killed || status.network_kill {
                println!("{}", "KILLED".bright_red().bold());
            } else {
                println!("{}", "CLEAR".bright_green());
            }
        }
        _ => {
            println!("{} {}", "🛑".bright_red(), "Kill Status".bright_blue().bold());
            let rows = [
                ("Overall", status.overall),
                ("Port forward", status.pf),
                ("Port aft", status.pa),
                ("Starboard forward", status.sf),
                ("Starboard aft", status.sa),
                ("Remote", status.remote),
                ("Computer", status.computer),
            ];
            for (label, killed) in rows {
                println!("  {:<18} {}", format!("{label}:").bright_white(), kill_cell(killed, 4));
            }
            println!(
                "  {:<18} {}",
                "Hardware kill:".bright_white(),
                if status.killed { "ACTIVE".bright_red().bold() } else { "inactive".bright_green() }
            );
            println!(
                "  {:<18} {}",
                "Network:".bright_white(),
                if status.network_kill { "STALE".bright_red().bold() } else { "alive".bright_green() }
            );
        }
    }
}

fn print_alarm(event: &AlarmEvent) {
    let state = if event.raised { "RAISED".bright_red().bold() } else { "cleared".bright_green() };
    println!(
        "{} Alarm {} {} by {}",
        "🚨".yellow(),
        event.name.bright_white(),
        state,
        event.originator.bright_cyan()
    );
}

fn print_reply(action: &str, reply: &OutboundMessage, format: &str) {
    if format == "json" {
        match serde_json::to_string(reply) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("{} {}", "❌".red(), e),
        }
        return;
    }

    match reply {
        OutboundMessage::Reply { accepted: true, message } => {
            if format == "compact" {
                println!("{}", "OK".bright_green());
            } else {
                println!(
                    "{} {}: {}",
                    "✅".green(),
                    action.bright_white(),
                    message.as_deref().unwrap_or("accepted").bright_cyan()
                );
            }
        }
        OutboundMessage::Reply { accepted: false, message } => {
            let message = message.as_deref().unwrap_or("rejected");
            println!("{} {} failed: {}", "❌".red(), action.bright_white(), message.bright_red());
            if message.contains("simulated board") {
                println!("{} Start the bridge with: {}", "💡".yellow(), "killboard bridge --simulate".bright_cyan());
            }
        }
        OutboundMessage::Status(status) => print_status(status, format),
        OutboundMessage::Alarm(event) => print_alarm(event),
    }
}

async fn connect(host: &str, port: u16) -> Result<TcpStream, Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", host, port);
    match TcpStream::connect(&addr).await {
        Ok(stream) => Ok(stream),
        Err(e) => {
            eprintln!("{} Failed to connect to kill board bridge at {}", "❌".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Bridge is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "killboard bridge".bright_cyan());
                eprintln!("   or");
                eprintln!("   {}", "cargo run --bin killboard-bridge".bright_cyan());
            } else {
                eprintln!("{} Network error: {}", "🔌".yellow(), e.to_string().bright_red());
            }
            Err(e.into())
        }
    }
}

/// Reads lines until the daemon answers. Status broadcasts that arrive
/// first are skipped unless a status was asked for.
async fn read_reply(reader: &mut BufReader<OwnedReadHalf>) -> Result<OutboundMessage, Box<dyn std::error::Error>> {
    read_reply_matching(reader, false).await
}

async fn read_reply_matching(
    reader: &mut BufReader<OwnedReadHalf>,
    accept_status: bool,
) -> Result<OutboundMessage, Box<dyn std::error::Error>> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = tokio::time::timeout(REPLY_TIMEOUT, reader.read_line(&mut line))
            .await
            .map_err(|_| "Bridge did not reply within 5 seconds")??;
        if n == 0 {
            return Err("Bridge closed the connection".into());
        }
        match serde_json::from_str::<OutboundMessage>(line.trim())? {
            reply @ OutboundMessage::Reply { .. } => return Ok(reply),
            status @ OutboundMessage::Status(_) if accept_status => return Ok(status),
            _ => continue,
        }
    }
}

async fn send_message(host: &str, port: u16, message: &InboundMessage) -> Result<OutboundMessage, Box<dyn std::error::Error>> {
    let stream = connect(host, port).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let line = serde_json::to_string(message)?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    read_reply_matching(&mut reader, matches!(message, InboundMessage::StatusRequest)).await
}
