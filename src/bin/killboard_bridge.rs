use clap::{App, Arg};
use killboard::alarm::{AlarmBus, ChannelAlarmBus};
use killboard::messages::{parse_inbound, InboundMessage, OutboundMessage};
use killboard::transport::{BoardHandle, SerialPortTransport, SerialTransport, SimulatedBoard};
use killboard::{now_ms, BridgeConfig, KillBoardBridge};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn, Level};

const OUTBOUND_BROADCAST_BUFFER_SIZE: usize = 256;
const ALARM_BUS_CAPACITY: usize = 64;

type Bridge = KillBoardBridge<Box<dyn SerialTransport>, ChannelAlarmBus>;

struct Shared {
    bridge: Bridge,
    simulated: Option<BoardHandle>,
    outbound: broadcast::Sender<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("killboard-bridge")
        .version("0.1.0")
        .about("Serial bridge between the vehicle message bus and the kill board")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("serial")
                .short("s")
                .long("serial")
                .value_name("PORT")
                .help("Serial device of the kill board")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("baud")
                .short("b")
                .long("baud")
                .value_name("BAUD")
                .help("Serial baud rate")
                .takes_value(true)
                .validator(|v| match v.parse::<u32>() {
                    Ok(b) if b > 0 => Ok(()),
                    _ => Err("Baud rate must be a positive number".into()),
                }),
        )
        .arg(
            Arg::with_name("listen")
                .short("l")
                .long("listen")
                .value_name("ADDR")
                .help("Address for client connections")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("simulate")
                .long("simulate")
                .help("Run against an in-memory kill board instead of a serial device"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Log every byte on the serial line"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut config = match matches.value_of("config") {
        Some(path) => BridgeConfig::from_json_file(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(port) = matches.value_of("serial") {
        config.serial_port = port.to_string();
    }
    if let Some(baud) = matches.value_of("baud") {
        config.baud_rate = baud.parse()?;
    }
    if let Some(listen) = matches.value_of("listen") {
        config.listen_addr = listen.to_string();
    }
    config.validate()?;

    let (transport, simulated): (Box<dyn SerialTransport>, Option<BoardHandle>) =
        if matches.is_present("simulate") {
            info!("Using simulated kill board");
            let (board, handle) = SimulatedBoard::new();
            (Box::new(board), Some(handle))
        } else {
            let port = SerialPortTransport::open(&config.serial_port, config.baud_rate, config.read_timeout())?;
            (Box::new(port), None)
        };

    let alarm_bus = ChannelAlarmBus::new(ALARM_BUS_CAPACITY);
    let alarm_rx = alarm_bus.subscribe();
    let (outbound, _) = broadcast::channel(OUTBOUND_BROADCAST_BUFFER_SIZE);

    let shared = Arc::new(Shared {
        bridge: KillBoardBridge::new(transport, alarm_bus, &config, now_ms()),
        simulated,
        outbound,
    });

    tokio::spawn(forward_alarms(alarm_rx, shared.outbound.clone()));

    if config.query_on_startup {
        let startup = Arc::clone(&shared);
        match tokio::task::spawn_blocking(move || startup.bridge.refresh_status()).await? {
            Ok(snapshot) => info!("Initial kill status: {:?}", snapshot),
            Err(e) => warn!("Initial status query failed: {}", e),
        }
    }

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("Listening for clients on {}", config.listen_addr);
    let server = tokio::spawn(accept_clients(listener, Arc::clone(&shared)));

    let shutdown = Arc::new(AtomicBool::new(false));
    let signal_flag = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown requested");
        signal_flag.store(true, Ordering::SeqCst);
    });

    let mut interval = time::interval(config.poll_period());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let cycle_shared = Arc::clone(&shared);
        let report = match tokio::task::spawn_blocking(move || cycle_shared.bridge.poll_cycle(now_ms())).await {
            Ok(report) => report,
            Err(e) => {
                error!("Poll cycle aborted: {}", e);
                continue;
            }
        };

        match serde_json::to_string(&OutboundMessage::Status(report.status)) {
            Ok(line) => {
                if shared.outbound.send(line).is_err() {
                    debug!("No clients connected for status");
                }
            }
            Err(e) => error!("Failed to serialise status: {}", e),
        }
    }

    server.abort();
    info!("Kill board bridge stopped after {} cycles", shared.bridge.cycles());
    Ok(())
}

async fn forward_alarms(
    mut alarm_rx: broadcast::Receiver<killboard::AlarmEvent>,
    outbound: broadcast::Sender<String>,
) {
    loop {
        match alarm_rx.recv().await {
            Ok(event) => match serde_json::to_string(&OutboundMessage::Alarm(event)) {
                Ok(line) => {
                    if outbound.send(line).is_err() {
                        debug!("No clients connected for alarm");
                    }
                }
                Err(e) => error!("Failed to serialise alarm: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Alarm forwarder lagged, {} events skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn accept_clients(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("Client connected: {}", addr);
                let client_shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_shared).await {
                        warn!("Client {} error: {}", addr, e);
                    }
                    info!("Client {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn send_line(writer: &Mutex<OwnedWriteHalf>, line: &str) -> std::io::Result<()> {
    let mut writer_guard = writer.lock().await;
    writer_guard.write_all(line.as_bytes()).await?;
    writer_guard.write_all(b"\n").await
}

async fn handle_client(stream: TcpStream, shared: Arc<Shared>) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));

    // Stream status and alarms to this client
    let mut outbound_rx = shared.outbound.subscribe();
    let stream_writer = Arc::clone(&writer);
    let stream_task = tokio::spawn(async move {
        loop {
            match outbound_rx.recv().await {
                Ok(line) => {
                    if let Err(e) = send_line(&stream_writer, &line).await {
                        warn!("Failed to stream update: {}", e);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Client lagged, {} updates skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut line = String::new();
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let reply = match parse_inbound(trimmed) {
                    Ok(message) => {
                        debug!("Received message: {:?}", message);
                        handle_message(message, &shared).await
                    }
                    Err(e) => {
                        warn!("Failed to parse message: {}", e);
                        OutboundMessage::rejected(format!("Invalid message: {e}"))
                    }
                };

                let reply_json = serde_json::to_string(&reply)?;
                send_line(&writer, &reply_json).await?;
            }
            Err(e) => {
                error!("Error reading from client: {}", e);
                break;
            }
        }
    }

    stream_task.abort();
    Ok(())
}

async fn handle_message(message: InboundMessage, shared: &Arc<Shared>) -> OutboundMessage {
    match message {
        InboundMessage::Heartbeat { stamp_ms } => {
            shared.bridge.record_heartbeat(stamp_ms.unwrap_or_else(now_ms));
            OutboundMessage::accepted("heartbeat recorded")
        }
        InboundMessage::ControlMode { mode } => {
            shared.bridge.set_controller(&mode);
            let light = shared.bridge.control().current_mode();
            OutboundMessage::accepted(format!("light mode {}", light.label()))
        }
        InboundMessage::Alarm(event) => {
            // Other clients see every alarm that crosses the bus
            shared.bridge.alarms().bus().publish(event.clone());

            let alarm_shared = Arc::clone(shared);
            let result = tokio::task::spawn_blocking(move || alarm_shared.bridge.handle_alarm_event(&event)).await;
            match result {
                Ok(Ok(Some(op))) => OutboundMessage::accepted(format!("sent {op}")),
                Ok(Ok(None)) => OutboundMessage::accepted("alarm ignored"),
                Ok(Err(e)) => OutboundMessage::rejected(format!("kill board error: {e}")),
                Err(e) => OutboundMessage::rejected(format!("alarm handling aborted: {e}")),
            }
        }
        InboundMessage::StatusRequest => OutboundMessage::Status(shared.bridge.status_message(now_ms())),
        InboundMessage::SimulateKill { source, killed } => match &shared.simulated {
            Some(handle) => {
                handle.set_kill(source, killed);
                OutboundMessage::accepted(format!(
                    "{} {}",
                    source.label(),
                    if killed { "killed" } else { "cleared" }
                ))
            }
            None => OutboundMessage::rejected("not running against a simulated board"),
        },
    }
}
