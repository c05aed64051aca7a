use crate::alarm::{AlarmBridge, AlarmBus, AlarmEvent};
use crate::config::BridgeConfig;
use crate::control::ControlModeReporter;
use crate::link::{BoardLink, DrainReport, LinkStats};
use crate::opcode::{ControlMode, KillSource, Opcode};
use crate::protocol::{Ack, ProtocolError, StatusChange};
use crate::status::{KillStatusAggregator, KillStatusMessage, KillStatusSnapshot};
use crate::transport::SerialTransport;
use crate::watchdog::HeartbeatWatchdog;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Everything that happened in one poll cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub cycle: u64,
    /// Snapshot published at the start of the cycle.
    pub status: KillStatusMessage,
    pub control: Result<Ack, ProtocolError>,
    pub drain: Result<DrainReport, ProtocolError>,
    pub network_kill: bool,
    /// `None` when pinging was skipped because of a network kill.
    pub ping: Option<Result<Ack, ProtocolError>>,
    pub link_failed: bool,
}

/// Safety bridge between the vehicle's message bus and the kill board.
///
/// One instance is shared between the poll loop and the message handlers.
/// Serial conversations are serialised inside [`BoardLink`]; the heartbeat and
/// control mode are single atomic words written from the message side.
pub struct KillBoardBridge<T, A> {
    link: BoardLink<T>,
    status: Mutex<KillStatusAggregator>,
    watchdog: HeartbeatWatchdog,
    control: ControlModeReporter,
    alarms: AlarmBridge<A>,
    ack_timeout: Duration,
    verify_ping_ack: bool,
    disconnect_threshold: u32,
    consecutive_link_failures: AtomicU32,
    cycles: AtomicU64,
}

impl<T: SerialTransport, A: AlarmBus> KillBoardBridge<T, A> {
    pub fn new(transport: T, bus: A, config: &BridgeConfig, started_at_ms: u64) -> Self {
        Self {
            link: BoardLink::new(transport),
            status: Mutex::new(KillStatusAggregator::new()),
            watchdog: HeartbeatWatchdog::new(
                config.heartbeat_timeout_ms,
                config.heartbeat_grace_ms,
                started_at_ms,
            ),
            control: ControlModeReporter::new(config.verify_control_ack, config.ack_timeout()),
            alarms: AlarmBridge::new(bus, &config.node_name, &config.alarm_names()),
            ack_timeout: config.ack_timeout(),
            verify_ping_ack: config.verify_ping_ack,
            disconnect_threshold: config.disconnect_threshold,
            consecutive_link_failures: AtomicU32::new(0),
            cycles: AtomicU64::new(0),
        }
    }

    fn status(&self) -> MutexGuard<'_, KillStatusAggregator> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, change: StatusChange) {
        if self.status().apply(change) {
            info!(
                "Kill source {} is now {}",
                change.source.label(),
                if change.killed { "KILLED" } else { "clear" }
            );
        }
    }

    /// Runs one poll cycle: publish and mirror the kill decision, refresh the
    /// light, drain pushed status bytes, then ping unless the network is dead.
    pub fn poll_cycle(&self, now_ms: u64) -> CycleReport {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let network_kill = self.network_kill(now_ms);

        let status = self.status_message(now_ms);
        self.alarms.mirror_kill(status.killed);

        let control = self
            .control
            .report_current(&self.link, &mut |change| self.apply(change));

        let drain = self.link.drain(&mut |change| self.apply(change));
        if let Err(e) = &drain {
            error!("Failed to drain kill board buffer: {}", e);
        }

        let ping = if network_kill {
            warn!("Network Kill! No heartbeat within {} ms", self.watchdog.threshold_ms());
            None
        } else {
            Some(self.ping())
        };

        let link_failed = matches!(&control, Err(e) if e.is_link_failure())
            || matches!(&drain, Err(e) if e.is_link_failure())
            || matches!(&ping, Some(Err(e)) if e.is_link_failure());
        self.update_link_health(link_failed);

        debug!("Poll cycle {} complete", cycle);
        CycleReport {
            cycle,
            status,
            control,
            drain,
            network_kill,
            ping,
            link_failed,
        }
    }

    fn update_link_health(&self, failed: bool) {
        if failed {
            let failures = self.consecutive_link_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if failures >= self.disconnect_threshold {
                self.alarms.mirror_disconnect(true);
            }
        } else {
            self.consecutive_link_failures.store(0, Ordering::Relaxed);
            self.alarms.mirror_disconnect(false);
        }
    }

    pub fn ping(&self) -> Result<Ack, ProtocolError> {
        let expected = self.verify_ping_ack.then_some(Opcode::PingAck);
        let result = self
            .link
            .request(Opcode::Ping, expected, self.ack_timeout, &mut |change| self.apply(change));
        if let Err(e) = &result {
            error!("Incorrect ping response: {}", e);
        }
        result
    }

    /// Handles an event from the alarm bus. Returns the opcode sent to the
    /// board, if the event concerned us.
    pub fn handle_alarm_event(&self, event: &AlarmEvent) -> Result<Option<Opcode>, ProtocolError> {
        let Some(op) = self.alarms.inbound_command(event) else {
            return Ok(None);
        };

        if let Err(e) = self.link.send(op) {
            error!("Failed to forward {} to kill board: {}", op, e);
            return Err(e);
        }
        Ok(Some(op))
    }

    /// Queries all seven sources with the legacy status opcodes and applies
    /// the replies. Stops at the first failed query. Status bytes pushed
    /// during the queries are applied as they arrive.
    pub fn refresh_status(&self) -> Result<KillStatusSnapshot, ProtocolError> {
        for source in KillSource::ALL {
            let killed = self.link.query_status(source, &mut |change| self.apply(change))?;
            self.apply(StatusChange { source, killed });
        }
        Ok(self.snapshot())
    }

    pub fn record_heartbeat(&self, stamp_ms: u64) {
        self.watchdog.record(stamp_ms);
    }

    /// Caches the mode for the named controller (`autonomous`, `rc`, ...).
    pub fn set_controller(&self, name: &str) {
        let mode = ControlMode::from_controller(name);
        if mode != self.control.current_mode() {
            info!("Controller changed to '{}', light mode {}", name, mode.label());
        }
        self.control.set_mode(mode);
    }

    pub fn snapshot(&self) -> KillStatusSnapshot {
        self.status().snapshot()
    }

    pub fn evaluate(&self) -> bool {
        self.status().evaluate()
    }

    pub fn status_message(&self, now_ms: u64) -> KillStatusMessage {
        let snapshot = self.snapshot();
        KillStatusMessage::new(&snapshot, self.network_kill(now_ms), now_ms)
    }

    pub fn network_kill(&self, now_ms: u64) -> bool {
        self.watchdog.is_stale(now_ms)
    }

    pub fn watchdog(&self) -> &HeartbeatWatchdog {
        &self.watchdog
    }

    pub fn control(&self) -> &ControlModeReporter {
        &self.control
    }

    pub fn alarms(&self) -> &AlarmBridge<A> {
        &self.alarms
    }

    pub fn link_stats(&self) -> LinkStats {
        self.link.stats()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
}
