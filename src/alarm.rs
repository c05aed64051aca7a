use crate::opcode::Opcode;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub const HW_KILL_DESCRIPTION: &str = "Hardware kill from a kill switch.";
pub const DISCONNECT_DESCRIPTION: &str = "Serial link to the kill board is not responding.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub name: String,
    pub raised: bool,
    pub originator: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl AlarmEvent {
    pub fn raise(name: &str, originator: &str) -> Self {
        Self {
            name: name.into(),
            raised: true,
            originator: originator.into(),
            description: None,
        }
    }

    pub fn clear(name: &str, originator: &str) -> Self {
        Self {
            name: name.into(),
            raised: false,
            originator: originator.into(),
            description: None,
        }
    }
}

/// Publish side of the external alarm service.
pub trait AlarmBus: Send + Sync {
    fn publish(&self, event: AlarmEvent);
}

/// Alarm bus backed by a tokio broadcast channel. Sending never blocks, so it
/// is safe to use from the blocking poll thread.
#[derive(Debug, Clone)]
pub struct ChannelAlarmBus {
    sender: broadcast::Sender<AlarmEvent>,
}

impl ChannelAlarmBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlarmEvent> {
        self.sender.subscribe()
    }
}

impl AlarmBus for ChannelAlarmBus {
    fn publish(&self, event: AlarmEvent) {
        // No subscribers is not an error for a fire-and-forget bus.
        if self.sender.send(event).is_err() {
            debug!("Alarm published with no listeners");
        }
    }
}

/// Remembers the last state pushed for one alarm so repeated decisions do not
/// produce duplicate raises or clears.
#[derive(Debug)]
pub struct AlarmLatch {
    name: String,
    description: Option<String>,
    state: Mutex<Option<bool>>,
}

impl AlarmLatch {
    pub fn new(name: &str, description: Option<&str>) -> Self {
        Self {
            name: name.into(),
            description: description.map(Into::into),
            state: Mutex::new(None),
        }
    }

    /// Publishes only on a change. The first call always publishes so a stale
    /// alarm left over from a previous run is corrected.
    pub fn set<A: AlarmBus + ?Sized>(&self, raised: bool, bus: &A, originator: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == Some(raised) {
            return false;
        }

        let mut event = if raised {
            AlarmEvent::raise(&self.name, originator)
        } else {
            AlarmEvent::clear(&self.name, originator)
        };
        if raised {
            event.description = self.description.clone();
        }
        bus.publish(event);
        *state = Some(raised);
        true
    }

    pub fn state(&self) -> Option<bool> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone)]
pub struct AlarmNames {
    pub hw_kill: String,
    pub disconnect: String,
    pub computer_kill: String,
}

impl Default for AlarmNames {
    fn default() -> Self {
        Self {
            hw_kill: "hw_kill".into(),
            disconnect: "kill_system_disconnect".into(),
            computer_kill: "kill".into(),
        }
    }
}

/// Two-way translation between the alarm bus and the board.
///
/// Outbound, the aggregate kill decision and link health are mirrored as the
/// hardware-kill and disconnect alarms. Inbound, the computer-kill alarm is
/// turned into the board's assert/clear opcodes.
pub struct AlarmBridge<A> {
    bus: A,
    identity: String,
    computer_kill: String,
    hw_kill: AlarmLatch,
    disconnect: AlarmLatch,
}

impl<A: AlarmBus> AlarmBridge<A> {
    pub fn new(bus: A, identity: &str, names: &AlarmNames) -> Self {
        Self {
            bus,
            identity: identity.into(),
            computer_kill: names.computer_kill.clone(),
            hw_kill: AlarmLatch::new(&names.hw_kill, Some(HW_KILL_DESCRIPTION)),
            disconnect: AlarmLatch::new(&names.disconnect, Some(DISCONNECT_DESCRIPTION)),
        }
    }

    pub fn mirror_kill(&self, killed: bool) -> bool {
        let published = self.hw_kill.set(killed, &self.bus, &self.identity);
        if published {
            if killed {
                warn!("Hardware kill asserted, raising {}", self.hw_kill.name());
            } else {
                info!("Hardware kill released, clearing {}", self.hw_kill.name());
            }
        }
        published
    }

    pub fn mirror_disconnect(&self, disconnected: bool) -> bool {
        let published = self.disconnect.set(disconnected, &self.bus, &self.identity);
        if published && disconnected {
            warn!("Kill board not responding, raising {}", self.disconnect.name());
        }
        published
    }

    /// Opcode to send for an incoming alarm event, if any. Raises that we
    /// published ourselves are ignored; clears are always honoured.
    pub fn inbound_command(&self, event: &AlarmEvent) -> Option<Opcode> {
        if event.name != self.computer_kill {
            return None;
        }

        if event.raised {
            if event.originator == self.identity {
                debug!("Ignoring computer kill raise from ourselves");
                return None;
            }
            info!("Computer kill raise received from {}", event.originator);
            Some(Opcode::ComputerKillAssert)
        } else {
            info!("Computer kill clear received from {}", event.originator);
            Some(Opcode::ComputerKillClear)
        }
    }

    pub fn hw_kill_state(&self) -> Option<bool> {
        self.hw_kill.state()
    }

    pub fn disconnect_state(&self) -> Option<bool> {
        self.disconnect.state()
    }

    pub fn bus(&self) -> &A {
        &self.bus
    }
}
