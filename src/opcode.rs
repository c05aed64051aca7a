use serde::{Deserialize, Serialize};
use static_assertions::{const_assert, const_assert_eq};

pub const KILL_SOURCE_COUNT: usize = 7;

// Reply bytes for the legacy per-source status query
pub const STATUS_REPLY_KILLED: u8 = 0x01;
pub const STATUS_REPLY_CLEAR: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KillSource {
    Overall,
    PortForward,
    PortAft,
    StarboardForward,
    StarboardAft,
    Remote,
    Computer,
}

impl KillSource {
    pub const ALL: [KillSource; KILL_SOURCE_COUNT] = [
        KillSource::Overall,
        KillSource::PortForward,
        KillSource::PortAft,
        KillSource::StarboardForward,
        KillSource::StarboardAft,
        KillSource::Remote,
        KillSource::Computer,
    ];

    /// Sources that take part in the aggregate kill decision. `Overall` mirrors
    /// the board's own OR and `Computer` is owned by the alarm bridge.
    pub const AGGREGATED: [KillSource; 5] = [
        KillSource::PortForward,
        KillSource::PortAft,
        KillSource::StarboardForward,
        KillSource::StarboardAft,
        KillSource::Remote,
    ];

    pub const fn index(self) -> usize {
        match self {
            KillSource::Overall => 0,
            KillSource::PortForward => 1,
            KillSource::PortAft => 2,
            KillSource::StarboardForward => 3,
            KillSource::StarboardAft => 4,
            KillSource::Remote => 5,
            KillSource::Computer => 6,
        }
    }

    pub const fn is_aggregated(self) -> bool {
        !matches!(self, KillSource::Overall | KillSource::Computer)
    }

    pub fn label(self) -> &'static str {
        match self {
            KillSource::Overall => "overall",
            KillSource::PortForward => "PF",
            KillSource::PortAft => "PA",
            KillSource::StarboardForward => "SF",
            KillSource::StarboardAft => "SA",
            KillSource::Remote => "remote",
            KillSource::Computer => "computer",
        }
    }

    /// Parses the short labels used on the command line (`pf`, `remote`, ...).
    pub fn from_label(label: &str) -> Option<Self> {
        let source = match label.to_ascii_lowercase().as_str() {
            "overall" => KillSource::Overall,
            "pf" | "port-forward" => KillSource::PortForward,
            "pa" | "port-aft" => KillSource::PortAft,
            "sf" | "starboard-forward" => KillSource::StarboardForward,
            "sa" | "starboard-aft" => KillSource::StarboardAft,
            "remote" => KillSource::Remote,
            "computer" => KillSource::Computer,
            _ => return None,
        };
        Some(source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlMode {
    Idle,
    ManualAssisted,
    Autonomous,
}

impl ControlMode {
    pub const ALL: [ControlMode; 3] = [
        ControlMode::Idle,
        ControlMode::ManualAssisted,
        ControlMode::Autonomous,
    ];

    /// Maps the name of whichever controller currently owns the vehicle to the
    /// light mode. Unknown or empty names fall back to `Idle`.
    pub fn from_controller(name: &str) -> Self {
        match name {
            "autonomous" => ControlMode::Autonomous,
            "keyboard" | "rc" | "noop" => ControlMode::ManualAssisted,
            _ => ControlMode::Idle,
        }
    }

    pub const fn to_u8(self) -> u8 {
        match self {
            ControlMode::Idle => 0,
            ControlMode::ManualAssisted => 1,
            ControlMode::Autonomous => 2,
        }
    }

    pub const fn from_u8(value: u8) -> Self {
        match value {
            2 => ControlMode::Autonomous,
            1 => ControlMode::ManualAssisted,
            _ => ControlMode::Idle,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ControlMode::Idle => "idle",
            ControlMode::ManualAssisted => "manual",
            ControlMode::Autonomous => "autonomous",
        }
    }
}

/// One entry of the board's single-byte vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    SetKillTrue(KillSource),
    SetKillFalse(KillSource),
    StatusQuery(KillSource),
    Ping,
    PingAck,
    ControlCommand(ControlMode),
    ControlAck(ControlMode),
    ComputerKillAssert,
    ComputerKillClear,
}

impl core::fmt::Display for Opcode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Opcode::SetKillTrue(source) => write!(f, "kill {} set", source.label()),
            Opcode::SetKillFalse(source) => write!(f, "kill {} cleared", source.label()),
            Opcode::StatusQuery(source) => write!(f, "query {}", source.label()),
            Opcode::Ping => write!(f, "ping"),
            Opcode::PingAck => write!(f, "ping ack"),
            Opcode::ControlCommand(mode) => write!(f, "light {}", mode.label()),
            Opcode::ControlAck(mode) => write!(f, "light {} ack", mode.label()),
            Opcode::ComputerKillAssert => write!(f, "computer kill assert"),
            Opcode::ComputerKillClear => write!(f, "computer kill clear"),
        }
    }
}

/// Total mapping from opcode to wire byte.
pub const fn encode(op: Opcode) -> u8 {
    match op {
        Opcode::SetKillTrue(source) => 0x10 + 2 * source.index() as u8,
        Opcode::SetKillFalse(source) => 0x11 + 2 * source.index() as u8,
        Opcode::StatusQuery(source) => 0x21 + source.index() as u8,
        Opcode::Ping => 0x20,
        Opcode::PingAck => 0x30,
        Opcode::ControlCommand(mode) => 0x40 + mode.to_u8(),
        Opcode::ControlAck(mode) => 0x50 + mode.to_u8(),
        Opcode::ComputerKillAssert => 0x45,
        Opcode::ComputerKillClear => 0x46,
    }
}

pub const OPCODE_COUNT: usize = 31;

pub const OPCODE_TABLE: [(u8, Opcode); OPCODE_COUNT] = [
    (0x10, Opcode::SetKillTrue(KillSource::Overall)),
    (0x11, Opcode::SetKillFalse(KillSource::Overall)),
    (0x12, Opcode::SetKillTrue(KillSource::PortForward)),
    (0x13, Opcode::SetKillFalse(KillSource::PortForward)),
    (0x14, Opcode::SetKillTrue(KillSource::PortAft)),
    (0x15, Opcode::SetKillFalse(KillSource::PortAft)),
    (0x16, Opcode::SetKillTrue(KillSource::StarboardForward)),
    (0x17, Opcode::SetKillFalse(KillSource::StarboardForward)),
    (0x18, Opcode::SetKillTrue(KillSource::StarboardAft)),
    (0x19, Opcode::SetKillFalse(KillSource::StarboardAft)),
    (0x1A, Opcode::SetKillTrue(KillSource::Remote)),
    (0x1B, Opcode::SetKillFalse(KillSource::Remote)),
    (0x1C, Opcode::SetKillTrue(KillSource::Computer)),
    (0x1D, Opcode::SetKillFalse(KillSource::Computer)),
    (0x20, Opcode::Ping),
    (0x21, Opcode::StatusQuery(KillSource::Overall)),
    (0x22, Opcode::StatusQuery(KillSource::PortForward)),
    (0x23, Opcode::StatusQuery(KillSource::PortAft)),
    (0x24, Opcode::StatusQuery(KillSource::StarboardForward)),
    (0x25, Opcode::StatusQuery(KillSource::StarboardAft)),
    (0x26, Opcode::StatusQuery(KillSource::Remote)),
    (0x27, Opcode::StatusQuery(KillSource::Computer)),
    (0x30, Opcode::PingAck),
    (0x40, Opcode::ControlCommand(ControlMode::Idle)),
    (0x41, Opcode::ControlCommand(ControlMode::ManualAssisted)),
    (0x42, Opcode::ControlCommand(ControlMode::Autonomous)),
    (0x45, Opcode::ComputerKillAssert),
    (0x46, Opcode::ComputerKillClear),
    (0x50, Opcode::ControlAck(ControlMode::Idle)),
    (0x51, Opcode::ControlAck(ControlMode::ManualAssisted)),
    (0x52, Opcode::ControlAck(ControlMode::Autonomous)),
];

const fn table_bytes_unique() -> bool {
    let mut i = 0;
    while i < OPCODE_TABLE.len() {
        let mut j = i + 1;
        while j < OPCODE_TABLE.len() {
            if OPCODE_TABLE[i].0 == OPCODE_TABLE[j].0 {
                return false;
            }
            j += 1;
        }
        i += 1;
    }
    true
}

const fn table_matches_encoder() -> bool {
    let mut i = 0;
    while i < OPCODE_TABLE.len() {
        if encode(OPCODE_TABLE[i].1) != OPCODE_TABLE[i].0 {
            return false;
        }
        i += 1;
    }
    true
}

// 7 sources x (true, false, query) + ping/ack + 3 x (light, ack) + computer assert/clear
const_assert_eq!(OPCODE_COUNT, KILL_SOURCE_COUNT * 3 + 2 + 3 * 2 + 2);
const_assert!(table_bytes_unique());
const_assert!(table_matches_encoder());
