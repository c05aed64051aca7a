use crate::opcode::{KillSource, KILL_SOURCE_COUNT};
use crate::protocol::StatusChange;
use serde::{Deserialize, Serialize};

/// Per-source kill flags as last reported by the board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillStatusSnapshot {
    sources: [bool; KILL_SOURCE_COUNT],
}

impl KillStatusSnapshot {
    pub fn get(&self, source: KillSource) -> bool {
        self.sources[source.index()]
    }

    pub fn set(&mut self, source: KillSource, killed: bool) {
        self.sources[source.index()] = killed;
    }

    /// The aggregate kill decision: OR over the switches and the remote.
    /// `Overall` and `Computer` are informational only.
    pub fn is_killed(&self) -> bool {
        KillSource::AGGREGATED.iter().any(|source| self.get(*source))
    }

    pub fn asserted_sources(&self) -> impl Iterator<Item = KillSource> + '_ {
        KillSource::ALL.into_iter().filter(move |source| self.get(*source))
    }
}

/// Owns the authoritative kill state. Starts all-clear.
#[derive(Debug, Default)]
pub struct KillStatusAggregator {
    snapshot: KillStatusSnapshot,
    updates_applied: u64,
}

impl KillStatusAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a status change. Returns true when the flag actually changed.
    pub fn apply(&mut self, change: StatusChange) -> bool {
        self.updates_applied = self.updates_applied.wrapping_add(1);
        let previous = self.snapshot.get(change.source);
        self.snapshot.set(change.source, change.killed);
        previous != change.killed
    }

    pub fn snapshot(&self) -> KillStatusSnapshot {
        self.snapshot
    }

    pub fn evaluate(&self) -> bool {
        self.snapshot.is_killed()
    }

    pub fn updates_applied(&self) -> u64 {
        self.updates_applied
    }
}

/// Status record published once per poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillStatusMessage {
    pub overall: bool,
    pub pf: bool,
    pub pa: bool,
    pub sf: bool,
    pub sa: bool,
    pub remote: bool,
    pub computer: bool,
    pub killed: bool,
    pub network_kill: bool,
    pub stamp_ms: u64,
}

impl KillStatusMessage {
    pub fn new(snapshot: &KillStatusSnapshot, network_kill: bool, stamp_ms: u64) -> Self {
        Self {
            overall: snapshot.get(KillSource::Overall),
            pf: snapshot.get(KillSource::PortForward),
            pa: snapshot.get(KillSource::PortAft),
            sf: snapshot.get(KillSource::StarboardForward),
            sa: snapshot.get(KillSource::StarboardAft),
            remote: snapshot.get(KillSource::Remote),
            computer: snapshot.get(KillSource::Computer),
            killed: snapshot.is_killed(),
            network_kill,
            stamp_ms,
        }
    }
}
