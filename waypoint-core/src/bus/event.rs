//! Event kinds and payloads

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::path::PathBuf;
use std::time::Instant;

/// Set of event kinds, combinable with `|`
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventType(u32);

impl EventType {
    /// No kinds
    pub const NONE: EventType = EventType(0);
    /// Periodic timer tick
    pub const TIMER: EventType = EventType(1 << 0);
    /// Result of a client-side command reported by the transport
    pub const FS_COMMAND: EventType = EventType(1 << 1);
    /// The workflow state file changed
    pub const FILE_CHANGED: EventType = EventType(1 << 2);
    /// The user gave explicit consent for a phase transition
    pub const CONSENT: EventType = EventType(1 << 3);
    /// Every kind
    pub const ALL: EventType = EventType(0b1111);

    const NAMES: [(EventType, &'static str); 4] = [
        (EventType::TIMER, "TIMER"),
        (EventType::FS_COMMAND, "FS_COMMAND"),
        (EventType::FILE_CHANGED, "FILE_CHANGED"),
        (EventType::CONSENT, "CONSENT"),
    ];

    /// Raw bits
    pub fn bits(self) -> u32 {
        self.0
    }

    /// True if no kind is set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if any kind is shared with `other`
    pub fn intersects(self, other: EventType) -> bool {
        self.0 & other.0 != 0
    }

    /// True if every kind of `other` is set
    pub fn contains(self, other: EventType) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EventType {
    type Output = EventType;

    fn bitor(self, rhs: EventType) -> EventType {
        EventType(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventType {
    fn bitor_assign(&mut self, rhs: EventType) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventType {
    type Output = EventType;

    fn bitand(self, rhs: EventType) -> EventType {
        EventType(self.0 & rhs.0)
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventType({})", self)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(kind, _)| self.contains(*kind))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Payload carried by an event
#[derive(Debug, Clone)]
pub enum EventData {
    /// Timer tick at a monotonic instant
    Timer { now: Instant },
    /// A file changed on disk
    FileChanged { path: PathBuf },
    /// A client-side command reported its result
    Command {
        name: String,
        payload: serde_json::Value,
    },
    /// Consent signal, optionally naming the phase being approved
    Consent { phase: Option<String> },
    /// No payload
    Empty,
}

/// A dispatched event
#[derive(Debug, Clone)]
pub struct Event {
    /// Kind of the event
    pub kind: EventType,
    /// Payload
    pub data: EventData,
}

impl Event {
    /// Create an event
    pub fn new(kind: EventType, data: EventData) -> Self {
        Self { kind, data }
    }
}
