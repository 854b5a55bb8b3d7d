//! System events a thread can wait for

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of event numbers reserved for built-in kernel events.
///
/// Raw event numbers at or above this value are custom events.
pub const MAX_SYS_EVENT_COUNT: u32 = 8;

/// Raw number of an event without a named variant
///
/// Only [`SysEvent::from_raw`] builds one, so a number that names a
/// built-in event never hides inside [`SysEvent::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawEvent(u32);

impl RawEvent {
    /// Returns the raw event number
    pub fn get(&self) -> u32 {
        self.0
    }
}

/// Closed set of system events
///
/// Raw event numbers that do not name a built-in event land in
/// [`SysEvent::Other`] so that every consumer matches exhaustively.
/// Serialized as the raw event number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum SysEvent {
    /// An IPC message arrived in the mailbox
    IpcMessage,
    /// A software timer expired
    Timer,
    /// A semaphore or mutex became available
    ThreadSync,
    /// A shared resource became available
    ThreadResourceSync,
    /// Any other raw event number
    Other(RawEvent),
}

impl SysEvent {
    /// Decodes a raw event number
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => SysEvent::IpcMessage,
            2 => SysEvent::Timer,
            3 => SysEvent::ThreadSync,
            4 => SysEvent::ThreadResourceSync,
            other => SysEvent::Other(RawEvent(other)),
        }
    }

    /// Returns the raw event number
    pub fn as_raw(&self) -> u32 {
        match self {
            SysEvent::IpcMessage => 1,
            SysEvent::Timer => 2,
            SysEvent::ThreadSync => 3,
            SysEvent::ThreadResourceSync => 4,
            SysEvent::Other(raw) => raw.get(),
        }
    }

    /// Checks whether the raw number lies in the built-in event range
    pub fn is_built_in(&self) -> bool {
        (1..MAX_SYS_EVENT_COUNT).contains(&self.as_raw())
    }

    /// Bit of this event inside a waited-event mask (0 if not representable)
    pub fn mask(&self) -> u64 {
        1u64.checked_shl(self.as_raw()).unwrap_or(0)
    }
}

impl From<u32> for SysEvent {
    fn from(raw: u32) -> Self {
        SysEvent::from_raw(raw)
    }
}

impl From<SysEvent> for u32 {
    fn from(event: SysEvent) -> Self {
        event.as_raw()
    }
}

impl fmt::Display for SysEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SysEvent::IpcMessage => write!(f, "IPCMessage"),
            SysEvent::Timer => write!(f, "Timer"),
            SysEvent::ThreadSync => write!(f, "ThreadSync"),
            SysEvent::ThreadResourceSync => write!(f, "ThreadResourceSync"),
            SysEvent::Other(raw) => write!(f, "Event({})", raw.get()),
        }
    }
}
