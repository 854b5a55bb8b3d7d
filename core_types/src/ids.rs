//! Identifiers for executions, threads and sync primitives
//!
//! Client code is pre-compiled against the identity encoding, so the bit
//! layout of [`ThreadId`] is part of the ABI and must not change.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of executions the simulated system can host.
pub const MAX_EXECUTION_COUNT: u8 = 16;

/// Index of an isolated execution unit (a simulated container)
///
/// Indices are small integers handed out by the embedding harness. The
/// value is not range-checked here; operations that care about the range
/// reject out-of-range indices with their own status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExecutionIndex(pub u8);

impl ExecutionIndex {
    /// Returns the raw index
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Checks whether the index addresses an execution of the simulated system
    pub fn is_valid(&self) -> bool {
        self.0 < MAX_EXECUTION_COUNT
    }

    /// Returns the conventional name of the execution (`Exec<n>`)
    pub fn exec_name(&self) -> String {
        format!("Exec{}", self.0)
    }

    /// Parses a conventional `Exec<n>` name
    pub fn parse_exec_name(name: &str) -> Option<Self> {
        name.strip_prefix("Exec")?.parse::<u8>().ok().map(Self)
    }
}

impl fmt::Display for ExecutionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Execution({})", self.0)
    }
}

/// Identifier of a thread inside an execution
///
/// Encoded as `(execution_index << 8) | (slot_index + 1)`. The main thread
/// always has the raw value 0 and never occupies a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(u32);

impl ThreadId {
    /// The main thread of every execution
    pub const MAIN: ThreadId = ThreadId(0);

    /// Synthesizes the id of the thread occupying `slot_index`
    pub fn from_slot(execution: ExecutionIndex, slot_index: usize) -> Self {
        Self(((execution.0 as u32) << 8) | ((slot_index as u32 + 1) & 0xFF))
    }

    /// Wraps a raw id received from client code
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw id
    pub const fn as_raw(&self) -> u32 {
        self.0
    }

    /// Checks whether this is the main thread id
    pub const fn is_main(&self) -> bool {
        self.0 == 0
    }

    /// Returns the low byte of the id (0 for main-thread style ids)
    pub const fn thread_index(&self) -> u32 {
        self.0 & 0xFF
    }

    /// Returns the pool slot encoded in the id, if any
    pub fn slot_index(&self) -> Option<usize> {
        (self.thread_index() as usize).checked_sub(1)
    }

    /// Returns the execution index encoded in the id
    pub fn execution_index(&self) -> ExecutionIndex {
        ExecutionIndex(((self.0 >> 8) & 0xFF) as u8)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread({:#06x})", self.0)
    }
}

/// Identifier of a semaphore or mutex in the sync-primitive pool
///
/// The id is the slot index inside the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncId(pub u32);

impl SyncId {
    /// Returns the pool slot addressed by this id
    pub fn slot_index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sync({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_id_encoding() {
        let id = ThreadId::from_slot(ExecutionIndex(3), 0);
        assert_eq!(id.as_raw(), 0x0301);
        assert_eq!(id.slot_index(), Some(0));
        assert_eq!(id.execution_index(), ExecutionIndex(3));

        let id = ThreadId::from_slot(ExecutionIndex(0), 31);
        assert_eq!(id.as_raw(), 32);
        assert_eq!(id.thread_index(), 32);
    }

    #[test]
    fn test_main_thread_id() {
        assert!(ThreadId::MAIN.is_main());
        assert_eq!(ThreadId::MAIN.slot_index(), None);
        assert!(!ThreadId::from_raw(0x0100).is_main());
        assert_eq!(ThreadId::from_raw(0x0100).slot_index(), None);
    }

    #[test]
    fn test_execution_index_range() {
        assert!(ExecutionIndex(0).is_valid());
        assert!(ExecutionIndex(15).is_valid());
        assert!(!ExecutionIndex(16).is_valid());
    }

    #[test]
    fn test_exec_name_parsing() {
        assert_eq!(ExecutionIndex(7).exec_name(), "Exec7");
        assert_eq!(ExecutionIndex::parse_exec_name("Exec12"), Some(ExecutionIndex(12)));
        assert_eq!(ExecutionIndex::parse_exec_name("Executor"), None);
        assert_eq!(ExecutionIndex::parse_exec_name("sum"), None);
    }

    #[test]
    fn test_ids_serialize_as_raw_values() {
        let json = serde_json::to_string(&ThreadId::from_raw(0x0102)).unwrap();
        assert_eq!(json, "258");
        let index: ExecutionIndex = serde_json::from_str("4").unwrap();
        assert_eq!(index, ExecutionIndex(4));
    }

    #[test]
    fn test_thread_id_display() {
        let display = format!("{}", ThreadId::from_raw(0x0102));
        assert_eq!(display, "Thread(0x0102)");
    }
}
