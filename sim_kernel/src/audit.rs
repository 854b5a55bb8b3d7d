//! Syscall Audit Log
//!
//! Records state-changing syscalls for test verification and debugging.
//! This is NOT for production observability - it's for proving kernel
//! behavior in tests.
//!
//! The log keeps the most recent records only; the oldest is evicted once
//! it is full.

use core_types::{ExecutionIndex, SyncId, SysEvent, ThreadId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Records kept by a log created with [`SyscallAuditLog::new`]
pub const DEFAULT_AUDIT_CAPACITY: usize = 1024;

/// State change recorded by the kernel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyscallEvent {
    ThreadPoolInitialised { capacity: usize },
    ThreadCreated { thread: ThreadId, priority: u32 },
    ThreadSuspended { thread: ThreadId },
    ThreadResumed { thread: ThreadId },
    ThreadFreed { thread: ThreadId },
    MailboxInitialised { capacity: usize },
    MessageSent {
        destination: ExecutionIndex,
        sequence_no: u32,
        len: usize,
    },
    MessageReceived {
        sender: ExecutionIndex,
        sequence_no: u32,
        len: usize,
        complete: bool,
    },
    EventNotified { event: SysEvent, woken: usize },
    SyncPoolInitialised { capacity: usize },
    SemaphoreCreated { id: SyncId, max_count: u32 },
}

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyscallAuditEvent {
    /// Milliseconds since the simulation started
    pub timestamp_ms: u64,
    /// Calling thread (`None` for the mailbox listener)
    pub caller: Option<ThreadId>,
    /// What changed
    pub event: SyscallEvent,
}

/// Syscall audit log for testing
#[derive(Debug, Clone)]
pub struct SyscallAuditLog {
    events: VecDeque<SyscallAuditEvent>,
    capacity: usize,
}

impl Default for SyscallAuditLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }
}

impl SyscallAuditLog {
    /// Creates a new empty audit log
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty audit log keeping at most `capacity` records
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(DEFAULT_AUDIT_CAPACITY)),
            capacity,
        }
    }

    /// Records a state change, evicting the oldest record when full
    pub fn record(&mut self, timestamp_ms: u64, caller: Option<ThreadId>, event: SyscallEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(SyscallAuditEvent {
            timestamp_ms,
            caller,
            event,
        });
    }

    /// Returns the kept events, oldest first
    pub fn events(&self) -> impl Iterator<Item = &SyscallAuditEvent> + '_ {
        self.events.iter()
    }

    /// Number of kept events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Maximum number of kept events
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clears all recorded events
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Returns events matching a predicate
    pub fn find_events<F>(&self, predicate: F) -> Vec<&SyscallAuditEvent>
    where
        F: Fn(&SyscallAuditEvent) -> bool,
    {
        self.events.iter().filter(|e| predicate(e)).collect()
    }

    /// Checks if any event matches a predicate
    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&SyscallAuditEvent) -> bool,
    {
        self.events.iter().any(predicate)
    }

    /// Counts events matching a predicate
    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&SyscallAuditEvent) -> bool,
    {
        self.events.iter().filter(|e| predicate(e)).count()
    }
}
