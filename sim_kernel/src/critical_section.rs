//! Execution-scoped critical section
//!
//! The lock itself is reentrant: the owning host thread may enter again and
//! must exit as many times. The "in critical section" flag that blocking
//! calls consult is a single boolean, though: it is set on every enter and
//! cleared by the first exit, so after a nested enter/enter/exit the owner
//! may sleep while still holding the lock.

use crate::threads;
use crate::Shared;
use kernel_api::KernelError;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId as HostThreadId};

#[derive(Debug, Default)]
struct LockState {
    owner: Option<HostThreadId>,
    recursion_count: usize,
}

#[derive(Debug, Default)]
pub(crate) struct CriticalSection {
    state: Mutex<LockState>,
    condvar: Condvar,
    in_cs: AtomicBool,
}

impl CriticalSection {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Takes the lock; returns false if the calling pooled thread was freed
    /// while waiting
    fn enter(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.owner == Some(me) {
            state.recursion_count += 1;
        } else {
            while state.owner.is_some() {
                if threads::is_terminated() {
                    return false;
                }
                self.condvar.wait(&mut state);
            }
            state.owner = Some(me);
            state.recursion_count = 1;
        }

        self.in_cs.store(true, Ordering::SeqCst);
        true
    }

    fn exit(&self) -> Result<(), KernelError> {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.owner != Some(me) {
            return Err(KernelError::InvalidOperation);
        }

        self.in_cs.store(false, Ordering::SeqCst);
        state.recursion_count -= 1;
        if state.recursion_count == 0 {
            state.owner = None;
            self.condvar.notify_one();
        }
        Ok(())
    }

    /// Checks the flag blocking calls consult, for the calling thread
    pub(crate) fn is_held_by_current(&self) -> bool {
        self.in_cs.load(Ordering::SeqCst) && self.state.lock().owner == Some(thread::current().id())
    }

    /// Nesting depth held by the calling thread
    pub(crate) fn depth(&self) -> usize {
        let state = self.state.lock();
        if state.owner == Some(thread::current().id()) {
            state.recursion_count
        } else {
            0
        }
    }

    /// Wakes blocked enters so freed threads can unwind
    pub(crate) fn wake_all(&self) {
        let _state = self.state.lock();
        self.condvar.notify_all();
    }
}

impl Shared {
    pub(crate) fn enter_critical_section(&self) -> Result<(), KernelError> {
        threads::checkpoint();
        if !self.critical.enter() {
            threads::terminate_current();
        }
        Ok(())
    }

    pub(crate) fn exit_critical_section(&self) -> Result<(), KernelError> {
        threads::checkpoint();
        self.critical.exit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_single_flag_cleared_by_first_exit() {
        let cs = CriticalSection::new();
        assert!(cs.enter());
        assert!(cs.enter());
        assert!(cs.is_held_by_current());
        assert_eq!(cs.depth(), 2);

        cs.exit().unwrap();
        // Still owned, but the flag is gone.
        assert_eq!(cs.depth(), 1);
        assert!(!cs.is_held_by_current());

        cs.exit().unwrap();
        assert_eq!(cs.depth(), 0);
    }

    #[test]
    fn test_exit_without_enter() {
        let cs = CriticalSection::new();
        assert_eq!(cs.exit(), Err(KernelError::InvalidOperation));
    }

    #[test]
    fn test_excludes_other_threads() {
        let cs = Arc::new(CriticalSection::new());
        assert!(cs.enter());

        let other = Arc::clone(&cs);
        let handle = thread::spawn(move || {
            assert!(other.enter());
            assert!(other.is_held_by_current());
            other.exit().unwrap();
        });

        thread::sleep(Duration::from_millis(30));
        assert!(!handle.is_finished());
        cs.exit().unwrap();
        handle.join().unwrap();
    }
}
