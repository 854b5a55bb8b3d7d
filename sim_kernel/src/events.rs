//! Event/wait subsystem
//!
//! A thread waits for one event at a time: it arms the event bit in its
//! waited-event mask and blocks on its own auto-reset primitive. `notify`
//! scans the main thread and every pooled thread, clears the whole mask of
//! each matching waiter and signals its primitive.

use crate::threads;
use crate::{Shared, SyscallEvent};
use core_types::{SysEvent, ThreadId};
use kernel_api::{KernelError, ThreadState};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::debug;

/// Auto-resetting wait primitive
///
/// `set` releases one `wait`; a `set` with nobody waiting is remembered
/// until the next `wait`.
#[derive(Debug, Default)]
pub(crate) struct AutoResetEvent {
    signaled: Mutex<bool>,
    changed: Condvar,
}

impl AutoResetEvent {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self) {
        *self.signaled.lock() = true;
        self.changed.notify_one();
    }

    /// Blocks until signaled or until the calling pooled thread is terminated
    pub(crate) fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if threads::is_terminated() {
                return;
            }
            self.changed.wait(&mut signaled);
        }
        *signaled = false;
    }
}

/// Wait bookkeeping of one thread
#[derive(Debug, Default)]
pub(crate) struct Waiter {
    pub(crate) waited_events: u64,
    ipc_event: Option<Arc<AutoResetEvent>>,
}

impl Waiter {
    /// Arms `event` and returns the primitive to block on
    ///
    /// The primitive is created on the first wait of the thread.
    pub(crate) fn arm(&mut self, event: SysEvent) -> Arc<AutoResetEvent> {
        self.waited_events |= event.mask();
        Arc::clone(
            self.ipc_event
                .get_or_insert_with(|| Arc::new(AutoResetEvent::new())),
        )
    }

    /// Wakes the thread if it waits for any bit of `mask`
    ///
    /// The entire mask is cleared, not only the fired bit.
    pub(crate) fn wake(&mut self, mask: u64) -> bool {
        if self.waited_events & mask == 0 {
            return false;
        }
        self.waited_events = 0;
        if let Some(event) = &self.ipc_event {
            event.set();
        }
        true
    }

    /// Releases a blocked wait unconditionally
    pub(crate) fn interrupt(&self) {
        if let Some(event) = &self.ipc_event {
            event.set();
        }
    }

    pub(crate) fn is_waiting(&self) -> bool {
        self.waited_events != 0
    }
}

impl Shared {
    pub(crate) fn wait_for_event(&self, event: SysEvent) -> Result<(), KernelError> {
        threads::checkpoint();
        let caller = self.caller()?;

        match event {
            SysEvent::IpcMessage => {}
            SysEvent::ThreadSync => return Err(KernelError::InvalidOperation),
            SysEvent::Timer | SysEvent::ThreadResourceSync | SysEvent::Other(_) => {
                return Err(KernelError::UnsupportedEvent)
            }
        }

        if self.critical.is_held_by_current() {
            return Err(KernelError::CannotSleepInCs);
        }

        let primitive = {
            let mut registry = self.threads.lock();
            let primitive = registry
                .waiter_mut(caller)
                .ok_or(KernelError::Fail)?
                .arm(event);
            registry.set_state(caller, ThreadState::Waiting);
            primitive
        };

        debug!(
            execution = self.index().as_u8(),
            thread = caller.as_raw(),
            %event,
            "waiting for event"
        );
        primitive.wait();

        self.threads.lock().finish_wait(caller);
        threads::checkpoint();
        Ok(())
    }

    /// Wakes every thread waiting for `event`
    pub(crate) fn notify(&self, event: SysEvent, caller: Option<ThreadId>) -> usize {
        let woken = self.threads.lock().notify(event.mask());
        if woken > 0 {
            debug!(execution = self.index().as_u8(), %event, woken, "event notified");
            self.record(caller, SyscallEvent::EventNotified { event, woken });
        }
        woken
    }

    pub(crate) fn is_pending_event(&self, _event: SysEvent) -> Result<bool, KernelError> {
        threads::checkpoint();
        Err(KernelError::UnsupportedEvent)
    }

    pub(crate) fn clear_pending_event(&self, _event: SysEvent) -> Result<(), KernelError> {
        threads::checkpoint();
        Err(KernelError::NotSupported)
    }
}
