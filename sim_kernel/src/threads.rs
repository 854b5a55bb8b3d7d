//! Thread registry
//!
//! Pooled threads are genuine host threads. The host offers no way to
//! suspend or kill a thread from outside, so each pooled thread carries a
//! [`ThreadControl`] gate that it checks at every syscall boundary:
//!
//! - a created thread waits on its gate until it is resumed
//! - a thread suspended by another thread parks at its next syscall
//! - a freed thread unwinds at its next syscall, or immediately if it is
//!   blocked in the kernel
//!
//! Sync primitives held by a freed thread are not released.

use crate::events::Waiter;
use crate::{Shared, SyscallEvent};
use core_types::{ExecutionIndex, ThreadId};
use kernel_api::abi::{
    is_valid_stack_region, MAX_THREAD_PRIORITY, MIN_STACK_SIZE, THREAD_POOL_LAYOUT,
};
use kernel_api::{KernelError, StackDescriptor, ThreadEntry, ThreadState};
use parking_lot::{Condvar, Mutex};
use resources::SlotPool;
use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId as HostThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Host stack bytes per byte of simulated stack.
const STACK_SIM_FACTOR: usize = 16;

/// Smallest host stack given to a pooled thread.
const MIN_HOST_STACK: usize = 256 * 1024;

/// Unwind payload of a terminated pooled thread
pub(crate) struct ThreadTerminated;

#[derive(Debug)]
struct Gate {
    parked: bool,
    terminated: bool,
}

/// Run gate of a pooled thread
#[derive(Debug)]
pub(crate) struct ThreadControl {
    gate: Mutex<Gate>,
    changed: Condvar,
}

impl ThreadControl {
    /// Creates a parked gate
    pub(crate) fn new() -> Self {
        Self {
            gate: Mutex::new(Gate {
                parked: true,
                terminated: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn park(&self) {
        self.gate.lock().parked = true;
    }

    pub(crate) fn unpark(&self) {
        self.gate.lock().parked = false;
        self.changed.notify_all();
    }

    pub(crate) fn terminate(&self) {
        self.gate.lock().terminated = true;
        self.changed.notify_all();
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.gate.lock().terminated
    }

    /// Blocks while parked; returns false once terminated
    pub(crate) fn wait_runnable(&self) -> bool {
        let mut gate = self.gate.lock();
        while gate.parked && !gate.terminated {
            self.changed.wait(&mut gate);
        }
        !gate.terminated
    }

    /// Sleeps for `duration`; returns false if terminated meanwhile
    pub(crate) fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut gate = self.gate.lock();
        while !gate.terminated {
            if self.changed.wait_until(&mut gate, deadline).timed_out() {
                break;
            }
        }
        !gate.terminated
    }
}

thread_local! {
    static CURRENT_CONTROL: RefCell<Option<Arc<ThreadControl>>> = RefCell::new(None);
}

/// Gate of the calling thread (`None` outside pooled threads)
pub(crate) fn current_control() -> Option<Arc<ThreadControl>> {
    CURRENT_CONTROL.with(|control| control.borrow().clone())
}

/// Checks whether the calling pooled thread has been freed
pub(crate) fn is_terminated() -> bool {
    current_control().map_or(false, |control| control.is_terminated())
}

/// Unwinds the calling pooled thread back to its entry wrapper
pub(crate) fn terminate_current() -> ! {
    panic::resume_unwind(Box::new(ThreadTerminated))
}

/// Syscall boundary of pooled threads
///
/// Parks while the thread is suspended and unwinds once it is freed. A
/// no-op for the main thread and foreign threads.
pub(crate) fn checkpoint() {
    if let Some(control) = current_control() {
        if !control.wait_runnable() {
            terminate_current();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_pooled(id: ThreadId, control: Arc<ThreadControl>, entry: ThreadEntry) {
    if !control.wait_runnable() {
        debug!(thread = id.as_raw(), "freed before first resume");
        return;
    }

    CURRENT_CONTROL.with(|current| *current.borrow_mut() = Some(Arc::clone(&control)));
    let outcome = panic::catch_unwind(AssertUnwindSafe(entry));
    CURRENT_CONTROL.with(|current| *current.borrow_mut() = None);

    match outcome {
        Ok(()) => debug!(thread = id.as_raw(), "entry point returned"),
        Err(payload) if payload.is::<ThreadTerminated>() => {
            debug!(thread = id.as_raw(), "terminated")
        }
        Err(payload) => error!(
            thread = id.as_raw(),
            panic = %panic_message(payload.as_ref()),
            "pooled thread panicked"
        ),
    }
}

/// One occupied thread slot
#[derive(Debug)]
pub(crate) struct ThreadRecord {
    pub(crate) id: ThreadId,
    pub(crate) state: ThreadState,
    pub(crate) priority: u32,
    pub(crate) host: HostThreadId,
    pub(crate) control: Arc<ThreadControl>,
    pub(crate) waiter: Waiter,
}

/// Thread pool of one execution plus the main-thread record
#[derive(Debug)]
pub(crate) struct ThreadRegistry {
    execution: ExecutionIndex,
    pool: SlotPool<ThreadRecord>,
    main_host: HostThreadId,
    main: Waiter,
}

impl ThreadRegistry {
    pub(crate) fn new(execution: ExecutionIndex, main_host: HostThreadId) -> Self {
        Self {
            execution,
            pool: SlotPool::new(THREAD_POOL_LAYOUT),
            main_host,
            main: Waiter::default(),
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.pool.count()
    }

    /// Maps a host thread onto its kernel identity
    pub(crate) fn identify(&self, host: HostThreadId) -> Option<ThreadId> {
        if host == self.main_host {
            return Some(ThreadId::MAIN);
        }
        self.pool
            .iter()
            .find(|(_, record)| record.host == host)
            .map(|(_, record)| record.id)
    }

    /// Finds the slot of a pooled thread id
    fn lookup(&self, id: ThreadId) -> Result<usize, KernelError> {
        let slot = id.slot_index().ok_or(KernelError::ThreadInvalid)?;
        if slot >= self.pool.capacity() {
            return Err(KernelError::ThreadInvalid);
        }
        match self.pool.get(slot) {
            Some(record) if record.id == id => Ok(slot),
            _ => Err(KernelError::ThreadInvalid),
        }
    }

    /// Lookup plus the priority gate, for cross-thread control
    fn lookup_controllable(&self, caller: ThreadId, id: ThreadId) -> Result<usize, KernelError> {
        if !self.pool.is_initialised() {
            return Err(KernelError::NotInitialised);
        }
        let slot = self.lookup(id)?;

        // The main thread sits at the priority ceiling.
        if !caller.is_main() {
            let caller_priority = self
                .lookup(caller)
                .ok()
                .and_then(|index| self.pool.get(index))
                .map(|record| record.priority)
                .ok_or(KernelError::ThreadInvalid)?;
            let target_priority = self.pool.get(slot).map_or(0, |record| record.priority);
            if target_priority > caller_priority {
                return Err(KernelError::ThreadInvalidPriority);
            }
        }
        Ok(slot)
    }

    fn record_mut(&mut self, id: ThreadId) -> Option<&mut ThreadRecord> {
        let slot = self.lookup(id).ok()?;
        self.pool.get_mut(slot)
    }

    pub(crate) fn waiter_mut(&mut self, id: ThreadId) -> Option<&mut Waiter> {
        if id.is_main() {
            return Some(&mut self.main);
        }
        self.record_mut(id).map(|record| &mut record.waiter)
    }

    /// Updates the stored state of a pooled thread (no-op for main)
    pub(crate) fn set_state(&mut self, id: ThreadId, state: ThreadState) {
        if let Some(record) = self.record_mut(id) {
            record.state = state;
        }
    }

    /// Moves a woken waiter back to `Ready` unless it was suspended meanwhile
    pub(crate) fn finish_wait(&mut self, id: ThreadId) {
        if let Some(record) = self.record_mut(id) {
            if record.state == ThreadState::Waiting {
                record.state = ThreadState::Ready;
            }
        }
    }

    /// Wakes every waiter armed on `mask`
    pub(crate) fn notify(&mut self, mask: u64) -> usize {
        let mut woken = usize::from(self.main.wake(mask));
        for (_, record) in self.pool.iter_mut() {
            if record.waiter.wake(mask) {
                woken += 1;
            }
        }
        woken
    }

}

impl Shared {
    pub(crate) fn initialise_thread_pool(&self, container: &mut [u8]) -> Result<(), KernelError> {
        checkpoint();
        let capacity = self.threads.lock().pool.initialise(container)?;
        debug!(execution = self.index().as_u8(), capacity, "thread pool initialised");
        self.record_current(SyscallEvent::ThreadPoolInitialised { capacity });
        Ok(())
    }

    pub(crate) fn get_thread(
        &self,
        entry: ThreadEntry,
        stack: StackDescriptor,
        priority: u32,
    ) -> Result<ThreadId, KernelError> {
        checkpoint();
        let caller = self.caller()?;
        let mut registry = self.threads.lock();

        if !registry.pool.is_initialised() {
            return Err(KernelError::NotInitialised);
        }
        if stack.size < MIN_STACK_SIZE {
            return Err(KernelError::ThreadInvalidStackSize);
        }
        if priority > MAX_THREAD_PRIORITY {
            return Err(KernelError::ThreadInvalidPriority);
        }
        if !is_valid_stack_region(&self.config.cpu_core_name, stack.size) {
            return Err(KernelError::ThreadInvalidStackAlignment);
        }
        if registry.pool.count() >= registry.pool.capacity() {
            return Err(KernelError::NoSlotAvailable);
        }

        let execution = registry.execution;
        let slot = registry.pool.allocate_with(|slot| {
            let id = ThreadId::from_slot(execution, slot);
            let control = Arc::new(ThreadControl::new());
            let host_stack = (stack.size as usize)
                .saturating_mul(STACK_SIM_FACTOR)
                .max(MIN_HOST_STACK);

            let gate = Arc::clone(&control);
            let handle = thread::Builder::new()
                .name(format!("exec{}-thread{}", execution.as_u8(), slot + 1))
                .stack_size(host_stack)
                .spawn(move || run_pooled(id, gate, entry))
                .map_err(|err| {
                    error!(execution = execution.as_u8(), %err, "failed to spawn host thread");
                    KernelError::Fail
                })?;

            Ok::<_, KernelError>(ThreadRecord {
                id,
                state: ThreadState::Suspended,
                priority,
                host: handle.thread().id(),
                control,
                waiter: Waiter::default(),
            })
        })?;

        let id = ThreadId::from_slot(execution, slot);
        drop(registry);

        debug!(
            execution = execution.as_u8(),
            thread = id.as_raw(),
            priority,
            stack_size = stack.size,
            "thread created"
        );
        self.record(Some(caller), SyscallEvent::ThreadCreated { thread: id, priority });
        Ok(id)
    }

    pub(crate) fn free_thread(&self, id: ThreadId) -> Result<(), KernelError> {
        checkpoint();
        let caller = self.caller()?;
        if id.is_main() {
            return Err(KernelError::ThreadInvalid);
        }

        let record = {
            let mut registry = self.threads.lock();
            let slot = registry.lookup_controllable(caller, id)?;
            registry.pool.release(slot).ok_or(KernelError::ThreadInvalid)?
        };

        record.control.terminate();
        record.waiter.interrupt();
        self.sync.wake_all();
        self.critical.wake_all();

        debug!(execution = self.index().as_u8(), thread = id.as_raw(), "thread freed");
        self.record(Some(caller), SyscallEvent::ThreadFreed { thread: id });

        if caller == id {
            terminate_current();
        }
        Ok(())
    }

    pub(crate) fn abort_thread(&self) -> Result<(), KernelError> {
        let caller = self.caller()?;
        self.free_thread(caller)
    }

    pub(crate) fn suspend_thread(&self, id: ThreadId) -> Result<(), KernelError> {
        checkpoint();
        let caller = self.caller()?;
        if id.is_main() {
            return Err(KernelError::ThreadInvalid);
        }

        {
            let mut registry = self.threads.lock();
            let slot = registry.lookup_controllable(caller, id)?;
            let record = registry.pool.get_mut(slot).ok_or(KernelError::ThreadInvalid)?;
            if record.state == ThreadState::Suspended {
                return Err(KernelError::ThreadAlreadySuspended);
            }
            record.state = ThreadState::Suspended;
            if caller != id {
                record.control.park();
            }
        }

        debug!(execution = self.index().as_u8(), thread = id.as_raw(), "thread suspended");
        self.record(Some(caller), SyscallEvent::ThreadSuspended { thread: id });

        if caller == id {
            thread::yield_now();
        }
        Ok(())
    }

    pub(crate) fn resume_thread(&self, id: ThreadId) -> Result<(), KernelError> {
        checkpoint();
        let caller = self.caller()?;
        if id.is_main() {
            return Err(KernelError::ThreadInvalid);
        }

        {
            let mut registry = self.threads.lock();
            let slot = registry.lookup_controllable(caller, id)?;
            let record = registry.pool.get_mut(slot).ok_or(KernelError::ThreadInvalid)?;
            if record.state != ThreadState::Suspended {
                return Err(KernelError::ThreadAlreadyRunning);
            }
            record.state = if record.waiter.is_waiting() {
                ThreadState::Waiting
            } else {
                ThreadState::Ready
            };
            record.control.unpark();
        }

        debug!(execution = self.index().as_u8(), thread = id.as_raw(), "thread resumed");
        self.record(Some(caller), SyscallEvent::ThreadResumed { thread: id });
        Ok(())
    }

    pub(crate) fn thread_state(&self, id: ThreadId) -> Result<ThreadState, KernelError> {
        checkpoint();
        let caller = self.caller()?;

        if id.is_main() {
            return Ok(if caller.is_main() {
                ThreadState::Running
            } else {
                ThreadState::Ready
            });
        }

        let registry = self.threads.lock();
        if !registry.pool.is_initialised() {
            return Err(KernelError::NotInitialised);
        }
        let slot = registry.lookup(id)?;
        let state = registry
            .pool
            .get(slot)
            .map(|record| record.state)
            .ok_or(KernelError::ThreadInvalid)?;

        Ok(match state {
            ThreadState::Ready if caller == id => ThreadState::Running,
            other => other,
        })
    }

    pub(crate) fn set_main_thread_priority(&self, _priority: u32) -> Result<(), KernelError> {
        checkpoint();
        Err(KernelError::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_starts_parked() {
        let control = Arc::new(ThreadControl::new());
        let waiter = Arc::clone(&control);
        let handle = thread::spawn(move || waiter.wait_runnable());

        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());

        control.unpark();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_terminate_releases_parked_thread() {
        let control = Arc::new(ThreadControl::new());
        let waiter = Arc::clone(&control);
        let handle = thread::spawn(move || waiter.wait_runnable());

        control.terminate();
        assert!(!handle.join().unwrap());
        assert!(control.is_terminated());
    }

    #[test]
    fn test_sleep_cut_short_by_termination() {
        let control = Arc::new(ThreadControl::new());
        let sleeper = Arc::clone(&control);
        let started = Instant::now();
        let handle = thread::spawn(move || sleeper.sleep(Duration::from_secs(10)));

        thread::sleep(Duration::from_millis(20));
        control.terminate();
        assert!(!handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_checkpoint_is_noop_outside_pool() {
        checkpoint();
        assert!(!is_terminated());
        assert!(current_control().is_none());
    }

    #[test]
    fn test_registry_lookup_rejects_foreign_ids() {
        let mut registry = ThreadRegistry::new(ExecutionIndex(1), thread::current().id());
        let mut container = core_types::ContainerBuffer::for_slots(2, 128);
        registry.pool.initialise(container.as_mut_slice()).unwrap();

        assert_eq!(registry.lookup(ThreadId::MAIN), Err(KernelError::ThreadInvalid));
        assert_eq!(
            registry.lookup(ThreadId::from_raw(0x0101)),
            Err(KernelError::ThreadInvalid)
        );
        assert_eq!(
            registry.lookup(ThreadId::from_raw(0x0105)),
            Err(KernelError::ThreadInvalid)
        );
        assert_eq!(registry.identify(thread::current().id()), Some(ThreadId::MAIN));
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
