//! Test utilities
//!
//! Helpers shared by unit tests and the cross-execution integration tests.
//! Pooled threads report results through [`Handoff`]s and tests poll kernel
//! state with [`wait_until`] instead of sleeping for fixed periods.

use crate::{SimulatedKernel, SimulationConfig};
use core_types::{ContainerBuffer, ExecutionIndex};
use ipc::{MemoryTransport, Transport};
use kernel_api::abi::{mailbox_container_size, sync_container_size, thread_container_size};
use kernel_api::SysCallApi;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Polls `predicate` until it holds or `timeout` elapses
pub fn wait_until<F>(timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

/// Single-value slot written by one thread and awaited by another
#[derive(Debug)]
pub struct Handoff<T> {
    inner: Arc<(Mutex<Option<T>>, Condvar)>,
}

impl<T> Clone for Handoff<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> Handoff<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(None), Condvar::new())),
        }
    }

    /// Stores a value, replacing any previous one
    pub fn set(&self, value: T) {
        let (slot, changed) = &*self.inner;
        *slot.lock() = Some(value);
        changed.notify_all();
    }

    /// Returns the current value without waiting
    pub fn get(&self) -> Option<T> {
        self.inner.0.lock().clone()
    }

    /// Waits up to `timeout` for a value
    pub fn wait(&self, timeout: Duration) -> Option<T> {
        let (slot, changed) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut value = slot.lock();
        while value.is_none() {
            if changed.wait_until(&mut value, deadline).timed_out() {
                break;
            }
        }
        value.clone()
    }
}

impl<T: Clone> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates execution `index` on a private in-memory transport
pub fn kernel(index: u8) -> SimulatedKernel {
    kernel_on(index, Arc::new(MemoryTransport::new()))
}

/// Creates execution `index` on `transport`
pub fn kernel_on(index: u8, transport: Arc<dyn Transport>) -> SimulatedKernel {
    match SimulatedKernel::new(SimulationConfig::new(ExecutionIndex(index)), transport) {
        Ok(kernel) => kernel,
        Err(err) => panic!("execution {} rejected: {}", index, err),
    }
}

/// Container for `count` threads
pub fn thread_container(count: usize) -> ContainerBuffer {
    ContainerBuffer::new(thread_container_size(count))
}

/// Container for `count` semaphores or mutexes
pub fn sync_container(count: usize) -> ContainerBuffer {
    ContainerBuffer::new(sync_container_size(count))
}

/// Container for `slots` message frames
pub fn mailbox_container(slots: usize) -> ContainerBuffer {
    ContainerBuffer::new(mailbox_container_size(slots))
}

/// Execution with initialised thread pool, sync pool and mailbox
///
/// The containers are returned alongside the kernel so they outlive it.
pub struct Bootstrapped {
    pub kernel: SimulatedKernel,
    pub containers: Vec<ContainerBuffer>,
}

/// Creates execution `index` on `transport` with every pool initialised
pub fn bootstrap(index: u8, transport: Arc<dyn Transport>, threads: usize) -> Bootstrapped {
    let kernel = kernel_on(index, transport);
    let mut thread_pool = thread_container(threads);
    let mut sync_pool = sync_container(8);
    let mut mailbox = mailbox_container(4);

    let results = [
        kernel.initialise_thread_pool(thread_pool.as_mut_slice()),
        kernel.initialise_sync_pool(sync_pool.as_mut_slice()),
        kernel.initialise_mailbox(mailbox.as_mut_slice()),
    ];
    if let Some(Err(err)) = results.iter().find(|result| result.is_err()) {
        panic!("execution {} bootstrap failed: {}", index, err);
    }

    Bootstrapped {
        kernel,
        containers: vec![thread_pool, sync_pool, mailbox],
    }
}

/// Two executions (0 and 1) sharing one in-memory transport
pub fn bootstrap_pair() -> (Bootstrapped, Bootstrapped) {
    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let first = bootstrap(0, Arc::clone(&transport), 4);
    let second = bootstrap(1, transport, 4);
    (first, second)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handoff_hands_value_across_threads() {
        let handoff = Handoff::new();
        let writer = handoff.clone();
        thread::spawn(move || writer.set(7u8));
        assert_eq!(handoff.wait(Duration::from_secs(5)), Some(7));
    }

    #[test]
    fn test_handoff_wait_times_out() {
        let handoff: Handoff<u8> = Handoff::new();
        assert_eq!(handoff.wait(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_wait_until() {
        assert!(wait_until(Duration::from_millis(50), || true));
        assert!(!wait_until(Duration::from_millis(10), || false));
    }

    #[test]
    fn test_bootstrap_pair() {
        let (first, second) = bootstrap_pair();
        assert!(first.kernel.is_mailbox_initialised());
        assert!(second.kernel.is_mailbox_initialised());
        assert_eq!(second.kernel.execution_index(), ExecutionIndex(1));
    }
}
