//! Cross-Execution Test Utilities
//!
//! Shared helpers for the integration tests under `tests/`.
//!
//! ## Test Philosophy
//!
//! - **Several executions, one process**: every test builds its executions
//!   on a shared transport and drives them from the test thread
//! - **No fixed sleeps**: tests wait for observable kernel state
//! - **Current behaviour asserted**: known gaps such as orphaned mutexes are
//!   asserted as they are, not as they should be

use core_types::ThreadId;
use kernel_api::{KernelError, StackDescriptor, SysCallApi, ThreadState};
use sim_kernel::test_utils::wait_until;
use sim_kernel::SimulatedKernel;
use std::time::Duration;

pub use sim_kernel::test_utils::{bootstrap, bootstrap_pair, Bootstrapped, Handoff};

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

/// Stack size accepted on every core
pub const STACK_SIZE: u32 = 4096;

/// Creates a pooled thread and lets it run
pub fn start<F>(kernel: &SimulatedKernel, priority: u32, entry: F) -> Result<ThreadId, KernelError>
where
    F: FnOnce(SimulatedKernel) + Send + 'static,
{
    let inner = kernel.clone();
    let id = kernel.get_thread(
        Box::new(move || entry(inner)),
        StackDescriptor::with_size(STACK_SIZE),
        priority,
    )?;
    kernel.resume_thread(id)?;
    Ok(id)
}

/// Waits until `thread` reports `state`
pub fn wait_for_state(kernel: &SimulatedKernel, thread: ThreadId, state: ThreadState) -> bool {
    wait_until(WAIT, || kernel.thread_state(thread) == Ok(state))
}

/// Waits until the mailbox holds `len` unread bytes
pub fn wait_for_unread(kernel: &SimulatedKernel, len: usize) -> bool {
    wait_until(WAIT, || {
        kernel
            .is_message_received()
            .map(|status| status.remaining_len as usize == len)
            .unwrap_or(false)
    })
}

/// Deterministic payload of `len` bytes
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}
