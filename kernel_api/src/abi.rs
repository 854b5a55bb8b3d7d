//! Fixed ABI sizes and limits
//!
//! Client code sizes its containers with these values at compile time, so
//! they must match the target kernel exactly.

use resources::PoolLayout;

/// Bytes reserved per thread in a thread-pool container.
pub const THREAD_SLOT_SIZE: usize = 128;

/// Maximum number of pooled threads per execution.
pub const MAX_THREAD_COUNT: usize = 32;

/// Bytes reserved per semaphore or mutex in a sync-pool container.
pub const SYNC_SLOT_SIZE: usize = 4;

/// Maximum number of sync primitives per execution.
pub const MAX_SYNC_PRIMITIVE_COUNT: usize = 32;

/// Largest `max_count` a semaphore may be created with.
pub const MAX_SEMAPHORE_COUNT: u32 = 32;

/// Bytes reserved per message frame in a mailbox container.
pub const MESSAGE_SLOT_SIZE: usize = 12;

/// Maximum number of message frames a mailbox container may hold.
pub const MAX_MAILBOX_CAPACITY: usize = 256;

/// Largest payload a single message may carry.
pub const MAX_MESSAGE_LEN: usize = 256;

/// Smallest stack a thread may be created with.
pub const MIN_STACK_SIZE: u32 = 256;

/// Highest thread priority (inclusive).
pub const MAX_THREAD_PRIORITY: u32 = 16;

/// Longest sleep, 24 hours in milliseconds.
pub const MAX_SLEEP_MS: u32 = 86_400_000;

/// Default reconnect window of a send, in milliseconds.
pub const CONNECT_TIMEOUT_MS: u64 = 1000;

/// Largest microservice handle.
pub const MAX_SERVICE_HANDLE: u32 = 64;

/// Longest CPU core name kept by the simulation settings.
pub const CPU_CORE_NAME_LEN: usize = 15;

/// Cores whose MPU does not require power-of-two stack regions.
pub const RELAXED_STACK_CORES: &[&str] = &["CortexM23", "CortexM33"];

/// Thread-pool slot geometry
pub const THREAD_POOL_LAYOUT: PoolLayout = PoolLayout::new(THREAD_SLOT_SIZE, MAX_THREAD_COUNT);

/// Sync-pool slot geometry
pub const SYNC_POOL_LAYOUT: PoolLayout =
    PoolLayout::new(SYNC_SLOT_SIZE, MAX_SYNC_PRIMITIVE_COUNT);

/// Mailbox slot geometry
pub const MAILBOX_LAYOUT: PoolLayout = PoolLayout::new(MESSAGE_SLOT_SIZE, MAX_MAILBOX_CAPACITY);

/// Container bytes needed for `count` threads
pub const fn thread_container_size(count: usize) -> usize {
    count * THREAD_SLOT_SIZE
}

/// Container bytes needed for `count` semaphores or mutexes
pub const fn sync_container_size(count: usize) -> usize {
    count * SYNC_SLOT_SIZE
}

/// Container bytes needed for `slots` message frames
pub const fn mailbox_container_size(slots: usize) -> usize {
    slots * MESSAGE_SLOT_SIZE
}

/// Checks the stack region rule of a CPU core
///
/// Cores outside [`RELAXED_STACK_CORES`] require a power-of-two stack size.
pub fn is_valid_stack_region(cpu_core_name: &str, size: u32) -> bool {
    if RELAXED_STACK_CORES.contains(&cpu_core_name) {
        return true;
    }
    size.is_power_of_two()
}
