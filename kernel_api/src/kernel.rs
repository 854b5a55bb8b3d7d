//! Syscall API trait and its value types

use crate::KernelError;
use core_types::{ExecutionIndex, SyncId, SysEvent, ThreadId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entry point of a pooled thread
///
/// Arguments are captured by the closure.
pub type ThreadEntry = Box<dyn FnOnce() + Send + 'static>;

/// Stack region handed to `get_thread`
///
/// The host thread gets its own stack; the descriptor is only validated and
/// recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDescriptor {
    /// Start address of the stack region
    pub base: usize,
    /// Size of the stack region in bytes
    pub size: u32,
}

impl StackDescriptor {
    /// Describes a caller-owned stack buffer
    pub fn from_slice(stack: &[u8]) -> Self {
        Self {
            base: stack.as_ptr() as usize,
            size: u32::try_from(stack.len()).unwrap_or(u32::MAX),
        }
    }

    /// Describes a stack of `size` bytes with no backing buffer
    pub fn with_size(size: u32) -> Self {
        Self { base: 0, size }
    }
}

/// Thread state as reported by `thread_state`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreadState {
    /// Slot not in use
    None,
    /// Blocked in `wait_for_event`
    Waiting,
    /// Runnable
    Ready,
    /// Created or suspended, not runnable
    Suspended,
    /// The querying thread itself
    Running,
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadState::None => "None",
            ThreadState::Waiting => "Waiting",
            ThreadState::Ready => "Ready",
            ThreadState::Suspended => "Suspended",
            ThreadState::Running => "Running",
        };
        write!(f, "{}", name)
    }
}

/// Non-blocking view of the mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStatus {
    /// At least one payload byte is waiting
    pub received: bool,
    /// Unread payload bytes of the in-flight message
    pub remaining_len: u32,
    /// Sequence number the next `receive_message` will report
    pub sequence_no: u32,
}

/// Outcome of one `receive_message` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    /// Execution that sent the message
    pub sender: ExecutionIndex,
    /// Sequence number of the logical message this chunk belongs to
    pub sequence_no: u32,
    /// Bytes copied into the caller buffer
    pub len: usize,
    /// This chunk completed the message
    pub complete: bool,
}

/// The syscall surface of an execution
///
/// Client code is written against this trait; the simulated kernel is one
/// implementation. All methods take `&self` and may be called from any
/// thread of the execution, including pooled threads.
///
/// # Design Principles
///
/// **Caller-supplied memory**: pools are sized by the container the caller
/// hands to the `initialise_*` methods and never grow.
///
/// **Synchronous failures**: every failure is returned from the call that
/// caused it. Nothing is retried except the bounded reconnect in
/// `send_message`.
///
/// **Closed events**: waits are expressed with [`SysEvent`]; numbers outside
/// the modelled set are rejected.
///
/// **Target-only services**: timers, the watchdog, device identity, storage,
/// root parameters, interrupts and shared resources have default methods
/// that fail with the error built by [`SysCallApi::unsupported`].
pub trait SysCallApi: Send + Sync {
    /// Index of the execution this API serves
    fn execution_index(&self) -> ExecutionIndex;

    /// Id of the calling thread (`ThreadId::MAIN` for the main thread)
    fn current_thread_id(&self) -> Result<ThreadId, KernelError>;

    /// Milliseconds since the simulation started
    fn time_ms(&self) -> u64;

    /// Seconds since the Unix epoch
    fn epoch_time(&self) -> u32;

    /// Blocks the calling thread for `ms` milliseconds
    fn sleep(&self, ms: u32) -> Result<(), KernelError>;

    /// Gives the rest of the time slice to another thread
    fn yield_now(&self);

    /// Writes a line to the system log
    fn log(&self, message: &str);

    /// Enters the execution-scoped critical section
    fn enter_critical_section(&self) -> Result<(), KernelError>;

    /// Leaves the execution-scoped critical section
    fn exit_critical_section(&self) -> Result<(), KernelError>;

    /// Binds the thread pool to a caller container
    fn initialise_thread_pool(&self, container: &mut [u8]) -> Result<(), KernelError>;

    /// Creates a suspended thread that runs `entry` once resumed
    fn get_thread(
        &self,
        entry: ThreadEntry,
        stack: StackDescriptor,
        priority: u32,
    ) -> Result<ThreadId, KernelError>;

    /// Terminates a thread and frees its slot
    fn free_thread(&self, thread: ThreadId) -> Result<(), KernelError>;

    /// Terminates the calling thread
    fn abort_thread(&self) -> Result<(), KernelError>;

    /// Suspends a thread
    fn suspend_thread(&self, thread: ThreadId) -> Result<(), KernelError>;

    /// Resumes a suspended thread
    fn resume_thread(&self, thread: ThreadId) -> Result<(), KernelError>;

    /// Reports the state of a thread
    fn thread_state(&self, thread: ThreadId) -> Result<ThreadState, KernelError>;

    /// Changes the priority of the main thread
    fn set_main_thread_priority(&self, priority: u32) -> Result<(), KernelError>;

    /// Blocks until `event` is notified
    fn wait_for_event(&self, event: SysEvent) -> Result<(), KernelError>;

    /// Checks whether a custom event is pending
    fn is_pending_event(&self, event: SysEvent) -> Result<bool, KernelError>;

    /// Clears a pending custom event
    fn clear_pending_event(&self, event: SysEvent) -> Result<(), KernelError>;

    /// Binds the mailbox to a caller container and starts its listener
    fn initialise_mailbox(&self, container: &mut [u8]) -> Result<(), KernelError>;

    /// Sends `payload` to `destination` and returns the send sequence number
    fn send_message(&self, destination: ExecutionIndex, payload: &[u8])
        -> Result<u32, KernelError>;

    /// Copies the next chunk of the in-flight message into `buffer`
    fn receive_message(&self, buffer: &mut [u8]) -> Result<ReceivedMessage, KernelError>;

    /// Polls the mailbox without consuming anything
    fn is_message_received(&self) -> Result<MessageStatus, KernelError>;

    /// Resolves an execution or service name
    fn execution_index_by_name(&self, name: &str) -> Result<ExecutionIndex, KernelError>;

    /// Sends to an execution addressed by name
    fn send_message_by_name(&self, name: &str, payload: &[u8]) -> Result<u32, KernelError> {
        let destination = self
            .execution_index_by_name(name)
            .map_err(|_| KernelError::InvalidDestination)?;
        self.send_message(destination, payload)
    }

    /// Receives and reports the sender by its `Exec<n>` name
    fn receive_message_by_name(
        &self,
        buffer: &mut [u8],
    ) -> Result<(String, ReceivedMessage), KernelError> {
        let message = self.receive_message(buffer)?;
        Ok((message.sender.exec_name(), message))
    }

    /// Binds the sync-primitive pool to a caller container
    fn initialise_sync_pool(&self, container: &mut [u8]) -> Result<(), KernelError>;

    /// Creates a counting semaphore with `max_count` permits
    fn get_semaphore(&self, max_count: u32) -> Result<SyncId, KernelError>;

    /// Takes a permit, blocking until one is available
    fn wait_semaphore(&self, id: SyncId) -> Result<(), KernelError>;

    /// Takes a permit if one is available
    fn try_wait_semaphore(&self, id: SyncId) -> Result<(), KernelError>;

    /// Returns a permit
    fn release_semaphore(&self, id: SyncId) -> Result<(), KernelError>;

    /// Creates a mutex (a semaphore with one permit)
    fn get_mutex(&self) -> Result<SyncId, KernelError> {
        self.get_semaphore(1)
    }

    fn wait_mutex(&self, id: SyncId) -> Result<(), KernelError> {
        self.wait_semaphore(id)
    }

    fn try_wait_mutex(&self, id: SyncId) -> Result<(), KernelError> {
        self.try_wait_semaphore(id)
    }

    fn release_mutex(&self, id: SyncId) -> Result<(), KernelError> {
        self.release_semaphore(id)
    }

    /// Error returned by syscalls this implementation does not provide
    ///
    /// `syscall` names the rejected call. Implementations override this to
    /// observe such calls.
    fn unsupported(&self, syscall: &'static str) -> KernelError {
        let _ = syscall;
        KernelError::NotSupported
    }

    /// Binds the software timer pool to a caller container
    fn initialise_timer(&self, container: &mut [u8]) -> Result<(), KernelError> {
        let _ = container;
        Err(self.unsupported("initialise_timer"))
    }

    /// Arms timer `timer_id` to expire after `period_ms`
    fn set_timer(&self, timer_id: u32, period_ms: u32, periodic: bool) -> Result<(), KernelError> {
        let _ = (timer_id, period_ms, periodic);
        Err(self.unsupported("set_timer"))
    }

    fn wdt_init(&self, timeout_ms: u32) -> Result<(), KernelError> {
        let _ = timeout_ms;
        Err(self.unsupported("wdt_init"))
    }

    fn wdt_enable(&self) -> Result<(), KernelError> {
        Err(self.unsupported("wdt_enable"))
    }

    fn wdt_disable(&self) -> Result<(), KernelError> {
        Err(self.unsupported("wdt_disable"))
    }

    fn wdt_feed(&self) -> Result<(), KernelError> {
        Err(self.unsupported("wdt_feed"))
    }

    /// Copies the device unique id into `uid`, returning its length in words
    fn device_uid(&self, uid: &mut [u32]) -> Result<usize, KernelError> {
        let _ = uid;
        Err(self.unsupported("device_uid"))
    }

    fn storage_size(&self) -> Result<u32, KernelError> {
        Err(self.unsupported("storage_size"))
    }

    fn storage_read(&self, offset: u32, buffer: &mut [u8]) -> Result<(), KernelError> {
        let _ = (offset, buffer);
        Err(self.unsupported("storage_read"))
    }

    fn storage_write(&self, offset: u32, data: &[u8]) -> Result<(), KernelError> {
        let _ = (offset, data);
        Err(self.unsupported("storage_write"))
    }

    fn storage_clear(&self) -> Result<(), KernelError> {
        Err(self.unsupported("storage_clear"))
    }

    /// Reads the root parameter item `tag`, returning its length
    fn root_param_item(&self, tag: u32, buffer: &mut [u8]) -> Result<usize, KernelError> {
        let _ = (tag, buffer);
        Err(self.unsupported("root_param_item"))
    }

    fn set_isr_stack(&self, stack: &mut [u8]) -> Result<(), KernelError> {
        let _ = stack;
        Err(self.unsupported("set_isr_stack"))
    }

    /// Installs `isr` as the handler of hardware interrupt `irq`
    fn set_hw_isr(&self, irq: i32, isr: fn()) -> Result<(), KernelError> {
        let _ = (irq, isr);
        Err(self.unsupported("set_hw_isr"))
    }

    /// Takes shared resource `resource_id`, blocking until it is free
    fn wait_resource(&self, resource_id: u32) -> Result<(), KernelError> {
        let _ = resource_id;
        Err(self.unsupported("wait_resource"))
    }

    fn try_wait_resource(&self, resource_id: u32) -> Result<(), KernelError> {
        let _ = resource_id;
        Err(self.unsupported("try_wait_resource"))
    }

    fn release_resource(&self, resource_id: u32) -> Result<(), KernelError> {
        let _ = resource_id;
        Err(self.unsupported("release_resource"))
    }

    /// Resolves an execution by its unique id
    fn execution_index_by_uid(&self, uid: &[u8]) -> Result<ExecutionIndex, KernelError> {
        let _ = uid;
        Err(self.unsupported("execution_index_by_uid"))
    }

    fn execution_index_by_value(&self, value: u32) -> Result<ExecutionIndex, KernelError> {
        let _ = value;
        Err(self.unsupported("execution_index_by_value"))
    }
}
