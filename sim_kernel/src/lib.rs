//! # Simulated Kernel
//!
//! This crate emulates the syscall ABI of the secure kernel on a host OS.
//!
//! ## Purpose
//!
//! The simulated kernel lets execution code run and be tested without
//! hardware:
//! - Runs under `cargo test`
//! - Every pooled thread is a real host thread
//! - Executions talk through a pluggable [`ipc::Transport`]
//! - Inspectable (audit log, pool counters)
//!
//! ## Philosophy
//!
//! **One context object per execution.** There is no process-wide state:
//! the embedding harness creates a [`SimulatedKernel`] for each execution,
//! configures its pools, runs code against the [`SysCallApi`] trait and
//! drops it. Several executions may live in one process.
//!
//! The host thread that calls [`SimulatedKernel::new`] becomes the main
//! thread (id 0) of the execution.

pub mod audit;
pub mod config;
mod critical_section;
mod events;
mod mailbox;
mod sync_pool;
pub mod test_utils;
mod threads;
mod unsupported;

pub use audit::{SyscallAuditEvent, SyscallAuditLog, SyscallEvent, DEFAULT_AUDIT_CAPACITY};
pub use config::{ConfigError, SimulationConfig};

use core_types::{ExecutionIndex, SyncId, SysEvent, ThreadId};
use critical_section::CriticalSection;
use ipc::Transport;
use kernel_api::{
    KernelError, MessageStatus, ReceivedMessage, StackDescriptor, SysCallApi, ThreadEntry,
    ThreadState,
};
use mailbox::Mailbox;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use sync_pool::SyncPool;
use threads::ThreadRegistry;
use tracing::{debug, info};

/// Receiver of `log` lines
pub type LogSink = Arc<dyn Fn(ExecutionIndex, &str) + Send + Sync>;

/// State of one execution, shared by every handle and pooled thread
pub(crate) struct Shared {
    config: SimulationConfig,
    started: Instant,
    transport: Arc<dyn Transport>,
    threads: Mutex<ThreadRegistry>,
    critical: CriticalSection,
    mailbox: Mailbox,
    sync: SyncPool,
    audit: Mutex<SyscallAuditLog>,
    log_sink: Mutex<Option<LogSink>>,
}

impl Shared {
    pub(crate) fn index(&self) -> ExecutionIndex {
        self.config.execution_index
    }

    /// Identity of the calling host thread
    ///
    /// Threads that are neither the main thread nor pooled threads of this
    /// execution get `Fail`.
    pub(crate) fn caller(&self) -> Result<ThreadId, KernelError> {
        self.threads
            .lock()
            .identify(thread::current().id())
            .ok_or(KernelError::Fail)
    }

    pub(crate) fn time_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub(crate) fn record(&self, caller: Option<ThreadId>, event: SyscallEvent) {
        let timestamp = self.time_ms();
        self.audit.lock().record(timestamp, caller, event);
    }

    pub(crate) fn record_current(&self, event: SyscallEvent) {
        let caller = self.caller().ok();
        self.record(caller, event);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.mailbox.close();
        if self.mailbox.is_initialised() {
            self.transport.unbind(self.index());
        }
    }
}

/// Simulated kernel of one execution
///
/// Cheap to clone; clones share the same execution. Pooled threads capture
/// a clone to make syscalls.
#[derive(Clone)]
pub struct SimulatedKernel {
    shared: Arc<Shared>,
}

impl SimulatedKernel {
    /// Creates an execution whose main thread is the calling host thread
    pub fn new(
        config: SimulationConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, KernelError> {
        if !config.execution_index.is_valid() {
            return Err(KernelError::InvalidParameter);
        }

        let index = config.execution_index;
        debug!(
            execution = index.as_u8(),
            cpu_core = %config.cpu_core_name,
            "simulation initialised"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                started: Instant::now(),
                transport,
                threads: Mutex::new(ThreadRegistry::new(index, thread::current().id())),
                critical: CriticalSection::new(),
                mailbox: Mailbox::new(),
                sync: SyncPool::new(),
                audit: Mutex::new(SyscallAuditLog::with_capacity(config.audit_capacity)),
                log_sink: Mutex::new(None),
                config,
            }),
        })
    }

    /// Returns the settings of this execution
    pub fn config(&self) -> &SimulationConfig {
        &self.shared.config
    }

    /// Returns a snapshot of the audit log
    pub fn audit_log(&self) -> SyscallAuditLog {
        self.shared.audit.lock().clone()
    }

    /// Number of pooled threads in use
    pub fn thread_count(&self) -> usize {
        self.shared.threads.lock().count()
    }

    /// Permits currently available on a semaphore or mutex
    pub fn semaphore_available(&self, id: SyncId) -> Option<u32> {
        self.shared.sync.available(id)
    }

    /// Critical-section nesting depth held by the calling thread
    pub fn critical_section_depth(&self) -> usize {
        self.shared.critical.depth()
    }

    /// Checks whether the mailbox was initialised
    pub fn is_mailbox_initialised(&self) -> bool {
        self.shared.mailbox.is_initialised()
    }

    /// Routes `log` lines to `sink` instead of `tracing`
    pub fn set_log_sink(&self, sink: LogSink) {
        *self.shared.log_sink.lock() = Some(sink);
    }
}

impl SysCallApi for SimulatedKernel {
    fn execution_index(&self) -> ExecutionIndex {
        self.shared.index()
    }

    fn current_thread_id(&self) -> Result<ThreadId, KernelError> {
        threads::checkpoint();
        self.shared.caller()
    }

    fn time_ms(&self) -> u64 {
        self.shared.time_ms()
    }

    fn epoch_time(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as u32)
            .unwrap_or(0)
    }

    fn sleep(&self, ms: u32) -> Result<(), KernelError> {
        threads::checkpoint();
        if self.shared.critical.is_held_by_current() {
            return Err(KernelError::CannotSleepInCs);
        }
        if ms > kernel_api::abi::MAX_SLEEP_MS {
            return Err(KernelError::InvalidParameter);
        }

        let duration = std::time::Duration::from_millis(u64::from(ms));
        match threads::current_control() {
            Some(control) => {
                if !control.sleep(duration) {
                    threads::terminate_current();
                }
            }
            None => thread::sleep(duration),
        }

        threads::checkpoint();
        Ok(())
    }

    fn yield_now(&self) {
        threads::checkpoint();
        thread::yield_now();
    }

    fn log(&self, message: &str) {
        let sink = self.shared.log_sink.lock().clone();
        match sink {
            Some(sink) => sink(self.shared.index(), message),
            None => info!(
                target: "sim_kernel::syslog",
                execution = self.shared.index().as_u8(),
                "{}",
                message
            ),
        }
    }

    fn enter_critical_section(&self) -> Result<(), KernelError> {
        self.shared.enter_critical_section()
    }

    fn exit_critical_section(&self) -> Result<(), KernelError> {
        self.shared.exit_critical_section()
    }

    fn initialise_thread_pool(&self, container: &mut [u8]) -> Result<(), KernelError> {
        self.shared.initialise_thread_pool(container)
    }

    fn get_thread(
        &self,
        entry: ThreadEntry,
        stack: StackDescriptor,
        priority: u32,
    ) -> Result<ThreadId, KernelError> {
        self.shared.get_thread(entry, stack, priority)
    }

    fn free_thread(&self, thread: ThreadId) -> Result<(), KernelError> {
        self.shared.free_thread(thread)
    }

    fn abort_thread(&self) -> Result<(), KernelError> {
        self.shared.abort_thread()
    }

    fn suspend_thread(&self, thread: ThreadId) -> Result<(), KernelError> {
        self.shared.suspend_thread(thread)
    }

    fn resume_thread(&self, thread: ThreadId) -> Result<(), KernelError> {
        self.shared.resume_thread(thread)
    }

    fn thread_state(&self, thread: ThreadId) -> Result<ThreadState, KernelError> {
        self.shared.thread_state(thread)
    }

    fn set_main_thread_priority(&self, priority: u32) -> Result<(), KernelError> {
        self.shared.set_main_thread_priority(priority)
    }

    fn wait_for_event(&self, event: SysEvent) -> Result<(), KernelError> {
        self.shared.wait_for_event(event)
    }

    fn is_pending_event(&self, event: SysEvent) -> Result<bool, KernelError> {
        self.shared.is_pending_event(event)
    }

    fn clear_pending_event(&self, event: SysEvent) -> Result<(), KernelError> {
        self.shared.clear_pending_event(event)
    }

    fn initialise_mailbox(&self, container: &mut [u8]) -> Result<(), KernelError> {
        self.shared.initialise_mailbox(container)
    }

    fn send_message(
        &self,
        destination: ExecutionIndex,
        payload: &[u8],
    ) -> Result<u32, KernelError> {
        self.shared.send_message(destination, payload)
    }

    fn receive_message(&self, buffer: &mut [u8]) -> Result<ReceivedMessage, KernelError> {
        self.shared.receive_message(buffer)
    }

    fn is_message_received(&self) -> Result<MessageStatus, KernelError> {
        self.shared.is_message_received()
    }

    fn execution_index_by_name(&self, name: &str) -> Result<ExecutionIndex, KernelError> {
        threads::checkpoint();
        self.shared.config.resolve(name).ok_or(KernelError::NotFound)
    }

    fn initialise_sync_pool(&self, container: &mut [u8]) -> Result<(), KernelError> {
        self.shared.initialise_sync_pool(container)
    }

    fn get_semaphore(&self, max_count: u32) -> Result<SyncId, KernelError> {
        self.shared.get_semaphore(max_count)
    }

    fn wait_semaphore(&self, id: SyncId) -> Result<(), KernelError> {
        self.shared.wait_semaphore(id)
    }

    fn try_wait_semaphore(&self, id: SyncId) -> Result<(), KernelError> {
        self.shared.try_wait_semaphore(id)
    }

    fn release_semaphore(&self, id: SyncId) -> Result<(), KernelError> {
        self.shared.release_semaphore(id)
    }

    fn unsupported(&self, syscall: &'static str) -> KernelError {
        self.shared.unsupported(syscall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{kernel, kernel_on, mailbox_container, thread_container, wait_until, Handoff};
    use core_types::ContainerBuffer;
    use ipc::MemoryTransport;
    use kernel_api::abi::{
        mailbox_container_size, sync_container_size, thread_container_size, MAX_MAILBOX_CAPACITY,
        MAX_SLEEP_MS, MAX_THREAD_COUNT, MESSAGE_SLOT_SIZE, THREAD_SLOT_SIZE,
    };
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_new_rejects_out_of_range_index() {
        let transport = Arc::new(ipc::MemoryTransport::new());
        let result = SimulatedKernel::new(SimulationConfig::new(ExecutionIndex(16)), transport);
        assert!(matches!(result, Err(KernelError::InvalidParameter)));
    }

    #[test]
    fn test_creator_is_main_thread() {
        let kernel = kernel(0);
        assert_eq!(kernel.current_thread_id(), Ok(ThreadId::MAIN));
        assert_eq!(kernel.thread_state(ThreadId::MAIN), Ok(ThreadState::Running));

        let other = kernel.clone();
        let from_foreign = thread::spawn(move || other.current_thread_id())
            .join()
            .unwrap();
        assert_eq!(from_foreign, Err(KernelError::Fail));
    }

    #[test]
    fn test_get_thread_validation_order() {
        let kernel = kernel(0);
        let entry = || -> ThreadEntry { Box::new(|| {}) };

        assert_eq!(
            kernel.get_thread(entry(), StackDescriptor::with_size(1024), 1),
            Err(KernelError::NotInitialised)
        );

        let mut container = thread_container(2);
        kernel.initialise_thread_pool(container.as_mut_slice()).unwrap();

        assert_eq!(
            kernel.get_thread(entry(), StackDescriptor::with_size(128), 1),
            Err(KernelError::ThreadInvalidStackSize)
        );
        assert_eq!(
            kernel.get_thread(entry(), StackDescriptor::with_size(1024), 17),
            Err(KernelError::ThreadInvalidPriority)
        );
        assert_eq!(
            kernel.get_thread(entry(), StackDescriptor::with_size(1000), 1),
            Err(KernelError::ThreadInvalidStackAlignment)
        );
        assert!(kernel
            .get_thread(entry(), StackDescriptor::with_size(1024), 16)
            .is_ok());
    }

    #[test]
    fn test_relaxed_core_accepts_any_stack_size() {
        let transport = Arc::new(ipc::MemoryTransport::new());
        let config = SimulationConfig::new(ExecutionIndex(0)).with_cpu_core("CortexM33");
        let kernel = SimulatedKernel::new(config, transport).unwrap();
        let mut container = thread_container(1);
        kernel.initialise_thread_pool(container.as_mut_slice()).unwrap();

        assert!(kernel
            .get_thread(Box::new(|| {}), StackDescriptor::with_size(1000), 1)
            .is_ok());
    }

    #[test]
    fn test_thread_pool_capacity_and_reuse() {
        let kernel = kernel(2);
        let mut container = thread_container(2);
        kernel.initialise_thread_pool(container.as_mut_slice()).unwrap();
        let stack = StackDescriptor::with_size(1024);

        let first = kernel.get_thread(Box::new(|| {}), stack, 1).unwrap();
        let second = kernel.get_thread(Box::new(|| {}), stack, 1).unwrap();
        assert_ne!(first, second);
        assert_eq!(first.as_raw(), 0x0201);
        assert_eq!(second.as_raw(), 0x0202);
        assert_eq!(
            kernel.get_thread(Box::new(|| {}), stack, 1),
            Err(KernelError::NoSlotAvailable)
        );

        kernel.free_thread(first).unwrap();
        let third = kernel.get_thread(Box::new(|| {}), stack, 1).unwrap();
        assert_eq!(third, first);
        assert_eq!(kernel.thread_count(), 2);
    }

    #[test]
    fn test_created_thread_runs_only_after_resume() {
        let kernel = kernel(0);
        let mut container = thread_container(1);
        kernel.initialise_thread_pool(container.as_mut_slice()).unwrap();

        let handoff = Handoff::new();
        let reporter = handoff.clone();
        let id = kernel
            .get_thread(
                Box::new(move || reporter.set(42u32)),
                StackDescriptor::with_size(1024),
                1,
            )
            .unwrap();

        assert_eq!(kernel.thread_state(id), Ok(ThreadState::Suspended));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(handoff.get(), None);

        kernel.resume_thread(id).unwrap();
        assert_eq!(handoff.wait(WAIT), Some(42));
        assert_eq!(kernel.resume_thread(id), Err(KernelError::ThreadAlreadyRunning));
    }

    #[test]
    fn test_suspend_and_resume_transitions() {
        let kernel = kernel(0);
        let mut container = thread_container(1);
        kernel.initialise_thread_pool(container.as_mut_slice()).unwrap();
        let id = kernel
            .get_thread(Box::new(|| {}), StackDescriptor::with_size(1024), 1)
            .unwrap();

        assert_eq!(kernel.suspend_thread(id), Err(KernelError::ThreadAlreadySuspended));
        kernel.resume_thread(id).unwrap();
        assert_eq!(kernel.thread_state(id), Ok(ThreadState::Ready));
        kernel.suspend_thread(id).unwrap();
        assert_eq!(kernel.thread_state(id), Ok(ThreadState::Suspended));
    }

    #[test]
    fn test_main_thread_is_protected() {
        let kernel = kernel(0);
        let mut container = thread_container(1);
        kernel.initialise_thread_pool(container.as_mut_slice()).unwrap();

        assert_eq!(kernel.free_thread(ThreadId::MAIN), Err(KernelError::ThreadInvalid));
        assert_eq!(kernel.suspend_thread(ThreadId::MAIN), Err(KernelError::ThreadInvalid));
        assert_eq!(kernel.resume_thread(ThreadId::MAIN), Err(KernelError::ThreadInvalid));
        assert_eq!(kernel.abort_thread(), Err(KernelError::ThreadInvalid));
    }

    #[test]
    fn test_unknown_ids_are_invalid() {
        let kernel = kernel(1);
        let mut container = thread_container(4);
        kernel.initialise_thread_pool(container.as_mut_slice()).unwrap();

        for raw in [0x0101, 0x0104, 0x0105, 0x0201, 0x01FF] {
            let id = ThreadId::from_raw(raw);
            assert_eq!(kernel.free_thread(id), Err(KernelError::ThreadInvalid));
            assert_eq!(kernel.suspend_thread(id), Err(KernelError::ThreadInvalid));
            assert_eq!(kernel.resume_thread(id), Err(KernelError::ThreadInvalid));
            assert_eq!(kernel.thread_state(id), Err(KernelError::ThreadInvalid));
        }
    }

    #[test]
    fn test_freed_id_is_invalid() {
        let kernel = kernel(0);
        let mut container = thread_container(1);
        kernel.initialise_thread_pool(container.as_mut_slice()).unwrap();
        let id = kernel
            .get_thread(Box::new(|| {}), StackDescriptor::with_size(1024), 1)
            .unwrap();

        kernel.free_thread(id).unwrap();
        assert_eq!(kernel.thread_state(id), Err(KernelError::ThreadInvalid));
        assert_eq!(kernel.free_thread(id), Err(KernelError::ThreadInvalid));
    }

    #[test]
    fn test_thread_reports_itself_running() {
        let kernel = kernel(0);
        let mut container = thread_container(1);
        kernel.initialise_thread_pool(container.as_mut_slice()).unwrap();

        let handoff = Handoff::new();
        let reporter = handoff.clone();
        let inner = kernel.clone();
        let id = kernel
            .get_thread(
                Box::new(move || {
                    let me = inner.current_thread_id().unwrap();
                    reporter.set((
                        inner.thread_state(me),
                        inner.thread_state(ThreadId::MAIN),
                    ));
                }),
                StackDescriptor::with_size(1024),
                1,
            )
            .unwrap();
        kernel.resume_thread(id).unwrap();

        let (own, main) = handoff.wait(WAIT).unwrap();
        assert_eq!(own, Ok(ThreadState::Running));
        assert_eq!(main, Ok(ThreadState::Ready));
    }

    #[test]
    fn test_wait_for_event_rejections() {
        let kernel = kernel(0);
        assert_eq!(
            kernel.wait_for_event(SysEvent::ThreadSync),
            Err(KernelError::InvalidOperation)
        );
        assert_eq!(
            kernel.wait_for_event(SysEvent::Timer),
            Err(KernelError::UnsupportedEvent)
        );
        assert_eq!(
            kernel.wait_for_event(SysEvent::from_raw(9)),
            Err(KernelError::UnsupportedEvent)
        );

        kernel.enter_critical_section().unwrap();
        assert_eq!(
            kernel.wait_for_event(SysEvent::IpcMessage),
            Err(KernelError::CannotSleepInCs)
        );
        kernel.exit_critical_section().unwrap();
    }

    #[test]
    fn test_pending_event_surface() {
        let kernel = kernel(0);
        assert_eq!(
            kernel.is_pending_event(SysEvent::from_raw(12)),
            Err(KernelError::UnsupportedEvent)
        );
        assert_eq!(
            kernel.clear_pending_event(SysEvent::from_raw(12)),
            Err(KernelError::NotSupported)
        );
    }

    #[test]
    fn test_notify_wakes_waiting_thread() {
        let kernel = kernel(0);
        let mut container = thread_container(1);
        kernel.initialise_thread_pool(container.as_mut_slice()).unwrap();

        let handoff = Handoff::new();
        let reporter = handoff.clone();
        let inner = kernel.clone();
        let id = kernel
            .get_thread(
                Box::new(move || reporter.set(inner.wait_for_event(SysEvent::IpcMessage))),
                StackDescriptor::with_size(1024),
                1,
            )
            .unwrap();
        kernel.resume_thread(id).unwrap();

        assert!(wait_until(WAIT, || kernel.thread_state(id) == Ok(ThreadState::Waiting)));
        assert_eq!(kernel.shared.notify(SysEvent::Timer, None), 0);
        let notified = |e: &SyscallAuditEvent| matches!(e.event, SyscallEvent::EventNotified { .. });
        assert_eq!(kernel.audit_log().count_events(notified), 0);

        assert_eq!(kernel.shared.notify(SysEvent::from_raw(1), None), 1);
        assert_eq!(handoff.wait(WAIT), Some(Ok(())));
        assert_eq!(kernel.audit_log().count_events(notified), 1);
    }

    #[test]
    fn test_sleep_rules() {
        let kernel = kernel(0);
        assert_eq!(kernel.sleep(MAX_SLEEP_MS + 1), Err(KernelError::InvalidParameter));
        assert_eq!(kernel.sleep(1), Ok(()));

        kernel.enter_critical_section().unwrap();
        assert_eq!(kernel.sleep(1), Err(KernelError::CannotSleepInCs));
        kernel.exit_critical_section().unwrap();
    }

    #[test]
    fn test_nested_critical_section_flag() {
        let kernel = kernel(0);
        kernel.enter_critical_section().unwrap();
        kernel.enter_critical_section().unwrap();
        kernel.exit_critical_section().unwrap();

        // Nested exit clears the single flag while the lock is still held.
        assert_eq!(kernel.critical_section_depth(), 1);
        assert_eq!(kernel.sleep(1), Ok(()));

        kernel.exit_critical_section().unwrap();
        assert_eq!(kernel.critical_section_depth(), 0);
    }

    #[test]
    fn test_sync_pool_rules() {
        let kernel = kernel(0);
        assert_eq!(kernel.get_semaphore(1), Err(KernelError::NotInitialised));

        let mut container = ContainerBuffer::new(sync_container_size(2));
        kernel.initialise_sync_pool(container.as_mut_slice()).unwrap();
        assert_eq!(
            kernel.initialise_sync_pool(container.as_mut_slice()),
            Err(KernelError::AlreadyInitialised)
        );

        assert_eq!(kernel.get_semaphore(0), Err(KernelError::InvalidParameter));
        assert_eq!(kernel.get_semaphore(33), Err(KernelError::InvalidParameter));

        let semaphore = kernel.get_semaphore(2).unwrap();
        let mutex = kernel.get_mutex().unwrap();
        assert_eq!(kernel.get_mutex(), Err(KernelError::NoSlotAvailable));

        kernel.wait_semaphore(semaphore).unwrap();
        kernel.try_wait_semaphore(semaphore).unwrap();
        assert_eq!(
            kernel.try_wait_semaphore(semaphore),
            Err(KernelError::WaitNotPerformed)
        );
        kernel.release_semaphore(semaphore).unwrap();
        assert_eq!(kernel.semaphore_available(semaphore), Some(1));

        kernel.wait_mutex(mutex).unwrap();
        assert_eq!(kernel.try_wait_mutex(mutex), Err(KernelError::WaitNotPerformed));
        kernel.release_mutex(mutex).unwrap();
        kernel.release_mutex(mutex).unwrap();
        assert_eq!(kernel.semaphore_available(mutex), Some(1));

        assert_eq!(kernel.wait_semaphore(SyncId(7)), Err(KernelError::ThreadSyncInvalid));
        assert_eq!(kernel.release_mutex(SyncId(2)), Err(KernelError::ThreadSyncInvalid));
    }

    #[test]
    fn test_thread_pool_initialisation_rules() {
        let kernel = kernel(0);
        let mut empty = ContainerBuffer::new(0);
        let mut too_many = thread_container(MAX_THREAD_COUNT + 1);
        let mut ragged = ContainerBuffer::new(THREAD_SLOT_SIZE + 4);
        let mut misaligned = ContainerBuffer::misaligned(thread_container_size(2));
        for rejected in [&mut empty, &mut too_many, &mut ragged] {
            assert_eq!(
                kernel.initialise_thread_pool(rejected.as_mut_slice()),
                Err(KernelError::InvalidContainerSize)
            );
        }
        assert_eq!(
            kernel.initialise_thread_pool(misaligned.as_mut_slice()),
            Err(KernelError::InvalidOffsetAlignment)
        );
        assert_eq!(
            kernel.get_thread(Box::new(|| {}), StackDescriptor::with_size(1024), 1),
            Err(KernelError::NotInitialised)
        );

        let mut container = thread_container(MAX_THREAD_COUNT);
        kernel.initialise_thread_pool(container.as_mut_slice()).unwrap();
        let mut second = thread_container(1);
        assert_eq!(
            kernel.initialise_thread_pool(second.as_mut_slice()),
            Err(KernelError::AlreadyInitialised)
        );
        assert_eq!(
            kernel.initialise_thread_pool(misaligned.as_mut_slice()),
            Err(KernelError::AlreadyInitialised)
        );
    }

    #[test]
    fn test_mailbox_initialisation_rules() {
        let transport = Arc::new(MemoryTransport::new());
        let kernel = kernel_on(0, Arc::clone(&transport) as Arc<dyn Transport>);
        let mut too_many = mailbox_container(MAX_MAILBOX_CAPACITY + 1);
        let mut ragged = ContainerBuffer::new(MESSAGE_SLOT_SIZE * 2 + 4);
        let mut misaligned = ContainerBuffer::misaligned(mailbox_container_size(2));
        for rejected in [&mut too_many, &mut ragged] {
            assert_eq!(
                kernel.initialise_mailbox(rejected.as_mut_slice()),
                Err(KernelError::InvalidContainerSize)
            );
        }
        assert_eq!(
            kernel.initialise_mailbox(misaligned.as_mut_slice()),
            Err(KernelError::InvalidOffsetAlignment)
        );

        // Rejected containers leave nothing bound.
        assert!(!transport.is_bound(ExecutionIndex(0)));
        assert!(!kernel.is_mailbox_initialised());

        let mut container = mailbox_container(MAX_MAILBOX_CAPACITY);
        kernel.initialise_mailbox(container.as_mut_slice()).unwrap();
        assert!(transport.is_bound(ExecutionIndex(0)));

        let mut second = mailbox_container(1);
        assert_eq!(
            kernel.initialise_mailbox(second.as_mut_slice()),
            Err(KernelError::AlreadyInitialised)
        );
        assert!(transport.is_bound(ExecutionIndex(0)));
    }

    #[test]
    fn test_mailbox_requires_initialisation() {
        let kernel = kernel(0);
        let mut buf = [0u8; 8];
        assert_eq!(kernel.receive_message(&mut buf), Err(KernelError::NotInitialised));
        assert_eq!(kernel.is_message_received(), Err(KernelError::NotInitialised));
        assert_eq!(
            kernel.send_message(ExecutionIndex(1), b"x"),
            Err(KernelError::NotInitialised)
        );
    }

    #[test]
    fn test_log_sink_receives_lines() {
        let kernel = kernel(3);
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = Arc::clone(&lines);
        kernel.set_log_sink(Arc::new(move |index, line| {
            sink_lines.lock().push(format!("{}: {}", index.as_u8(), line));
        }));

        kernel.log("hello");
        assert_eq!(*lines.lock(), vec!["3: hello".to_string()]);
    }

    #[test]
    fn test_unsupported_surface() {
        let kernel = kernel(0);
        let api: &dyn SysCallApi = &kernel;
        let mut buf = [0u8; 16];
        assert_eq!(api.initialise_timer(&mut buf), Err(KernelError::NotSupported));
        assert_eq!(api.wdt_feed(), Err(KernelError::NotSupported));
        assert_eq!(api.storage_read(0, &mut buf), Err(KernelError::NotSupported));
        assert_eq!(api.wait_resource(1), Err(KernelError::NotSupported));
        assert_eq!(api.execution_index_by_value(3), Err(KernelError::NotSupported));
        assert_eq!(api.set_main_thread_priority(2), Err(KernelError::NotSupported));
    }

    #[test]
    fn test_unsupported_call_is_cancellation_point() {
        let kernel = kernel(0);
        let mut container = thread_container(1);
        kernel.initialise_thread_pool(container.as_mut_slice()).unwrap();

        struct Unwound(Handoff<bool>);
        impl Drop for Unwound {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let fed = Handoff::new();
        let reporter = fed.clone();
        let unwound = Handoff::new();
        let guard = Unwound(unwound.clone());
        let inner = kernel.clone();
        let id = kernel
            .get_thread(
                Box::new(move || {
                    let _guard = guard;
                    loop {
                        reporter.set(inner.wdt_feed());
                    }
                }),
                StackDescriptor::with_size(1024),
                1,
            )
            .unwrap();
        kernel.resume_thread(id).unwrap();
        assert_eq!(fed.wait(WAIT), Some(Err(KernelError::NotSupported)));

        kernel.free_thread(id).unwrap();
        assert_eq!(unwound.wait(WAIT), Some(true));
    }

    #[test]
    fn test_execution_index_by_name() {
        let kernel = kernel(0);
        assert_eq!(kernel.execution_index_by_name("Exec4"), Ok(ExecutionIndex(4)));
        assert_eq!(kernel.execution_index_by_name("nobody"), Err(KernelError::NotFound));
    }

    #[test]
    fn test_audit_records_thread_lifecycle() {
        let kernel = kernel(0);
        let mut container = thread_container(1);
        kernel.initialise_thread_pool(container.as_mut_slice()).unwrap();
        let id = kernel
            .get_thread(Box::new(|| {}), StackDescriptor::with_size(1024), 4)
            .unwrap();
        kernel.free_thread(id).unwrap();

        let log = kernel.audit_log();
        assert!(log.has_event(|e| e.event == SyscallEvent::ThreadPoolInitialised { capacity: 1 }));
        assert!(log.has_event(|e| e.event == SyscallEvent::ThreadCreated { thread: id, priority: 4 }));
        assert_eq!(
            log.count_events(|e| e.event == SyscallEvent::ThreadFreed { thread: id }),
            1
        );
        assert!(log.events().all(|e| e.caller == Some(ThreadId::MAIN)));
    }

    #[test]
    fn test_audit_log_keeps_latest_records() {
        let config = SimulationConfig::new(ExecutionIndex(0)).with_audit_capacity(8);
        let kernel = SimulatedKernel::new(config, Arc::new(MemoryTransport::new())).unwrap();
        let mut container = thread_container(1);
        kernel.initialise_thread_pool(container.as_mut_slice()).unwrap();

        for _ in 0..50 {
            let id = kernel
                .get_thread(Box::new(|| {}), StackDescriptor::with_size(1024), 1)
                .unwrap();
            kernel.free_thread(id).unwrap();
        }

        let log = kernel.audit_log();
        assert_eq!(log.len(), 8);
        assert!(!log.has_event(|e| matches!(e.event, SyscallEvent::ThreadPoolInitialised { .. })));
        assert_eq!(
            log.count_events(|e| matches!(e.event, SyscallEvent::ThreadFreed { .. })),
            4
        );
    }
}
