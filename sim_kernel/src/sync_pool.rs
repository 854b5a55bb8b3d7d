//! Semaphore and mutex pool
//!
//! A mutex is a semaphore with one permit. Semaphores start with all
//! permits available; `release` beyond `max_count` is ignored. Permits held
//! by a freed thread stay taken.

use crate::threads;
use crate::{Shared, SyscallEvent};
use core_types::SyncId;
use kernel_api::abi::{MAX_SEMAPHORE_COUNT, SYNC_POOL_LAYOUT};
use kernel_api::KernelError;
use parking_lot::{Condvar, Mutex};
use resources::SlotPool;
use std::sync::Arc;
use tracing::debug;

/// Counting semaphore bound to one pool slot
#[derive(Debug)]
pub(crate) struct Semaphore {
    max_count: u32,
    available: Mutex<u32>,
    changed: Condvar,
}

impl Semaphore {
    pub(crate) fn new(max_count: u32) -> Self {
        Self {
            max_count,
            available: Mutex::new(max_count),
            changed: Condvar::new(),
        }
    }

    /// Takes a permit; returns false if the calling pooled thread was freed
    /// while waiting
    pub(crate) fn wait(&self) -> bool {
        let mut available = self.available.lock();
        loop {
            if threads::is_terminated() {
                return false;
            }
            if *available > 0 {
                *available -= 1;
                return true;
            }
            self.changed.wait(&mut available);
        }
    }

    pub(crate) fn try_wait(&self) -> bool {
        let mut available = self.available.lock();
        if *available > 0 {
            *available -= 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn release(&self) {
        let mut available = self.available.lock();
        if *available < self.max_count {
            *available += 1;
        }
        drop(available);
        self.changed.notify_all();
    }

    pub(crate) fn available(&self) -> u32 {
        *self.available.lock()
    }

    pub(crate) fn wake_all(&self) {
        let _available = self.available.lock();
        self.changed.notify_all();
    }
}

/// Sync-primitive pool of one execution
#[derive(Debug)]
pub(crate) struct SyncPool {
    pool: Mutex<SlotPool<Arc<Semaphore>>>,
}

impl SyncPool {
    pub(crate) fn new() -> Self {
        Self {
            pool: Mutex::new(SlotPool::new(SYNC_POOL_LAYOUT)),
        }
    }

    fn lookup(&self, id: SyncId) -> Result<Arc<Semaphore>, KernelError> {
        self.pool
            .lock()
            .get(id.slot_index())
            .cloned()
            .ok_or(KernelError::ThreadSyncInvalid)
    }

    /// Permits currently available on `id`
    pub(crate) fn available(&self, id: SyncId) -> Option<u32> {
        self.lookup(id).ok().map(|semaphore| semaphore.available())
    }

    /// Wakes every blocked waiter so freed threads can unwind
    pub(crate) fn wake_all(&self) {
        let semaphores: Vec<Arc<Semaphore>> = self
            .pool
            .lock()
            .iter()
            .map(|(_, semaphore)| Arc::clone(semaphore))
            .collect();
        for semaphore in semaphores {
            semaphore.wake_all();
        }
    }
}

impl Shared {
    pub(crate) fn initialise_sync_pool(&self, container: &mut [u8]) -> Result<(), KernelError> {
        threads::checkpoint();
        let capacity = self.sync.pool.lock().initialise(container)?;
        debug!(execution = self.index().as_u8(), capacity, "sync pool initialised");
        self.record_current(SyscallEvent::SyncPoolInitialised { capacity });
        Ok(())
    }

    pub(crate) fn get_semaphore(&self, max_count: u32) -> Result<SyncId, KernelError> {
        threads::checkpoint();
        let caller = self.caller()?;

        let slot = {
            let mut pool = self.sync.pool.lock();
            if !pool.is_initialised() {
                return Err(KernelError::NotInitialised);
            }
            if max_count == 0 || max_count > MAX_SEMAPHORE_COUNT {
                return Err(KernelError::InvalidParameter);
            }
            pool.allocate(Arc::new(Semaphore::new(max_count)))?
        };

        let id = SyncId(slot as u32);
        debug!(execution = self.index().as_u8(), %id, max_count, "semaphore created");
        self.record(Some(caller), SyscallEvent::SemaphoreCreated { id, max_count });
        Ok(id)
    }

    pub(crate) fn wait_semaphore(&self, id: SyncId) -> Result<(), KernelError> {
        threads::checkpoint();
        self.caller()?;
        let semaphore = self.sync.lookup(id)?;
        if !semaphore.wait() {
            threads::terminate_current();
        }
        Ok(())
    }

    pub(crate) fn try_wait_semaphore(&self, id: SyncId) -> Result<(), KernelError> {
        threads::checkpoint();
        self.caller()?;
        let semaphore = self.sync.lookup(id)?;
        if semaphore.try_wait() {
            Ok(())
        } else {
            Err(KernelError::WaitNotPerformed)
        }
    }

    pub(crate) fn release_semaphore(&self, id: SyncId) -> Result<(), KernelError> {
        threads::checkpoint();
        self.caller()?;
        self.sync.lookup(id)?.release();
        Ok(())
    }
}
