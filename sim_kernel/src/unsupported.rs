//! Platform surface without a host implementation
//!
//! Timers, the watchdog, device identity, storage, root parameters,
//! interrupt handling and shared resources exist on target kernels only.
//! Their [`kernel_api::SysCallApi`] defaults fail through
//! [`Shared::unsupported`], which still acts as a cancellation point.

use crate::threads;
use crate::Shared;
use kernel_api::KernelError;
use tracing::debug;

impl Shared {
    pub(crate) fn unsupported(&self, syscall: &'static str) -> KernelError {
        threads::checkpoint();
        debug!(execution = self.index().as_u8(), syscall, "syscall not supported");
        KernelError::NotSupported
    }
}
