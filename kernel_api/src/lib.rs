//! # Kernel API
//!
//! This crate defines the syscall surface client code is compiled against.
//!
//! ## Philosophy
//!
//! The kernel provides **mechanisms**, not policies:
//! - Threads from a fixed, caller-supplied pool (not dynamic spawning)
//! - Message passing between executions (not shared memory)
//! - Counting semaphores from a fixed pool
//! - One status taxonomy for every call
//!
//! ## Modules
//!
//! - [`abi`]: container sizes, limits and the stack region rule
//! - [`error`]: [`KernelError`] and its numeric status values
//! - [`kernel`]: the [`SysCallApi`] trait and its value types

pub mod abi;
pub mod error;
pub mod kernel;

pub use error::{status_code, KernelError, STATUS_SUCCESS};
pub use kernel::{
    MessageStatus, ReceivedMessage, StackDescriptor, SysCallApi, ThreadEntry, ThreadState,
};
