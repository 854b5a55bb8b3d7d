//! # Core Types
//!
//! This crate defines the fundamental types shared by the simulated kernel,
//! the ABI surface and the IPC layer.
//!
//! ## Key Types
//!
//! - [`ExecutionIndex`]: Index of an isolated execution (simulated container)
//! - [`ThreadId`]: ABI-encoded thread identity
//! - [`SyncId`]: Identifier of a semaphore or mutex
//! - [`SysEvent`]: Closed set of waitable system events
//! - [`ContainerRegion`] / [`ContainerBuffer`]: Caller-supplied pool memory

pub mod container;
pub mod event;
pub mod ids;

pub use container::{ContainerBuffer, ContainerRegion, WORD_ALIGNMENT};
pub use event::{RawEvent, SysEvent, MAX_SYS_EVENT_COUNT};
pub use ids::{ExecutionIndex, SyncId, ThreadId, MAX_EXECUTION_COUNT};
