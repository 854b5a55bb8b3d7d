//! # Inter-Execution Communication (IPC)
//!
//! This crate defines how executions exchange messages.
//!
//! ## Philosophy
//!
//! - **Messages, not shared memory**: executions only talk through framed
//!   messages
//! - **Bit-exact framing**: client code decodes headers itself, so layouts
//!   are fixed and little endian
//! - **Pluggable channels**: the byte channel between executions is a
//!   [`Transport`], in-process or socket based
//!
//! ## Architecture
//!
//! - [`frame`]: `{length, sender_id}` header preceding each payload
//! - [`package`]: microservice request/response package format
//! - [`transport`]: endpoints and outbound writers per execution index

pub mod frame;
pub mod package;
pub mod transport;

pub use frame::{encode_frame, FrameError, FrameHeader};
pub use package::{PackageError, ServicePackage};
pub use transport::{Endpoint, MemoryTransport, Transport};

#[cfg(unix)]
pub use transport::UnixSocketTransport;
