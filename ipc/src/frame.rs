//! Wire framing of inter-execution messages
//!
//! Every message travels as `header{length: u32, sender_id: u32} || payload`,
//! both header fields little endian.

use core_types::ExecutionIndex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while decoding a frame header
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer than [`FrameHeader::SIZE`] bytes
    #[error("Frame header truncated: {0} bytes")]
    Truncated(usize),

    /// Declared payload length is zero or above the limit
    #[error("Invalid frame length: {0}")]
    InvalidLength(u32),

    /// Sender id does not fit an execution index
    #[error("Invalid frame sender: {0}")]
    InvalidSender(u32),
}

/// Header preceding each payload on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    /// Payload length in bytes
    pub length: u32,
    /// Execution index of the sender
    pub sender_id: u32,
}

impl FrameHeader {
    /// Encoded header size in bytes.
    pub const SIZE: usize = 8;

    /// Creates the header of a payload sent by `sender`
    pub fn new(sender: ExecutionIndex, length: u32) -> Self {
        Self {
            length,
            sender_id: sender.as_u8() as u32,
        }
    }

    /// Encodes the header
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..].copy_from_slice(&self.sender_id.to_le_bytes());
        bytes
    }

    /// Decodes a header from the first [`FrameHeader::SIZE`] bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < Self::SIZE {
            return Err(FrameError::Truncated(bytes.len()));
        }
        let mut length = [0u8; 4];
        let mut sender = [0u8; 4];
        length.copy_from_slice(&bytes[..4]);
        sender.copy_from_slice(&bytes[4..Self::SIZE]);
        Ok(Self {
            length: u32::from_le_bytes(length),
            sender_id: u32::from_le_bytes(sender),
        })
    }

    /// Checks the declared length against `max_len` and returns the sender
    pub fn validate(&self, max_len: usize) -> Result<ExecutionIndex, FrameError> {
        if self.length == 0 || self.length as usize > max_len {
            return Err(FrameError::InvalidLength(self.length));
        }
        u8::try_from(self.sender_id)
            .map(ExecutionIndex)
            .map_err(|_| FrameError::InvalidSender(self.sender_id))
    }

    /// Sender as an execution index (truncated to the low byte)
    pub fn sender(&self) -> ExecutionIndex {
        ExecutionIndex((self.sender_id & 0xFF) as u8)
    }
}

/// Builds the complete wire image of one message
pub fn encode_frame(sender: ExecutionIndex, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader::new(sender, payload.len() as u32);
    let mut frame = Vec::with_capacity(FrameHeader::SIZE + payload.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(payload);
    frame
}
