//! Microservice request/response packages
//!
//! A package is an 8-byte header followed by an operation-specific payload.
//! The header `length` field counts the whole package, header included.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while decoding a service package
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PackageError {
    #[error("Package truncated: {0} bytes")]
    Truncated(usize),

    /// Header length disagrees with the bytes received
    #[error("Package length mismatch: header says {declared}, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Package too large: {0} bytes")]
    TooLarge(usize),
}

/// One microservice request or response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePackage {
    /// Operation id, echoed back in the response
    pub operation: i16,
    /// Operation status (0 in requests)
    pub status: i16,
    /// Operation payload
    pub payload: Vec<u8>,
}

impl ServicePackage {
    /// Encoded header size in bytes.
    pub const HEADER_SIZE: usize = 8;

    /// Creates a request for `operation`
    pub fn request(operation: i16, payload: Vec<u8>) -> Self {
        Self {
            operation,
            status: 0,
            payload,
        }
    }

    /// Creates the response to `request`
    pub fn response(request: &ServicePackage, status: i16, payload: Vec<u8>) -> Self {
        Self {
            operation: request.operation,
            status,
            payload,
        }
    }

    /// Total encoded length
    pub fn len(&self) -> usize {
        Self::HEADER_SIZE + self.payload.len()
    }

    /// Checks whether the package carries no payload
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Encodes the package
    pub fn encode(&self) -> Result<Vec<u8>, PackageError> {
        let length = u16::try_from(self.len()).map_err(|_| PackageError::TooLarge(self.len()))?;
        let mut bytes = Vec::with_capacity(self.len());
        bytes.extend_from_slice(&self.operation.to_le_bytes());
        bytes.extend_from_slice(&self.status.to_le_bytes());
        bytes.extend_from_slice(&length.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        Ok(bytes)
    }

    /// Decodes a package, ignoring bytes past the declared length
    pub fn decode(bytes: &[u8]) -> Result<Self, PackageError> {
        if bytes.len() < Self::HEADER_SIZE {
            return Err(PackageError::Truncated(bytes.len()));
        }

        let operation = i16::from_le_bytes([bytes[0], bytes[1]]);
        let status = i16::from_le_bytes([bytes[2], bytes[3]]);
        let declared = u16::from_le_bytes([bytes[4], bytes[5]]) as usize;

        if declared < Self::HEADER_SIZE || declared > bytes.len() {
            return Err(PackageError::LengthMismatch {
                declared,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            operation,
            status,
            payload: bytes[Self::HEADER_SIZE..declared].to_vec(),
        })
    }
}
