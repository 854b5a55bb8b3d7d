//! # Container Memory
//!
//! Pools are backed by memory the calling execution supplies. The kernel
//! only needs a description of that memory (base address and length) to
//! validate it; the slots themselves live in the kernel's own arena.
//!
//! - [`ContainerRegion`]: base + length description of a caller container
//! - [`ContainerBuffer`]: owned, word-aligned backing memory for tests and
//!   harnesses (the `SYS_INITIALISE_*` static-array analogue)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Alignment every container base address must satisfy.
pub const WORD_ALIGNMENT: usize = std::mem::size_of::<u32>();

/// Description of a caller-supplied container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerRegion {
    /// Start address of the container
    pub base: usize,
    /// Length of the container in bytes
    pub len: usize,
}

impl ContainerRegion {
    /// Describes an existing slice
    pub fn from_slice(container: &[u8]) -> Self {
        Self {
            base: container.as_ptr() as usize,
            len: container.len(),
        }
    }

    /// Checks whether the base address is word aligned
    pub fn is_word_aligned(&self) -> bool {
        self.base % WORD_ALIGNMENT == 0
    }

    /// Number of whole slots of `slot_size` bytes the region holds
    pub fn slot_count(&self, slot_size: usize) -> usize {
        if slot_size == 0 {
            0
        } else {
            self.len / slot_size
        }
    }
}

impl fmt::Display for ContainerRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "container:{:#x}+{}", self.base, self.len)
    }
}

/// Owned container memory with a controlled start alignment
///
/// The buffer over-allocates by one word and picks an offset so that the
/// exposed slice starts on a word boundary, or deliberately one byte past
/// it for misalignment tests.
#[derive(Debug, Clone)]
pub struct ContainerBuffer {
    storage: Vec<u8>,
    offset: usize,
    len: usize,
}

impl ContainerBuffer {
    /// Allocates a word-aligned container of `len` bytes
    pub fn new(len: usize) -> Self {
        Self::with_skew(len, 0)
    }

    /// Allocates a container of `slots * slot_size` bytes
    pub fn for_slots(slots: usize, slot_size: usize) -> Self {
        Self::new(slots * slot_size)
    }

    /// Allocates a container whose start is one byte past a word boundary
    pub fn misaligned(len: usize) -> Self {
        Self::with_skew(len, 1)
    }

    fn with_skew(len: usize, skew: usize) -> Self {
        let storage = vec![0u8; len + 2 * WORD_ALIGNMENT];
        let aligned = match storage.as_ptr().align_offset(WORD_ALIGNMENT) {
            offset if offset < WORD_ALIGNMENT => offset,
            _ => 0,
        };
        Self {
            storage,
            offset: aligned + skew,
            len,
        }
    }

    /// Returns the container length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks whether the container is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the container contents
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.offset..self.offset + self.len]
    }

    /// Returns the container contents mutably (what the pools consume)
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage[self.offset..self.offset + self.len]
    }

    /// Describes the container
    pub fn region(&self) -> ContainerRegion {
        ContainerRegion::from_slice(self.as_slice())
    }
}
