//! # Resources
//!
//! This crate provides the fixed-capacity resource pool every kernel pool
//! (threads, sync primitives, mailbox slots) is built on.
//!
//! ## Philosophy
//!
//! - **Resources are finite and must be explicit**: capacity is fixed by the
//!   container the caller hands in, never grown
//! - **Initialisation happens once**: a second `initialise` is rejected
//! - **Validation before mutation**: a rejected container leaves the pool
//!   untouched
//! - **Stable slot indices**: no compaction, a slot keeps its index for its
//!   whole lifetime
//!
//! ## Core Concepts
//!
//! - [`PoolLayout`]: slot size and hard slot-count ceiling of a pool kind
//! - [`SlotPool`]: arena of slots with first-fit allocation
//! - [`PoolError`]: configuration and exhaustion failures

use core_types::{ContainerRegion, WORD_ALIGNMENT};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised by pool initialisation and allocation
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolError {
    /// The pool was initialised before
    #[error("Pool already initialised")]
    AlreadyInitialised,

    /// Container size is zero, not a slot multiple, or above the ceiling
    #[error("Invalid container size")]
    InvalidContainerSize,

    /// Container base address is not word aligned
    #[error("Container offset is not word aligned")]
    InvalidOffsetAlignment,

    /// The pool has not been initialised
    #[error("Pool not initialised")]
    NotInitialised,

    /// Every slot is occupied
    #[error("No slot available")]
    NoSlotAvailable,
}

/// Slot geometry of a pool kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLayout {
    /// Bytes the ABI reserves per slot
    pub slot_size: usize,
    /// Hard ceiling on the number of slots
    pub max_slots: usize,
}

impl PoolLayout {
    /// Creates a layout
    pub const fn new(slot_size: usize, max_slots: usize) -> Self {
        Self {
            slot_size,
            max_slots,
        }
    }

    /// Bytes a container for `slots` slots must have
    pub const fn container_size(&self, slots: usize) -> usize {
        slots * self.slot_size
    }

    /// Validates a container description and returns the resulting capacity
    pub fn validate(&self, region: &ContainerRegion) -> Result<usize, PoolError> {
        if region.len == 0
            || region.len < self.slot_size
            || region.len % self.slot_size != 0
            || region.len / self.slot_size > self.max_slots
        {
            return Err(PoolError::InvalidContainerSize);
        }

        if region.base % WORD_ALIGNMENT != 0 {
            return Err(PoolError::InvalidOffsetAlignment);
        }

        Ok(region.len / self.slot_size)
    }
}

impl fmt::Display for PoolLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes x {} slots max", self.slot_size, self.max_slots)
    }
}

/// Fixed-capacity arena of slots
///
/// The pool is created uninitialised; `initialise` binds it to a caller
/// container, which fixes the capacity. Allocation is a first-fit linear
/// scan, lookups are by slot index.
#[derive(Debug)]
pub struct SlotPool<T> {
    layout: PoolLayout,
    region: Option<ContainerRegion>,
    slots: Vec<Option<T>>,
    count: usize,
}

impl<T> SlotPool<T> {
    /// Creates an uninitialised pool
    pub fn new(layout: PoolLayout) -> Self {
        Self {
            layout,
            region: None,
            slots: Vec::new(),
            count: 0,
        }
    }

    /// Returns the pool layout
    pub fn layout(&self) -> PoolLayout {
        self.layout
    }

    /// Checks whether the pool was initialised
    pub fn is_initialised(&self) -> bool {
        self.region.is_some()
    }

    /// Returns the container the pool was initialised with
    pub fn region(&self) -> Option<ContainerRegion> {
        self.region
    }

    /// Number of slots (0 before initialisation)
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    pub fn count(&self) -> usize {
        self.count
    }

    /// Checks a container without touching the pool
    pub fn check(&self, container: &[u8]) -> Result<usize, PoolError> {
        if self.is_initialised() {
            return Err(PoolError::AlreadyInitialised);
        }
        self.layout.validate(&ContainerRegion::from_slice(container))
    }

    /// Binds the pool to a caller container
    ///
    /// On success the container is zeroed and the capacity is fixed to the
    /// number of whole slots it holds.
    pub fn initialise(&mut self, container: &mut [u8]) -> Result<usize, PoolError> {
        let capacity = self.check(container)?;

        container.fill(0);
        self.region = Some(ContainerRegion::from_slice(container));
        self.slots = (0..capacity).map(|_| None).collect();
        self.count = 0;

        Ok(capacity)
    }

    /// Places `value` in the first free slot
    pub fn allocate(&mut self, value: T) -> Result<usize, PoolError> {
        self.allocate_with(|_| Ok::<T, PoolError>(value))
    }

    /// Places the value built by `make` in the first free slot
    ///
    /// `make` receives the slot index so ids derived from it can be baked
    /// into the value. If `make` fails the slot stays free.
    pub fn allocate_with<E, F>(&mut self, make: F) -> Result<usize, E>
    where
        E: From<PoolError>,
        F: FnOnce(usize) -> Result<T, E>,
    {
        if !self.is_initialised() {
            return Err(PoolError::NotInitialised.into());
        }
        if self.count >= self.slots.len() {
            return Err(PoolError::NoSlotAvailable.into());
        }

        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(PoolError::NoSlotAvailable)?;

        self.slots[index] = Some(make(index)?);
        self.count += 1;
        Ok(index)
    }

    /// Returns the value in slot `index`
    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)?.as_ref()
    }

    /// Returns the value in slot `index` mutably
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index)?.as_mut()
    }

    /// Frees slot `index` and returns what it held
    pub fn release(&mut self, index: usize) -> Option<T> {
        let value = self.slots.get_mut(index)?.take()?;
        self.count -= 1;
        Some(value)
    }

    /// Finds the first occupied slot matching `predicate`
    pub fn position<F>(&self, predicate: F) -> Option<usize>
    where
        F: Fn(&T) -> bool,
    {
        self.iter()
            .find(|(_, value)| predicate(value))
            .map(|(index, _)| index)
    }

    /// Iterates over occupied slots
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (index, value)))
    }

    /// Iterates mutably over occupied slots
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_mut().map(|value| (index, value)))
    }
}
