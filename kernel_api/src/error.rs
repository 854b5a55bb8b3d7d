//! Kernel error types
//!
//! Every syscall reports one status drawn from a single shared enumeration.
//! Success is `Ok(..)`; every other status is a [`KernelError`] variant.
//! Pre-compiled clients branch on the numeric value, so [`KernelError::code`]
//! is part of the ABI.

use resources::PoolError;
use thiserror::Error;

/// Numeric status of a successful call.
pub const STATUS_SUCCESS: u32 = 0;

/// Errors that can occur when interacting with the kernel
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Hash)]
pub enum KernelError {
    /// Generic failure, including host-primitive failures
    #[error("Operation failed")]
    Fail,

    #[error("Invalid operation")]
    InvalidOperation,

    #[error("Undefined operation")]
    UndefinedOperation,

    #[error("Invalid parameter")]
    InvalidParameter,

    #[error("Invalid access")]
    InvalidAccess,

    #[error("Invalid size")]
    InvalidSize,

    /// Event number outside the modelled set
    #[error("Unsupported event")]
    UnsupportedEvent,

    #[error("Not initialised")]
    NotInitialised,

    #[error("Not found")]
    NotFound,

    /// Declared surface without a host implementation
    #[error("Not supported")]
    NotSupported,

    #[error("Operation timed out")]
    Timeout,

    #[error("Invalid container size")]
    InvalidContainerSize,

    #[error("Container offset is not word aligned")]
    InvalidOffsetAlignment,

    #[error("Already initialised")]
    AlreadyInitialised,

    #[error("No slot available")]
    NoSlotAvailable,

    /// Blocking call made while inside the critical section
    #[error("Cannot sleep inside the critical section")]
    CannotSleepInCs,

    #[error("Authentication failed")]
    AuthenticationFail,

    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Non-blocking wait found the primitive unavailable
    #[error("Wait not performed")]
    WaitNotPerformed,

    #[error("Not available")]
    NotAvailable,

    #[error("Message box full")]
    MessageBoxFull,

    #[error("Message box empty")]
    MessageBoxEmpty,

    #[error("Invalid destination")]
    InvalidDestination,

    /// Destination listener unreachable within the connect window
    #[error("Destination does not have a message box")]
    DestinationNotHaveMessageBox,

    #[error("Invalid message")]
    InvalidMessage,

    /// Unknown, freed or protected thread id
    #[error("Invalid thread")]
    ThreadInvalid,

    /// Priority out of range or priority gate violated
    #[error("Invalid thread priority")]
    ThreadInvalidPriority,

    #[error("Thread already suspended")]
    ThreadAlreadySuspended,

    #[error("Thread already running")]
    ThreadAlreadyRunning,

    #[error("Waiting thread cannot yield")]
    ThreadWaitingCannotYield,

    #[error("Invalid thread stack size")]
    ThreadInvalidStackSize,

    #[error("Invalid thread stack alignment")]
    ThreadInvalidStackAlignment,

    /// Unknown semaphore or mutex id
    #[error("Invalid thread sync primitive")]
    ThreadSyncInvalid,

    #[error("No upgrade")]
    UpgradeNoUpgrade,

    #[error("Upgrade: invalid entity type")]
    UpgradeInvalidEntityType,

    #[error("Upgrade: invalid package offset")]
    UpgradeInvalidPackageOffset,

    #[error("Upgrade: invalid state")]
    UpgradeInvalidState,

    #[error("Upgrade: insufficient memory")]
    UpgradeInsufficientMemory,

    #[error("Upgrade: invalid version")]
    UpgradeInvalidVersion,

    #[error("Upgrade: invalid size")]
    UpgradeInvalidSize,

    #[error("Upgrade: invalid index")]
    UpgradeInvalidIndex,

    #[error("Upgrade: invalid image storage type")]
    UpgradeInvalidImageStorageType,

    #[error("Upgrade: invalid encryption type")]
    UpgradeInvalidEncryptionType,

    #[error("Upgrade: low level error")]
    UpgradeLowLevelError,

    #[error("Life cycle: invalid state")]
    LifeCycleInvalidState,

    #[error("Life cycle: invalid provisioning data")]
    LifeCycleInvalidProvisioningData,
}

const CODES: &[(KernelError, u32)] = &[
    (KernelError::Fail, 1),
    (KernelError::InvalidOperation, 2),
    (KernelError::UndefinedOperation, 3),
    (KernelError::InvalidParameter, 4),
    (KernelError::InvalidAccess, 5),
    (KernelError::InvalidSize, 6),
    (KernelError::UnsupportedEvent, 7),
    (KernelError::NotInitialised, 8),
    (KernelError::NotFound, 9),
    (KernelError::NotSupported, 10),
    (KernelError::Timeout, 11),
    (KernelError::InvalidContainerSize, 12),
    (KernelError::InvalidOffsetAlignment, 13),
    (KernelError::AlreadyInitialised, 14),
    (KernelError::NoSlotAvailable, 15),
    (KernelError::CannotSleepInCs, 16),
    (KernelError::AuthenticationFail, 17),
    (KernelError::InvalidCredentials, 18),
    (KernelError::WaitNotPerformed, 19),
    (KernelError::NotAvailable, 20),
    (KernelError::MessageBoxFull, 50),
    (KernelError::MessageBoxEmpty, 51),
    (KernelError::InvalidDestination, 52),
    (KernelError::DestinationNotHaveMessageBox, 53),
    (KernelError::InvalidMessage, 54),
    (KernelError::ThreadInvalid, 70),
    (KernelError::ThreadInvalidPriority, 71),
    (KernelError::ThreadAlreadySuspended, 72),
    (KernelError::ThreadAlreadyRunning, 73),
    (KernelError::ThreadWaitingCannotYield, 74),
    (KernelError::ThreadInvalidStackSize, 75),
    (KernelError::ThreadInvalidStackAlignment, 76),
    (KernelError::ThreadSyncInvalid, 77),
    (KernelError::UpgradeNoUpgrade, 90),
    (KernelError::UpgradeInvalidEntityType, 91),
    (KernelError::UpgradeInvalidPackageOffset, 92),
    (KernelError::UpgradeInvalidState, 93),
    (KernelError::UpgradeInsufficientMemory, 94),
    (KernelError::UpgradeInvalidVersion, 95),
    (KernelError::UpgradeInvalidSize, 96),
    (KernelError::UpgradeInvalidIndex, 97),
    (KernelError::UpgradeInvalidImageStorageType, 98),
    (KernelError::UpgradeInvalidEncryptionType, 99),
    (KernelError::UpgradeLowLevelError, 100),
    (KernelError::LifeCycleInvalidState, 110),
    (KernelError::LifeCycleInvalidProvisioningData, 111),
];

impl KernelError {
    /// Returns the ABI status value of this error
    pub fn code(&self) -> u32 {
        CODES
            .iter()
            .find(|(error, _)| error == self)
            .map(|(_, code)| *code)
            .unwrap_or(1)
    }

    /// Decodes an ABI status value (`None` for success and unknown values)
    pub fn from_code(code: u32) -> Option<Self> {
        CODES
            .iter()
            .find(|(_, value)| *value == code)
            .map(|(error, _)| *error)
    }
}

impl From<PoolError> for KernelError {
    fn from(error: PoolError) -> Self {
        match error {
            PoolError::AlreadyInitialised => KernelError::AlreadyInitialised,
            PoolError::InvalidContainerSize => KernelError::InvalidContainerSize,
            PoolError::InvalidOffsetAlignment => KernelError::InvalidOffsetAlignment,
            PoolError::NotInitialised => KernelError::NotInitialised,
            PoolError::NoSlotAvailable => KernelError::NoSlotAvailable,
        }
    }
}

/// Maps a syscall result onto the status value a pre-compiled client sees
pub fn status_code<T>(result: &Result<T, KernelError>) -> u32 {
    match result {
        Ok(_) => STATUS_SUCCESS,
        Err(error) => error.code(),
    }
}
