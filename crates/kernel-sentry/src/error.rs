//! Error types for the assertion-capture runtime boundary.

use thiserror::Error;

/// Errors surfaced by [`DeviceRuntime`](crate::runtime::DeviceRuntime)
/// collaborators.
///
/// Nothing in the kernel-launch path propagates these; the registry absorbs
/// them into per-device degradation (see `registry` module docs). They exist
/// so runtime implementations can report *why* a probe or allocation failed.
#[derive(Debug, Error)]
pub enum SentryError {
    /// CUDA driver could not be initialized.
    #[error("CUDA driver initialization failed: {0}")]
    DriverInit(String),

    /// A device enumeration or attribute query failed.
    #[error("device query failed: {0}")]
    DeviceQuery(String),

    /// The host-and-device shared buffer could not be allocated.
    #[error("managed memory allocation failed: {0}")]
    AllocationFailed(String),

    /// No CUDA-capable device is available.
    #[error("no CUDA-capable device available")]
    NoDevice,
}

/// Result type for runtime-boundary operations.
pub type SentryResult<T> = Result<T, SentryError>;
