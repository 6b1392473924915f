//! Device runtime collaborators.
//!
//! The registry treats device enumeration, capability probing, and
//! managed-memory allocation as opaque external calls behind the
//! [`DeviceRuntime`] trait. The real implementation ([`CudaRuntime`],
//! feature `cuda`) talks to the CUDA driver API; [`HostRuntime`] backs the
//! same contract with heap allocations so the registry is fully exercisable
//! without a GPU.

use std::fmt;
use std::ptr::NonNull;

use crate::error::SentryResult;
use crate::record::AssertionBuffer;

pub mod host;
pub use host::HostRuntime;

#[cfg(feature = "cuda")]
pub mod ffi;
#[cfg(feature = "cuda")]
pub mod cuda;
#[cfg(feature = "cuda")]
pub use cuda::CudaRuntime;

/// Pointer to an [`AssertionBuffer`] placed in memory addressable by both
/// host and device.
pub type SharedBufferPtr = NonNull<AssertionBuffer>;

/// External collaborator providing device discovery and managed memory.
///
/// All methods have deterministic success/failure semantics; the registry
/// never retries a failed call within one operation.
pub trait DeviceRuntime: Send + Sync + fmt::Debug {
    /// Number of devices visible to the process.
    fn device_count(&self) -> SentryResult<usize>;

    /// Index of the device the calling thread currently targets.
    fn current_device(&self) -> SentryResult<i32>;

    /// Whether `device` supports host-and-device shared (managed) memory.
    fn supports_managed_memory(&self, device: i32) -> SentryResult<bool>;

    /// Allocate a zero-initialized [`AssertionBuffer`] visible to both host
    /// and `device`. The buffer lives until
    /// [`free_assertion_buffer`](Self::free_assertion_buffer).
    fn alloc_assertion_buffer(&self, device: i32) -> SentryResult<SharedBufferPtr>;

    /// Release a buffer previously returned by
    /// [`alloc_assertion_buffer`](Self::alloc_assertion_buffer).
    ///
    /// # Safety
    ///
    /// `ptr` must originate from `alloc_assertion_buffer` on the same
    /// runtime, must not have been freed before, and no host or device code
    /// may touch the buffer afterwards.
    unsafe fn free_assertion_buffer(&self, ptr: SharedBufferPtr);
}
