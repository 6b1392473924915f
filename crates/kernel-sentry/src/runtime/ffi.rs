//! CUDA Driver API FFI bindings used by [`CudaRuntime`](super::CudaRuntime).
//!
//! Low-level bindings to libcuda.so; these are the only CUDA FFI
//! declarations in the crate. Only the handful of entry points the
//! assertion runtime needs are declared: driver init, device enumeration,
//! the managed-memory attribute probe, and managed alloc/free.

// Type aliases mirror the cuda.h spellings.
#![allow(non_camel_case_types)]

use std::os::raw::{c_int, c_uint};

/// CUDA result code. 0 = success, non-zero = error.
pub type CUresult = c_int;

/// CUDA device handle (ordinal-based).
pub type CUdevice = c_int;

/// CUDA device attribute enumeration.
pub type CUdevice_attribute = c_int;

/// Device pointer as returned by the driver allocator. With managed memory
/// this address is also valid on the host.
pub type CUdeviceptr = u64;

/// CUDA operation completed successfully.
pub const CUDA_SUCCESS: CUresult = 0;

/// CUDA driver not initialized. Call cuInit() first.
pub const CUDA_ERROR_NOT_INITIALIZED: CUresult = 3;

/// No CUDA-capable device is available.
pub const CUDA_ERROR_NO_DEVICE: CUresult = 100;

/// Invalid device ordinal.
pub const CUDA_ERROR_INVALID_DEVICE: CUresult = 101;

/// Out of memory on allocation.
pub const CUDA_ERROR_OUT_OF_MEMORY: CUresult = 2;

/// Device supports allocating managed memory (cuda.h value 83).
pub const CU_DEVICE_ATTRIBUTE_MANAGED_MEMORY: CUdevice_attribute = 83;

/// Attach flag making a managed allocation visible to all streams.
pub const CU_MEM_ATTACH_GLOBAL: c_uint = 1;

#[link(name = "cuda")]
extern "C" {
    /// Initialize the CUDA driver. Thread-safe and idempotent with flags 0.
    pub fn cuInit(flags: c_uint) -> CUresult;

    /// Get the number of CUDA devices.
    pub fn cuDeviceGetCount(count: *mut c_int) -> CUresult;

    /// Get a device attribute value. Orders of magnitude faster than the
    /// runtime-API property query.
    pub fn cuDeviceGetAttribute(
        pi: *mut c_int,
        attrib: CUdevice_attribute,
        dev: CUdevice,
    ) -> CUresult;

    /// Get the device the calling thread's current context targets.
    pub fn cuCtxGetDevice(device: *mut CUdevice) -> CUresult;

    /// Allocate memory addressable by both host and device.
    pub fn cuMemAllocManaged(dptr: *mut CUdeviceptr, bytesize: usize, flags: c_uint) -> CUresult;

    /// Free memory allocated by cuMemAllocManaged.
    pub fn cuMemFree_v2(dptr: CUdeviceptr) -> CUresult;
}

/// Check if a CUDA result indicates success.
#[inline]
#[must_use]
pub const fn is_cuda_success(result: CUresult) -> bool {
    result == CUDA_SUCCESS
}

/// Human-readable rendering of the result codes this crate encounters.
#[must_use]
pub fn cuda_result_to_string(result: CUresult) -> String {
    match result {
        CUDA_SUCCESS => "CUDA_SUCCESS (0)".to_string(),
        CUDA_ERROR_OUT_OF_MEMORY => "CUDA_ERROR_OUT_OF_MEMORY (2)".to_string(),
        CUDA_ERROR_NOT_INITIALIZED => "CUDA_ERROR_NOT_INITIALIZED (3): cuInit() not called".to_string(),
        CUDA_ERROR_NO_DEVICE => "CUDA_ERROR_NO_DEVICE (100): no CUDA-capable device".to_string(),
        CUDA_ERROR_INVALID_DEVICE => "CUDA_ERROR_INVALID_DEVICE (101): invalid device ordinal".to_string(),
        code => format!("CUDA_ERROR_UNKNOWN ({code})"),
    }
}
