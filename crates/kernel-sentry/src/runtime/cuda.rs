//! CUDA driver-API implementation of [`DeviceRuntime`].
//!
//! The driver is initialized once per process; buffers are placed in managed
//! memory (`cuMemAllocManaged` with `CU_MEM_ATTACH_GLOBAL`) and zero-filled
//! from the host, which is valid for managed allocations.

use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Once;

use crate::error::{SentryError, SentryResult};
use crate::record::AssertionBuffer;
use crate::runtime::ffi::{
    cuCtxGetDevice, cuDeviceGetAttribute, cuDeviceGetCount, cuInit, cuMemAllocManaged,
    cuMemFree_v2, cuda_result_to_string, is_cuda_success, CUdeviceptr, CUresult,
    CUDA_ERROR_NO_DEVICE, CUDA_SUCCESS, CU_DEVICE_ATTRIBUTE_MANAGED_MEMORY,
    CU_MEM_ATTACH_GLOBAL,
};
use crate::runtime::{DeviceRuntime, SharedBufferPtr};

/// Global once-guard for CUDA driver initialization.
static CUDA_INIT: Once = Once::new();

/// Result of cuInit, stored for error reporting (CUresult = c_int = i32).
static CUDA_INIT_RESULT: AtomicI32 = AtomicI32::new(CUDA_SUCCESS);

/// [`DeviceRuntime`] backed by libcuda.
#[derive(Debug, Default)]
pub struct CudaRuntime;

impl CudaRuntime {
    /// Initialize the CUDA driver (once per process) and return a runtime.
    ///
    /// # Errors
    ///
    /// * `SentryError::NoDevice` - no CUDA device available
    /// * `SentryError::DriverInit` - cuInit failed for another reason
    pub fn new() -> SentryResult<Self> {
        CUDA_INIT.call_once(|| {
            // SAFETY: cuInit(0) is thread-safe and idempotent.
            let result = unsafe { cuInit(0) };
            CUDA_INIT_RESULT.store(result, Ordering::Release);
        });

        match CUDA_INIT_RESULT.load(Ordering::Acquire) {
            CUDA_SUCCESS => Ok(Self),
            CUDA_ERROR_NO_DEVICE => Err(SentryError::NoDevice),
            code => Err(SentryError::DriverInit(format!(
                "cuInit failed: {}",
                cuda_result_to_string(code)
            ))),
        }
    }
}

fn query_error(call: &str, result: CUresult) -> SentryError {
    SentryError::DeviceQuery(format!("{call} failed: {}", cuda_result_to_string(result)))
}

impl DeviceRuntime for CudaRuntime {
    fn device_count(&self) -> SentryResult<usize> {
        let mut count: i32 = 0;
        // SAFETY: count is a valid pointer; driver was initialized in new().
        let result = unsafe { cuDeviceGetCount(&mut count) };
        if !is_cuda_success(result) {
            return Err(query_error("cuDeviceGetCount", result));
        }
        Ok(count.max(0) as usize)
    }

    fn current_device(&self) -> SentryResult<i32> {
        let mut device: i32 = 0;
        // SAFETY: device is a valid pointer.
        let result = unsafe { cuCtxGetDevice(&mut device) };
        if !is_cuda_success(result) {
            return Err(query_error("cuCtxGetDevice", result));
        }
        Ok(device)
    }

    fn supports_managed_memory(&self, device: i32) -> SentryResult<bool> {
        let mut supported: i32 = 0;
        // SAFETY: supported is a valid pointer; attribute constant is from cuda.h.
        let result = unsafe {
            cuDeviceGetAttribute(&mut supported, CU_DEVICE_ATTRIBUTE_MANAGED_MEMORY, device)
        };
        if !is_cuda_success(result) {
            return Err(query_error("cuDeviceGetAttribute(MANAGED_MEMORY)", result));
        }
        Ok(supported != 0)
    }

    fn alloc_assertion_buffer(&self, device: i32) -> SentryResult<SharedBufferPtr> {
        let bytes = mem::size_of::<AssertionBuffer>();
        let mut dptr: CUdeviceptr = 0;
        // SAFETY: dptr is a valid pointer; size is the exact buffer size.
        let result = unsafe { cuMemAllocManaged(&mut dptr, bytes, CU_MEM_ATTACH_GLOBAL) };
        if !is_cuda_success(result) {
            return Err(SentryError::AllocationFailed(format!(
                "cuMemAllocManaged({bytes} bytes) for device {device} failed: {}",
                cuda_result_to_string(result)
            )));
        }

        let ptr = dptr as *mut AssertionBuffer;
        let Some(ptr) = NonNull::new(ptr) else {
            return Err(SentryError::AllocationFailed(
                "cuMemAllocManaged returned a null pointer".to_string(),
            ));
        };

        // Managed memory is host-addressable: zero the counter and slots so
        // the buffer starts in the same state HostRuntime produces.
        // SAFETY: ptr points to a fresh allocation of exactly `bytes` bytes.
        unsafe { ptr.as_ptr().cast::<u8>().write_bytes(0, bytes) };
        Ok(ptr)
    }

    unsafe fn free_assertion_buffer(&self, ptr: SharedBufferPtr) {
        let result = cuMemFree_v2(ptr.as_ptr() as CUdeviceptr);
        if !is_cuda_success(result) {
            // Teardown path; never panic, just report the leak.
            tracing::warn!(
                result = %cuda_result_to_string(result),
                "cuMemFree_v2 failed; assertion buffer leaked"
            );
        }
    }
}
