//! Heap-backed runtime for builds and tests without a GPU.
//!
//! Ordinary process memory is trivially "shared" between the host and the
//! simulated device threads that tests spawn, so the full registry protocol
//! (lazy allocation, slot claiming, snapshots) runs unchanged against this
//! runtime.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::error::{SentryError, SentryResult};
use crate::record::AssertionBuffer;
use crate::runtime::{DeviceRuntime, SharedBufferPtr};

/// [`DeviceRuntime`] over plain heap allocations.
#[derive(Debug)]
pub struct HostRuntime {
    device_count: usize,
    current_device: AtomicI32,
    managed_memory: bool,
    fail_allocation: bool,
}

impl HostRuntime {
    /// Runtime presenting `device_count` fake devices, all with managed
    /// memory support.
    pub fn new(device_count: usize) -> Self {
        Self {
            device_count,
            current_device: AtomicI32::new(0),
            managed_memory: true,
            fail_allocation: false,
        }
    }

    /// Runtime whose devices lack managed-memory support; the registry must
    /// degrade to disabled.
    pub fn without_managed_memory(device_count: usize) -> Self {
        Self {
            managed_memory: false,
            ..Self::new(device_count)
        }
    }

    /// Runtime whose allocations always fail; the registry must disable the
    /// affected device without failing any launch.
    pub fn with_failing_allocation(device_count: usize) -> Self {
        Self {
            fail_allocation: true,
            ..Self::new(device_count)
        }
    }

    /// Change the device subsequent calls on any thread are attributed to.
    pub fn set_current_device(&self, device: i32) {
        self.current_device.store(device, Ordering::Release);
    }
}

impl Default for HostRuntime {
    fn default() -> Self {
        Self::new(1)
    }
}

impl DeviceRuntime for HostRuntime {
    fn device_count(&self) -> SentryResult<usize> {
        Ok(self.device_count)
    }

    fn current_device(&self) -> SentryResult<i32> {
        Ok(self.current_device.load(Ordering::Acquire))
    }

    fn supports_managed_memory(&self, _device: i32) -> SentryResult<bool> {
        Ok(self.managed_memory)
    }

    fn alloc_assertion_buffer(&self, device: i32) -> SentryResult<SharedBufferPtr> {
        if self.fail_allocation {
            return Err(SentryError::AllocationFailed(format!(
                "host runtime configured to fail allocation for device {device}"
            )));
        }
        let boxed = Box::new(AssertionBuffer::zeroed());
        // Ownership moves to the registry until free_assertion_buffer.
        Ok(NonNull::from(Box::leak(boxed)))
    }

    unsafe fn free_assertion_buffer(&self, ptr: SharedBufferPtr) {
        drop(Box::from_raw(ptr.as_ptr()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_returns_zeroed_buffer() {
        let runtime = HostRuntime::new(1);
        let ptr = runtime.alloc_assertion_buffer(0).expect("alloc");
        // SAFETY: freshly allocated, exclusively owned here.
        unsafe {
            assert_eq!(ptr.as_ref().failure_count(), 0);
            runtime.free_assertion_buffer(ptr);
        }
    }

    #[test]
    fn failing_runtime_reports_allocation_error() {
        let runtime = HostRuntime::with_failing_allocation(1);
        assert!(matches!(
            runtime.alloc_assertion_buffer(0),
            Err(SentryError::AllocationFailed(_))
        ));
    }

    #[test]
    fn current_device_is_settable() {
        let runtime = HostRuntime::new(2);
        assert_eq!(runtime.current_device().unwrap(), 0);
        runtime.set_current_device(1);
        assert_eq!(runtime.current_device().unwrap(), 1);
    }
}
