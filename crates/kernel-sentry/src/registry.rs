//! Launch registry: the process-wide owner of assertion buffers and the
//! launch ledger.
//!
//! One [`LaunchRegistry`] is constructed by the process's top-level runtime
//! and passed by reference (or `Arc`) to every launch site; there is no
//! hidden global. The registry never fails a kernel launch: every degraded
//! state (capability absence, allocation failure, global disable) collapses
//! to "no buffer handle for this device" and is observable only through
//! [`is_enabled`](LaunchRegistry::is_enabled) and the report.
//!
//! # Locking
//!
//! A single `RwLock` guards the ledger and the per-device buffer-slot table;
//! it is held only for short, bounded copies and inserts — never across an
//! allocation or a stacktrace capture. A separate `Mutex` serializes lazy
//! buffer allocation so a slow first-time allocation on one device never
//! blocks inserts or lookups touching other devices.
//!
//! # Snapshot semantics
//!
//! [`snapshot`](LaunchRegistry::snapshot) is a best-effort point-in-time
//! read. Device threads write into shared memory outside any host lock, so
//! the copy reflects whatever has been flushed at call time; it is *not*
//! linearizable with in-flight device writes.

use std::backtrace::Backtrace;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::SentryConfig;
use crate::ledger::{LaunchLedger, LaunchRecord};
use crate::record::{AssertionBuffer, AssertionBufferSnapshot};
use crate::report;
use crate::runtime::{DeviceRuntime, SharedBufferPtr};

/// Stable handle to one device's [`AssertionBuffer`].
///
/// Copyable launch argument; the underlying buffer lives until the owning
/// registry drops, so handles must not outlive the registry.
#[derive(Clone, Copy, Debug)]
pub struct AssertionBufferHandle {
    ptr: SharedBufferPtr,
}

// SAFETY: the pointed-to AssertionBuffer is Sync (slot-claim protocol) and
// lives for the registry's lifetime; the handle itself is just the address.
unsafe impl Send for AssertionBufferHandle {}
unsafe impl Sync for AssertionBufferHandle {}

impl AssertionBufferHandle {
    /// Access the shared buffer.
    ///
    /// # Safety
    ///
    /// The buffer is owned by the registry that issued this handle and is
    /// freed when that registry drops. The caller must ensure the registry
    /// outlives the returned reference; a handle held past the registry's
    /// drop is a dangling address.
    pub unsafe fn buffer(&self) -> &AssertionBuffer {
        // SAFETY: caller guarantees the owning registry (and therefore the
        // allocation behind ptr) is still alive.
        unsafe { self.ptr.as_ref() }
    }

    /// Raw pointer form, as passed to a kernel launch.
    pub fn as_ptr(&self) -> *mut AssertionBuffer {
        self.ptr.as_ptr()
    }
}

/// The generation id / buffer pairing every instrumented launch receives.
///
/// The two always travel together into the kernel: when `buffer` is `None`
/// (assertions disabled for this device) device code no-ops, but the
/// generation is still valid for host-side bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct LaunchArgs {
    /// Launch-correlation token for this launch.
    pub generation: u64,
    /// Device buffer handle, or `None` when capture is off for this device.
    pub buffer: Option<AssertionBufferHandle>,
}

/// Per-device buffer state. Slots only move forward:
/// `Unprobed -> Active` or `Unprobed -> Disabled`, never back.
#[derive(Debug, Clone, Copy)]
enum BufferSlot {
    /// No launch has targeted this device yet.
    Unprobed,
    /// Capability absent or allocation failed; capture stays off here.
    Disabled,
    /// Buffer allocated and usable.
    Active(AssertionBufferHandle),
}

#[derive(Debug)]
struct RegistryInner {
    ledger: LaunchLedger,
    buffers: Vec<BufferSlot>,
}

/// Owner of the launch ledger and all per-device assertion buffers.
#[derive(Debug)]
pub struct LaunchRegistry {
    inner: RwLock<RegistryInner>,
    /// Serializes lazy buffer allocation only; never nested inside `inner`.
    alloc_lock: Mutex<()>,
    runtime: Arc<dyn DeviceRuntime>,
    config: SentryConfig,
    /// All visible devices support managed memory. Probed once at
    /// construction; capture is all-or-nothing across devices.
    managed_memory_supported: bool,
}

impl LaunchRegistry {
    /// Build a registry over `runtime` with explicit configuration.
    pub fn new(config: SentryConfig, runtime: Arc<dyn DeviceRuntime>) -> Self {
        let device_count = match runtime.device_count() {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "device enumeration failed; assertion capture disabled");
                0
            }
        };

        let managed_memory_supported = device_count > 0
            && (0..device_count as i32).all(|device| {
                match runtime.supports_managed_memory(device) {
                    Ok(supported) => {
                        if !supported {
                            info!(device, "device lacks managed memory support");
                        }
                        supported
                    }
                    Err(e) => {
                        warn!(device, error = %e, "managed memory probe failed");
                        false
                    }
                }
            });

        if config.capture_enabled && !managed_memory_supported {
            warn!(
                device_count,
                "assertion capture requested but not all devices support managed \
                 memory; capture disabled"
            );
        } else if config.capture_enabled {
            info!(
                device_count,
                stacktraces = config.gather_launch_stacktraces,
                "device-side assertion capture enabled"
            );
        }

        Self {
            inner: RwLock::new(RegistryInner {
                ledger: LaunchLedger::new(),
                buffers: vec![BufferSlot::Unprobed; device_count],
            }),
            alloc_lock: Mutex::new(()),
            runtime,
            config,
            managed_memory_supported,
        }
    }

    /// Build a registry configured from the process environment.
    pub fn from_env(runtime: Arc<dyn DeviceRuntime>) -> Self {
        Self::new(SentryConfig::from_env(), runtime)
    }

    /// Aggregate enablement: the global capture flag and whole-process
    /// capability support. Callers check this once at startup to decide
    /// whether to pay any instrumentation cost at all.
    pub fn is_enabled(&self) -> bool {
        self.config.capture_enabled && self.managed_memory_supported
    }

    /// Register a kernel launch and return its generation id.
    ///
    /// Never fails: when capture is disabled the ledger entry is still
    /// appended (host-only, cheap) so generation numbering stays uniform and
    /// call sites need no conditional branch. The optional stacktrace is
    /// captured *before* taking the lock — it is the only unbounded-cost
    /// operation in the launch path and must not extend the critical
    /// section.
    pub fn insert(
        &self,
        file: &'static str,
        function: &'static str,
        line: u32,
        kernel_name: &'static str,
        stream: i32,
    ) -> u64 {
        let stacktrace = if self.is_enabled() && self.config.gather_launch_stacktraces {
            Some(Backtrace::force_capture().to_string())
        } else {
            None
        };
        let device = self.runtime.current_device().unwrap_or(-1);

        self.inner
            .write()
            .ledger
            .insert(file, function, line, kernel_name, device, stream, stacktrace)
    }

    /// Stable handle to the current device's assertion buffer, allocating it
    /// on first use.
    ///
    /// Returns `None` when capture is disabled globally, the device index is
    /// unknown, or the buffer could not be allocated — callers treat this as
    /// "assertions disabled for this device" and pass the disabled sentinel
    /// to the kernel, never as an error.
    pub fn assertion_buffer_for_current_device(&self) -> Option<AssertionBufferHandle> {
        if !self.is_enabled() {
            return None;
        }

        let device = match self.runtime.current_device() {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "current-device query failed; launch runs uninstrumented");
                return None;
            }
        };

        // Fast path: already probed.
        {
            let inner = self.inner.read();
            match inner.buffers.get(device as usize) {
                Some(BufferSlot::Active(handle)) => return Some(*handle),
                Some(BufferSlot::Disabled) => return None,
                Some(BufferSlot::Unprobed) => {}
                None => {
                    warn!(device, "device index outside probed range");
                    return None;
                }
            }
        }

        // Slow path: allocate under the narrow lock so concurrent launchers
        // on this device allocate exactly once, and launches on other
        // devices are never blocked by this allocation.
        let _alloc_guard = self.alloc_lock.lock();

        // Re-check: another thread may have finished while we waited.
        {
            let inner = self.inner.read();
            match inner.buffers.get(device as usize) {
                Some(BufferSlot::Active(handle)) => return Some(*handle),
                Some(BufferSlot::Disabled) => return None,
                _ => {}
            }
        }

        let slot = match self.runtime.alloc_assertion_buffer(device) {
            Ok(ptr) => {
                info!(device, "assertion buffer allocated");
                BufferSlot::Active(AssertionBufferHandle { ptr })
            }
            Err(e) => {
                // Fatal to instrumentation for this device only; the launch
                // itself proceeds uninstrumented.
                warn!(device, error = %e, "assertion buffer allocation failed; device disabled");
                BufferSlot::Disabled
            }
        };

        let mut inner = self.inner.write();
        inner.buffers[device as usize] = slot;
        match slot {
            BufferSlot::Active(handle) => Some(handle),
            _ => None,
        }
    }

    /// Register a launch and fetch the buffer pairing in one call; see
    /// [`LaunchArgs`]. The [`prepare_launch!`](crate::prepare_launch) macro
    /// fills in the source location.
    pub fn prepare_launch(
        &self,
        file: &'static str,
        function: &'static str,
        line: u32,
        kernel_name: &'static str,
        stream: i32,
    ) -> LaunchArgs {
        let buffer = self.assertion_buffer_for_current_device();
        let generation = self.insert(file, function, line, kernel_name, stream);
        LaunchArgs { generation, buffer }
    }

    /// True iff any device buffer has recorded at least one failure. Cheap
    /// pre-check before the full snapshot/report path.
    pub fn has_failed(&self) -> bool {
        let inner = self.inner.read();
        inner.buffers.iter().any(|slot| match slot {
            // SAFETY: the registry owning the buffer is `self`, alive for the
            // duration of this borrow.
            BufferSlot::Active(handle) => unsafe { handle.buffer() }.failure_count() > 0,
            _ => false,
        })
    }

    /// Self-consistent, point-in-time copy of every device buffer and the
    /// launch ledger; usable for reporting without holding any lock.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.read();
        let devices = inner
            .buffers
            .iter()
            .map(|slot| match slot {
                // SAFETY: the registry owning the buffer is `self`, alive for
                // the duration of this borrow.
                BufferSlot::Active(handle) => Some(unsafe { handle.buffer() }.snapshot()),
                _ => None,
            })
            .collect();
        let launches = inner.ledger.live_records();
        drop(inner);

        RegistrySnapshot {
            devices,
            launches,
            stacktraces_enabled: self.config.gather_launch_stacktraces,
        }
    }

    /// Look up a single launch by generation without copying the whole
    /// ledger. Returns `None` once the generation has been evicted by
    /// wraparound.
    pub fn launch_record(&self, generation: u64) -> Option<LaunchRecord> {
        self.inner.read().ledger.lookup(generation).cloned()
    }

    /// Formatted diagnostic report of all currently-known failures, or
    /// `None` when nothing has failed.
    pub fn failure_report(&self) -> Option<String> {
        if !self.has_failed() {
            return None;
        }
        Some(report::format_assertion_report(&self.snapshot()))
    }
}

impl Drop for LaunchRegistry {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        for slot in inner.buffers.drain(..) {
            if let BufferSlot::Active(handle) = slot {
                // SAFETY: handle.ptr came from this registry's runtime and is
                // freed exactly once here; no launches outlive the registry.
                unsafe { self.runtime.free_assertion_buffer(handle.ptr) };
            }
        }
        debug!("launch registry dropped; assertion buffers released");
    }
}

/// Point-in-time copy of all failure buffers and the launch ledger.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    /// Per-device buffer copies; `None` for devices without an active buffer.
    pub devices: Vec<Option<AssertionBufferSnapshot>>,
    /// Live launch records, oldest first.
    pub launches: Vec<LaunchRecord>,
    /// Whether launch stacktraces were being gathered.
    pub stacktraces_enabled: bool,
}

impl RegistrySnapshot {
    /// Join a failure's generation back to its launch record, if the ledger
    /// still retains it.
    pub fn launch_for(&self, generation: u64) -> Option<&LaunchRecord> {
        self.launches
            .iter()
            .find(|record| record.generation == generation)
    }

    /// True iff any device buffer in this snapshot holds failures.
    pub fn has_failures(&self) -> bool {
        self.devices
            .iter()
            .flatten()
            .any(|buffer| buffer.failure_count > 0)
    }
}

/// Register a kernel launch at the current source location.
///
/// Expands to [`LaunchRegistry::prepare_launch`] with `file!()`,
/// `module_path!()`, and `line!()` filled in, returning the
/// [`LaunchArgs`] pairing to pass into the kernel.
#[macro_export]
macro_rules! prepare_launch {
    ($registry:expr, $kernel_name:expr, $stream:expr) => {
        $registry.prepare_launch(file!(), module_path!(), line!(), $kernel_name, $stream)
    };
}
