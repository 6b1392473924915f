#![deny(deprecated)]

//! Device-side assertion capture and launch correlation for CUDA workloads.
//!
//! Host-side exception machinery cannot see a condition that fails inside
//! massively parallel device code. This crate pre-allocates a fixed-capacity
//! buffer in host-and-device shared memory per device, lets failing device
//! threads record what failed via a race-free atomic slot claim, and keeps a
//! circular ledger of kernel launches so a failure observed later can be
//! attributed to the exact launch site that produced it.
//!
//! # Usage
//!
//! Construct one [`LaunchRegistry`] at process startup and hand it to every
//! launch site:
//!
//! ```
//! use std::sync::Arc;
//! use kernel_sentry::{prepare_launch, HostRuntime, LaunchRegistry, SentryConfig};
//!
//! let registry = LaunchRegistry::new(
//!     SentryConfig::capture_only(),
//!     Arc::new(HostRuntime::new(1)),
//! );
//!
//! // Immediately before each kernel launch:
//! let args = prepare_launch!(registry, "my_kernel", /* stream */ 0);
//! // Pass `args.generation` and `args.buffer` (or its None sentinel)
//! // together into the kernel as ordinary launch arguments.
//!
//! // Later, from any thread:
//! if registry.has_failed() {
//!     if let Some(report) = registry.failure_report() {
//!         eprintln!("{report}");
//!     }
//! }
//! ```
//!
//! With the `cuda` feature, [`CudaRuntime`](runtime::CudaRuntime) places the
//! buffers in managed memory via the CUDA driver API; without it,
//! [`HostRuntime`] backs the same contract with heap memory so everything is
//! testable on any machine.
//!
//! # Guarantees and their limits
//!
//! - Generation numbers are unique and strictly increasing for the process
//!   lifetime; evicted ledger entries are reported as unavailable, never
//!   fabricated.
//! - Failure counters are exact even past capacity; record details beyond
//!   [`ASSERTION_CAPACITY`](record::ASSERTION_CAPACITY) are dropped and the
//!   drop count is reported.
//! - Snapshots are best-effort point reads with respect to in-flight device
//!   writes, not linearizable views; a record still being written is skipped
//!   rather than decoded half-filled.

pub mod config;
pub mod error;
pub mod ledger;
pub mod record;
pub mod registry;
pub mod report;
pub mod runtime;

pub use config::{SentryConfig, ENV_ENABLE, ENV_STACKTRACE};
pub use error::{SentryError, SentryResult};
pub use ledger::{LaunchRecord, LEDGER_CAPACITY};
pub use record::{
    AssertionBuffer, AssertionBufferSnapshot, AssertionFailure, ASSERTION_CAPACITY, MAX_STR_LEN,
};
pub use registry::{AssertionBufferHandle, LaunchArgs, LaunchRegistry, RegistrySnapshot};
pub use report::format_assertion_report;
pub use runtime::{DeviceRuntime, HostRuntime, SharedBufferPtr};
#[cfg(feature = "cuda")]
pub use runtime::CudaRuntime;
