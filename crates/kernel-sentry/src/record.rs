//! Shared-memory layouts for device-written assertion records.
//!
//! Both structs here are `#[repr(C)]`, fixed-size, and contain no pointers,
//! so they can be placed in managed memory and written by device code while
//! the host reads them. Text fields are bounded byte arrays with truncation;
//! device code cannot allocate.
//!
//! # Slot-claim protocol
//!
//! A failing thread claims a slot with a single atomic increment of
//! [`AssertionBuffer::count`]. If the pre-increment value is below
//! [`ASSERTION_CAPACITY`] the thread owns that slot exclusively, writes its
//! record, then publishes it by storing 1 into the slot's `committed` flag
//! with release ordering; otherwise it skips the write and the increment
//! alone records "one more failure occurred but was dropped". The host only
//! decodes slots whose flag it has observed with acquire ordering, so a
//! half-written slot is never read. The claim is always safe past capacity,
//! and no two threads ever touch the same slot. This loses detail on
//! overflow but never corrupts a record.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

/// Number of assertion records each device buffer can store. Failures beyond
/// this still bump the counter but their details are dropped.
pub const ASSERTION_CAPACITY: usize = 10;

/// Byte capacity of each text field, including the NUL terminator.
pub const MAX_STR_LEN: usize = 512;

/// One failed device-side assertion, written by exactly one device thread.
///
/// Immutable once written until the owning buffer is discarded.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct AssertionRecord {
    /// Stringification of the failed condition, NUL-terminated.
    pub message: [u8; MAX_STR_LEN],
    /// Source file of the assertion, NUL-terminated.
    pub file: [u8; MAX_STR_LEN],
    /// Function containing the assertion, NUL-terminated.
    pub function: [u8; MAX_STR_LEN],
    /// Source line of the assertion.
    pub line: u32,
    /// Generation number of the launch that produced this record.
    pub launch_id: u64,
    /// Block coordinates of the failing thread within its launch grid.
    pub block: [i32; 3],
    /// Thread coordinates of the failing thread within its block.
    pub thread: [i32; 3],
}

impl AssertionRecord {
    pub(crate) const fn zeroed() -> Self {
        Self {
            message: [0; MAX_STR_LEN],
            file: [0; MAX_STR_LEN],
            function: [0; MAX_STR_LEN],
            line: 0,
            launch_id: 0,
            block: [0; 3],
            thread: [0; 3],
        }
    }
}

/// Copy `src` into a bounded field, truncating to `MAX_STR_LEN - 1` bytes and
/// NUL-terminating. Truncation may cut a multi-byte code point; decoding is
/// lossy by design.
fn write_bounded(dst: &mut [u8; MAX_STR_LEN], src: &str) {
    let bytes = src.as_bytes();
    let n = bytes.len().min(MAX_STR_LEN - 1);
    dst[..n].copy_from_slice(&bytes[..n]);
    dst[n] = 0;
}

/// Decode a NUL-terminated bounded field back into owned text.
fn read_bounded(src: &[u8; MAX_STR_LEN]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(MAX_STR_LEN);
    String::from_utf8_lossy(&src[..end]).into_owned()
}

/// Per-device failure buffer, allocated once in host-and-device shared
/// memory and never freed mid-run.
///
/// `count` is monotonically non-decreasing for the life of the buffer and
/// may exceed [`ASSERTION_CAPACITY`]; slot `i` holds a valid record iff
/// `committed[i]` is non-zero.
#[repr(C)]
pub struct AssertionBuffer {
    /// Total failures observed, including dropped ones.
    count: AtomicU32,
    /// Per-slot publication flags: 0 while the slot is empty or being
    /// written, 1 (release-stored) once its record is complete.
    committed: [AtomicU32; ASSERTION_CAPACITY],
    /// Record slots; each is written by at most one claiming thread.
    records: [UnsafeCell<AssertionRecord>; ASSERTION_CAPACITY],
}

// SAFETY: concurrent access is coordinated by the slot-claim protocol. The
// atomic increment hands each writer a distinct slot index, so no slot is
// ever written by two threads, and the host only decodes slots whose
// committed flag it has acquired.
unsafe impl Sync for AssertionBuffer {}
unsafe impl Send for AssertionBuffer {}

impl AssertionBuffer {
    /// A fresh buffer with zero failures. The CUDA runtime zero-fills its
    /// managed allocation to the same state.
    pub fn zeroed() -> Self {
        Self {
            count: AtomicU32::new(0),
            committed: std::array::from_fn(|_| AtomicU32::new(0)),
            records: std::array::from_fn(|_| UnsafeCell::new(AssertionRecord::zeroed())),
        }
    }

    /// Total failures observed so far, including dropped ones.
    pub fn failure_count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// Upper bound on record slots holding valid data: claims so far,
    /// clamped to capacity. Some of these may still be mid-write.
    pub fn stored(&self) -> usize {
        (self.failure_count() as usize).min(ASSERTION_CAPACITY)
    }

    /// Record one failed assertion using the slot-claim protocol.
    ///
    /// This is the host-expressible statement of the write device code
    /// performs when an assertion fires; host tests drive it from many
    /// threads to exercise the same races.
    #[allow(clippy::too_many_arguments)]
    pub fn record_failure(
        &self,
        message: &str,
        file: &str,
        function: &str,
        line: u32,
        launch_id: u64,
        block: [i32; 3],
        thread: [i32; 3],
    ) {
        let claim = self.count.fetch_add(1, Ordering::AcqRel) as usize;
        if claim >= ASSERTION_CAPACITY {
            // Slot details dropped; the increment already counted the failure.
            return;
        }

        // SAFETY: `claim` was handed out exactly once by the atomic
        // increment, so this thread is the sole writer of this slot, and the
        // slot index is in bounds.
        let slot = unsafe { &mut *self.records[claim].get() };
        write_bounded(&mut slot.message, message);
        write_bounded(&mut slot.file, file);
        write_bounded(&mut slot.function, function);
        slot.line = line;
        slot.launch_id = launch_id;
        slot.block = block;
        slot.thread = thread;

        // Publish after the record is complete; readers acquire this flag
        // before touching the slot.
        self.committed[claim].store(1, Ordering::Release);
    }

    /// Decode the currently committed records into an owned snapshot.
    ///
    /// Best-effort with respect to in-flight writers: a slot that has been
    /// claimed but whose record is not yet committed is skipped entirely, so
    /// every decoded record is complete. Callers that joined all writers
    /// first see exact data.
    pub fn snapshot(&self) -> AssertionBufferSnapshot {
        let failure_count = self.failure_count();
        let stored = (failure_count as usize).min(ASSERTION_CAPACITY);
        let failures = (0..stored)
            .filter(|&i| self.committed[i].load(Ordering::Acquire) != 0)
            .map(|i| {
                // SAFETY: acquiring the committed flag synchronizes with the
                // writer's release store, which happens after its last write
                // to this slot. The slot is never written again, so this read
                // does not race with any write.
                let record = unsafe { *self.records[i].get() };
                AssertionFailure::decode(&record)
            })
            .collect();
        AssertionBufferSnapshot {
            failure_count,
            failures,
        }
    }
}

/// Host-side, decoded view of one [`AssertionRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionFailure {
    pub message: String,
    pub file: String,
    pub function: String,
    pub line: u32,
    /// Generation number correlating this failure to its launch.
    pub launch_id: u64,
    pub block: [i32; 3],
    pub thread: [i32; 3],
}

impl AssertionFailure {
    fn decode(record: &AssertionRecord) -> Self {
        Self {
            message: read_bounded(&record.message),
            file: read_bounded(&record.file),
            function: read_bounded(&record.function),
            line: record.line,
            launch_id: record.launch_id,
            block: record.block,
            thread: record.thread,
        }
    }
}

/// Owned point-in-time copy of one device's [`AssertionBuffer`].
#[derive(Debug, Clone, Default)]
pub struct AssertionBufferSnapshot {
    /// Value of the failure counter at copy time.
    pub failure_count: u32,
    /// Decoded committed records, at most [`ASSERTION_CAPACITY`] of them.
    /// May briefly be fewer than `min(failure_count, capacity)` while
    /// writers are still in flight.
    pub failures: Vec<AssertionFailure>,
}

impl AssertionBufferSnapshot {
    /// Failures that occurred but were not recorded (counter overflow).
    pub fn dropped(&self) -> u32 {
        self.failure_count
            .saturating_sub(ASSERTION_CAPACITY as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_buffer_is_empty() {
        let buf = AssertionBuffer::zeroed();
        assert_eq!(buf.failure_count(), 0);
        assert_eq!(buf.stored(), 0);
        assert!(buf.snapshot().failures.is_empty());
    }

    #[test]
    fn single_failure_round_trips() {
        let buf = AssertionBuffer::zeroed();
        buf.record_failure("x > 0", "kernel.cu", "clamp_kernel", 42, 7, [1, 2, 3], [4, 5, 6]);

        let snap = buf.snapshot();
        assert_eq!(snap.failure_count, 1);
        assert_eq!(snap.dropped(), 0);
        let f = &snap.failures[0];
        assert_eq!(f.message, "x > 0");
        assert_eq!(f.file, "kernel.cu");
        assert_eq!(f.function, "clamp_kernel");
        assert_eq!(f.line, 42);
        assert_eq!(f.launch_id, 7);
        assert_eq!(f.block, [1, 2, 3]);
        assert_eq!(f.thread, [4, 5, 6]);
    }

    #[test]
    fn oversized_fields_truncate_without_corrupting_neighbors() {
        let buf = AssertionBuffer::zeroed();
        let long_msg = "m".repeat(MAX_STR_LEN * 2);
        buf.record_failure(&long_msg, "short.cu", "f", 1, 0, [0; 3], [0; 3]);

        let snap = buf.snapshot();
        let f = &snap.failures[0];
        assert_eq!(f.message.len(), MAX_STR_LEN - 1);
        assert!(f.message.bytes().all(|b| b == b'm'));
        // Adjacent fields are intact.
        assert_eq!(f.file, "short.cu");
        assert_eq!(f.function, "f");
        assert_eq!(f.line, 1);
    }

    #[test]
    fn overflow_drops_details_but_keeps_count() {
        let buf = AssertionBuffer::zeroed();
        let total = ASSERTION_CAPACITY + 5;
        for i in 0..total {
            buf.record_failure(&format!("fail {i}"), "f.cu", "k", i as u32, 0, [0; 3], [0; 3]);
        }

        let snap = buf.snapshot();
        assert_eq!(snap.failure_count as usize, total);
        assert_eq!(snap.failures.len(), ASSERTION_CAPACITY);
        assert_eq!(snap.dropped(), 5);
        // The first CAPACITY claims won their slots in order.
        for (i, f) in snap.failures.iter().enumerate() {
            assert_eq!(f.message, format!("fail {i}"));
        }
    }

    #[test]
    fn concurrent_claims_get_distinct_slots() {
        let buf = AssertionBuffer::zeroed();
        let n = ASSERTION_CAPACITY; // all fit
        std::thread::scope(|s| {
            for t in 0..n {
                let buf = &buf;
                s.spawn(move || {
                    buf.record_failure(
                        &format!("thread {t}"),
                        "con.cu",
                        "k",
                        0,
                        0,
                        [t as i32, 0, 0],
                        [0; 3],
                    );
                });
            }
        });

        let snap = buf.snapshot();
        assert_eq!(snap.failure_count as usize, n);
        assert_eq!(snap.failures.len(), n);
        let mut messages: Vec<_> = snap.failures.iter().map(|f| f.message.clone()).collect();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), n, "every thread must land in its own slot");
    }

    #[test]
    fn snapshot_racing_writers_sees_only_complete_records() {
        let buf = AssertionBuffer::zeroed();
        std::thread::scope(|s| {
            for t in 0..ASSERTION_CAPACITY {
                let buf = &buf;
                s.spawn(move || {
                    buf.record_failure(
                        &format!("race {t}"),
                        "race.cu",
                        "race_kernel",
                        77,
                        9,
                        [t as i32, 0, 0],
                        [0; 3],
                    );
                });
            }

            // Snapshot continuously while writers run. Claimed-but-unwritten
            // slots must be skipped, never decoded half-filled.
            let buf = &buf;
            s.spawn(move || {
                for _ in 0..200 {
                    let snap = buf.snapshot();
                    assert!(snap.failures.len() <= snap.failure_count as usize);
                    for f in &snap.failures {
                        assert!(f.message.starts_with("race "), "torn record: {:?}", f.message);
                        assert_eq!(f.file, "race.cu");
                        assert_eq!(f.function, "race_kernel");
                        assert_eq!(f.line, 77);
                        assert_eq!(f.launch_id, 9);
                    }
                }
            });
        });

        // With all writers joined, every record is committed and visible.
        let snap = buf.snapshot();
        assert_eq!(snap.failures.len(), ASSERTION_CAPACITY);
    }
}
