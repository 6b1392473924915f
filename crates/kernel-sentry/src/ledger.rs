//! Circular ledger of kernel-launch metadata.
//!
//! Kernels run asynchronously, so a device-side failure is observed long
//! after the host call that launched it returned. The ledger retains the
//! most recent [`LEDGER_CAPACITY`] launches keyed by an ever-increasing
//! generation number; a failure tagged with a generation is joined back to
//! its launch site here. Wrapped-out generations are truly gone — lookups
//! for them return `None` and the report says so instead of fabricating
//! launch data.

/// Maximum launches retained across all streams and devices.
pub const LEDGER_CAPACITY: usize = 1024;

/// Host-only metadata describing one kernel launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    /// Source file of the launch site.
    pub file: &'static str,
    /// Function the launch was made from.
    pub function: &'static str,
    /// Source line of the launch site.
    pub line: u32,
    /// Name of the launched kernel.
    pub kernel_name: &'static str,
    /// Device the kernel was launched on.
    pub device: i32,
    /// Stream the kernel was launched on.
    pub stream: i32,
    /// Host stacktrace captured at launch time, when enabled.
    pub stacktrace: Option<String>,
    /// Unique, strictly increasing launch id.
    pub generation: u64,
}

/// Fixed-capacity circular buffer of [`LaunchRecord`]s with oldest-first
/// eviction.
#[derive(Debug)]
pub(crate) struct LaunchLedger {
    slots: Vec<Option<LaunchRecord>>,
    next_generation: u64,
}

impl LaunchLedger {
    pub(crate) fn new() -> Self {
        Self::with_capacity(LEDGER_CAPACITY)
    }

    /// Capacity must be non-zero; only tests shrink it.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            next_generation: 0,
        }
    }

    /// Append a launch record, overwriting the slot's previous occupant, and
    /// return the generation assigned to it.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn insert(
        &mut self,
        file: &'static str,
        function: &'static str,
        line: u32,
        kernel_name: &'static str,
        device: i32,
        stream: i32,
        stacktrace: Option<String>,
    ) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;

        let idx = (generation % self.slots.len() as u64) as usize;
        self.slots[idx] = Some(LaunchRecord {
            file,
            function,
            line,
            kernel_name,
            device,
            stream,
            stacktrace,
            generation,
        });
        generation
    }

    /// Look up a launch by generation. Returns `None` once the generation
    /// has been evicted by wraparound.
    pub(crate) fn lookup(&self, generation: u64) -> Option<&LaunchRecord> {
        let idx = (generation % self.slots.len() as u64) as usize;
        self.slots[idx]
            .as_ref()
            .filter(|record| record.generation == generation)
    }

    /// Clone all live records, ordered oldest to newest.
    pub(crate) fn live_records(&self) -> Vec<LaunchRecord> {
        let mut records: Vec<LaunchRecord> = self.slots.iter().flatten().cloned().collect();
        records.sort_by_key(|record| record.generation);
        records
    }
}
