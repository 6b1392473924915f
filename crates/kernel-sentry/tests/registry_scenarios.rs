//! End-to-end scenarios driving the registry the way an instrumented
//! process would: register launches, simulate failing device threads
//! writing into the shared buffer, then snapshot and report.

use std::sync::Arc;

use kernel_sentry::{
    prepare_launch, DeviceRuntime, HostRuntime, LaunchRegistry, SentryConfig, ASSERTION_CAPACITY,
};

fn capture_registry(devices: usize) -> LaunchRegistry {
    LaunchRegistry::new(SentryConfig::capture_only(), Arc::new(HostRuntime::new(devices)))
}

#[test]
fn failing_kernel_is_correlated_and_clean_kernel_is_omitted() {
    let registry = capture_registry(1);

    // Kernel A: three device threads fail.
    let kernel_a = prepare_launch!(registry, "kernel_a", 0);
    assert_eq!(kernel_a.generation, 0);
    let buffer = kernel_a.buffer.expect("capture enabled");
    for t in 0..3 {
        // SAFETY: `registry` outlives every buffer access in this test.
        unsafe { buffer.buffer() }.record_failure(
            "value >= 0.0",
            "kernel_a.cu",
            "kernel_a",
            57,
            kernel_a.generation,
            [0, 0, 0],
            [t, 0, 0],
        );
    }

    // Kernel B: no failures.
    let kernel_b = prepare_launch!(registry, "kernel_b", 0);
    assert_eq!(kernel_b.generation, 1);

    let snapshot = registry.snapshot();
    let device0 = snapshot.devices[0].as_ref().expect("buffer active");
    assert_eq!(device0.failure_count, 3);
    assert_eq!(device0.failures.len(), 3);
    let mut threads: Vec<i32> = device0.failures.iter().map(|f| f.thread[0]).collect();
    threads.sort_unstable();
    assert_eq!(threads, vec![0, 1, 2]);
    assert!(device0.failures.iter().all(|f| f.launch_id == 0));

    // Both launches are retained in the ledger.
    assert!(snapshot.launch_for(0).is_some());
    assert!(snapshot.launch_for(1).is_some());

    let report = registry.failure_report().expect("failures present");
    assert_eq!(report.matches("launched as `kernel_a`").count(), 3);
    assert!(!report.contains("kernel_b"));
}

#[test]
fn fifteen_concurrent_failures_overflow_capacity_ten() {
    let registry = capture_registry(1);
    let args = prepare_launch!(registry, "overflow_kernel", 0);
    let buffer = args.buffer.expect("capture enabled");

    let n = 15;
    std::thread::scope(|s| {
        for t in 0..n {
            s.spawn(move || {
                // SAFETY: `registry` outlives the scoped writer threads.
                unsafe { buffer.buffer() }.record_failure(
                    "i < len",
                    "overflow.cu",
                    "overflow_kernel",
                    21,
                    args.generation,
                    [t, 0, 0],
                    [0, 0, 0],
                );
            });
        }
    });

    let snapshot = registry.snapshot();
    let device0 = snapshot.devices[0].as_ref().expect("buffer active");
    assert_eq!(device0.failure_count, n as u32);
    assert_eq!(device0.failures.len(), ASSERTION_CAPACITY);
    assert_eq!(device0.dropped(), (n - ASSERTION_CAPACITY as i32) as u32);

    // The stored records came from distinct threads (no slot was reused).
    let mut blocks: Vec<i32> = device0.failures.iter().map(|f| f.block[0]).collect();
    blocks.sort_unstable();
    blocks.dedup();
    assert_eq!(blocks.len(), ASSERTION_CAPACITY);

    let report = registry.failure_report().expect("failures present");
    assert!(report.contains("5 additional failure(s) occurred but were not recorded"));
}

#[test]
fn generations_stay_unique_under_concurrent_inserts() {
    let registry = Arc::new(capture_registry(1));
    let threads = 8;
    let per_thread = 50;

    let mut generations = Vec::new();
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let registry = Arc::clone(&registry);
                s.spawn(move || {
                    (0..per_thread)
                        .map(|_| registry.insert("con.rs", "spam_launches", 1, "k", 0))
                        .collect::<Vec<u64>>()
                })
            })
            .collect();
        for handle in handles {
            generations.extend(handle.join().expect("insert thread"));
        }
    });

    generations.sort_unstable();
    let before = generations.len();
    generations.dedup();
    assert_eq!(generations.len(), before, "generation ids must be unique");
    assert_eq!(generations.len(), threads * per_thread);
}

#[test]
fn evicted_launch_is_reported_as_unavailable() {
    let registry = capture_registry(1);

    // A failure tagged with the very first generation...
    let first = prepare_launch!(registry, "doomed_kernel", 0);
    let buffer = first.buffer.expect("capture enabled");
    // SAFETY: `registry` outlives this borrow.
    unsafe { buffer.buffer() }.record_failure(
        "ptr != nullptr",
        "doomed.cu",
        "doomed_kernel",
        8,
        first.generation,
        [0; 3],
        [0; 3],
    );

    // ...is orphaned once the ledger wraps all the way around.
    for _ in 0..kernel_sentry::LEDGER_CAPACITY {
        registry.insert("churn.rs", "churn", 1, "churn_kernel", 0);
    }

    let snapshot = registry.snapshot();
    assert!(snapshot.launch_for(first.generation).is_none());

    let report = registry.failure_report().expect("failures present");
    assert!(report.contains("launch info no longer available for generation 0"));
    // The orphaned failure must not be joined to any launch.
    assert!(!report.contains("launched as"));
}

#[test]
fn failures_on_second_device_only() {
    let runtime = Arc::new(HostRuntime::new(2));
    let registry = LaunchRegistry::new(
        SentryConfig::capture_only(),
        runtime.clone() as Arc<dyn DeviceRuntime>,
    );

    runtime.set_current_device(1);
    let args = prepare_launch!(registry, "dev1_kernel", 0);
    let buffer = args.buffer.expect("capture enabled");
    // SAFETY: `registry` outlives this borrow.
    unsafe { buffer.buffer() }.record_failure(
        "mask != 0",
        "dev1.cu",
        "dev1_kernel",
        3,
        args.generation,
        [0; 3],
        [0; 3],
    );

    assert!(registry.has_failed());
    let snapshot = registry.snapshot();
    assert!(snapshot.devices[0].is_none(), "device 0 never allocated");
    let device1 = snapshot.devices[1].as_ref().expect("device 1 active");
    assert_eq!(device1.failure_count, 1);

    let report = registry.failure_report().expect("failures present");
    assert!(report.contains("Device 1"));
}

#[test]
fn disabled_registry_never_observes_failures() {
    let registry = LaunchRegistry::new(SentryConfig::default(), Arc::new(HostRuntime::new(1)));
    assert!(!registry.is_enabled());

    let args = prepare_launch!(registry, "uninstrumented_kernel", 0);
    assert!(args.buffer.is_none(), "disabled sentinel expected");
    // Generation numbering still works without a branch at the call site.
    assert_eq!(args.generation, 0);

    assert!(!registry.has_failed());
    assert!(registry.failure_report().is_none());
}
