//! Human-readable rendering of captured failures.
//!
//! Joins each recorded failure to its launch by generation number. Evicted
//! launches are named as unavailable rather than fabricated, and counter
//! overflow is reported as an explicit data-loss notice.

use std::fmt::Write as _;

use crate::config::ENV_STACKTRACE;
use crate::record::ASSERTION_CAPACITY;
use crate::registry::RegistrySnapshot;

/// Format all currently-known failures in `snapshot` as a diagnostic string.
///
/// Returns a "no failures" line when the snapshot is clean; callers that
/// want a cheap pre-check use
/// [`LaunchRegistry::failure_report`](crate::LaunchRegistry::failure_report)
/// instead.
pub fn format_assertion_report(snapshot: &RegistrySnapshot) -> String {
    if !snapshot.has_failures() {
        return "No device-side assertion failures recorded.\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "Device-side assertion failures detected:");

    for (device, buffer) in snapshot.devices.iter().enumerate() {
        let Some(buffer) = buffer else { continue };
        if buffer.failure_count == 0 {
            continue;
        }

        let _ = writeln!(
            out,
            "\nDevice {device}: {} assertion failure(s)",
            buffer.failure_count
        );

        for (i, failure) in buffer.failures.iter().enumerate() {
            let _ = writeln!(out, "\n  [{i}] assertion `{}` failed", failure.message);
            let _ = writeln!(
                out,
                "      at {}:{} in {}",
                failure.file, failure.line, failure.function
            );
            let _ = writeln!(
                out,
                "      block [{}, {}, {}], thread [{}, {}, {}]",
                failure.block[0],
                failure.block[1],
                failure.block[2],
                failure.thread[0],
                failure.thread[1],
                failure.thread[2]
            );

            match snapshot.launch_for(failure.launch_id) {
                Some(launch) => {
                    let _ = writeln!(
                        out,
                        "      launched as `{}` (generation {}) from {}:{} in {}, stream {}",
                        launch.kernel_name,
                        launch.generation,
                        launch.file,
                        launch.line,
                        launch.function,
                        launch.stream
                    );
                    if let Some(stacktrace) = &launch.stacktrace {
                        let _ = writeln!(out, "      launch stacktrace:");
                        for line in stacktrace.lines() {
                            let _ = writeln!(out, "        {line}");
                        }
                    }
                }
                None => {
                    let _ = writeln!(
                        out,
                        "      launch info no longer available for generation {} \
                         (evicted from the launch ledger)",
                        failure.launch_id
                    );
                }
            }
        }

        let dropped = buffer.dropped();
        if dropped > 0 {
            let _ = writeln!(
                out,
                "\n  {dropped} additional failure(s) occurred but were not recorded \
                 (buffer capacity is {ASSERTION_CAPACITY})"
            );
        }
    }

    if !snapshot.stacktraces_enabled {
        let _ = writeln!(
            out,
            "\nSet {ENV_STACKTRACE}=1 to capture host stacktraces at kernel launch."
        );
    }

    out
}
