//! Runtime configuration read once from the process environment.
//!
//! Both flags default to *off*: a process that never opts in pays no
//! instrumentation cost. Device-side capture cannot be re-enabled after
//! startup because compiled kernels bake the check in, so the flags are read
//! exactly once and stored on the registry.

/// Enables device-side failure capture when set to `1` or `true`.
pub const ENV_ENABLE: &str = "KERNEL_SENTRY_ENABLE";

/// Enables host stacktrace capture at every kernel launch when set to `1` or
/// `true`. This is the only unbounded-cost operation in the launch path and
/// is therefore opt-in separately from capture itself.
pub const ENV_STACKTRACE: &str = "KERNEL_SENTRY_STACKTRACE";

/// Capture configuration for a [`LaunchRegistry`](crate::LaunchRegistry).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SentryConfig {
    /// Device-side failure capture is requested.
    pub capture_enabled: bool,
    /// Capture a host stacktrace on every `insert()`.
    pub gather_launch_stacktraces: bool,
}

impl SentryConfig {
    /// Read both flags from the environment. Absent variables mean disabled.
    ///
    /// # Example
    ///
    /// ```
    /// use kernel_sentry::SentryConfig;
    ///
    /// let config = SentryConfig::from_env();
    /// // With neither variable set, everything is off.
    /// let _ = config.capture_enabled;
    /// ```
    pub fn from_env() -> Self {
        Self {
            capture_enabled: env_flag(ENV_ENABLE),
            gather_launch_stacktraces: env_flag(ENV_STACKTRACE),
        }
    }

    /// Config with capture on and stacktraces off; the common test setup.
    pub fn capture_only() -> Self {
        Self {
            capture_enabled: true,
            gather_launch_stacktraces: false,
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.trim();
            v == "1" || v.eq_ignore_ascii_case("true")
        })
        .unwrap_or(false)
}
