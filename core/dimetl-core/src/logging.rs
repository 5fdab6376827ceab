//! Subscriber setup for ETL programs.
//!
//! The library only emits `tracing` events: cache fills, rollbacks, bulk
//! flushes and store commits. Programs that want to see them call one of
//! the functions below. Without the `logging` feature they do nothing.
//!
//! The filter comes from `DIMETL_LOG`, then `RUST_LOG`, then the level
//! passed in.

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "DIMETL_LOG";

/// Map a `-v` count to a filter level. 0 keeps the per-run summaries only.
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn filter_directive(fallback: &str) -> String {
    [LOG_ENV, "RUST_LOG"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| fallback.to_string())
}

/// Install a stderr subscriber at `info`.
///
/// ```rust
/// dimetl_core::logging::init();
/// ```
pub fn init() {
    init_with_level("info");
}

/// Install a stderr subscriber at `level` unless the environment overrides it.
/// Calling it again keeps the subscriber installed first.
pub fn init_with_level(level: &str) {
    install(&filter_directive(level), false);
}

/// Subscriber for tests, captured by the test harness.
pub fn init_test() {
    install("dimetl_core=debug", true);
}

#[cfg(feature = "logging")]
fn install(directive: &str, for_tests: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(true);
    let _ = if for_tests {
        builder.with_test_writer().try_init()
    } else {
        builder.with_line_number(true).try_init()
    };
}

#[cfg(not(feature = "logging"))]
fn install(_directive: &str, _for_tests: bool) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_for_verbosity(0), "info");
        assert_eq!(level_for_verbosity(1), "debug");
        assert_eq!(level_for_verbosity(7), "trace");
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        init_test();
        init_test();
        init_with_level(level_for_verbosity(1));
    }
}
