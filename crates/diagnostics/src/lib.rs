//! Logging facade shared by the gedi-subset crates
//!
//! Wraps `emit` with a terminal emitter on stderr. The level is taken from
//! the `GEDI_SUBSET_LOG` environment variable:
//! - `off` (default) - no logs
//! - `error`, `warn`, `info` - progressively more
//! - `debug` - per-granule and per-beam detail
//!
//! Binaries that want logging regardless of the environment call
//! [`init_with_level`] instead.

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

/// Environment variable consulted by [`init_diagnostics`]
pub const LOG_ENV: &str = "GEDI_SUBSET_LOG";

static INIT: Once = Once::new();

/// Parsed logging level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// Parse a level name, case-insensitively. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "off" | "" => Some(LogLevel::Off),
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" | "trace" => Some(LogLevel::Debug),
            _ => None,
        }
    }

    fn emit_level(self) -> Option<emit::Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(emit::Level::Error),
            LogLevel::Warn => Some(emit::Level::Warn),
            LogLevel::Info => Some(emit::Level::Info),
            LogLevel::Debug => Some(emit::Level::Debug),
        }
    }
}

/// Initialize diagnostics from the `GEDI_SUBSET_LOG` environment variable
///
/// Safe to call multiple times; only the first call (of this function or
/// [`init_with_level`]) has any effect.
pub fn init_diagnostics() {
    let requested = std::env::var(LOG_ENV).unwrap_or_else(|_| "off".to_string());
    match LogLevel::parse(&requested) {
        Some(level) => init_with_level(level),
        None => {
            init_with_level(LogLevel::Info);
            emit::warn!("Unknown {env} value {requested}, using info", env: LOG_ENV);
        }
    }
}

/// Initialize diagnostics with an explicit level
pub fn init_with_level(level: LogLevel) {
    INIT.call_once(|| {
        let Some(min) = level.emit_level() else {
            return;
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(min))
            .init();

        // The runtime must outlive every emitting thread, including the
        // blocking pool used for extraction.
        std::mem::forget(rt);
    });
}

/// Logging macros, re-exported from emit so that template holes such as
/// `{name}` capture the caller's local variables.
///
/// - `info!`: operations a user wants to see in normal runs.
///   Examples: "Resolved 12 granules", "Wrote 3401 rows"
/// - `debug!`: detailed diagnostics.
///   Examples: "Beam BEAM0101 selected 18 of 2304 samples"
/// - `warn!`: recoverable problems.
///   Examples: "Retrying download", "Collection declares no file format"
/// - `error!`: failures. Using "error" instead of "fatal" for consistency
///   with emit-rs
pub use emit::{debug, error, info, warn};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_safe_to_call_multiple_times() {
        init_diagnostics();
        init_with_level(LogLevel::Debug);
        init_diagnostics();
    }

    #[test]
    fn test_parse_levels() {
        assert_eq!(LogLevel::parse("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse(" info "), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse(""), Some(LogLevel::Off));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn test_macros_compile() {
        info!("Test message");
        debug!("Debug message with {value}", value: 42);
        warn!("Warning message");
        error!("Error message");
    }
}
