#![forbid(unsafe_code)]

//! Logging facade for the ftree crates.
//!
//! With the `tracing` feature the usual `tracing` macros are re-exported here
//! and at the crate root, so dependents write `ftree_core::debug!(...)` and
//! get structured events. Without the feature the same names expand to
//! nothing, and `debug_span!` yields a [`NoopSpan`].
//!
//! The `tracing-json` feature adds [`try_init_json`] for hosts that want
//! newline-delimited JSON output filtered through `FTREE_LOG`.

#[cfg(feature = "tracing")]
pub use tracing::{debug, debug_span, info, trace, warn};

/// Environment variable consulted by [`try_init_json`] for filter directives.
pub const LOG_ENV_VAR: &str = "FTREE_LOG";

// Event macros swallow their arguments; `debug_span!` yields a `NoopSpan` so
// `let _span = debug_span!(..).entered();` compiles either way.
#[cfg(not(feature = "tracing"))]
mod noop_macros {
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    #[macro_export]
    macro_rules! debug_span {
        ($($arg:tt)*) => {
            $crate::logging::NoopSpan
        };
    }
}

/// A no-op span for when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub struct NoopSpan;

#[cfg(not(feature = "tracing"))]
impl NoopSpan {
    /// Enter the no-op span (does nothing).
    pub fn enter(&self) -> NoopGuard {
        NoopGuard
    }

    /// Consume and enter the no-op span (does nothing).
    pub fn entered(self) -> NoopGuard {
        NoopGuard
    }
}

/// A no-op span guard.
#[cfg(not(feature = "tracing"))]
pub struct NoopGuard;

/// Failure to install the global JSON subscriber (usually: one is already set).
#[cfg(feature = "tracing-json")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingInitError(String);

#[cfg(feature = "tracing-json")]
impl core::fmt::Display for LoggingInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "failed to install JSON subscriber: {}", self.0)
    }
}

#[cfg(feature = "tracing-json")]
impl std::error::Error for LoggingInitError {}

/// Install a global JSON subscriber.
///
/// Filter directives come from `FTREE_LOG` when set, otherwise from
/// `default_directive` (e.g. `"ftree_data=debug"`).
#[cfg(feature = "tracing-json")]
pub fn try_init_json(default_directive: &str) -> Result<(), LoggingInitError> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| LoggingInitError(err.to_string()))
}
