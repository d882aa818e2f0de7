//! Logging utilities for the module host and the modules it runs
//!
//! The host installs one `tracing` subscriber; module output (through `ModuleLogger`)
//! goes to the same subscriber under the `module` target.
//! - Respects RUST_LOG environment variable
//! - Allows configuration via config file
//!
//! # Usage
//! ```rust,no_run
//! use bllvm_module_host::utils::init_logging;
//!
//! init_logging(None); // Uses RUST_LOG or defaults to "info"
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Pick the filter: RUST_LOG, then the configured filter, then "info"
fn resolve_filter(filter: Option<&str>) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    filter
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Initialize logging for the host
///
/// # Arguments
/// * `filter` - Optional log filter from config (e.g., "info", "bllvm_module_host=debug,module=trace")
///              If None, uses RUST_LOG environment variable or defaults to "info"
///
/// Does nothing if a global subscriber is already installed.
pub fn init_logging(filter: Option<&str>) {
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true) // "module" target marks module output
                .with_thread_names(true) // lifecycle hooks run on "module-lifecycle"
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(resolve_filter(filter))
        .try_init();
}

/// Initialize logging with JSON output (for production/monitoring)
///
/// # Arguments
/// * `filter` - Optional log filter from config. If None, uses RUST_LOG or defaults to "info"
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) {
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(resolve_filter(filter))
        .try_init();
}

/// Initialize logging from `ModuleHostConfig::logging`
///
/// # Example
/// ```rust,no_run
/// use bllvm_module_host::config::ModuleHostConfig;
/// use bllvm_module_host::utils::init_logging_from_config;
///
/// let config = ModuleHostConfig::default();
/// init_logging_from_config(config.logging.as_ref());
/// ```
pub fn init_logging_from_config(config: Option<&LoggingConfig>) {
    let filter = config.and_then(|c| c.filter.as_deref());

    if config.map(|c| c.json_format).unwrap_or(false) {
        #[cfg(feature = "json-logging")]
        {
            init_json_logging(filter);
        }
        #[cfg(not(feature = "json-logging"))]
        {
            // Fall back to regular logging if json-logging feature not enabled
            init_logging(filter);
        }
    } else {
        init_logging(filter);
    }
}
