//! Logging setup utilities for the Heya packages.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Build the default filter directive for a library crate and its binary.
///
/// Crate names are normalised to tracing targets (`-` becomes `_`). A binary
/// sharing the crate's target gets a single directive.
pub fn default_filter(crate_name: &str, binary_name: &str, default_log_level: &str) -> String {
    let crate_target = crate_name.replace('-', "_");
    let binary_target = binary_name.replace('-', "_");

    let mut directives = vec![format!("{}={}", crate_target, default_log_level)];
    if binary_target != crate_target {
        directives.push(format!("{}={}", binary_target, default_log_level));
    }
    directives.push(format!("tower_http={}", default_log_level));
    directives.join(",")
}

/// Initialize the tracing subscriber with the specified default log level.
///
/// The log level can be overridden using the `RUST_LOG` environment variable.
///
/// # Arguments
///
/// * `crate_name` - The library crate emitting most events (e.g., "heya-server")
/// * `binary_name` - The name of the binary (e.g., "heya-server")
/// * `default_log_level` - The default log level (e.g., "debug", "info", "warn", "error")
///
/// # Examples
///
/// ```no_run
/// use heya_shared::logger::setup_logger;
///
/// setup_logger("heya-server", "heya-server", "debug");
/// ```
pub fn setup_logger(crate_name: &str, binary_name: &str, default_log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                default_filter(crate_name, binary_name, default_log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
