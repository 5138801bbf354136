//! Logging setup shared by the binary and the tests.

use std::str::FromStr;

use tracing::Level;

/// Install a `fmt` subscriber capped at `level`. Unknown levels fall back to
/// info. Only the first call installs anything.
pub fn init(level: &str) {
    let parsed = parse_level(level);
    let installed = tracing_subscriber::fmt()
        .with_max_level(parsed.unwrap_or(Level::INFO))
        .with_target(false)
        .try_init()
        .is_ok();
    if installed && parsed.is_none() {
        tracing::warn!("Unknown log level \"{}\", logging at info", level);
    }
}

/// Accepts the `tracing` level names in any case, plus `warning`.
pub(crate) fn parse_level(level: &str) -> Option<Level> {
    match level.trim().to_ascii_lowercase().as_str() {
        "warning" => Some(Level::WARN),
        other => Level::from_str(other).ok(),
    }
}
