// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod logger;

pub use logger::Logger;
pub use tracing::level_filters::LevelFilter;
pub use tracing::Level;

use anyhow::{anyhow, Result};

/// Installs the process-wide subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// Parses `trace|debug|info|warn|error|off` (case-insensitive).
pub fn parse_level(s: &str) -> Result<LevelFilter> {
    s.trim()
        .parse::<LevelFilter>()
        .map_err(|_| anyhow!("unknown log level {s:?} (expected trace|debug|info|warn|error|off)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels() {
        assert_eq!(parse_level("debug").unwrap(), LevelFilter::DEBUG);
        assert_eq!(parse_level(" WARN ").unwrap(), LevelFilter::WARN);
        assert_eq!(parse_level("off").unwrap(), LevelFilter::OFF);
    }

    #[test]
    fn rejects_unknown_level() {
        assert!(parse_level("loud").is_err());
    }
}
