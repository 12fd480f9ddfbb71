// SPDX-License-Identifier: CEPL-1.0
use std::fmt::Display;
use std::sync::Arc;

use tracing::level_filters::LevelFilter;
use tracing::Level;

/// Leveled sink handed to the renderer and the driver debug callback.
///
/// Messages go through `tracing`; the handle adds its own runtime ceiling on
/// top of whatever the installed subscriber lets through.
#[derive(Clone, Debug)]
pub struct Logger {
    name: Arc<str>,
    max_level: LevelFilter,
}

impl Logger {
    pub fn new(name: impl Into<Arc<str>>, max_level: LevelFilter) -> Self {
        Self {
            name: name.into(),
            max_level,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_level(&self) -> LevelFilter {
        self.max_level
    }

    /// Whether a message at `level` would be emitted. Check this before
    /// building messages that are costly to format.
    pub fn should_log(&self, level: Level) -> bool {
        self.admits(level) && subscriber_enabled(level)
    }

    fn admits(&self, level: Level) -> bool {
        level <= self.max_level
    }

    pub fn error(&self, message: impl Display) {
        if self.admits(Level::ERROR) {
            tracing::error!(logger = %self.name, "{message}");
        }
    }

    pub fn warn(&self, message: impl Display) {
        if self.admits(Level::WARN) {
            tracing::warn!(logger = %self.name, "{message}");
        }
    }

    pub fn info(&self, message: impl Display) {
        if self.admits(Level::INFO) {
            tracing::info!(logger = %self.name, "{message}");
        }
    }

    pub fn debug(&self, message: impl Display) {
        if self.admits(Level::DEBUG) {
            tracing::debug!(logger = %self.name, "{message}");
        }
    }

    pub fn trace(&self, message: impl Display) {
        if self.admits(Level::TRACE) {
            tracing::trace!(logger = %self.name, "{message}");
        }
    }
}

fn subscriber_enabled(level: Level) -> bool {
    match level {
        Level::ERROR => tracing::enabled!(Level::ERROR),
        Level::WARN => tracing::enabled!(Level::WARN),
        Level::INFO => tracing::enabled!(Level::INFO),
        Level::DEBUG => tracing::enabled!(Level::DEBUG),
        Level::TRACE => tracing::enabled!(Level::TRACE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_suppresses_more_verbose_levels() {
        let log = Logger::new("test", LevelFilter::WARN);
        assert!(log.admits(Level::ERROR));
        assert!(log.admits(Level::WARN));
        assert!(!log.admits(Level::INFO));
        assert!(!log.should_log(Level::DEBUG));
    }

    #[test]
    fn off_admits_nothing() {
        let log = Logger::new("test", LevelFilter::OFF);
        assert!(!log.admits(Level::ERROR));
        assert!(!log.should_log(Level::ERROR));
    }

    #[test]
    fn clones_share_name() {
        let log = Logger::new("vkdemo", LevelFilter::INFO);
        let other = log.clone();
        assert_eq!(other.name(), "vkdemo");
        assert_eq!(other.max_level(), LevelFilter::INFO);
    }
}
