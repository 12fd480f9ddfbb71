// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub log: LogCfg,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "Hello Vulkan".to_owned(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub validation: bool,
}

impl Default for RenderCfg {
    fn default() -> Self {
        Self {
            clear_color: default_clear(),
            validation: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LogCfg {
    pub level: String,
}

impl Default for LogCfg {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// Reads the config file. A missing file gives defaults silently; an unreadable
/// or malformed one gives defaults plus a warning for the caller to log once
/// tracing is up.
pub fn load_cfg(path: &Path) -> (AppCfg, Option<String>) {
    match fs::read_to_string(path) {
        Ok(text) => match parse_cfg(&text) {
            Ok(cfg) => (cfg, None),
            Err(e) => (
                AppCfg::default(),
                Some(format!("{}: {e}; using defaults", path.display())),
            ),
        },
        Err(e) if e.kind() == ErrorKind::NotFound => (AppCfg::default(), None),
        Err(e) => (
            AppCfg::default(),
            Some(format!("{}: {e}; using defaults", path.display())),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse_cfg("").unwrap();
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.window.title, "Hello Vulkan");
        assert_eq!((cfg.window.width, cfg.window.height), (800, 600));
        assert!(cfg.render.validation);
        assert_eq!(cfg.log.level, "info");
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let cfg = parse_cfg(
            r#"
            [window]
            width = 1280

            [render]
            validation = false

            [log]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.window.height, 600);
        assert_eq!(cfg.window.title, "Hello Vulkan");
        assert!(!cfg.render.validation);
        assert_eq!(cfg.render.clear_color, default_clear());
        assert_eq!(cfg.log.level, "debug");
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(parse_cfg("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_is_silent() {
        let (cfg, warning) = load_cfg(Path::new("definitely/not/here/vkdemo.toml"));
        assert_eq!(cfg, AppCfg::default());
        assert!(warning.is_none());
    }
}
