// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use vkdemo_core::{init_tracing, parse_level, Logger};
use vkdemo_platform::Platform;
use vkdemo_render::RendererOptions;
use vkdemo_render_vk::run_frame_loop;

use config::{load_cfg, AppCfg};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = "vkdemo.toml")]
    config: PathBuf,

    /// Log level: trace | debug | info | warn | error | off
    #[arg(long)]
    log_level: Option<String>,

    /// Do not request validation layers
    #[arg(long)]
    no_validation: bool,
}

fn run(cfg: &AppCfg, args: &Args, logger: &Logger) -> Result<()> {
    let mut platform = Platform::new().context("initialise windowing")?;
    let window = platform
        .create_window(&cfg.window.title, cfg.window.width, cfg.window.height)
        .context("create window")?;

    let options = RendererOptions {
        app_name: cfg.window.title.clone(),
        validation: cfg.render.validation && !args.no_validation,
        clear_color: cfg.render.clear_color,
    };
    let stats = run_frame_loop(&mut platform, &window, &options, logger)?;
    info!(
        "exit: {} frames presented, {} skipped, {} resizes",
        stats.presented, stats.skipped, stats.resizes
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let (cfg, cfg_warning) = load_cfg(&args.config);

    let level_name = args.log_level.clone().unwrap_or_else(|| cfg.log.level.clone());
    let (level, level_warning) = match parse_level(&level_name) {
        Ok(level) => (level, None),
        Err(e) => (vkdemo_core::LevelFilter::INFO, Some(e)),
    };
    init_tracing(&level.to_string().to_lowercase());
    if let Some(w) = cfg_warning {
        warn!("config: {w}");
    }
    if let Some(e) = level_warning {
        warn!("config: {e:#}; using info");
    }

    let logger = Logger::new("vkdemo", level);
    match run(&cfg, &args, &logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
