//! hid-setup entry point.
//!
//! ```text
//! hid-setup <serial> <device_type> [reset]
//! ```
//!
//! Loads configuration, builds the profile registry (built-in profiles plus
//! any from `--profile-dir`), then performs exactly one run against the
//! phone with the given USB serial.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()            -- TOML file, defaults when absent
//!  └─ ProfileRegistry          -- built-in + user profiles
//!  └─ Orchestrator::run()      -- AoaBackend + AdbPromptTrigger
//!       raced against Ctrl-C; either way the session is torn down
//! ```
//!
//! With fewer than two positional arguments the usage text is printed, every
//! connectable device is logged so the operator can pick a serial, and the
//! process exits with status 1.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hid_setup::application::orchestrate::{list_devices, Orchestrator, RunRequest};
use hid_setup::infrastructure::accessory::aoa::AoaBackend;
use hid_setup::infrastructure::config::load_config;
use hid_setup::infrastructure::prompt::AdbPromptTrigger;
use hid_setup_core::{ProfileRegistry, TaskKind};

/// Drive Android setup or factory reset over an emulated USB keyboard and mouse.
#[derive(Debug, Parser)]
#[command(name = "hid-setup", about, version)]
struct Cli {
    /// USB serial number of the phone.
    serial: Option<String>,

    /// Device profile name, e.g. `g23` or `pixel_8`.
    device_type: Option<String>,

    /// `reset` for a factory reset; anything else (or nothing) runs setup.
    task: Option<String>,

    /// Configuration file (defaults to the platform config directory).
    #[arg(long, env = "HID_SETUP_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of extra `*.toml` device profiles.
    #[arg(long, env = "HID_SETUP_PROFILE_DIR")]
    profile_dir: Option<PathBuf>,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,

    /// Print the known device types and exit.
    #[arg(long)]
    list_profiles: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("loading configuration")?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    // ── Profiles ──────────────────────────────────────────────────────────────
    let mut registry = ProfileRegistry::builtin().context("loading built-in device profiles")?;
    if let Some(dir) = cli.profile_dir.as_ref().or(config.profile_dir.as_ref()) {
        let loaded = registry
            .load_dir(dir)
            .with_context(|| format!("loading device profiles from {}", dir.display()))?;
        info!(dir = %dir.display(), loaded, "user device profiles loaded");
    }

    if cli.list_profiles {
        for device_type in registry.device_types() {
            println!("{device_type}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    // ── Usage + device listing ──────────────────────────────────────────────────
    let (Some(serial), Some(device_type)) = (cli.serial, cli.device_type) else {
        Cli::command().print_help().context("printing usage")?;
        println!();
        match list_devices(AoaBackend::new()) {
            Ok(devices) if devices.is_empty() => warn!("no USB devices found"),
            Ok(devices) => {
                for device in devices {
                    info!("found device {device}");
                }
            }
            Err(e) => warn!("device listing failed: {e}"),
        }
        return Ok(ExitCode::FAILURE);
    };

    let request = RunRequest {
        serial,
        device_type,
        task: TaskKind::from_arg(cli.task.as_deref()),
    };

    // ── Run ───────────────────────────────────────────────────────────────────
    let mut orchestrator = Orchestrator::new(
        AoaBackend::new(),
        registry,
        AdbPromptTrigger::new(&config.adb_path),
    )
    .with_reconnect_settings(config.reconnect_settings());

    let outcome = tokio::select! {
        result = orchestrator.run(&request) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    // Dropping the orchestrator tears the session down if the run was
    // interrupted mid-step.
    drop(orchestrator);

    match outcome {
        Some(Ok(report)) => {
            info!(
                run_id = %report.run_id,
                steps = report.steps_executed,
                reconnected = report.reconnected,
                "{} finished for {}",
                report.task,
                report.device_type
            );
            Ok(ExitCode::SUCCESS)
        }
        // Already logged inside the run span.
        Some(Err(_)) => Ok(ExitCode::FAILURE),
        None => {
            error!("interrupted; device released");
            Ok(ExitCode::FAILURE)
        }
    }
}
