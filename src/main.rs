use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;

use termoweb_climate::climate::ClimateEntity;
use termoweb_climate::config::{self, Config};
use termoweb_climate::coordinator::CoordinatorStatus;
use termoweb_climate::integration::Integration;

/// Expose Termoweb radiators as climate entities.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// Load environment variables from this file instead of `./.env`.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
    applied: usize,
}

fn configure_env(cli: &Cli) -> anyhow::Result<Option<LoadedEnvFile>> {
    let (path, explicit) = match &cli.env_file {
        Some(path) => {
            if !path.is_file() {
                anyhow::bail!("env file not found: {}", path.display());
            }
            (path.clone(), true)
        }
        None => {
            let default_path = std::env::current_dir()
                .context("unable to read current directory")?
                .join(".env");
            if !default_path.is_file() {
                return Ok(None);
            }
            (default_path, false)
        }
    };
    let applied = config::load_env_file(&path)?;
    Ok(Some(LoadedEnvFile { path, explicit, applied }))
}

fn log_entity(entity: &dyn ClimateEntity) {
    let fmt_temp = |t: Option<f64>| t.map(|v| format!("{:.1}{}", v, entity.temperature_unit())).unwrap_or_else(|| "-".into());
    info!(
        "{} [{}]: mode={} current={} target={} available={}",
        entity.device_info().name,
        entity.unique_id(),
        entity.hvac_mode(),
        fmt_temp(entity.current_temperature()),
        fmt_temp(entity.target_temperature()),
        entity.available()
    );
}

async fn run() -> anyhow::Result<()> {
    let cfg = Config::from_env().context("invalid configuration")?;
    info!(
        "Config loaded (email={}, base_url={}, http_timeout={}s)",
        cfg.email,
        cfg.base_url,
        cfg.http_timeout.as_secs()
    );

    let integration = Integration::from_config(&cfg)
        .await
        .context("Termoweb is not ready; retry setup later")?;
    for entity in integration.entities() {
        log_entity(&**entity);
    }

    let mut data = integration.coordinator().subscribe();
    let mut status = integration.coordinator().status();
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("failed to listen for Ctrl-C")?;
                info!("Shutting down");
                break;
            }
            Ok(()) = data.changed() => {
                data.borrow_and_update();
                for entity in integration.entities() {
                    log_entity(&**entity);
                }
            }
            Ok(()) = status.changed() => {
                match *status.borrow_and_update() {
                    CoordinatorStatus::ReauthRequired => {
                        error!("Termoweb credentials were rejected; update TERMOWEB_EMAIL/TERMOWEB_PASSWORD and restart")
                    }
                    CoordinatorStatus::UpdateFailed => warn!("Termoweb unreachable; serving last known state"),
                    CoordinatorStatus::Ok => info!("Termoweb reachable again"),
                }
            }
        }
    }

    integration.unload().await;
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let loaded_env = match configure_env(&cli) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {:#}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!(
            "Environment loaded from {} .env file: {} ({} variable(s) applied)",
            origin,
            info.path.display(),
            info.applied
        );
    }

    info!(
        "termoweb-climate {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("fatal: failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(run()) {
        error!("fatal: {:#}", e);
        std::process::exit(1);
    }
}
