//! pmscaled: the pmscale daemon.
//!
//! Connects to the local PM2 through its CLI, samples worker CPU and
//! memory once per tick, and scales cluster applications up and down.
//!
//! # Usage
//!
//! ```text
//! pmscaled run --config /etc/pmscale.toml
//! pmscaled check-config --config /etc/pmscale.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pmscale_autoscale::Autoscaler;
use pmscale_core::ScaleConfig;
use pmscale_supervisor::{Pm2Cli, SysinfoHost};

#[derive(Parser)]
#[command(name = "pmscaled", about = "Autoscaler for PM2 cluster applications")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the autoscaler until interrupted.
    Run {
        /// Path to a pmscale.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// pm2 executable.
        #[arg(long, default_value = "pm2")]
        pm2_bin: PathBuf,

        /// Force diagnostic logging on, overriding the config.
        #[arg(long)]
        debug: bool,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
    /// Validate a config file and print the effective settings.
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            pm2_bin,
            debug,
            log_json,
        } => {
            let mut config = load_config(config.as_deref())?;
            config.debug |= debug;
            init_tracing(config.debug, log_json);
            run(config, pm2_bin).await
        }
        Command::CheckConfig { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ScaleConfig> {
    match path {
        Some(path) => ScaleConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(ScaleConfig::default()),
    }
}

fn init_tracing(debug: bool, json: bool) {
    let default_filter = if debug {
        "info,pmscaled=debug,pmscale_autoscale=debug,pmscale_tracker=debug,pmscale_supervisor=debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(config: ScaleConfig, pm2_bin: PathBuf) -> anyhow::Result<()> {
    info!(
        pm2 = %pm2_bin.display(),
        scale_cpu_threshold = config.scale_cpu_threshold,
        release_cpu_threshold = config.release_cpu_threshold,
        max_workers = config.max_workers,
        "pmscale daemon starting"
    );

    let supervisor = Arc::new(Pm2Cli::new(pm2_bin));
    let host = Box::new(SysinfoHost::new());
    let mut autoscaler = Autoscaler::new(config, supervisor, host);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let autoscale_handle = tokio::spawn(async move {
        autoscaler.run(shutdown_rx).await;
    });

    shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    // Waits for in-flight scale commands.
    autoscale_handle.await?;

    info!("pmscale daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
