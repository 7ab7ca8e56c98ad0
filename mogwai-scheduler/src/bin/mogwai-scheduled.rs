//! Download scheduler daemon
//!
//! Activatable host service: exits on its own once no entries are pending,
//! no client holds it, and the inactivity timeout has elapsed.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mogwai_scheduler::testing::{DummyConnectionMonitor, DummyPeerManager};
use mogwai_scheduler::{load_config, ScheduleService, Scheduler, SystemClock};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_OK: u8 = 0;
const EXIT_INVALID_OPTIONS: u8 = 1;
const EXIT_SERVICE_UNAVAILABLE: u8 = 2;
const EXIT_WRONG_ENVIRONMENT: u8 = 3;

#[derive(Parser)]
#[command(name = "mogwai-scheduled")]
#[command(about = "Schedules bulk downloads around metered-network tariffs")]
#[command(version)]
struct Cli {
    /// Inactivity timeout in seconds; 0 disables (overrides the config
    /// file)
    #[arg(short = 't', long)]
    inactivity_timeout: Option<u64>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(EXIT_INVALID_OPTIONS);
        }
    };

    // Peer ranking keys off executable paths, which root could spoof for
    // any entry it likes; the daemon runs unprivileged only.
    if nix::unistd::Uid::effective().is_root() {
        error!("refusing to run as root");
        return ExitCode::from(EXIT_WRONG_ENVIRONMENT);
    }

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::from(EXIT_INVALID_OPTIONS);
        }
    };
    let timeout_secs = cli
        .inactivity_timeout
        .unwrap_or(config.inactivity_timeout_secs);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to start the event loop");
            return ExitCode::from(EXIT_SERVICE_UNAVAILABLE);
        }
    };

    runtime.block_on(serve(config.scheduler_options(), timeout_secs))
}

async fn serve(
    options: mogwai_scheduler::SchedulerOptions,
    timeout_secs: u64,
) -> ExitCode {
    let clock = Arc::new(SystemClock::new());
    // TODO: replace the in-memory collaborators with the host network
    // monitor and bus peer tracker once those backends land.
    let connections = Arc::new(DummyConnectionMonitor::new());
    let peers = Arc::new(DummyPeerManager::new());

    let scheduler = match Scheduler::new(clock, connections, peers, options).await {
        Ok(scheduler) => scheduler,
        Err(err) => {
            error!(error = %err, "failed to start the scheduler");
            return ExitCode::from(EXIT_SERVICE_UNAVAILABLE);
        }
    };

    let service = ScheduleService::new(scheduler, Duration::from_secs(timeout_secs));
    info!(timeout_secs, "scheduler daemon ready");

    tokio::select! {
        _ = service.run() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                error!(error = %err, "failed to wait for interrupt");
            } else {
                info!("interrupted; shutting down");
            }
        }
    }

    service.close();
    ExitCode::from(EXIT_OK)
}
