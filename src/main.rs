//! CLI Entry Point for mocap-recorder
//!
//! Provides command-line interface for:
//! - Recording a session locally against the simulated IMU
//! - Serving the control link over TCP
//! - Dumping a stored log as JSON lines
//!
//! # Usage
//!
//! Record five seconds into memory and print the session summary:
//! ```bash
//! mocap-recorder record --secs 5 --volatile
//! ```
//!
//! Serve a remote controller:
//! ```bash
//! mocap-recorder serve --listen 0.0.0.0:7070
//! ```
//!
//! Print the stored record:
//! ```bash
//! mocap-recorder dump --limit 100
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use mocap_recorder::config::RecorderConfig;
use mocap_recorder::control::server::ControlServer;
use mocap_recorder::control::{Command, Notification};
use mocap_recorder::data::{
    FsMedium, MemoryMedium, PersistentLog, RecordMeta, Sample, StorageMedium, StreamNames,
    META_SIZE, SAMPLE_SIZE,
};
use mocap_recorder::hardware::mock::SimulatedImu;
use mocap_recorder::logging;
use mocap_recorder::{Indicators, Session};
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "mocap-recorder")]
#[command(about = "Motion-capture acquisition recorder", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/mocap.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record one session with the simulated IMU and print its summary
    Record {
        /// Session length in seconds
        #[arg(long, default_value = "5")]
        secs: u64,

        /// Keep the log in memory instead of the mount point
        #[arg(long)]
        volatile: bool,

        /// Seed of the simulated sensor noise
        #[arg(long, default_value = "1")]
        seed: u64,
    },

    /// Serve the control link over TCP until interrupted
    Serve {
        /// Listen address (overrides control.listen_addr)
        #[arg(long)]
        listen: Option<SocketAddr>,
    },

    /// Print the stored meta record and samples as JSON lines
    Dump {
        /// Maximum number of samples to print
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RecorderConfig::load_from(path),
        None => RecorderConfig::load(),
    }
    .context("failed to load configuration")?;
    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;

    match cli.command {
        Commands::Record {
            secs,
            volatile,
            seed,
        } => record(config, secs, volatile, seed).await,
        Commands::Serve { listen } => serve(config, listen).await,
        Commands::Dump { limit } => dump(&config, limit),
    }
}

fn stream_names(config: &RecorderConfig) -> StreamNames {
    StreamNames {
        data: config.storage.data_file.clone(),
        meta: config.storage.meta_file.clone(),
    }
}

async fn record(config: RecorderConfig, secs: u64, volatile: bool, seed: u64) -> Result<()> {
    let medium: Arc<dyn StorageMedium> = if volatile {
        Arc::new(MemoryMedium::new())
    } else {
        Arc::new(FsMedium::new(&config.storage.mount_point))
    };
    let mut session = Session::new(
        &config,
        medium,
        Arc::new(SimulatedImu::new(seed)),
        Indicators::default(),
    )?;
    let mut notifications = session
        .take_notifications()
        .context("notification channel already taken")?;
    let handler = Arc::clone(session.control_handler());

    handler.on_connected();
    handler.handle_command(&[Command::Start.code()]).await?;
    info!(secs, "Recording");

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
        _ = tokio::signal::ctrl_c() => warn!("Interrupted, stopping early"),
    }

    handler.handle_command(&[Command::GetMeta.code()]).await?;
    if let Ok(Some(Notification::RecordMeta(live))) =
        tokio::time::timeout(Duration::from_secs(1), notifications.recv()).await
    {
        info!(
            sample_count = live.sample_count,
            total_size = live.total_size,
            "Live meta before stop"
        );
    }

    let stopped = session.coordinator().stop().await?;
    let overruns = session.sampler().overruns();
    handler.on_disconnected().await?;
    session.shutdown().await?;

    let summary = json!({
        "meta": stopped,
        "overruns": overruns,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn serve(config: RecorderConfig, listen: Option<SocketAddr>) -> Result<()> {
    let medium = Arc::new(FsMedium::new(&config.storage.mount_point));
    let mut session = Session::new(
        &config,
        medium,
        Arc::new(SimulatedImu::new(1)),
        Indicators::default(),
    )?;
    let notifications = session
        .take_notifications()
        .context("notification channel already taken")?;

    let addr = listen.unwrap_or(config.control.listen_addr);
    let server =
        ControlServer::bind(addr, Arc::clone(session.control_handler()), notifications).await?;

    let served = server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Cannot listen for interrupt");
                std::future::pending::<()>().await;
            }
        })
        .await;
    session.shutdown().await?;
    served.context("control link terminated")?;
    Ok(())
}

fn dump(config: &RecorderConfig, limit: Option<usize>) -> Result<()> {
    let medium = Arc::new(FsMedium::new(&config.storage.mount_point));
    let log = PersistentLog::mount(medium, stream_names(config))?;
    log.open()?;

    let mut meta_buf = [0u8; META_SIZE];
    let meta = if log.meta_read_at(0, &mut meta_buf)? == META_SIZE {
        Some(RecordMeta::decode(&meta_buf)?)
    } else {
        None
    };
    let data_len = log.data_len()?;
    println!(
        "{}",
        serde_json::to_string(&json!({ "meta": meta, "data_len": data_len }))?
    );
    if let Some(meta) = meta {
        if u64::from(meta.total_size) != data_len {
            warn!(
                total_size = meta.total_size,
                data_len, "Meta does not match the data stream"
            );
        }
    }

    let mut record = [0u8; SAMPLE_SIZE];
    let mut printed = 0usize;
    while limit.map_or(true, |limit| printed < limit) {
        let n = log.read(&mut record)?;
        if n < SAMPLE_SIZE {
            if n > 0 {
                warn!(bytes = n, "Trailing partial sample ignored");
            }
            break;
        }
        let sample = Sample::decode(&record)?;
        println!("{}", serde_json::to_string(&sample)?);
        printed += 1;
    }

    log.close()?;
    Ok(())
}
