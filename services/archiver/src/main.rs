//! Sequence data archiver service.
//!
//! Streams the sequence files of a submission from S3 to the ENA upload
//! area, compressing and checksumming on the fly, then reports the archive
//! results back to the Ingest API.
//! - One-shot mode: `archiver --submission <uuid> [--file <uuid>]...`
//! - Service mode: HTTP API for archive requests and status

mod archiver;
mod config;
mod ingest;
mod server;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use storage::ObjectStoreSource;
use transfer::TransferCoordinator;
use upload::FtpConnector;

use archiver::{ArchiveRequest, Archiver};
use config::ArchiverConfig;
use ingest::IngestClient;
use server::{ArchiveTracker, ServerState};

#[derive(Parser, Debug)]
#[command(name = "archiver")]
#[command(about = "Archive submission sequence files to the ENA upload area")]
struct Args {
    /// Archive this submission once and exit (vs serving HTTP requests)
    #[arg(short, long)]
    submission: Option<String>,

    /// File uuid to archive (repeatable; default: all sequence files)
    #[arg(short, long = "file")]
    files: Vec<String>,

    /// Transfer one file at a time
    #[arg(long)]
    sequential: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Port for the HTTP server
    #[arg(long, env = "ARCHIVER_PORT", default_value = "8080")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    // Initialize Prometheus metrics exporter
    let prometheus_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    info!("Starting sequence data archiver");

    // Load configuration
    let mut config = ArchiverConfig::from_env()?;
    config.sequential |= args.sequential;
    info!(
        ingest_api = %config.ingest_api,
        ftp_host = %config.ftp.host,
        ftp_secure = config.ftp.secure,
        ftp_dir = ?config.ftp_dir,
        sequential = config.sequential,
        "Loaded configuration"
    );

    let source = Arc::new(ObjectStoreSource::new(config.storage.clone())?);
    let connector = Arc::new(FtpConnector::new(config.ftp.clone()));
    let coordinator = Arc::new(TransferCoordinator::new(
        source,
        connector,
        config.coordinator_config(),
    ));
    let ingest = IngestClient::new(config.ingest_api.clone())?;
    let archiver = Archiver::new(ingest, coordinator);

    if let Some(submission) = args.submission {
        // Single run mode
        let request = ArchiveRequest {
            sub_uuid: submission,
            files: args.files,
        };
        let result = archiver.archive(&request).await;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let state = Arc::new(ServerState {
        archiver,
        tracker: ArchiveTracker::new(),
        metrics: prometheus_handle,
    });
    server::start_server(state, args.port).await
}
