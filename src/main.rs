use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use agriscan::commands;
use agriscan::http::{self, ApiState};
use agriscan::persistence::SampleStore;
use agriscan::pipeline::config::AgriScanConfig;
use agriscan::pipeline::{epoch_now, Pipeline};
use agriscan::prefs::Preferences;
use agriscan::reference::ReferenceData;
use agriscan::sensor::SimulatedProbe;

/// AgriScan: offline soil-water monitoring node
#[derive(Parser, Debug)]
#[command(name = "agriscan", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Path to log file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the acquisition pipeline and the HTTP API
    Run {
        /// Path to agriscan.toml config file
        #[arg(long, default_value = "agriscan.toml")]
        config: PathBuf,

        /// Force simulation mode (fast calibration thresholds)
        #[arg(long)]
        simulate: bool,

        /// Override the database path from config
        #[arg(long)]
        db: Option<String>,
    },

    /// Scaffold a default configuration in a directory
    Init {
        /// Target directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },

    /// Validate configuration, reference data, and store health
    Check {
        /// Path to agriscan.toml config file
        #[arg(long, default_value = "agriscan.toml")]
        config: PathBuf,
    },
}

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing(log_level: &str, log_file: Option<PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_ansi(true);

    let file_layer = log_file.map(|path| {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let filename = path.file_name().unwrap_or_default();
        let file_appender = tracing_appender::rolling::never(parent, filename);
        fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .json()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_file)?;

    match cli.command {
        Commands::Run {
            config,
            simulate,
            db,
        } => {
            let mut config =
                AgriScanConfig::from_file(&config).with_context(|| "Failed to load config")?;
            if simulate {
                config.sampling.simulation_mode = true;
            }
            if let Some(db) = db {
                config.persistence.database_path = db;
            }

            tracing::info!(
                cadence_s = config.sampling.sample_cadence_s,
                simulation = config.sampling.simulation_mode,
                db = %config.persistence.database_path,
                http = %config.http.bind_addr,
                "Config loaded"
            );

            run_node(config).await
        }
        Commands::Init { dir } => commands::init::run_init(&dir),
        Commands::Check { config } => commands::check::run_check(&config).await,
    }
}

async fn run_node(config: AgriScanConfig) -> Result<()> {
    let now = epoch_now();

    let store = SampleStore::open(&config.persistence.database_path)
        .await
        .with_context(|| "Failed to open sample store")?;

    let reference = ReferenceData::load_or_default(Path::new(&config.reference.reference_path));
    let prefs_path = PathBuf::from(&config.reference.prefs_path);
    let prefs = Preferences::load(&prefs_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Preferences unreadable, using defaults");
        Preferences::default()
    });

    // The crop/soil reference seeds the calibrator's initial targets; site
    // learning refines them from observed episodes.
    let days = prefs.days_after_planting(now).unwrap_or(0);
    let seed = reference.seed_targets(&prefs.crop, &prefs.soil, days);
    if seed.is_none() {
        tracing::warn!(
            crop = %prefs.crop,
            soil = %prefs.soil,
            "No reference entry for the configured crop/soil; seeding from the retention curve"
        );
    }

    // The probe trait is the hardware seam; this binary drives the
    // deterministic commissioning probe. Firmware builds link the library
    // against the real ADC driver.
    let probe = Box::new(SimulatedProbe::new(
        config.sensor_calibration(),
        config.sampling.sample_cadence_s,
    ));

    let bind_addr = config.http.bind_addr.clone();
    let lock_timeout = Duration::from_secs(config.http.lock_timeout_s);
    let db_path = PathBuf::from(&config.persistence.database_path);

    let pipeline = Pipeline::bootstrap(config, probe, store, seed, now).await?;

    let state = Arc::new(ApiState {
        store: pipeline.store_handle(),
        snapshot: pipeline.snapshot_handle(),
        prefs: Arc::new(RwLock::new(prefs)),
        prefs_path,
        reference: Arc::new(reference),
        db_path,
        lock_timeout,
    });

    let cancel = CancellationToken::new();

    let http_cancel = cancel.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http::serve(state, &bind_addr, http_cancel).await {
            tracing::error!(error = %e, "HTTP server failed");
        }
    });

    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            ctrl_c_cancel.cancel();
        }
    });

    pipeline.run(cancel).await?;
    http_task.await.ok();
    Ok(())
}
