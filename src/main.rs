use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log_uploader_lib::settings::SettingsStore;
use log_uploader_lib::{release_catalog, Pipeline, PipelineConfig};
use tracing_subscriber::filter::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Directory arcdps writes its recordings to.
    #[arg(long, env = "LOG_UPLOADER_LOGS_DIR")]
    logs_dir: PathBuf,

    /// Settings, the Elite Insights installation and generated reports live here.
    #[arg(long, env = "LOG_UPLOADER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Append logs to this file instead of stderr.
    #[arg(long, env = "LOG_UPLOADER_LOG_FILE")]
    log_file: Option<PathBuf>,
}

fn init_logging(log_file: Option<&PathBuf>) {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    if let Some(path) = log_file {
        if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
        {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_ansi(false)
                .with_writer(file)
                .init();
            return;
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("log-uploader")
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_file.as_ref());

    let config = PipelineConfig {
        logs_directory: args.logs_dir,
        data_directory: args.data_dir.unwrap_or_else(default_data_dir),
    };
    if let Err(error) = std::fs::create_dir_all(&config.data_directory) {
        tracing::error!(
            data_directory = %config.data_directory.display(),
            "Failed to create data directory: {error}"
        );
        return ExitCode::FAILURE;
    }

    let settings = Arc::new(SettingsStore::initialize(config.settings_file()));

    // Blocking HTTP clients must be built outside the async runtime.
    let pipeline = match Pipeline::from_config(&config, Arc::clone(&settings)) {
        Ok(pipeline) => Arc::new(pipeline),
        Err(error) => {
            tracing::error!("Failed to set up log uploader: {error}");
            return ExitCode::FAILURE;
        }
    };
    let catalog = match release_catalog(&settings) {
        Ok(catalog) => catalog,
        Err(error) => {
            tracing::error!("Failed to set up release catalog: {error}");
            return ExitCode::FAILURE;
        }
    };

    pipeline.start(&catalog);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!("Failed to start signal handler: {error}");
            pipeline.shutdown();
            return ExitCode::FAILURE;
        }
    };

    if let Err(error) = runtime.block_on(tokio::signal::ctrl_c()) {
        tracing::error!("Failed to wait for shutdown signal: {error}");
    }

    pipeline.shutdown();
    if let Err(error) = settings.save() {
        tracing::warn!("Failed to save settings: {error}");
    }

    ExitCode::SUCCESS
}
