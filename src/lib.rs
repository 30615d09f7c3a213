//! Uran RTC - connection-scoped audio/video echo with recording.
//!
//! Each connection gets a [`handler::StreamHandler`] that echoes inbound
//! media back to the client and feeds three optional pipelines: audio
//! recording with replay, periodic still capture and video recording.

pub mod config;
pub mod encode;
pub mod handler;
pub mod media;
pub mod recorder;
pub mod server;
pub mod session;
pub mod utils;

use config::AppConfig;
use encode::video::FfmpegVideoSinkFactory;
use server::ServerState;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Load `.env` from the working directory or its parent
fn load_dotenv() {
    if dotenv::dotenv().is_ok() {
        return;
    }
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(parent) = cwd.parent() {
            let env_path = parent.join(".env");
            if env_path.is_file() {
                let _ = dotenv::from_path(env_path);
            }
        }
    }
}

/// Log to stdout, and also to `LOG_FILE` (plain text, appended) when set
fn init_tracing() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,uran_rtc_lib=debug,tower_http=info".into());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(filter.clone());
    let registry = tracing_subscriber::registry().with(stdout_layer);

    if let Ok(path) = std::env::var("LOG_FILE") {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .with_target(true)
            .with_filter(filter);
        registry.with(file_layer).init();
        tracing::info!(path = %path, "logging to file");
    } else {
        registry.init();
    }
    Ok(())
}

/// Start the server
pub fn run() -> anyhow::Result<()> {
    load_dotenv();
    init_tracing()?;

    tracing::info!("Starting Uran RTC v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env()?;
    config.init_directories()?;
    tracing::info!(
        "Config loaded: data dir {}, codec {:?} at {}fps, capture every {:?}",
        config.data_dir.display(),
        config.pipeline.video_codec,
        config.pipeline.video_fps,
        config.pipeline.frame_capture_interval
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.blocking_threads)
        .build()?;

    let video_sinks = Arc::new(FfmpegVideoSinkFactory::new(config.pipeline.video_codec));
    let state = Arc::new(ServerState::new(Arc::new(config), video_sinks));
    runtime.block_on(server::serve(state))
}
