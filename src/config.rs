//! Configuration management
//!
//! Output directories, pipeline tunables and server settings. Values come from
//! the environment (optionally loaded from `.env`) with defaults for everything.

use crate::encode::video::VideoCodec;
use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const RECORD_AUDIO_DIR: &str = "record_audio";
const VIDEO_FRAMES_DIR: &str = "video_frames";
const VIDEO_RECORDINGS_DIR: &str = "video_recordings";

/// Sizing and timing for the per-connection queues and workers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Capacity of the video-recording queue
    pub video_recording_queue_size: usize,

    /// Capacity of the audio-recording queue
    pub audio_recording_queue_size: usize,

    /// Capacity of the frame-save queue
    pub frame_save_queue_size: usize,

    /// Capacity of the live echo queues (audio and video)
    pub live_queue_size: usize,

    /// Maximum frames drained per video write batch
    pub video_batch_size: usize,

    /// Sleep between polls when the video queue is empty
    pub worker_poll_interval: Duration,

    /// Timeout of a single blocking queue read in the audio and frame-save workers
    pub queue_get_timeout: Duration,

    /// How often a waiting audio emitter re-checks the stream mode
    pub live_poll_interval: Duration,

    /// Deadline for a queue to drain on stop or shutdown
    pub shutdown_wait_timeout: Duration,

    /// Extra time given to a worker task to finish once its queue is drained
    pub worker_join_grace: Duration,

    /// Poll interval while waiting for a queue to drain
    pub drain_poll_interval: Duration,

    /// Queue usage ratio above which a warning is logged
    pub queue_warning_threshold: f64,

    /// Log one video drop warning every N drops
    pub dropped_frame_log_interval: u64,

    /// Log one audio drop warning every N drops
    pub audio_dropped_log_interval: u64,

    /// Interval between captured stills
    pub frame_capture_interval: Duration,

    /// Frame rate written into video recordings
    pub video_fps: u32,

    /// Codec used for video recordings
    pub video_codec: VideoCodec,

    /// Assumed input sample rate until the first audio frame arrives
    pub input_sample_rate: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            video_recording_queue_size: 300,
            audio_recording_queue_size: 500,
            frame_save_queue_size: 10,
            live_queue_size: 256,
            video_batch_size: 10,
            worker_poll_interval: Duration::from_millis(10),
            queue_get_timeout: Duration::from_secs(1),
            live_poll_interval: Duration::from_millis(100),
            shutdown_wait_timeout: Duration::from_secs(5),
            worker_join_grace: Duration::from_secs(2),
            drain_poll_interval: Duration::from_millis(100),
            queue_warning_threshold: 0.8,
            dropped_frame_log_interval: 30,
            audio_dropped_log_interval: 100,
            frame_capture_interval: Duration::from_secs(3),
            video_fps: 30,
            video_codec: VideoCodec::Xvid,
            input_sample_rate: 16000,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root of all persisted artifacts
    pub data_dir: PathBuf,

    /// Audio recordings (`recording_<unix>.wav`)
    pub record_audio_dir: PathBuf,

    /// Captured stills (`frame_<unix>_<seq>.png`)
    pub video_frames_dir: PathBuf,

    /// Video recordings (`video_<unix>.<ext>`)
    pub video_recordings_dir: PathBuf,

    /// HTTP / WebSocket listen address
    pub bind_addr: SocketAddr,

    /// Size of the blocking thread pool used for file and image I/O
    pub blocking_threads: usize,

    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Build a configuration rooted at `data_dir` with default tunables
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        Self {
            record_audio_dir: data_dir.join(RECORD_AUDIO_DIR),
            video_frames_dir: data_dir.join(VIDEO_FRAMES_DIR),
            video_recordings_dir: data_dir.join(VIDEO_RECORDINGS_DIR),
            data_dir,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            blocking_threads: 8,
            pipeline: PipelineConfig::default(),
        }
    }

    /// Read configuration from the environment.
    ///
    /// Unset variables fall back to defaults; malformed values are an error.
    pub fn from_env() -> AppResult<Self> {
        let data_dir = std::env::var("URAN_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
        let mut config = Self::with_data_dir(data_dir);

        if let Some(addr) = env_parse::<SocketAddr>("URAN_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(threads) = env_parse::<usize>("URAN_BLOCKING_THREADS")? {
            if threads == 0 {
                return Err(AppError::Config(
                    "URAN_BLOCKING_THREADS must be at least 1".to_string(),
                ));
            }
            config.blocking_threads = threads;
        }
        if let Some(codec) = env_parse::<VideoCodec>("URAN_VIDEO_CODEC")? {
            config.pipeline.video_codec = codec;
        }
        if let Some(fps) = env_parse::<u32>("URAN_VIDEO_FPS")? {
            config.pipeline.video_fps = fps.max(1);
        }
        if let Some(secs) = env_parse::<u64>("URAN_FRAME_CAPTURE_INTERVAL_SECS")? {
            config.pipeline.frame_capture_interval = Duration::from_secs(secs.max(1));
        }

        Ok(config)
    }

    /// Create every output directory
    pub fn init_directories(&self) -> AppResult<()> {
        for dir in [
            &self.record_audio_dir,
            &self.video_frames_dir,
            &self.video_recordings_dir,
        ] {
            std::fs::create_dir_all(dir)?;
            tracing::info!("Initialized directory: {}", dir.display());
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str) -> AppResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| AppError::Config(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directories_derived_from_data_dir() {
        let config = AppConfig::with_data_dir("/tmp/uran");
        assert_eq!(config.record_audio_dir, PathBuf::from("/tmp/uran/record_audio"));
        assert_eq!(config.video_frames_dir, PathBuf::from("/tmp/uran/video_frames"));
        assert_eq!(
            config.video_recordings_dir,
            PathBuf::from("/tmp/uran/video_recordings")
        );
    }

    #[test]
    fn test_init_directories_creates_all() {
        let tmp = tempfile::tempdir().unwrap();
        let config = AppConfig::with_data_dir(tmp.path());
        config.init_directories().unwrap();
        assert!(config.record_audio_dir.is_dir());
        assert!(config.video_frames_dir.is_dir());
        assert!(config.video_recordings_dir.is_dir());
    }

    #[test]
    fn test_pipeline_defaults() {
        let pipeline = PipelineConfig::default();
        assert_eq!(pipeline.video_batch_size, 10);
        assert_eq!(pipeline.frame_capture_interval, Duration::from_secs(3));
        assert_eq!(pipeline.video_codec, VideoCodec::Xvid);
        assert!(pipeline.queue_warning_threshold < 1.0);
    }
}
