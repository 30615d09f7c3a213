//! Recording and capture workers
//!
//! Each worker consumes one bounded queue and pushes the blocking file work
//! (encoding, disk writes) onto tokio's blocking pool so the receive path
//! never waits on I/O. A failure on a single frame is logged and skipped;
//! only failures of the worker itself are returned.

use crate::encode::audio::{concat_samples, save_wav};
use crate::encode::image::{frame_file_name, save_png};
use crate::encode::video::VideoSink;
use crate::media::{AudioFrame, Resolution, VideoFrame};
use crate::recorder::queue::{FrameReceiver, RecvTimeout};
use crate::utils::error::AppResult;
use chrono::Utc;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared flag telling a worker its producer is still active
pub type EnabledFlag = Arc<AtomicBool>;

/// Video sink shared between the worker and the handler that releases it
pub type SharedVideoSink = Arc<Mutex<Box<dyn VideoSink>>>;

/// Called with the file name and running count after each saved still
pub type FrameSavedCallback = Arc<dyn Fn(&str, u64) + Send + Sync>;

/// Sequence counter shared by the capture cadence and the frame-save worker
#[derive(Debug, Clone, Default)]
pub struct FrameCounter(Arc<AtomicU64>);

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Drains the video-recording queue in batches into a [`VideoSink`]
pub struct VideoRecordingWorker {
    pub connection_id: String,
    pub enabled: EnabledFlag,
    pub sink: SharedVideoSink,
    /// Resolution fixed at recording start
    pub resolution: Resolution,
    pub batch_size: usize,
    pub poll_interval: Duration,
}

impl VideoRecordingWorker {
    /// Run until disabled and drained. Returns the number of frames written.
    pub async fn run(self, mut queue: FrameReceiver<VideoFrame>) -> AppResult<u64> {
        tracing::info!("[conn {}] Video recording worker started", self.connection_id);
        let mut frames_written = 0u64;

        while self.enabled.load(Ordering::SeqCst) || !queue.is_empty() {
            let batch = queue.drain_batch(self.batch_size.max(1));
            if batch.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            let sink = self.sink.clone();
            let resolution = self.resolution;
            let written =
                tokio::task::spawn_blocking(move || write_frames_sync(&sink, batch, resolution))
                    .await?;
            frames_written += written;
        }

        tracing::info!(
            "[conn {}] Video recording worker finished, {} frames written",
            self.connection_id,
            frames_written
        );
        Ok(frames_written)
    }
}

/// Write a batch, resizing frames that do not match the target resolution.
/// Returns how many frames made it into the sink.
pub fn write_frames_sync(
    sink: &SharedVideoSink,
    frames: Vec<VideoFrame>,
    resolution: Resolution,
) -> u64 {
    if frames.is_empty() {
        return 0;
    }
    if !resolution.is_valid() {
        tracing::error!("Invalid target resolution {}, skipping batch", resolution);
        return 0;
    }

    let mut sink = sink.lock();
    let mut written = 0;
    for frame in frames {
        let frame = if frame.resolution() != resolution {
            frame.resized(resolution)
        } else {
            frame
        };
        match sink.write_frame(&frame) {
            Ok(()) => written += 1,
            Err(e) => tracing::error!("Failed to write video frame: {}", e),
        }
    }
    written
}

/// Result of an audio recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioRecordingOutput {
    pub frame_count: u64,
    /// Written file, `None` when nothing was recorded
    pub path: Option<PathBuf>,
}

/// Accumulates recorded audio and writes a WAV file once the producer is done
pub struct AudioRecordingWorker {
    pub connection_id: String,
    pub enabled: EnabledFlag,
    /// Used when no frame carries a sample rate
    pub fallback_sample_rate: u32,
    pub path: PathBuf,
    pub read_timeout: Duration,
}

impl AudioRecordingWorker {
    /// Collect frames until the queue closes, or a read times out after the
    /// producer was disabled, then write everything in one blocking call.
    pub async fn run(self, mut queue: FrameReceiver<AudioFrame>) -> AppResult<AudioRecordingOutput> {
        tracing::info!("[conn {}] Audio recording worker started", self.connection_id);
        let mut recorded: Vec<AudioFrame> = Vec::new();

        loop {
            match queue.recv_timeout(self.read_timeout).await {
                RecvTimeout::Item(frame) => recorded.push(frame),
                RecvTimeout::Closed => break,
                RecvTimeout::Timeout => {
                    if !self.enabled.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }

        if recorded.is_empty() {
            tracing::warn!(
                "[conn {}] Audio recording worker finished with no frames to save",
                self.connection_id
            );
            return Ok(AudioRecordingOutput {
                frame_count: 0,
                path: None,
            });
        }

        let frame_count = recorded.len() as u64;
        let sample_rate = recorded
            .first()
            .map(|f| f.sample_rate)
            .filter(|&rate| rate > 0)
            .unwrap_or(self.fallback_sample_rate);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let samples = concat_samples(&recorded);
            save_wav(&path, &samples, sample_rate)
        })
        .await??;

        tracing::info!(
            "[conn {}] Audio recording worker finished, {} frames",
            self.connection_id,
            frame_count
        );
        Ok(AudioRecordingOutput {
            frame_count,
            path: Some(self.path),
        })
    }
}

/// Saves captured stills as PNG files
pub struct FrameSaveWorker {
    pub connection_id: String,
    pub enabled: EnabledFlag,
    pub counter: FrameCounter,
    pub output_dir: PathBuf,
    pub read_timeout: Duration,
    pub on_saved: Option<FrameSavedCallback>,
}

impl FrameSaveWorker {
    /// Run until disabled and drained. Returns the number of stills saved.
    pub async fn run(self, mut queue: FrameReceiver<VideoFrame>) -> AppResult<u64> {
        tracing::info!("[conn {}] Frame save worker started", self.connection_id);
        let mut saved = 0u64;

        while self.enabled.load(Ordering::SeqCst) || !queue.is_empty() {
            let frame = match queue.recv_timeout(self.read_timeout).await {
                RecvTimeout::Item(frame) => frame,
                RecvTimeout::Timeout => continue,
                RecvTimeout::Closed => break,
            };

            let sequence = self.counter.get();
            let file_name = frame_file_name(Utc::now().timestamp(), sequence);
            let path = self.output_dir.join(&file_name);
            let result = tokio::task::spawn_blocking(move || save_png(&path, &frame)).await?;

            match result {
                Ok(()) => {
                    let count = self.counter.increment();
                    saved += 1;
                    tracing::info!(
                        "[conn {}] Saved frame {} (#{})",
                        self.connection_id,
                        file_name,
                        count
                    );
                    if let Some(on_saved) = &self.on_saved {
                        on_saved(&file_name, count);
                    }
                }
                Err(e) => {
                    tracing::error!("[conn {}] Failed to save frame: {}", self.connection_id, e)
                }
            }
        }

        tracing::info!(
            "[conn {}] Frame save worker finished, {} frames saved",
            self.connection_id,
            saved
        );
        Ok(saved)
    }
}
