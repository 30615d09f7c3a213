//! Frame capture
//!
//! The receive path only overwrites a single "latest frame" slot; a cadence
//! task samples that slot on a fixed interval and hands the copy to the
//! frame-save worker.

use super::{StatusChannel, StatusMessage, StreamHandler, VIDEO_NOT_READY};
use crate::media::VideoFrame;
use crate::recorder::drain::{stop_worker, StopOutcome};
use crate::recorder::queue::{frame_queue, FrameSender, PushOutcome};
use crate::recorder::state::{PipelineStats, RecordingSession, SessionKind};
use crate::recorder::workers::{EnabledFlag, FrameCounter, FrameSaveWorker, FrameSavedCallback};
use crate::utils::error::AppResult;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

type LatestFrame = Arc<Mutex<Option<VideoFrame>>>;

pub(super) struct CapturePipeline {
    enabled: EnabledFlag,
    latest: LatestFrame,
    cadence: JoinHandle<()>,
    worker: JoinHandle<AppResult<u64>>,
    tx: FrameSender<VideoFrame>,
    counter: FrameCounter,
    session: RecordingSession,
}

impl CapturePipeline {
    /// Replace the cached frame
    pub(super) fn offer(&self, frame: &VideoFrame) {
        if self.enabled.load(Ordering::SeqCst) {
            *self.latest.lock() = Some(frame.clone());
        }
    }
}

struct Cadence {
    connection_id: String,
    enabled: EnabledFlag,
    latest: LatestFrame,
    tx: FrameSender<VideoFrame>,
    stats: Arc<PipelineStats>,
    interval: Duration,
}

impl Cadence {
    async fn run(self) {
        loop {
            tokio::time::sleep(self.interval).await;
            if !self.enabled.load(Ordering::SeqCst) {
                break;
            }

            let latest = self.latest.lock().clone();
            let Some(frame) = latest else {
                tracing::warn!(
                    "[conn {}] No video frame available to capture yet",
                    self.connection_id
                );
                continue;
            };

            match self.tx.try_push(frame) {
                PushOutcome::Queued { depth } => {
                    PipelineStats::observe_depth(&self.stats.frame_save_queue_max_size, depth);
                }
                PushOutcome::Full => {
                    let dropped = PipelineStats::record_drop(&self.stats.frame_save_dropped);
                    tracing::warn!(
                        "[conn {}] Frame save queue full, skipped capture ({} total)",
                        self.connection_id,
                        dropped
                    );
                }
                PushOutcome::Closed => break,
            }
        }
        tracing::debug!("[conn {}] Capture cadence stopped", self.connection_id);
    }
}

fn frame_saved_notifier(status: StatusChannel) -> FrameSavedCallback {
    Arc::new(move |filename: &str, count: u64| {
        status.send(StatusMessage::FrameSaved {
            filename: filename.to_string(),
            count,
        });
    })
}

impl StreamHandler {
    pub(super) fn start_frame_capture(&self) {
        if self.state.lock().capture.is_some() {
            tracing::warn!(
                "[conn {}] Frame capture already running, ignoring start",
                self.connection_id
            );
            return;
        }
        let resolution = match self.require_resolution() {
            Ok(resolution) => resolution,
            Err(e) => {
                tracing::warn!(
                    "[conn {}] Cannot start frame capture: {}",
                    self.connection_id,
                    e
                );
                self.status
                    .send(StatusMessage::frame_capture(VIDEO_NOT_READY, None));
                return;
            }
        };

        let pipeline = &self.config.pipeline;
        let (tx, rx) = frame_queue(pipeline.frame_save_queue_size);
        let enabled: EnabledFlag = Arc::new(AtomicBool::new(true));
        let latest: LatestFrame = Arc::new(Mutex::new(None));
        let counter = FrameCounter::new();

        let worker = FrameSaveWorker {
            connection_id: self.connection_id.clone(),
            enabled: enabled.clone(),
            counter: counter.clone(),
            output_dir: self.config.video_frames_dir.clone(),
            read_timeout: pipeline.queue_get_timeout,
            on_saved: Some(frame_saved_notifier(self.status.clone())),
        };
        let worker = tokio::spawn(worker.run(rx));

        let cadence = Cadence {
            connection_id: self.connection_id.clone(),
            enabled: enabled.clone(),
            latest: latest.clone(),
            tx: tx.clone(),
            stats: self.stats.clone(),
            interval: pipeline.frame_capture_interval,
        };
        let cadence = tokio::spawn(cadence.run());

        self.state.lock().capture = Some(CapturePipeline {
            enabled,
            latest,
            cadence,
            worker,
            tx,
            counter,
            session: RecordingSession::new(
                SessionKind::Frames,
                self.config.video_frames_dir.clone(),
                0,
            ),
        });

        tracing::info!(
            "[conn {}] Frame capture started at {}, every {:?}",
            self.connection_id,
            resolution,
            pipeline.frame_capture_interval
        );
        self.status
            .send(StatusMessage::frame_capture("Frame capture started", None));
    }

    pub(super) async fn stop_frame_capture(&self) {
        let taken = self.state.lock().capture.take();
        let Some(pipeline) = taken else {
            tracing::warn!(
                "[conn {}] Frame capture not running, ignoring stop",
                self.connection_id
            );
            self.status
                .send(StatusMessage::frame_capture("Frame capture is not running", None));
            return;
        };
        let CapturePipeline {
            enabled,
            latest,
            cadence,
            worker,
            tx,
            counter,
            mut session,
        } = pipeline;

        enabled.store(false, Ordering::SeqCst);
        cadence.abort();
        // Wait for the cadence task to release its queue handle
        let _ = cadence.await;
        latest.lock().take();

        let outcome = stop_worker("frame save", worker, tx, self.stop_timeouts()).await;
        session.end();

        let count = counter.get();
        session.frame_count = count;
        self.state.lock().frames_captured += count;

        let message = match outcome {
            StopOutcome::Completed(_) => format!("Frame capture stopped, {} frames saved", count),
            StopOutcome::Failed(e) => format!("Frame capture stopped with error: {}", e),
            StopOutcome::ForceStopped => {
                format!("Frame capture stopped early, {} frames saved", count)
            }
        };
        tracing::info!(
            "[conn {}] {} to {} ({}ms)",
            self.connection_id,
            message,
            session.path().display(),
            session.duration_ms()
        );
        self.status
            .send(StatusMessage::frame_capture(message, Some(count)));
    }
}
