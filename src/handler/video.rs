//! Video recording

use super::{StatusMessage, StreamHandler, VIDEO_NOT_READY};
use crate::media::{Resolution, VideoFrame};
use crate::recorder::drain::{stop_worker, StopOutcome};
use crate::recorder::queue::{frame_queue, FrameSender, PushOutcome};
use crate::recorder::state::{PipelineStats, RecordingSession, SessionKind};
use crate::recorder::workers::{EnabledFlag, SharedVideoSink, VideoRecordingWorker};
use crate::utils::error::{AppError, AppResult};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

pub(super) struct VideoPipeline {
    tx: FrameSender<VideoFrame>,
    enabled: EnabledFlag,
    worker: JoinHandle<AppResult<u64>>,
    sink: SharedVideoSink,
    session: RecordingSession,
    resolution: Resolution,
    /// Set while queue usage is above the warning threshold
    overloaded: bool,
}

impl StreamHandler {
    pub(super) fn enqueue_video_frame(&self, pipeline: &mut VideoPipeline, frame: VideoFrame) {
        if !pipeline.enabled.load(Ordering::SeqCst) {
            return;
        }

        match pipeline.tx.try_push(frame) {
            PushOutcome::Queued { depth } => {
                pipeline.session.frame_count += 1;
                PipelineStats::observe_depth(&self.stats.video_queue_max_size, depth);

                let usage = pipeline.tx.usage();
                let threshold = self.config.pipeline.queue_warning_threshold;
                if usage >= threshold && !pipeline.overloaded {
                    tracing::warn!(
                        "[conn {}] Video recording queue at {:.0}% ({}/{})",
                        self.connection_id,
                        usage * 100.0,
                        depth,
                        pipeline.tx.capacity()
                    );
                    pipeline.overloaded = true;
                } else if usage < threshold {
                    pipeline.overloaded = false;
                }
            }
            PushOutcome::Full | PushOutcome::Closed => {
                let dropped = PipelineStats::record_drop(&self.stats.video_dropped_frames);
                let interval = self.config.pipeline.dropped_frame_log_interval.max(1);
                if (dropped - 1) % interval == 0 {
                    tracing::warn!(
                        "[conn {}] Video recording queue full, {} frames dropped so far",
                        self.connection_id,
                        dropped
                    );
                    self.status.send(StatusMessage::video_recording(format!(
                        "Video recording overloaded, {} frames dropped",
                        dropped
                    )));
                }
            }
        }
    }

    pub(super) async fn start_video_recording(&self) {
        if self.state.lock().video.is_some() {
            tracing::warn!(
                "[conn {}] Video recording already running, ignoring start",
                self.connection_id
            );
            return;
        }
        let resolution = match self.require_resolution() {
            Ok(resolution) => resolution,
            Err(e) => {
                tracing::warn!(
                    "[conn {}] Cannot start video recording: {}",
                    self.connection_id,
                    e
                );
                self.status.send(StatusMessage::video_recording(VIDEO_NOT_READY));
                return;
            }
        };

        let pipeline = &self.config.pipeline;
        let file_name = format!(
            "video_{}.{}",
            Utc::now().timestamp(),
            self.video_sinks.extension()
        );
        let path = self.config.video_recordings_dir.join(&file_name);

        let factory = self.video_sinks.clone();
        let open_path = path.clone();
        let fps = pipeline.video_fps;
        let opened = match tokio::task::spawn_blocking(move || {
            factory.open(&open_path, resolution, fps)
        })
        .await
        {
            Ok(result) => result,
            Err(e) => Err(AppError::from(e)),
        };

        let sink: SharedVideoSink = match opened {
            Ok(sink) => Arc::new(Mutex::new(sink)),
            Err(e) => {
                tracing::error!(
                    "[conn {}] Failed to open video writer {}: {}",
                    self.connection_id,
                    path.display(),
                    e
                );
                self.status.send(StatusMessage::video_recording(format!(
                    "Failed to start video recording: {}",
                    e
                )));
                return;
            }
        };

        let (tx, rx) = frame_queue(pipeline.video_recording_queue_size);
        let enabled: EnabledFlag = Arc::new(AtomicBool::new(true));
        let worker = VideoRecordingWorker {
            connection_id: self.connection_id.clone(),
            enabled: enabled.clone(),
            sink: sink.clone(),
            resolution,
            batch_size: pipeline.video_batch_size,
            poll_interval: pipeline.worker_poll_interval,
        };
        let worker = tokio::spawn(worker.run(rx));

        self.state.lock().video = Some(VideoPipeline {
            tx,
            enabled,
            worker,
            sink,
            session: RecordingSession::new(SessionKind::Video, path.clone(), fps),
            resolution,
            overloaded: false,
        });

        tracing::info!(
            "[conn {}] Video recording started: {} at {} {}fps",
            self.connection_id,
            file_name,
            resolution,
            fps
        );
        self.status.send(StatusMessage::VideoRecordingStatus {
            message: "Video recording started".to_string(),
            filename: Some(file_name),
            path: Some(path.to_string_lossy().to_string()),
            count: None,
            resolution: Some(resolution.to_string()),
        });
    }

    pub(super) async fn stop_video_recording(&self) {
        let taken = self.state.lock().video.take();
        let Some(pipeline) = taken else {
            tracing::warn!(
                "[conn {}] Video recording not running, ignoring stop",
                self.connection_id
            );
            self.status
                .send(StatusMessage::video_recording("Video recording is not running"));
            return;
        };
        let VideoPipeline {
            tx,
            enabled,
            worker,
            sink,
            mut session,
            resolution,
            ..
        } = pipeline;

        enabled.store(false, Ordering::SeqCst);
        let outcome = stop_worker("video recording", worker, tx, self.stop_timeouts()).await;

        // Release the container even when the worker was cancelled
        let finished = tokio::task::spawn_blocking(move || {
            let mut sink = sink.lock();
            let result = sink.finish();
            (result, sink.frame_count())
        })
        .await;
        session.end();

        let (finish_result, frame_count) = match finished {
            Ok((result, count)) => (result, count),
            Err(e) => (Err(AppError::from(e)), 0),
        };
        self.state.lock().frames_recorded += frame_count;

        let message = match (&outcome, &finish_result) {
            (_, Err(e)) => format!("Video recording failed: {}", e),
            (StopOutcome::Failed(e), _) => format!("Video recording failed: {}", e),
            (StopOutcome::ForceStopped, _) => {
                "Video recording stopped before all frames were written".to_string()
            }
            (StopOutcome::Completed(_), Ok(())) => "Video recording saved".to_string(),
        };
        tracing::info!(
            "[conn {}] {}: {} frames of {} queued at {} {}fps, {} ({}ms)",
            self.connection_id,
            message,
            frame_count,
            session.frame_count,
            resolution,
            session.rate,
            session.path().display(),
            session.duration_ms()
        );

        self.status.send(StatusMessage::VideoRecordingStatus {
            message,
            filename: session.file_name(),
            path: Some(session.path().to_string_lossy().to_string()),
            count: Some(frame_count),
            resolution: Some(resolution.to_string()),
        });
    }
}
