//! Audio recording and replay

use super::{StatusMessage, StreamHandler};
use crate::media::AudioFrame;
use crate::recorder::drain::{stop_worker, StopOutcome};
use crate::recorder::queue::{frame_queue, FrameSender, PushOutcome};
use crate::recorder::state::{PipelineStats, RecordingSession, SessionKind, StreamMode};
use crate::recorder::workers::{AudioRecordingOutput, AudioRecordingWorker, EnabledFlag};
use crate::utils::error::AppResult;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

pub(super) struct AudioPipeline {
    tx: FrameSender<AudioFrame>,
    enabled: EnabledFlag,
    worker: JoinHandle<AppResult<AudioRecordingOutput>>,
    session: RecordingSession,
}

impl StreamHandler {
    pub(super) fn enqueue_audio_frame(&self, pipeline: &mut AudioPipeline, frame: AudioFrame) {
        match pipeline.tx.try_push(frame) {
            PushOutcome::Queued { depth } => {
                pipeline.session.frame_count += 1;
                PipelineStats::observe_depth(&self.stats.audio_queue_max_size, depth);
            }
            PushOutcome::Full | PushOutcome::Closed => {
                let dropped = PipelineStats::record_drop(&self.stats.audio_dropped_frames);
                let interval = self.config.pipeline.audio_dropped_log_interval.max(1);
                if (dropped - 1) % interval == 0 {
                    tracing::warn!(
                        "[conn {}] Audio recording queue full, {} frames dropped so far",
                        self.connection_id,
                        dropped
                    );
                }
            }
        }
    }

    pub(super) fn start_audio_recording(&self) {
        let mut state = self.state.lock();
        let mode = state.mode;
        if !state.set_mode(StreamMode::Recording) {
            drop(state);
            tracing::warn!(
                "[conn {}] start_record ignored while {}",
                self.connection_id,
                mode
            );
            self.status.send(StatusMessage::status(format!(
                "Cannot start recording during {}",
                mode.description()
            )));
            return;
        }

        let file_name = format!("recording_{}.wav", Utc::now().timestamp());
        let path = self.config.record_audio_dir.join(&file_name);
        let session = RecordingSession::new(SessionKind::Audio, path.clone(), state.sample_rate);

        let pipeline = &self.config.pipeline;
        let (tx, rx) = frame_queue(pipeline.audio_recording_queue_size);
        let enabled: EnabledFlag = Arc::new(AtomicBool::new(true));
        let worker = AudioRecordingWorker {
            connection_id: self.connection_id.clone(),
            enabled: enabled.clone(),
            fallback_sample_rate: state.sample_rate,
            path,
            read_timeout: pipeline.queue_get_timeout,
        };
        let worker = tokio::spawn(worker.run(rx));

        state.replay_buffer.clear();
        state.audio = Some(AudioPipeline {
            tx,
            enabled,
            worker,
            session,
        });
        drop(state);

        tracing::info!(
            "[conn {}] Audio recording started: {}",
            self.connection_id,
            file_name
        );
        self.status.send(StatusMessage::status("Recording started"));
    }

    pub(super) async fn stop_audio_recording(&self) {
        let pipeline = {
            let mut state = self.state.lock();
            let mode = state.mode;
            // The save is requested below, replay may begin
            if !state.set_mode(StreamMode::Replaying) {
                tracing::warn!(
                    "[conn {}] stop_record ignored, not recording (mode {})",
                    self.connection_id,
                    mode
                );
                return;
            }
            let pipeline = state.audio.take();
            if let Some(pipeline) = &pipeline {
                pipeline.enabled.store(false, Ordering::SeqCst);
            }
            pipeline
        };

        let Some(AudioPipeline {
            tx,
            worker,
            mut session,
            ..
        }) = pipeline
        else {
            tracing::error!("[conn {}] Recording mode without an audio pipeline", self.connection_id);
            return;
        };

        let outcome = stop_worker("audio recording", worker, tx, self.stop_timeouts()).await;
        session.end();

        let message = match outcome {
            StopOutcome::Completed(AudioRecordingOutput {
                frame_count,
                path: Some(path),
            }) => {
                tracing::info!(
                    "[conn {}] Audio recording saved: {} ({} frames at {} Hz, {}ms)",
                    self.connection_id,
                    path.display(),
                    frame_count,
                    session.rate,
                    session.duration_ms()
                );
                StatusMessage::Saved {
                    message: "Recording saved".to_string(),
                    filename: session.file_name().unwrap_or_default(),
                    path: path.to_string_lossy().to_string(),
                    count: frame_count,
                }
            }
            StopOutcome::Completed(AudioRecordingOutput { path: None, .. }) => {
                StatusMessage::status("No audio recorded")
            }
            StopOutcome::Failed(e) => StatusMessage::status(format!("Failed to save recording: {}", e)),
            StopOutcome::ForceStopped => StatusMessage::status(
                "Recording save timed out, the recording may be incomplete",
            ),
        };
        self.status.send(message);

        let replay_frames = self.state.lock().replay_buffer.len();
        tracing::info!(
            "[conn {}] Recording stopped, replaying {} frames",
            self.connection_id,
            replay_frames
        );
        self.status
            .send(StatusMessage::status("Recording stopped, replaying"));
    }
}
