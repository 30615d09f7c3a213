//! Connection-scoped stream handler
//!
//! A [`StreamHandler`] sits between the transport and the recording
//! pipelines of one connection. Inbound media is echoed through the live
//! queues and fanned out to whichever pipelines are active:
//!
//! - audio recording (WAV, plus the in-memory replay buffer)
//! - video recording (container file at a fixed resolution)
//! - frame capture (PNG stills on a fixed cadence)
//!
//! The receive path never waits: every queue is bounded and drops the newest
//! item when full. Control actions are serialized so a start and a stop of
//! the same pipeline never interleave.

mod audio;
mod capture;
pub mod control;
mod video;

pub use control::{ControlAction, StatusChannel, StatusMessage};

use crate::config::AppConfig;
use crate::encode::video::VideoSinkFactory;
use crate::media::{AudioFrame, Resolution, VideoFrame};
use crate::recorder::drain::StopTimeouts;
use crate::recorder::queue::{frame_queue, FrameReceiver, FrameSender, PushOutcome, RecvTimeout};
use crate::recorder::state::{PipelineStats, StatsSnapshot, StreamMode};
use crate::utils::error::{AppError, AppResult};
use audio::AudioPipeline;
use capture::CapturePipeline;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use video::VideoPipeline;

/// Status text when a video action arrives before the first frame
const VIDEO_NOT_READY: &str = "Video not ready, waiting for the first frame";

/// Diagnostic view of a connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub webrtc_id: String,
    /// Unix seconds
    pub start_time: i64,
    /// Seconds since `start_time`
    pub connected_duration: i64,
    pub mode: StreamMode,
    pub video_resolution: Option<String>,
    pub total_video_frames: u64,
    pub stats: StatsSnapshot,
}

/// Mutable per-connection state. Guarded by a sync mutex that is never held
/// across an await point.
struct HandlerState {
    started_at: DateTime<Utc>,
    mode: StreamMode,
    sample_rate: u32,
    replay_buffer: VecDeque<AudioFrame>,
    video_resolution: Option<Resolution>,
    input_data: Map<String, Value>,
    audio: Option<AudioPipeline>,
    video: Option<VideoPipeline>,
    capture: Option<CapturePipeline>,
    frames_recorded: u64,
    frames_captured: u64,
}

impl HandlerState {
    /// Move to `next` if the mode cycle allows it
    fn set_mode(&mut self, next: StreamMode) -> bool {
        if !self.mode.can_transition_to(next) {
            return false;
        }
        self.mode = next;
        true
    }
}

/// Orchestrates media and pipelines for one connection
pub struct StreamHandler {
    connection_id: String,
    config: Arc<AppConfig>,
    video_sinks: Arc<dyn VideoSinkFactory>,
    status: StatusChannel,
    stats: Arc<PipelineStats>,
    live_audio_tx: FrameSender<AudioFrame>,
    live_audio_rx: tokio::sync::Mutex<FrameReceiver<AudioFrame>>,
    live_video_tx: FrameSender<VideoFrame>,
    live_video_rx: tokio::sync::Mutex<FrameReceiver<VideoFrame>>,
    state: Mutex<HandlerState>,
    /// Serializes control actions and shutdown
    control: tokio::sync::Mutex<()>,
    /// Set by shutdown; later control actions are ignored
    closed: AtomicBool,
    total_video_frames: AtomicU64,
}

impl StreamHandler {
    pub fn new(
        connection_id: impl Into<String>,
        config: Arc<AppConfig>,
        video_sinks: Arc<dyn VideoSinkFactory>,
    ) -> Self {
        let live_size = config.pipeline.live_queue_size;
        let (live_audio_tx, live_audio_rx) = frame_queue(live_size);
        let (live_video_tx, live_video_rx) = frame_queue(live_size);
        let sample_rate = config.pipeline.input_sample_rate;

        Self {
            connection_id: connection_id.into(),
            config,
            video_sinks,
            status: StatusChannel::default(),
            stats: Arc::new(PipelineStats::default()),
            live_audio_tx,
            live_audio_rx: tokio::sync::Mutex::new(live_audio_rx),
            live_video_tx,
            live_video_rx: tokio::sync::Mutex::new(live_video_rx),
            state: Mutex::new(HandlerState {
                started_at: Utc::now(),
                mode: StreamMode::Live,
                sample_rate,
                replay_buffer: VecDeque::new(),
                video_resolution: None,
                input_data: Map::new(),
                audio: None,
                video: None,
                capture: None,
                frames_recorded: 0,
                frames_captured: 0,
            }),
            control: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            total_video_frames: AtomicU64::new(0),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn mode(&self) -> StreamMode {
        self.state.lock().mode
    }

    /// Resolution of the most recent video frame, if any arrived yet
    pub fn video_resolution(&self) -> Option<Resolution> {
        self.state.lock().video_resolution
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Listen for status messages meant for the client
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusMessage> {
        self.status.subscribe()
    }

    /// Called once the transport has accepted the connection
    pub fn start_up(&self) {
        let started_at = Utc::now();
        self.state.lock().started_at = started_at;
        tracing::info!(
            "[conn {}] Stream started at {}, mode {}",
            self.connection_id,
            started_at.to_rfc3339(),
            StreamMode::Live
        );
    }

    /// Accept one inbound video frame. Never blocks.
    pub fn receive_video_frame(&self, frame: VideoFrame) {
        let total = self.total_video_frames.fetch_add(1, Ordering::Relaxed) + 1;
        let resolution = frame.resolution();

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            match state.video_resolution {
                None => {
                    let (min, max) = frame.value_range();
                    tracing::info!(
                        "[conn {}] First video frame: {}, {} channels, values {}..={}",
                        self.connection_id,
                        resolution,
                        frame.format.channels(),
                        min,
                        max
                    );
                    state.video_resolution = Some(resolution);
                }
                Some(previous) if previous != resolution => {
                    tracing::warn!(
                        "[conn {}] Video resolution changed from {} to {} at frame {}",
                        self.connection_id,
                        previous,
                        resolution,
                        total
                    );
                    self.stats.resolution_changes.fetch_add(1, Ordering::Relaxed);
                    state.video_resolution = Some(resolution);
                }
                Some(_) => {}
            }

            if let Some(capture) = &state.capture {
                capture.offer(&frame);
            }
            if let Some(video) = state.video.as_mut() {
                self.enqueue_video_frame(video, frame.clone());
            }
        }

        if !matches!(self.live_video_tx.try_push(frame), PushOutcome::Queued { .. }) {
            PipelineStats::record_drop(&self.stats.live_video_dropped);
        }
    }

    /// Accept one inbound audio frame. Never blocks.
    pub fn receive_audio_frame(&self, frame: AudioFrame) {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            if frame.sample_rate > 0 {
                state.sample_rate = frame.sample_rate;
            }
            if state.mode == StreamMode::Recording {
                if let Some(audio) = state.audio.as_mut() {
                    self.enqueue_audio_frame(audio, frame.clone());
                }
                state.replay_buffer.push_back(frame.clone());
            }
        }

        if !matches!(self.live_audio_tx.try_push(frame), PushOutcome::Queued { .. }) {
            PipelineStats::record_drop(&self.stats.live_audio_dropped);
        }
    }

    /// Next audio frame for the client.
    ///
    /// While replaying this yields recorded frames only; once the replay
    /// buffer is exhausted the handler returns to live echo. The live wait
    /// wakes up periodically so a replay starts even when no live audio
    /// arrives. Returns `None` only when the live queue is closed.
    pub async fn emit_audio(&self) -> Option<AudioFrame> {
        let poll = self.config.pipeline.live_poll_interval;
        loop {
            if let Some(frame) = self.next_replay_frame() {
                return Some(frame);
            }
            let received = self.live_audio_rx.lock().await.recv_timeout(poll).await;
            match received {
                // A replay may have started while we were waiting
                RecvTimeout::Item(_) if self.mode() == StreamMode::Replaying => continue,
                RecvTimeout::Item(frame) => return Some(frame),
                RecvTimeout::Timeout => continue,
                RecvTimeout::Closed => return None,
            }
        }
    }

    /// Next video frame for the client, independent of recording state
    pub async fn emit_video(&self) -> Option<VideoFrame> {
        self.live_video_rx.lock().await.recv().await
    }

    fn next_replay_frame(&self) -> Option<AudioFrame> {
        let mut state = self.state.lock();
        if state.mode != StreamMode::Replaying {
            return None;
        }
        if let Some(frame) = state.replay_buffer.pop_front() {
            // Live audio that piled up during the replay is stale
            if let Ok(mut live) = self.live_audio_rx.try_lock() {
                live.clear();
            }
            return Some(frame);
        }

        state.set_mode(StreamMode::Live);
        drop(state);
        tracing::info!("[conn {}] Replay finished, back to live", self.connection_id);
        self.status
            .send(StatusMessage::status("Replay finished, back to live"));
        None
    }

    /// Handle a raw control message. Malformed messages are logged and dropped.
    pub async fn handle_text(&self, message: &str) {
        match ControlAction::parse(message) {
            Ok(action) => self.dispatch(action).await,
            Err(e) => tracing::warn!(
                "[conn {}] Ignoring control message {:?}: {}",
                self.connection_id,
                message,
                e
            ),
        }
    }

    pub async fn dispatch(&self, action: ControlAction) {
        let _control = self.control.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            tracing::warn!(
                "[conn {}] Ignoring {} after shutdown",
                self.connection_id,
                action.as_str()
            );
            return;
        }
        tracing::info!("[conn {}] Control action: {}", self.connection_id, action.as_str());

        match action {
            ControlAction::StartRecord => self.start_audio_recording(),
            ControlAction::StopRecord => self.stop_audio_recording().await,
            ControlAction::StartFrameCapture => self.start_frame_capture(),
            ControlAction::StopFrameCapture => self.stop_frame_capture().await,
            ControlAction::StartVideoRecording => self.start_video_recording().await,
            ControlAction::StopVideoRecording => self.stop_video_recording().await,
        }
    }

    /// Stop every pipeline, bounded by the configured drain timeouts
    pub async fn shutdown(&self) {
        let _control = self.control.lock().await;
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("[conn {}] Shutting down stream", self.connection_id);

        let (capturing, recording_video, recording_audio) = {
            let state = self.state.lock();
            (
                state.capture.is_some(),
                state.video.is_some(),
                state.mode == StreamMode::Recording,
            )
        };
        if capturing {
            self.stop_frame_capture().await;
        }
        if recording_video {
            self.stop_video_recording().await;
        }
        if recording_audio {
            self.stop_audio_recording().await;
        }

        let (frames_recorded, frames_captured, started_at) = {
            let state = self.state.lock();
            (state.frames_recorded, state.frames_captured, state.started_at)
        };
        let stats = self.stats.snapshot();
        tracing::info!(
            "[conn {}] Stream closed after {}s: {} video frames received, {} recorded, {} captured, \
             dropped video/audio/frame-save {}/{}/{}, max queue video/audio/frame-save {}/{}/{}",
            self.connection_id,
            (Utc::now() - started_at).num_seconds(),
            self.total_video_frames.load(Ordering::Relaxed),
            frames_recorded,
            frames_captured,
            stats.video_dropped_frames,
            stats.audio_dropped_frames,
            stats.frame_save_dropped,
            stats.video_queue_max_size,
            stats.audio_queue_max_size,
            stats.frame_save_queue_max_size
        );
    }

    /// Inject ad-hoc test input. Objects merge into the input map; any other
    /// value is kept under `last_input`.
    pub fn set_input(&self, input: Value) -> Value {
        let mut state = self.state.lock();
        match input {
            Value::Object(fields) => state.input_data.extend(fields),
            other => {
                state.input_data.insert("last_input".to_string(), other);
            }
        }
        tracing::debug!("[conn {}] Input data updated", self.connection_id);
        Value::Object(state.input_data.clone())
    }

    pub fn get_input_data(&self) -> Value {
        let state = self.state.lock();
        json!({
            "webrtc_id": self.connection_id,
            "input_data": Value::Object(state.input_data.clone()),
            "mode": state.mode,
            "resolution": state.video_resolution.map(|r| r.to_string()),
        })
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        let state = self.state.lock();
        ConnectionInfo {
            webrtc_id: self.connection_id.clone(),
            start_time: state.started_at.timestamp(),
            connected_duration: (Utc::now() - state.started_at).num_seconds(),
            mode: state.mode,
            video_resolution: state.video_resolution.map(|r| r.to_string()),
            total_video_frames: self.total_video_frames.load(Ordering::Relaxed),
            stats: self.stats.snapshot(),
        }
    }

    /// Resolution fixed by the first video frame
    fn require_resolution(&self) -> AppResult<Resolution> {
        self.video_resolution().ok_or_else(|| {
            AppError::Precondition("no video frame received yet".to_string())
        })
    }

    fn stop_timeouts(&self) -> StopTimeouts {
        let pipeline = &self.config.pipeline;
        StopTimeouts {
            drain: pipeline.shutdown_wait_timeout,
            grace: pipeline.worker_join_grace,
            poll: pipeline.drain_poll_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::video::VideoSink;
    use crate::utils::error::AppResult;
    use std::path::Path;
    use std::time::Duration;

    struct NullSink;

    impl VideoSink for NullSink {
        fn write_frame(&mut self, _frame: &VideoFrame) -> AppResult<()> {
            Ok(())
        }

        fn frame_count(&self) -> u64 {
            0
        }

        fn finish(&mut self) -> AppResult<()> {
            Ok(())
        }
    }

    struct NullSinkFactory;

    impl VideoSinkFactory for NullSinkFactory {
        fn open(&self, _path: &Path, _resolution: Resolution, _fps: u32) -> AppResult<Box<dyn VideoSink>> {
            Ok(Box::new(NullSink))
        }

        fn extension(&self) -> &str {
            "null"
        }
    }

    fn handler(dir: &Path) -> StreamHandler {
        let config = AppConfig::with_data_dir(dir);
        config.init_directories().unwrap();
        StreamHandler::new("test-conn", Arc::new(config), Arc::new(NullSinkFactory))
    }

    fn audio(value: i16) -> AudioFrame {
        AudioFrame::new(16000, vec![value; 4])
    }

    #[tokio::test]
    async fn test_live_echo() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = handler(tmp.path());
        handler.receive_audio_frame(audio(7));
        handler.receive_video_frame(VideoFrame::solid(4, 4, [1, 2, 3]));

        assert_eq!(handler.emit_audio().await.unwrap().samples, vec![7; 4]);
        assert_eq!(
            handler.emit_video().await.unwrap().resolution(),
            Resolution::new(4, 4)
        );
        assert_eq!(handler.video_resolution(), Some(Resolution::new(4, 4)));
    }

    #[tokio::test]
    async fn test_record_then_replay_then_live() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = handler(tmp.path());
        let mut status = handler.subscribe_status();

        handler.handle_text(r#"{"action":"start_record"}"#).await;
        assert_eq!(handler.mode(), StreamMode::Recording);
        for value in 1..=3 {
            handler.receive_audio_frame(audio(value));
        }
        handler.handle_text(r#"{"action":"stop_record"}"#).await;
        assert_eq!(handler.mode(), StreamMode::Replaying);

        // Live audio arriving during the replay is never returned
        handler.receive_audio_frame(audio(99));
        for value in 1..=3 {
            assert_eq!(handler.emit_audio().await.unwrap().samples, vec![value; 4]);
        }
        handler.receive_audio_frame(audio(42));
        assert_eq!(handler.emit_audio().await.unwrap().samples, vec![42; 4]);
        assert_eq!(handler.mode(), StreamMode::Live);

        let mut saw_saved = false;
        let mut saw_replay_finished = false;
        while let Ok(message) = status.try_recv() {
            match message {
                StatusMessage::Saved { count, .. } => {
                    assert_eq!(count, 3);
                    saw_saved = true;
                }
                StatusMessage::Status { message } if message.starts_with("Replay finished") => {
                    saw_replay_finished = true
                }
                _ => {}
            }
        }
        assert!(saw_saved);
        assert!(saw_replay_finished);

        let files: Vec<_> = std::fs::read_dir(tmp.path().join("record_audio"))
            .unwrap()
            .collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_record_when_live_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = handler(tmp.path());
        let mut status = handler.subscribe_status();

        handler.dispatch(ControlAction::StopRecord).await;
        assert_eq!(handler.mode(), StreamMode::Live);
        assert!(status.try_recv().is_err());
        assert_eq!(
            std::fs::read_dir(tmp.path().join("record_audio")).unwrap().count(),
            0
        );
    }

    #[tokio::test]
    async fn test_start_record_rejected_while_replaying() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = handler(tmp.path());
        handler.dispatch(ControlAction::StartRecord).await;
        handler.receive_audio_frame(audio(1));
        handler.dispatch(ControlAction::StopRecord).await;

        handler.dispatch(ControlAction::StartRecord).await;
        assert_eq!(handler.mode(), StreamMode::Replaying);
    }

    #[tokio::test]
    async fn test_video_actions_need_resolution() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = handler(tmp.path());
        let mut status = handler.subscribe_status();

        handler.dispatch(ControlAction::StartVideoRecording).await;
        handler.dispatch(ControlAction::StartFrameCapture).await;

        assert!(matches!(
            status.try_recv().unwrap(),
            StatusMessage::VideoRecordingStatus { .. }
        ));
        assert!(matches!(
            status.try_recv().unwrap(),
            StatusMessage::FrameCaptureStatus { .. }
        ));
        // Nothing was started, so shutdown has nothing to stop
        handler.shutdown().await;
        assert!(status.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_control_message_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = handler(tmp.path());
        handler.handle_text("not json").await;
        handler.handle_text(r#"{"action":"explode"}"#).await;
        assert_eq!(handler.mode(), StreamMode::Live);
    }

    #[tokio::test]
    async fn test_receive_never_blocks_on_full_live_queues() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = handler(tmp.path());
        let capacity = handler.config.pipeline.live_queue_size as u64;

        let started = std::time::Instant::now();
        for _ in 0..capacity + 10 {
            handler.receive_audio_frame(audio(0));
        }
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(handler.stats().live_audio_dropped, 10);
    }

    #[tokio::test]
    async fn test_control_ignored_after_shutdown() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = handler(tmp.path());
        handler.receive_video_frame(VideoFrame::solid(4, 4, [0, 0, 0]));
        handler.shutdown().await;

        handler.dispatch(ControlAction::StartRecord).await;
        handler.dispatch(ControlAction::StartVideoRecording).await;
        handler.dispatch(ControlAction::StartFrameCapture).await;

        assert_eq!(handler.mode(), StreamMode::Live);
        let state = handler.state.lock();
        assert!(state.audio.is_none());
        assert!(state.video.is_none());
        assert!(state.capture.is_none());
    }

    #[tokio::test]
    async fn test_waiting_emitter_starts_replay_without_live_audio() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = Arc::new(handler(tmp.path()));
        handler.dispatch(ControlAction::StartRecord).await;
        for value in 1..=2 {
            handler.receive_audio_frame(audio(value));
        }
        // Echo of the recorded frames
        for value in 1..=2 {
            assert_eq!(handler.emit_audio().await.unwrap().samples, vec![value; 4]);
        }

        // The emitter parks on the empty live queue before the stop arrives
        let emitter = tokio::spawn({
            let handler = handler.clone();
            async move { handler.emit_audio().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handler.dispatch(ControlAction::StopRecord).await;

        let frame = tokio::time::timeout(Duration::from_secs(2), emitter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame.samples, vec![1; 4]);
        assert_eq!(handler.emit_audio().await.unwrap().samples, vec![2; 4]);
    }

    #[test]
    fn test_mode_changes_follow_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = handler(tmp.path());
        let mut state = handler.state.lock();
        assert!(!state.set_mode(StreamMode::Replaying));
        assert_eq!(state.mode, StreamMode::Live);
        assert!(state.set_mode(StreamMode::Recording));
        assert!(!state.set_mode(StreamMode::Live));
        assert!(state.set_mode(StreamMode::Replaying));
        assert!(state.set_mode(StreamMode::Live));
    }

    #[test]
    fn test_set_input_merges_objects() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = handler(tmp.path());
        handler.set_input(json!({"a": 1}));
        handler.set_input(json!({"b": 2}));
        let merged = handler.set_input(json!("plain text"));
        assert_eq!(merged, json!({"a": 1, "b": 2, "last_input": "plain text"}));

        let data = handler.get_input_data();
        assert_eq!(data["webrtc_id"], "test-conn");
        assert_eq!(data["mode"], "LIVE");
        assert_eq!(handler.connection_info().webrtc_id, "test-conn");
    }
}
