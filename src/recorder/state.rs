//! Recording state management
//!
//! Defines the audio stream mode state machine, recording session tracking
//! and the per-connection backpressure counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// What `emit_audio` does with the outbound audio path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamMode {
    /// Echo live audio
    #[default]
    Live,
    /// Echo live audio and record it
    Recording,
    /// Play back the last recording instead of live audio
    Replaying,
}

impl StreamMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamMode::Live => "LIVE",
            StreamMode::Recording => "RECORDING",
            StreamMode::Replaying => "REPLAYING",
        }
    }

    /// Human-readable description used in log lines
    pub fn description(&self) -> &'static str {
        match self {
            StreamMode::Live => "live",
            StreamMode::Recording => "recording",
            StreamMode::Replaying => "replay",
        }
    }

    /// Whether `self -> next` is an allowed transition.
    ///
    /// LIVE -> RECORDING -> REPLAYING -> LIVE is the only cycle.
    pub fn can_transition_to(&self, next: StreamMode) -> bool {
        matches!(
            (self, next),
            (StreamMode::Live, StreamMode::Recording)
                | (StreamMode::Recording, StreamMode::Replaying)
                | (StreamMode::Replaying, StreamMode::Live)
        )
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of artifact a session produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Audio,
    Video,
    Frames,
}

/// A named artifact bound to one connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub kind: SessionKind,

    /// Target file (for frame capture: the output directory)
    pub path: PathBuf,

    /// Sample rate for audio, frame rate for video, 0 for stills
    pub rate: u32,

    pub started_at: DateTime<Utc>,

    pub ended_at: Option<DateTime<Utc>>,

    /// Frames accepted into the pipeline
    pub frame_count: u64,
}

impl RecordingSession {
    /// Create a new session starting now
    pub fn new(kind: SessionKind, path: PathBuf, rate: u32) -> Self {
        Self {
            kind,
            path,
            rate,
            started_at: Utc::now(),
            ended_at: None,
            frame_count: 0,
        }
    }

    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// End the session
    pub fn end(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> i64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds()
    }
}

/// Backpressure counters, diagnostic only
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub video_dropped_frames: AtomicU64,
    pub audio_dropped_frames: AtomicU64,
    pub frame_save_dropped: AtomicU64,
    pub live_video_dropped: AtomicU64,
    pub live_audio_dropped: AtomicU64,
    pub video_queue_max_size: AtomicU64,
    pub audio_queue_max_size: AtomicU64,
    pub frame_save_queue_max_size: AtomicU64,
    pub resolution_changes: AtomicU64,
}

impl PipelineStats {
    /// Increment a drop counter, returning the new total
    pub fn record_drop(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Raise a max-depth gauge
    pub fn observe_depth(gauge: &AtomicU64, depth: usize) {
        gauge.fetch_max(depth as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            video_dropped_frames: self.video_dropped_frames.load(Ordering::Relaxed),
            audio_dropped_frames: self.audio_dropped_frames.load(Ordering::Relaxed),
            frame_save_dropped: self.frame_save_dropped.load(Ordering::Relaxed),
            live_video_dropped: self.live_video_dropped.load(Ordering::Relaxed),
            live_audio_dropped: self.live_audio_dropped.load(Ordering::Relaxed),
            video_queue_max_size: self.video_queue_max_size.load(Ordering::Relaxed),
            audio_queue_max_size: self.audio_queue_max_size.load(Ordering::Relaxed),
            frame_save_queue_max_size: self.frame_save_queue_max_size.load(Ordering::Relaxed),
            resolution_changes: self.resolution_changes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub video_dropped_frames: u64,
    pub audio_dropped_frames: u64,
    pub frame_save_dropped: u64,
    pub live_video_dropped: u64,
    pub live_audio_dropped: u64,
    pub video_queue_max_size: u64,
    pub audio_queue_max_size: u64,
    pub frame_save_queue_max_size: u64,
    pub resolution_changes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_cycle() {
        assert!(StreamMode::Live.can_transition_to(StreamMode::Recording));
        assert!(StreamMode::Recording.can_transition_to(StreamMode::Replaying));
        assert!(StreamMode::Replaying.can_transition_to(StreamMode::Live));
        assert!(!StreamMode::Live.can_transition_to(StreamMode::Replaying));
        assert!(!StreamMode::Replaying.can_transition_to(StreamMode::Recording));
        assert!(!StreamMode::Recording.can_transition_to(StreamMode::Live));
    }

    #[test]
    fn test_mode_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&StreamMode::Replaying).unwrap(),
            "\"REPLAYING\""
        );
        assert_eq!(StreamMode::default(), StreamMode::Live);
    }

    #[test]
    fn test_session_file_name() {
        let mut session = RecordingSession::new(
            SessionKind::Audio,
            PathBuf::from("/data/record_audio/recording_1.wav"),
            16000,
        );
        assert_eq!(session.file_name().as_deref(), Some("recording_1.wav"));
        assert!(session.ended_at.is_none());
        session.end();
        assert!(session.ended_at.is_some());
        assert!(session.duration_ms() >= 0);
    }

    #[test]
    fn test_stats_counters() {
        let stats = PipelineStats::default();
        assert_eq!(PipelineStats::record_drop(&stats.video_dropped_frames), 1);
        assert_eq!(PipelineStats::record_drop(&stats.video_dropped_frames), 2);
        PipelineStats::observe_depth(&stats.audio_queue_max_size, 5);
        PipelineStats::observe_depth(&stats.audio_queue_max_size, 3);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.video_dropped_frames, 2);
        assert_eq!(snapshot.audio_queue_max_size, 5);
    }
}
