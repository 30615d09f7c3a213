//! Encoders for persisted artifacts
//!
//! - `video`: container recordings through FFmpeg
//! - `audio`: WAV recordings
//! - `image`: PNG stills

pub mod audio;
pub mod image;
pub mod video;

pub use video::{FfmpegVideoSinkFactory, FfmpegVideoWriter, VideoCodec, VideoSink, VideoSinkFactory};
