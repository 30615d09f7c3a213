//! Video container output
//!
//! Recordings are written by piping raw BGR24 frames into an FFmpeg child
//! process. The sink is opened once per recording with a fixed resolution;
//! every frame handed to it must already have that resolution.

use crate::media::{Resolution, VideoFrame};
use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::str::FromStr;

/// Video codec used for recordings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    Mp4v,
    H264,
    Xvid,
}

impl VideoCodec {
    /// FFmpeg encoder name
    pub fn encoder(&self) -> &'static str {
        match self {
            VideoCodec::Mp4v => "mpeg4",
            VideoCodec::H264 => "libx264",
            VideoCodec::Xvid => "libxvid",
        }
    }

    /// Container file extension
    pub fn extension(&self) -> &'static str {
        match self {
            VideoCodec::Mp4v | VideoCodec::H264 => "mp4",
            VideoCodec::Xvid => "avi",
        }
    }

    fn encoder_args(&self) -> Vec<String> {
        let args: &[&str] = match self {
            VideoCodec::Mp4v => &["-q:v", "5"],
            VideoCodec::H264 => &["-preset", "veryfast", "-crf", "23", "-pix_fmt", "yuv420p"],
            VideoCodec::Xvid => &["-q:v", "5", "-vtag", "XVID"],
        };
        args.iter().map(|s| s.to_string()).collect()
    }
}

impl FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp4v" => Ok(VideoCodec::Mp4v),
            "h264" => Ok(VideoCodec::H264),
            "xvid" => Ok(VideoCodec::Xvid),
            other => Err(format!("unknown video codec: {}", other)),
        }
    }
}

/// Destination for recorded video frames
pub trait VideoSink: Send {
    /// Append one frame. The frame must match the sink's resolution.
    fn write_frame(&mut self, frame: &VideoFrame) -> AppResult<()>;

    /// Frames successfully written so far
    fn frame_count(&self) -> u64;

    /// Flush and close the container
    fn finish(&mut self) -> AppResult<()>;
}

/// Opens a [`VideoSink`] when a recording starts
pub trait VideoSinkFactory: Send + Sync {
    fn open(&self, path: &Path, resolution: Resolution, fps: u32) -> AppResult<Box<dyn VideoSink>>;

    /// File extension of the containers this factory produces
    fn extension(&self) -> &str;
}

/// FFmpeg-backed sink writing a single container file
pub struct FfmpegVideoWriter {
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    resolution: Resolution,
    output_path: PathBuf,
    frame_count: u64,
}

impl FfmpegVideoWriter {
    pub fn open(
        path: &Path,
        resolution: Resolution,
        fps: u32,
        codec: VideoCodec,
    ) -> AppResult<Self> {
        if !resolution.is_valid() {
            return Err(AppError::Encoding(format!(
                "invalid target resolution {}",
                resolution
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut args = vec![
            "-y".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "bgr24".to_string(),
            "-s".to_string(),
            resolution.to_string(),
            "-r".to_string(),
            fps.to_string(),
            "-i".to_string(),
            "-".to_string(),
            "-c:v".to_string(),
            codec.encoder().to_string(),
        ];
        args.extend(codec.encoder_args());
        args.push(path.to_string_lossy().to_string());

        tracing::info!("Starting FFmpeg video writer: {:?}", args);

        let mut process = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AppError::Encoding(format!("Failed to start FFmpeg encoder: {}", e)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| AppError::Encoding("Failed to capture FFmpeg stdin".to_string()))?;

        Ok(Self {
            process: Some(process),
            stdin: Some(stdin),
            resolution,
            output_path: path.to_path_buf(),
            frame_count: 0,
        })
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

impl VideoSink for FfmpegVideoWriter {
    fn write_frame(&mut self, frame: &VideoFrame) -> AppResult<()> {
        if frame.resolution() != self.resolution {
            return Err(AppError::Encoding(format!(
                "frame is {} but writer expects {}",
                frame.resolution(),
                self.resolution
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AppError::Encoding("video writer already finished".to_string()))?;
        stdin.write_all(&frame.to_bgr())?;
        self.frame_count += 1;
        Ok(())
    }

    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn finish(&mut self) -> AppResult<()> {
        // Closing stdin signals EOF to FFmpeg
        drop(self.stdin.take());
        if let Some(process) = self.process.take() {
            let output = process.wait_with_output()?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(AppError::Encoding(format!(
                    "FFmpeg exited with status {}: {}",
                    output.status, stderr
                )));
            }
            tracing::info!(
                "FFmpeg video writer finished: {} frames, output: {}",
                self.frame_count,
                self.output_path.display()
            );
        }
        Ok(())
    }
}

impl Drop for FfmpegVideoWriter {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}

/// Factory producing [`FfmpegVideoWriter`]s for one codec
#[derive(Debug, Clone, Copy)]
pub struct FfmpegVideoSinkFactory {
    codec: VideoCodec,
}

impl FfmpegVideoSinkFactory {
    pub fn new(codec: VideoCodec) -> Self {
        Self { codec }
    }
}

impl VideoSinkFactory for FfmpegVideoSinkFactory {
    fn open(&self, path: &Path, resolution: Resolution, fps: u32) -> AppResult<Box<dyn VideoSink>> {
        let writer = FfmpegVideoWriter::open(path, resolution, fps, self.codec)?;
        Ok(Box::new(writer))
    }

    fn extension(&self) -> &str {
        self.codec.extension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_from_str() {
        assert_eq!("XVID".parse::<VideoCodec>().unwrap(), VideoCodec::Xvid);
        assert_eq!("h264".parse::<VideoCodec>().unwrap(), VideoCodec::H264);
        assert!("vp9".parse::<VideoCodec>().is_err());
    }

    #[test]
    fn test_codec_container() {
        assert_eq!(VideoCodec::Xvid.extension(), "avi");
        assert_eq!(VideoCodec::Mp4v.encoder(), "mpeg4");
        assert!(VideoCodec::H264.encoder_args().contains(&"yuv420p".to_string()));
    }

    #[test]
    fn test_open_rejects_empty_resolution() {
        let tmp = tempfile::tempdir().unwrap();
        let result = FfmpegVideoWriter::open(
            &tmp.path().join("video.avi"),
            Resolution::new(0, 480),
            30,
            VideoCodec::Xvid,
        );
        assert!(matches!(result, Err(AppError::Encoding(_))));
    }
}
