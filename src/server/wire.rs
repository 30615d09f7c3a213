//! Binary media framing for the WebSocket transport
//!
//! ```text
//! audio: 0x01 | sample_rate u32 LE | samples i16 LE ...
//! video: 0x02 | width u32 LE | height u32 LE | format u8 (1, 3, 4) | pixels ...
//! ```

use crate::media::{AudioFrame, PixelFormat, VideoFrame};
use crate::utils::error::{AppError, AppResult};

pub const AUDIO_PACKET: u8 = 0x01;
pub const VIDEO_PACKET: u8 = 0x02;

const AUDIO_HEADER_LEN: usize = 5;
const VIDEO_HEADER_LEN: usize = 10;

/// A decoded inbound media packet
#[derive(Debug, Clone, PartialEq)]
pub enum MediaPacket {
    Audio(AudioFrame),
    Video(VideoFrame),
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

pub fn decode(bytes: &[u8]) -> AppResult<MediaPacket> {
    match bytes.first() {
        Some(&AUDIO_PACKET) => decode_audio(bytes).map(MediaPacket::Audio),
        Some(&VIDEO_PACKET) => decode_video(bytes).map(MediaPacket::Video),
        Some(kind) => Err(AppError::InvalidMessage(format!(
            "unknown media packet kind 0x{:02x}",
            kind
        ))),
        None => Err(AppError::InvalidMessage("empty media packet".to_string())),
    }
}

fn decode_audio(bytes: &[u8]) -> AppResult<AudioFrame> {
    if bytes.len() < AUDIO_HEADER_LEN {
        return Err(AppError::InvalidMessage("truncated audio header".to_string()));
    }
    let payload = &bytes[AUDIO_HEADER_LEN..];
    if payload.len() % 2 != 0 {
        return Err(AppError::InvalidMessage(
            "audio payload is not a whole number of samples".to_string(),
        ));
    }
    let sample_rate = read_u32(bytes, 1);
    let samples = payload
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(AudioFrame::new(sample_rate, samples))
}

fn decode_video(bytes: &[u8]) -> AppResult<VideoFrame> {
    if bytes.len() < VIDEO_HEADER_LEN {
        return Err(AppError::InvalidMessage("truncated video header".to_string()));
    }
    let width = read_u32(bytes, 1);
    let height = read_u32(bytes, 5);
    let format = PixelFormat::from_channels(bytes[9]).ok_or_else(|| {
        AppError::InvalidMessage(format!("unsupported pixel format {}", bytes[9]))
    })?;
    let pixels = bytes[VIDEO_HEADER_LEN..].to_vec();
    let pixel_len = pixels.len();
    VideoFrame::new(width, height, format, pixels).ok_or_else(|| {
        AppError::InvalidMessage(format!(
            "{}x{} {:?} frame cannot hold {} bytes",
            width, height, format, pixel_len
        ))
    })
}

pub fn encode_audio(frame: &AudioFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(AUDIO_HEADER_LEN + frame.samples.len() * 2);
    out.push(AUDIO_PACKET);
    out.extend_from_slice(&frame.sample_rate.to_le_bytes());
    for sample in &frame.samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

pub fn encode_video(frame: &VideoFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(VIDEO_HEADER_LEN + frame.data.len());
    out.push(VIDEO_PACKET);
    out.extend_from_slice(&frame.width.to_le_bytes());
    out.extend_from_slice(&frame.height.to_le_bytes());
    out.push(frame.format.channels() as u8);
    out.extend_from_slice(&frame.data);
    out
}
