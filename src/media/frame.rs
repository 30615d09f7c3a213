//! Media frame types
//!
//! Video frames are packed 8-bit pixel grids in BGR channel order (the order
//! the transport hands them over). Audio frames are mono 16-bit PCM.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether both dimensions are non-zero
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// `width * height`, or `None` if it does not fit in `usize`
    pub fn pixel_count(&self) -> Option<usize> {
        (self.width as usize).checked_mul(self.height as usize)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel layout of a video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Single luma channel
    Gray,
    /// 3 channels, blue first
    Bgr,
    /// 4 channels, blue first, alpha last
    Bgra,
}

impl PixelFormat {
    /// Bytes per pixel
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Gray => 1,
            PixelFormat::Bgr => 3,
            PixelFormat::Bgra => 4,
        }
    }

    pub fn from_channels(channels: u8) -> Option<Self> {
        match channels {
            1 => Some(PixelFormat::Gray),
            3 => Some(PixelFormat::Bgr),
            4 => Some(PixelFormat::Bgra),
            _ => None,
        }
    }
}

/// A decoded video frame
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Row-major pixel bytes, `width * height * channels` long
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Wrap pixel bytes, returning `None` if the buffer size does not match
    /// the dimensions.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Option<Self> {
        let expected = Resolution::new(width, height)
            .pixel_count()?
            .checked_mul(format.channels())?;
        if data.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// A frame filled with one BGR colour
    pub fn solid(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&bgr);
        }
        Self {
            width,
            height,
            format: PixelFormat::Bgr,
            data,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Smallest and largest byte value in the frame
    pub fn value_range(&self) -> (u8, u8) {
        let min = self.data.iter().copied().min().unwrap_or(0);
        let max = self.data.iter().copied().max().unwrap_or(0);
        (min, max)
    }

    /// Nearest-neighbour resize to `target`, keeping the pixel format.
    ///
    /// Returns a clone when the frame already has the target resolution.
    pub fn resized(&self, target: Resolution) -> VideoFrame {
        if self.resolution() == target || !target.is_valid() || !self.resolution().is_valid() {
            return self.clone();
        }

        let channels = self.format.channels();
        let src_w = self.width as usize;
        let src_h = self.height as usize;
        let dst_w = target.width as usize;
        let dst_h = target.height as usize;
        let mut data = vec![0u8; dst_w * dst_h * channels];

        for y in 0..dst_h {
            let src_y = (y * src_h / dst_h).min(src_h - 1);
            for x in 0..dst_w {
                let src_x = (x * src_w / dst_w).min(src_w - 1);
                let src = (src_y * src_w + src_x) * channels;
                let dst = (y * dst_w + x) * channels;
                data[dst..dst + channels].copy_from_slice(&self.data[src..src + channels]);
            }
        }

        VideoFrame {
            width: target.width,
            height: target.height,
            format: self.format,
            data,
        }
    }

    /// Pixels as packed BGR24, dropping alpha or expanding gray
    pub fn to_bgr(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Bgr => self.data.clone(),
            PixelFormat::Bgra => self
                .data
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
            PixelFormat::Gray => self.data.iter().flat_map(|&v| [v, v, v]).collect(),
        }
    }

    /// Pixels swapped into RGB / RGBA order for image encoders.
    /// Gray frames are returned as-is.
    pub fn to_rgb_order(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Bgr => self
                .data
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
            PixelFormat::Bgra => self
                .data
                .chunks_exact(4)
                .flat_map(|px| [px[2], px[1], px[0], px[3]])
                .collect(),
            PixelFormat::Gray => self.data.clone(),
        }
    }
}

/// A chunk of mono PCM audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            sample_rate,
            samples,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_size() {
        assert!(VideoFrame::new(2, 2, PixelFormat::Bgr, vec![0; 11]).is_none());
        assert!(VideoFrame::new(2, 2, PixelFormat::Bgr, vec![0; 12]).is_some());
    }

    #[test]
    fn test_new_rejects_overflowing_dimensions() {
        assert!(VideoFrame::new(u32::MAX, u32::MAX, PixelFormat::Bgra, vec![0; 16]).is_none());
        assert_eq!(Resolution::new(640, 480).pixel_count(), Some(307_200));
    }

    #[test]
    fn test_resize_downscale() {
        let frame = VideoFrame::solid(1280, 720, [10, 20, 30]);
        let resized = frame.resized(Resolution::new(640, 480));
        assert_eq!(resized.resolution(), Resolution::new(640, 480));
        assert_eq!(resized.data.len(), 640 * 480 * 3);
        assert_eq!(&resized.data[0..3], &[10, 20, 30]);
    }

    #[test]
    fn test_resize_picks_nearest_pixel() {
        // 2x1 frame: left pixel black, right pixel white
        let frame =
            VideoFrame::new(2, 1, PixelFormat::Gray, vec![0, 255]).unwrap();
        let resized = frame.resized(Resolution::new(4, 1));
        assert_eq!(resized.data, vec![0, 0, 255, 255]);
    }

    #[test]
    fn test_color_order_conversion() {
        let frame = VideoFrame::new(1, 1, PixelFormat::Bgra, vec![1, 2, 3, 4]).unwrap();
        assert_eq!(frame.to_rgb_order(), vec![3, 2, 1, 4]);
        assert_eq!(frame.to_bgr(), vec![1, 2, 3]);
    }

    #[test]
    fn test_value_range() {
        let frame = VideoFrame::new(3, 1, PixelFormat::Gray, vec![7, 200, 3]).unwrap();
        assert_eq!(frame.value_range(), (3, 200));
    }
}
