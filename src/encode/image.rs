//! PNG output for captured stills

use crate::media::{PixelFormat, VideoFrame};
use crate::utils::error::AppResult;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// File name of a captured still: `frame_<unix>_<seq:04>.png`
pub fn frame_file_name(unix_secs: i64, sequence: u64) -> String {
    format!("frame_{}_{:04}.png", unix_secs, sequence)
}

/// Encode a frame as PNG, converting BGR(A) to RGB(A) first
pub fn save_png(path: &Path, frame: &VideoFrame) -> AppResult<()> {
    let file = File::create(path)?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), frame.width, frame.height);
    encoder.set_color(match frame.format {
        PixelFormat::Gray => png::ColorType::Grayscale,
        PixelFormat::Bgr => png::ColorType::Rgb,
        PixelFormat::Bgra => png::ColorType::Rgba,
    });
    encoder.set_depth(png::BitDepth::Eight);

    let mut writer = encoder.write_header()?;
    writer.write_image_data(&frame.to_rgb_order())?;
    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_file_name_pads_sequence() {
        assert_eq!(frame_file_name(1700000000, 7), "frame_1700000000_0007.png");
        assert_eq!(frame_file_name(1, 12345), "frame_1_12345.png");
    }

    #[test]
    fn test_save_png_swaps_channels() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("still.png");
        // Pure blue in BGR order
        let frame = VideoFrame::solid(4, 2, [255, 0, 0]);
        save_png(&path, &frame).unwrap();

        let decoder = png::Decoder::new(File::open(&path).unwrap());
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf).unwrap();
        assert_eq!(info.color_type, png::ColorType::Rgb);
        assert_eq!((info.width, info.height), (4, 2));
        assert_eq!(&buf[0..3], &[0, 0, 255]);
    }
}
