//! WAV output for audio recordings

use crate::media::AudioFrame;
use crate::utils::error::AppResult;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;

/// Concatenate frames in receipt order
pub fn concat_samples(frames: &[AudioFrame]) -> Vec<i16> {
    let total: usize = frames.iter().map(|f| f.len()).sum();
    let mut samples = Vec::with_capacity(total);
    for frame in frames {
        samples.extend_from_slice(&frame.samples);
    }
    samples
}

/// Write mono 16-bit PCM samples to a WAV file
pub fn save_wav(path: &Path, samples: &[i16], sample_rate: u32) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    tracing::info!("Audio saved to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_keeps_order() {
        let frames = vec![
            AudioFrame::new(16000, vec![1, 2]),
            AudioFrame::new(16000, vec![]),
            AudioFrame::new(16000, vec![3]),
        ];
        assert_eq!(concat_samples(&frames), vec![1, 2, 3]);
    }

    #[test]
    fn test_save_wav_round_trips_samples() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("a.wav");
        save_wav(&path, &[0, -1, i16::MAX, i16::MIN], 24000).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 24000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, -1, i16::MAX, i16::MIN]);
    }
}
