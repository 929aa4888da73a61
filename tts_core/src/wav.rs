use std::io::Cursor;
use std::path::Path;

use anyhow::Context;
use base64::{engine::general_purpose, Engine as _};

/// Encode mono f32 samples as 16-bit PCM WAV (RIFF) and return Base64.
pub fn encode_wav_base64(samples: &[f32], sample_rate: u32) -> anyhow::Result<String> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    // WAV header (44 bytes) + 2 bytes per sample
    let mut cursor = Cursor::new(Vec::<u8>::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| anyhow::anyhow!("wav write err: {e}"))?;

        const I16_MAX_F32: f32 = i16::MAX as f32;
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16;
            writer
                .write_sample(v)
                .map_err(|e| anyhow::anyhow!("wav sample err: {e}"))?;
        }
        writer
            .finalize()
            .map_err(|e| anyhow::anyhow!("wav finalize err: {e}"))?;
    }

    Ok(general_purpose::STANDARD.encode(cursor.into_inner()))
}

/// Write mono samples losslessly as 32-bit float WAV.
pub fn write_float_wav(path: &Path, samples: &[f32], sample_rate: u32) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Decoded WAV contents, interleaved samples normalized to f32.
#[derive(Debug, Clone)]
pub struct WavData {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

/// Read a WAV file of any common PCM/float layout into f32 samples.
pub fn read_wav(path: &Path) -> anyhow::Result<WavData> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .context("invalid float sample")?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()
                .context("invalid integer sample")?
        }
    };

    Ok(WavData {
        samples,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_wav_has_riff_header_and_expected_size() {
        let encoded = encode_wav_base64(&[0.0, 0.5, -0.5, 1.0], 22_050).unwrap();
        let bytes = general_purpose::STANDARD.decode(encoded).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(bytes.len(), 44 + 4 * 2);
    }

    #[test]
    fn float_wav_round_trips_exactly() {
        let path = std::env::temp_dir().join(format!("tts_core_wav_{}.wav", uuid::Uuid::new_v4()));
        let samples = vec![0.0, 1.0, -1.0, 0.123_456];
        write_float_wav(&path, &samples, 24_000).unwrap();

        let data = read_wav(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(data.samples, samples);
        assert_eq!(data.channels, 1);
        assert_eq!(data.sample_rate, 24_000);
    }
}
