//! Where synthesized chunk audio ends up.
//!
//! The pipeline only hands out an [`AudioHandle`]; deleting files and
//! deciding how long they live is up to whoever consumes the handles.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::backend::NormalizedWaveform;
use crate::wav;

/// Opaque reference to a persisted waveform.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioHandle {
    File { path: PathBuf, sample_rate: u32 },
    Memory { samples: Arc<[f32]>, sample_rate: u32 },
}

impl AudioHandle {
    pub fn sample_rate(&self) -> u32 {
        match self {
            AudioHandle::File { sample_rate, .. } | AudioHandle::Memory { sample_rate, .. } => {
                *sample_rate
            }
        }
    }
}

/// Read the samples behind a handle.
pub fn load_samples(handle: &AudioHandle) -> anyhow::Result<Vec<f32>> {
    match handle {
        AudioHandle::Memory { samples, .. } => Ok(samples.to_vec()),
        AudioHandle::File { path, .. } => {
            let data = wav::read_wav(path)?;
            if data.channels <= 1 {
                return Ok(data.samples);
            }
            Ok(data
                .samples
                .chunks(data.channels as usize)
                .map(|frame| frame[0])
                .collect())
        }
    }
}

/// Persists validated waveforms and returns a handle to them.
pub trait AudioStore: Send + Sync {
    fn persist(&self, name: &str, waveform: &NormalizedWaveform) -> anyhow::Result<AudioHandle>;
}

/// Keeps audio in memory; handles share the sample buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore;

impl AudioStore for MemoryStore {
    fn persist(&self, _name: &str, waveform: &NormalizedWaveform) -> anyhow::Result<AudioHandle> {
        Ok(AudioHandle::Memory {
            samples: Arc::from(waveform.samples.as_slice()),
            sample_rate: waveform.sample_rate,
        })
    }
}

/// Writes each waveform as `<dir>/<name>.wav` (32-bit float, mono).
#[derive(Debug, Clone)]
pub struct WavDirStore {
    dir: PathBuf,
}

impl WavDirStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl AudioStore for WavDirStore {
    fn persist(&self, name: &str, waveform: &NormalizedWaveform) -> anyhow::Result<AudioHandle> {
        let path = self.dir.join(format!("{name}.wav"));
        wav::write_float_wav(&path, &waveform.samples, waveform.sample_rate)?;
        Ok(AudioHandle::File {
            path,
            sample_rate: waveform.sample_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waveform() -> NormalizedWaveform {
        NormalizedWaveform {
            samples: vec![0.25, -1.0, 1.0, 0.0],
            sample_rate: 24_000,
        }
    }

    #[test]
    fn memory_store_shares_samples() {
        let handle = MemoryStore.persist("run_000", &waveform()).unwrap();
        assert_eq!(handle.sample_rate(), 24_000);
        assert_eq!(load_samples(&handle).unwrap(), waveform().samples);
    }

    #[test]
    fn wav_dir_store_writes_named_files() {
        let dir = std::env::temp_dir().join(format!("tts_core_store_{}", uuid::Uuid::new_v4()));
        let store = WavDirStore::new(&dir).unwrap();

        let handle = store.persist("run_007", &waveform()).unwrap();
        match &handle {
            AudioHandle::File { path, .. } => {
                assert_eq!(path, &dir.join("run_007.wav"));
                assert!(path.exists());
            }
            other => panic!("expected a file handle, got {other:?}"),
        }
        assert_eq!(load_samples(&handle).unwrap(), waveform().samples);

        std::fs::remove_dir_all(&dir).ok();
    }
}
