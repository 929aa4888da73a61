use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{extract_waveform, SynthesisBackend};
use crate::error::{SynthesisCause, SynthesisError};
use crate::store::{AudioHandle, AudioStore};

/// Audio produced for one piece of text, before it is tagged with its place
/// in a run.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub audio: AudioHandle,
    pub duration_seconds: f64,
    pub sample_count: usize,
}

/// Which chunk of which run is being synthesized; names the stored audio.
#[derive(Debug, Clone, Copy)]
pub struct ChunkLabel<'a> {
    pub run_id: &'a str,
    pub chunk_index: usize,
}

impl ChunkLabel<'_> {
    fn file_stem(&self) -> String {
        format!("{}_{:03}", self.run_id, self.chunk_index)
    }
}

/// Wraps the backend: delegate, adapt the result shape, validate, persist.
#[derive(Clone)]
pub struct ChunkSynthesizer {
    backend: Arc<dyn SynthesisBackend>,
    store: Arc<dyn AudioStore>,
}

impl std::fmt::Debug for ChunkSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSynthesizer")
            .field("backend", &"<dyn SynthesisBackend>")
            .field("store", &"<dyn AudioStore>")
            .finish()
    }
}

impl ChunkSynthesizer {
    pub fn new(backend: Arc<dyn SynthesisBackend>, store: Arc<dyn AudioStore>) -> Self {
        Self { backend, store }
    }

    pub fn backend(&self) -> &Arc<dyn SynthesisBackend> {
        &self.backend
    }

    /// Synthesize `text` and persist it. Blocks for the duration of the
    /// backend call.
    pub fn synthesize(
        &self,
        label: ChunkLabel<'_>,
        text: &str,
        voice: &str,
        speed: f32,
    ) -> Result<SynthesizedAudio, SynthesisError> {
        let fail = |cause: SynthesisCause| {
            warn!(
                run_id = label.run_id,
                index = label.chunk_index,
                error = %cause,
                "chunk synthesis failed"
            );
            SynthesisError::new(label.chunk_index, cause)
        };

        let output = self
            .backend
            .synthesize_raw(text, voice, speed)
            .map_err(|e| fail(SynthesisCause::Backend(e)))?;
        let waveform = extract_waveform(output).map_err(|e| fail(e.into()))?;

        let audio = self
            .store
            .persist(&label.file_stem(), &waveform)
            .map_err(|e| fail(SynthesisCause::Persist(e)))?;

        let duration_seconds = waveform.duration_seconds();
        debug!(
            run_id = label.run_id,
            index = label.chunk_index,
            samples = waveform.samples.len(),
            duration_seconds,
            "chunk synthesized"
        );

        Ok(SynthesizedAudio {
            audio,
            duration_seconds,
            sample_count: waveform.samples.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{load_samples, MemoryStore};
    use crate::test_support::FakeBackend;

    fn synthesizer(backend: FakeBackend) -> ChunkSynthesizer {
        ChunkSynthesizer::new(Arc::new(backend), Arc::new(MemoryStore))
    }

    fn label(chunk_index: usize) -> ChunkLabel<'static> {
        ChunkLabel {
            run_id: "test",
            chunk_index,
        }
    }

    #[test]
    fn computes_duration_from_sample_count() {
        let synth = synthesizer(FakeBackend::new().with_samples_per_char(240));
        // 10 chars * 240 samples at 24 kHz
        let out = synth.synthesize(label(0), "0123456789", "af_sarah", 1.0).unwrap();
        assert_eq!(out.sample_count, 2400);
        assert!((out.duration_seconds - 0.1).abs() < 1e-9);
    }

    #[test]
    fn stored_audio_is_rescaled_to_unit_peak() {
        let synth = synthesizer(FakeBackend::new().with_amplitude(2.5));
        let out = synth.synthesize(label(0), "loud chunk", "af_sarah", 1.0).unwrap();
        let samples = load_samples(&out.audio).unwrap();
        let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert_eq!(peak, 1.0);
    }

    #[test]
    fn nan_sample_fails_the_chunk() {
        let synth = synthesizer(FakeBackend::new().nan_when("broken"));
        let err = synth.synthesize(label(3), "broken chunk", "af_sarah", 1.0).unwrap_err();
        assert_eq!(err.chunk_index, 3);
        assert!(matches!(
            err.cause,
            SynthesisCause::Adapter(crate::error::AdapterError::NonFinite(_))
        ));
    }

    #[test]
    fn backend_error_is_wrapped_with_the_chunk_index() {
        let synth = synthesizer(FakeBackend::new().fail_when("boom"));
        let err = synth.synthesize(label(5), "boom goes the chunk", "af_sarah", 1.0).unwrap_err();
        assert_eq!(err.chunk_index, 5);
        assert!(matches!(err.cause, SynthesisCause::Backend(_)));
    }
}
