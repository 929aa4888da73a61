//! Streaming speech synthesis.
//!
//! Raw (often markdown) text is cleaned by [`normalize`], split into
//! sentence-aligned pieces by [`segment`], synthesized in parallel by the
//! [`StreamCoordinator`] and handed back in reading order. [`SpeechPipeline`]
//! ties the stages together and falls back to a single synthesis call when
//! the chunked path produces nothing.

pub mod backend;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod normalize;
pub mod pipeline;
#[cfg(feature = "piper")]
pub mod piper;
pub mod segment;
pub mod store;
pub mod stream;
pub mod synth;
pub mod wav;

#[cfg(test)]
mod test_support;

pub use backend::{
    extract_waveform, BackendOutput, NormalizedWaveform, RawBackendResult, RawValue, SynthesisBackend,
};
pub use command::CommandBackend;
pub use config::StreamConfig;
pub use coordinator::{AudioChunk, ChunkEvent, ChunkState, CompletedRun, StreamCoordinator, SynthesisRun};
pub use error::{AdapterError, SpeechError, StreamFailure, SynthesisCause, SynthesisError};
pub use normalize::{normalize, normalize_sections};
pub use pipeline::{combine, Delivery, SpeechOutput, SpeechPipeline, DEFAULT_GAP_SECONDS};
#[cfg(feature = "piper")]
pub use piper::PiperBackend;
pub use segment::{segment, segment_sections, segment_with_min, TextChunk};
pub use store::{load_samples, AudioHandle, AudioStore, MemoryStore, WavDirStore};
pub use stream::{resequence, Resequencer};
pub use synth::{ChunkLabel, ChunkSynthesizer, SynthesizedAudio};
pub use wav::encode_wav_base64;
