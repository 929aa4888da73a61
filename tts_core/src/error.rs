//! Error kinds of the synthesis pipeline.
//!
//! Normalization and segmentation are total, so only synthesis can fail.
//! `SynthesisError` is scoped to a single chunk and never leaves the
//! coordinator; `StreamFailure` is raised when no chunk of a run survived;
//! `SpeechError` is what a caller sees when the single-shot fallback failed
//! as well.

use thiserror::Error;

/// The backend returned something that is not usable audio.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("backend returned an empty container")]
    EmptyContainer,

    #[error("backend member is not audio: {0}")]
    NotAudio(&'static str),

    #[error("unsupported waveform rank {0}")]
    UnsupportedRank(usize),

    #[error("empty audio buffer")]
    EmptyBuffer,

    #[error("audio buffer contains non-finite sample at position {0}")]
    NonFinite(usize),
}

/// Why a single chunk could not be synthesized.
#[derive(Debug, Error)]
pub enum SynthesisCause {
    #[error("backend call failed: {0:#}")]
    Backend(anyhow::Error),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("could not persist audio: {0:#}")]
    Persist(anyhow::Error),

    #[error("synthesis worker aborted: {0}")]
    Worker(String),
}

#[derive(Debug, Error)]
#[error("chunk {chunk_index} failed: {cause}")]
pub struct SynthesisError {
    pub chunk_index: usize,
    #[source]
    pub cause: SynthesisCause,
}

impl SynthesisError {
    pub fn new(chunk_index: usize, cause: impl Into<SynthesisCause>) -> Self {
        Self {
            chunk_index,
            cause: cause.into(),
        }
    }
}

/// Every chunk of a run failed (or there was nothing to synthesize).
#[derive(Debug, Error)]
#[error("no chunk of run {run_id} could be synthesized ({} failed)", failures.len())]
pub struct StreamFailure {
    pub run_id: String,
    pub failures: Vec<SynthesisError>,
}

/// Terminal failure for a whole text: streaming and fallback both failed.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech generation unavailable: {stream}; fallback failed: {fallback}")]
    Unavailable {
        stream: StreamFailure,
        fallback: SynthesisError,
    },

    #[error("speech generation unavailable: {0}")]
    StreamOnly(StreamFailure),
}
