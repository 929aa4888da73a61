//! Text in, ordered speech out.
//!
//! `SpeechPipeline` strings the stages together and owns the degradation
//! policy: a partial run is returned as-is (marked degraded), a run in which
//! nothing succeeded is retried once as a single synthesis over the whole
//! normalized text.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::backend::SynthesisBackend;
use crate::config::StreamConfig;
use crate::coordinator::{AudioChunk, ChunkEvent, CompletedRun, StreamCoordinator};
use crate::error::{SpeechError, SynthesisCause, SynthesisError};
use crate::normalize::normalize_sections;
use crate::segment::{segment_sections, TextChunk};
use crate::store::{load_samples, AudioStore};
use crate::synth::{ChunkLabel, ChunkSynthesizer};

/// Silence inserted between chunks when they are combined.
pub const DEFAULT_GAP_SECONDS: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Delivery {
    /// Every chunk was synthesized.
    Complete,
    /// Some chunks failed; the audio has gaps.
    Degraded { missing: Vec<usize> },
    /// Chunked synthesis failed entirely; one single-shot chunk was produced.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct SpeechOutput {
    pub run_id: String,
    pub normalized_text: String,
    pub chunks: Vec<AudioChunk>,
    pub delivery: Delivery,
}

impl SpeechOutput {
    pub fn total_duration_seconds(&self) -> f64 {
        self.chunks.iter().map(|c| c.duration_seconds).sum()
    }
}

#[derive(Debug, Clone)]
pub struct SpeechPipeline {
    coordinator: StreamCoordinator,
    config: StreamConfig,
}

impl SpeechPipeline {
    pub fn new(
        backend: Arc<dyn SynthesisBackend>,
        store: Arc<dyn AudioStore>,
        config: StreamConfig,
    ) -> Self {
        let synthesizer = ChunkSynthesizer::new(backend, store);
        Self {
            coordinator: StreamCoordinator::new(synthesizer, config.max_parallel),
            config,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn voices(&self) -> Vec<String> {
        self.coordinator.synthesizer().backend().voices()
    }

    /// Normalize and segment without synthesizing. Headings, paragraphs and
    /// list items of the raw text each start a new chunk.
    pub fn prepare(&self, raw_text: &str) -> (String, Vec<TextChunk>) {
        let sections = normalize_sections(raw_text);
        let chunks = segment_sections(
            &sections,
            self.config.max_chunk_chars,
            self.config.min_chunk_chars,
        );
        (sections.join(" "), chunks)
    }

    /// Speak `raw_text`, returning chunks in logical order.
    pub async fn speak(&self, raw_text: &str, voice: &str, speed: f32) -> Result<SpeechOutput, SpeechError> {
        let (normalized, chunks) = self.prepare(raw_text);
        self.speak_prepared(normalized, chunks, voice, speed, None).await
    }

    /// Like [`speak`](Self::speak) but also publishes completions on `events`
    /// while the run is in progress. Consumers must reorder by
    /// `sequence_index` (see [`crate::stream::resequence`]). Only the chunked
    /// path publishes events; a fallback chunk is in the returned output.
    pub async fn speak_prepared(
        &self,
        normalized: String,
        chunks: Vec<TextChunk>,
        voice: &str,
        speed: f32,
        events: Option<mpsc::UnboundedSender<ChunkEvent>>,
    ) -> Result<SpeechOutput, SpeechError> {
        if normalized.is_empty() {
            return Ok(SpeechOutput {
                run_id: uuid::Uuid::new_v4().simple().to_string(),
                normalized_text: normalized,
                chunks: Vec::new(),
                delivery: Delivery::Complete,
            });
        }

        let streamed = self
            .coordinator
            .run_with_events(chunks, voice, speed, events)
            .await;

        match streamed {
            Ok(run) => Ok(Self::into_output(run, normalized)),
            Err(failure) if self.config.fallback_enabled => {
                warn!(
                    run_id = %failure.run_id,
                    failed = failure.failures.len(),
                    "chunked synthesis failed, falling back to single shot"
                );
                let chunk = self.single_shot(&failure.run_id, &normalized, voice, speed).await;
                match chunk {
                    Ok(chunk) => Ok(SpeechOutput {
                        run_id: failure.run_id.clone(),
                        normalized_text: normalized,
                        chunks: vec![chunk],
                        delivery: Delivery::Fallback,
                    }),
                    Err(fallback) => Err(SpeechError::Unavailable {
                        stream: failure,
                        fallback,
                    }),
                }
            }
            Err(failure) => Err(SpeechError::StreamOnly(failure)),
        }
    }

    fn into_output(run: CompletedRun, normalized: String) -> SpeechOutput {
        let delivery = if run.is_partial() {
            Delivery::Degraded {
                missing: run.failed_indices.clone(),
            }
        } else {
            Delivery::Complete
        };
        SpeechOutput {
            run_id: run.run_id,
            normalized_text: normalized,
            chunks: run.chunks,
            delivery,
        }
    }

    /// One synthesis call over the whole text, wrapped as the only chunk.
    async fn single_shot(
        &self,
        run_id: &str,
        text: &str,
        voice: &str,
        speed: f32,
    ) -> Result<AudioChunk, SynthesisError> {
        let synthesizer = self.coordinator.synthesizer().clone();
        let run_id = format!("{run_id}_full");
        let text = text.to_string();
        let voice = voice.to_string();

        let echoed = text.clone();
        let audio = tokio::task::spawn_blocking(move || {
            let label = ChunkLabel {
                run_id: &run_id,
                chunk_index: 0,
            };
            synthesizer.synthesize(label, &text, &voice, speed)
        })
        .await
        .unwrap_or_else(|e| Err(SynthesisError::new(0, SynthesisCause::Worker(e.to_string()))))?;

        info!(duration_seconds = audio.duration_seconds, "single-shot fallback succeeded");
        Ok(AudioChunk {
            sequence_index: 0,
            text: echoed,
            audio: audio.audio,
            duration_seconds: audio.duration_seconds,
            is_final: true,
        })
    }
}

/// Concatenate ordered chunk audio into one buffer, inserting `gap_seconds`
/// of silence between chunks. Returns the samples and their sample rate.
pub fn combine(chunks: &[AudioChunk], gap_seconds: f32) -> anyhow::Result<(Vec<f32>, u32)> {
    let Some(first) = chunks.first() else {
        return Ok((Vec::new(), 0));
    };
    let sample_rate = first.audio.sample_rate();
    let gap = (gap_seconds.max(0.0) * sample_rate as f32) as usize;

    let mut combined = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if chunk.audio.sample_rate() != sample_rate {
            anyhow::bail!(
                "chunk {} has sample rate {} but the run started at {}",
                chunk.sequence_index,
                chunk.audio.sample_rate(),
                sample_rate
            );
        }
        combined.extend(load_samples(&chunk.audio)?);
        if i + 1 < chunks.len() {
            combined.extend(std::iter::repeat(0.0f32).take(gap));
        }
    }
    Ok((combined, sample_rate))
}
