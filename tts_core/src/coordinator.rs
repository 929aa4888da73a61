//! Parallel synthesis of a segmented text.
//!
//! Every chunk is dispatched to its own task; a semaphore caps how many of
//! them talk to the backend at once. Workers report back over a channel and
//! the coordinator loop is the only writer of the [`SynthesisRun`]. Results
//! arrive in completion order and are put back into logical order once the
//! whole run has resolved.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{StreamFailure, SynthesisCause, SynthesisError};
use crate::segment::TextChunk;
use crate::store::AudioHandle;
use crate::synth::{ChunkLabel, ChunkSynthesizer, SynthesizedAudio};

/// Synthesis result for one [`TextChunk`].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub sequence_index: usize,
    pub text: String,
    pub audio: AudioHandle,
    pub duration_seconds: f64,
    /// Set on the successful chunk with the highest index of its run.
    pub is_final: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ChunkState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChunkState::Succeeded | ChunkState::Failed)
    }
}

/// Progress notification, published in completion order.
///
/// `is_final` is never set on progressive events; it is only known once the
/// chunks after this one have resolved (see [`crate::stream::Resequencer`]).
#[derive(Debug, Clone)]
pub enum ChunkEvent {
    Succeeded(AudioChunk),
    Failed { sequence_index: usize, reason: String },
}

impl ChunkEvent {
    pub fn sequence_index(&self) -> usize {
        match self {
            ChunkEvent::Succeeded(chunk) => chunk.sequence_index,
            ChunkEvent::Failed { sequence_index, .. } => *sequence_index,
        }
    }
}

/// One text's worth of synthesis work, owned by the coordinator.
#[derive(Debug)]
pub struct SynthesisRun {
    pub run_id: String,
    pub voice: String,
    pub speed: f32,
    pub chunks: Vec<TextChunk>,
    states: Vec<ChunkState>,
    results: BTreeMap<usize, Result<AudioChunk, SynthesisError>>,
}

impl SynthesisRun {
    pub fn new(chunks: Vec<TextChunk>, voice: &str, speed: f32) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().simple().to_string(),
            voice: voice.to_string(),
            speed,
            states: vec![ChunkState::Pending; chunks.len()],
            chunks,
            results: BTreeMap::new(),
        }
    }

    pub fn state(&self, index: usize) -> Option<ChunkState> {
        self.states.get(index).copied()
    }

    /// Every chunk has either a result or a recorded failure.
    pub fn is_complete(&self) -> bool {
        self.states.iter().all(|s| s.is_terminal())
    }

    fn mark_running(&mut self, index: usize) {
        if let Some(state) = self.states.get_mut(index) {
            if *state == ChunkState::Pending {
                *state = ChunkState::Running;
            }
        }
    }

    /// Record a worker's outcome. Terminal states are never overwritten.
    fn record(
        &mut self,
        index: usize,
        outcome: Result<SynthesizedAudio, SynthesisError>,
    ) -> Option<ChunkEvent> {
        let state = self.states.get_mut(index)?;
        if state.is_terminal() {
            warn!(run_id = %self.run_id, index, "duplicate result ignored");
            return None;
        }

        let event = match outcome {
            Ok(audio) => {
                *state = ChunkState::Succeeded;
                let chunk = AudioChunk {
                    sequence_index: index,
                    text: self.chunks[index].text.clone(),
                    audio: audio.audio,
                    duration_seconds: audio.duration_seconds,
                    is_final: false,
                };
                self.results.insert(index, Ok(chunk.clone()));
                ChunkEvent::Succeeded(chunk)
            }
            Err(err) => {
                *state = ChunkState::Failed;
                let event = ChunkEvent::Failed {
                    sequence_index: index,
                    reason: err.to_string(),
                };
                self.results.insert(index, Err(err));
                event
            }
        };
        Some(event)
    }

    /// Sort successes by index and tag the highest one as final.
    fn finish(mut self) -> Result<CompletedRun, StreamFailure> {
        for index in 0..self.states.len() {
            if !self.states[index].is_terminal() {
                self.states[index] = ChunkState::Failed;
                self.results.insert(
                    index,
                    Err(SynthesisError::new(
                        index,
                        SynthesisCause::Worker("worker exited without a result".into()),
                    )),
                );
            }
        }

        let mut produced = Vec::new();
        let mut failures = Vec::new();
        for (_, outcome) in std::mem::take(&mut self.results) {
            match outcome {
                Ok(chunk) => produced.push(chunk),
                Err(err) => failures.push(err),
            }
        }

        if produced.is_empty() {
            return Err(StreamFailure {
                run_id: self.run_id,
                failures,
            });
        }
        if let Some(last) = produced.last_mut() {
            last.is_final = true;
        }

        Ok(CompletedRun {
            run_id: self.run_id,
            chunks: produced,
            failed_indices: failures.iter().map(|f| f.chunk_index).collect(),
            total_chunks: self.chunks.len(),
        })
    }
}

/// Outcome of a run with at least one successful chunk.
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub run_id: String,
    /// Successful chunks in ascending `sequence_index` order.
    pub chunks: Vec<AudioChunk>,
    pub failed_indices: Vec<usize>,
    pub total_chunks: usize,
}

impl CompletedRun {
    pub fn is_partial(&self) -> bool {
        !self.failed_indices.is_empty()
    }

    pub fn total_duration_seconds(&self) -> f64 {
        self.chunks.iter().map(|c| c.duration_seconds).sum()
    }
}

enum WorkerMsg {
    Started(usize),
    Finished(usize, Result<SynthesizedAudio, SynthesisError>),
}

#[derive(Debug, Clone)]
pub struct StreamCoordinator {
    synthesizer: ChunkSynthesizer,
    max_parallel: usize,
}

impl StreamCoordinator {
    pub fn new(synthesizer: ChunkSynthesizer, max_parallel: usize) -> Self {
        Self {
            synthesizer,
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn synthesizer(&self) -> &ChunkSynthesizer {
        &self.synthesizer
    }

    /// Synthesize every chunk and return the successes in logical order.
    ///
    /// Fails with [`StreamFailure`] only when no chunk succeeded.
    pub async fn run(
        &self,
        chunks: Vec<TextChunk>,
        voice: &str,
        speed: f32,
    ) -> Result<CompletedRun, StreamFailure> {
        self.run_with_events(chunks, voice, speed, None).await
    }

    /// Like [`run`](Self::run), additionally publishing each completion on
    /// `events` as soon as it is recorded.
    pub async fn run_with_events(
        &self,
        chunks: Vec<TextChunk>,
        voice: &str,
        speed: f32,
        events: Option<mpsc::UnboundedSender<ChunkEvent>>,
    ) -> Result<CompletedRun, StreamFailure> {
        let mut run = SynthesisRun::new(chunks, voice, speed);
        if run.chunks.is_empty() {
            return Err(StreamFailure {
                run_id: run.run_id,
                failures: Vec::new(),
            });
        }

        let started = Instant::now();
        info!(
            run_id = %run.run_id,
            chunks = run.chunks.len(),
            max_parallel = self.max_parallel,
            voice,
            "dispatching synthesis run"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerMsg>();
        let mut workers = JoinSet::new();

        for chunk in &run.chunks {
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            let synthesizer = self.synthesizer.clone();
            let run_id = run.run_id.clone();
            let voice = run.voice.clone();
            let text = chunk.text.clone();
            let index = chunk.sequence_index;

            workers.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let _ = tx.send(WorkerMsg::Started(index));

                let outcome = tokio::task::spawn_blocking(move || {
                    let label = ChunkLabel {
                        run_id: &run_id,
                        chunk_index: index,
                    };
                    synthesizer.synthesize(label, &text, &voice, speed)
                })
                .await
                .unwrap_or_else(|e| {
                    Err(SynthesisError::new(index, SynthesisCause::Worker(e.to_string())))
                });

                let _ = tx.send(WorkerMsg::Finished(index, outcome));
            });
        }
        drop(tx);

        while let Some(msg) = rx.recv().await {
            match msg {
                WorkerMsg::Started(index) => {
                    debug!(run_id = %run.run_id, index, "chunk running");
                    run.mark_running(index);
                }
                WorkerMsg::Finished(index, outcome) => {
                    if let Some(event) = run.record(index, outcome) {
                        if let Some(events) = &events {
                            // A consumer that went away does not stop the run.
                            let _ = events.send(event);
                        }
                    }
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(run_id = %run.run_id, error = %e, "synthesis worker panicked");
            }
        }

        let run_id = run.run_id.clone();
        let result = run.finish();
        match &result {
            Ok(done) => info!(
                run_id = %run_id,
                produced = done.chunks.len(),
                failed = done.failed_indices.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "synthesis run complete"
            ),
            Err(failure) => warn!(
                run_id = %run_id,
                failed = failure.failures.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "synthesis run produced no audio"
            ),
        }
        result
    }
}
