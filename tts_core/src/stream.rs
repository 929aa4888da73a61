//! Streaming delivery helpers.
//!
//! The coordinator publishes chunks in completion order. Playback needs them
//! in logical order, so [`Resequencer`] buffers early arrivals and releases a
//! chunk once every lower index has resolved. It also decides `is_final`:
//! a chunk is final when it is the last index, or when every index after it
//! is known to have failed.

use std::collections::{BTreeMap, BTreeSet};

use futures_core::Stream;
use tokio::sync::mpsc;

use crate::coordinator::{AudioChunk, ChunkEvent};

#[derive(Debug)]
pub struct Resequencer {
    total: usize,
    next: usize,
    ready: BTreeMap<usize, AudioChunk>,
    failed: BTreeSet<usize>,
}

impl Resequencer {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            next: 0,
            ready: BTreeMap::new(),
            failed: BTreeSet::new(),
        }
    }

    /// Feed one completion; returns whatever can now be released in order.
    pub fn push(&mut self, event: ChunkEvent) -> Vec<AudioChunk> {
        match event {
            ChunkEvent::Succeeded(chunk) if chunk.sequence_index < self.total => {
                self.ready.insert(chunk.sequence_index, chunk);
            }
            ChunkEvent::Failed { sequence_index, .. } if sequence_index < self.total => {
                self.failed.insert(sequence_index);
            }
            _ => {}
        }
        self.drain()
    }

    /// All chunks released so far have been emitted and nothing is pending.
    pub fn is_done(&self) -> bool {
        self.next >= self.total
    }

    /// Release what is left once no more events will arrive. Indices that
    /// never reported are treated as failed.
    pub fn finish(&mut self) -> Vec<AudioChunk> {
        for index in self.next..self.total {
            if !self.ready.contains_key(&index) {
                self.failed.insert(index);
            }
        }
        self.drain()
    }

    fn drain(&mut self) -> Vec<AudioChunk> {
        let mut out = Vec::new();
        loop {
            while self.failed.contains(&self.next) {
                self.next += 1;
            }
            if self.next >= self.total {
                break;
            }
            let Some(chunk) = self.ready.get(&self.next) else {
                break;
            };

            let later_success = self.ready.range(self.next + 1..).next().is_some();
            let later_all_failed = (self.next + 1..self.total).all(|i| self.failed.contains(&i));
            if !later_success && !later_all_failed {
                // Cannot tell yet whether this is the last audible chunk.
                break;
            }

            let mut chunk = chunk.clone();
            chunk.is_final = !later_success;
            self.ready.remove(&self.next);
            self.next += 1;
            out.push(chunk);
        }
        out
    }
}

/// Turn a completion-ordered event channel into a logically ordered stream.
pub fn resequence(
    mut events: mpsc::UnboundedReceiver<ChunkEvent>,
    total: usize,
) -> impl Stream<Item = AudioChunk> {
    async_stream::stream! {
        let mut resequencer = Resequencer::new(total);
        while let Some(event) = events.recv().await {
            for chunk in resequencer.push(event) {
                yield chunk;
            }
            if resequencer.is_done() {
                break;
            }
        }
        for chunk in resequencer.finish() {
            yield chunk;
        }
    }
}
