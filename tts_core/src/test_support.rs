//! Scriptable backend for pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backend::{BackendOutput, SynthesisBackend};

pub const FAKE_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Clone)]
pub struct FakeBackend {
    samples_per_char: usize,
    amplitude: f32,
    delays: Vec<(String, Duration)>,
    fail_on: Vec<String>,
    nan_on: Vec<String>,
    fail_all: bool,
    fail_below: usize,
    completed: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            samples_per_char: 100,
            amplitude: 0.5,
            delays: Vec::new(),
            fail_on: Vec::new(),
            nan_on: Vec::new(),
            fail_all: false,
            fail_below: 0,
            completed: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_samples_per_char(mut self, n: usize) -> Self {
        self.samples_per_char = n;
        self
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Sleep for `ms` when the text contains `needle`.
    pub fn delay_when(mut self, needle: &str, ms: u64) -> Self {
        self.delays.push((needle.to_string(), Duration::from_millis(ms)));
        self
    }

    pub fn fail_when(mut self, needle: &str) -> Self {
        self.fail_on.push(needle.to_string());
        self
    }

    pub fn nan_when(mut self, needle: &str) -> Self {
        self.nan_on.push(needle.to_string());
        self
    }

    pub fn fail_always(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Fail every text with fewer than `chars` characters.
    pub fn fail_shorter_than(mut self, chars: usize) -> Self {
        self.fail_below = chars;
        self
    }

    /// Texts in the order their synthesis finished.
    pub fn completion_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.completed)
    }

    pub fn max_in_flight(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.max_in_flight)
    }
}

impl SynthesisBackend for FakeBackend {
    fn synthesize_raw(&self, text: &str, _voice: &str, _speed: f32) -> anyhow::Result<BackendOutput> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some((_, delay)) = self.delays.iter().find(|(n, _)| text.contains(n.as_str())) {
            std::thread::sleep(*delay);
        } else {
            std::thread::sleep(Duration::from_millis(5));
        }

        let result = if self.fail_all
            || text.chars().count() < self.fail_below
            || self.fail_on.iter().any(|n| text.contains(n.as_str())) {
            Err(anyhow::anyhow!("scripted failure for {text:?}"))
        } else {
            let mut samples = vec![self.amplitude; text.chars().count() * self.samples_per_char];
            if self.nan_on.iter().any(|n| text.contains(n.as_str())) {
                if let Some(first) = samples.first_mut() {
                    *first = f32::NAN;
                }
            }
            Ok(BackendOutput::mono(samples, FAKE_SAMPLE_RATE))
        };

        if let Ok(mut log) = self.completed.lock() {
            log.push(text.to_string());
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
