// Metrics collection and tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tts_core::{Delivery, SpeechOutput};

const LATENCY_SAMPLES: usize = 1000;

/// Per-endpoint metrics
#[derive(Debug, Clone)]
pub struct EndpointMetrics {
    pub request_count: Arc<AtomicU64>,
    pub error_count: Arc<AtomicU64>,
    pub total_latency_ms: Arc<AtomicU64>,
    pub max_latency_ms: Arc<AtomicU64>,
    pub latency_samples: Arc<Mutex<Vec<u64>>>,
}

impl EndpointMetrics {
    pub fn new() -> Self {
        Self {
            request_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            total_latency_ms: Arc::new(AtomicU64::new(0)),
            max_latency_ms: Arc::new(AtomicU64::new(0)),
            latency_samples: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn record_request(&self, latency_ms: u64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.max_latency_ms.fetch_max(latency_ms, Ordering::Relaxed);

        // Keep the most recent samples for percentiles
        if let Ok(mut samples) = self.latency_samples.lock() {
            samples.push(latency_ms);
            if samples.len() > LATENCY_SAMPLES {
                samples.remove(0);
            }
        }
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.request_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        total as f64 / count as f64
    }

    fn percentile(&self, p: u8) -> u64 {
        let Ok(samples) = self.latency_samples.lock() else {
            return 0;
        };
        if samples.is_empty() {
            return 0;
        }
        let mut sorted = samples.clone();
        sorted.sort_unstable();
        let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn snapshot(&self) -> EndpointStats {
        EndpointStats {
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms(),
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            p50_latency_ms: self.percentile(50),
            p95_latency_ms: self.percentile(95),
        }
    }
}

impl Default for EndpointMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for synthesis runs
#[derive(Debug, Clone, Default)]
pub struct SpeechMetrics {
    pub runs: Arc<AtomicU64>,
    pub chunks_synthesized: Arc<AtomicU64>,
    pub chunks_failed: Arc<AtomicU64>,
    pub degraded_runs: Arc<AtomicU64>,
    pub fallbacks: Arc<AtomicU64>,
    pub unavailable: Arc<AtomicU64>,
    pub audio_ms: Arc<AtomicU64>,
}

impl SpeechMetrics {
    pub fn record_output(&self, output: &SpeechOutput) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.chunks_synthesized
            .fetch_add(output.chunks.len() as u64, Ordering::Relaxed);
        self.audio_ms.fetch_add(
            (output.total_duration_seconds() * 1000.0) as u64,
            Ordering::Relaxed,
        );
        match &output.delivery {
            Delivery::Complete => {}
            Delivery::Degraded { missing } => {
                self.degraded_runs.fetch_add(1, Ordering::Relaxed);
                self.chunks_failed
                    .fetch_add(missing.len() as u64, Ordering::Relaxed);
            }
            Delivery::Fallback => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_unavailable(&self) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SpeechStats {
        SpeechStats {
            runs: self.runs.load(Ordering::Relaxed),
            chunks_synthesized: self.chunks_synthesized.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            degraded_runs: self.degraded_runs.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
            audio_seconds: self.audio_ms.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

/// Comprehensive metrics structure
#[derive(Debug, Clone, Default)]
pub struct AppMetrics {
    pub tts: EndpointMetrics,
    pub chat: EndpointMetrics,
    pub speech: SpeechMetrics,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub endpoints: EndpointMetricsResponse,
    pub speech: SpeechStats,
}

#[derive(Debug, Serialize)]
pub struct EndpointMetricsResponse {
    pub tts: EndpointStats,
    pub chat: EndpointStats,
}

#[derive(Debug, Serialize)]
pub struct EndpointStats {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct SpeechStats {
    pub runs: u64,
    pub chunks_synthesized: u64,
    pub chunks_failed: u64,
    pub degraded_runs: u64,
    pub fallbacks: u64,
    pub unavailable: u64,
    pub audio_seconds: f64,
}
