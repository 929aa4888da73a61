// Configuration for the streaming synthesis pipeline

/// Soft chunk size target used when nothing is configured.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 200;
const MAX_CHUNK_CHARS_MIN: usize = 20;
const MAX_CHUNK_CHARS_MAX: usize = 4000;

/// Backends are usually bound to a single accelerator, keep the pool small.
pub const DEFAULT_MAX_PARALLEL: usize = 4;
const MAX_PARALLEL_MAX: usize = 32;

/// Chunks shorter than this (after trimming) are not synthesized on their own.
pub const MIN_CHUNK_CHARS: usize = 5;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub max_chunk_chars: usize,
    pub max_parallel: usize,
    pub min_chunk_chars: usize,
    /// Run one synthesis over the whole text when every chunk failed.
    pub fallback_enabled: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            max_parallel: DEFAULT_MAX_PARALLEL,
            min_chunk_chars: MIN_CHUNK_CHARS,
            fallback_enabled: true,
        }
    }
}

impl StreamConfig {
    pub fn from_env() -> Self {
        let max_chunk_chars = std::env::var("TTS_MAX_CHUNK_CHARS")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .map(|v| v.clamp(MAX_CHUNK_CHARS_MIN, MAX_CHUNK_CHARS_MAX))
            .unwrap_or(DEFAULT_MAX_CHUNK_CHARS);

        let max_parallel = std::env::var("TTS_MAX_PARALLEL")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .map(|v| v.clamp(1, MAX_PARALLEL_MAX))
            .unwrap_or(DEFAULT_MAX_PARALLEL);

        let fallback_enabled = std::env::var("TTS_FALLBACK")
            .map(|v| !matches!(v.trim(), "0" | "false" | "off"))
            .unwrap_or(true);

        Self {
            max_chunk_chars,
            max_parallel,
            min_chunk_chars: MIN_CHUNK_CHARS,
            fallback_enabled,
        }
    }

    pub fn with_max_chunk_chars(mut self, max_chunk_chars: usize) -> Self {
        self.max_chunk_chars = max_chunk_chars.max(1);
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }
}
