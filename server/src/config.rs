// Server configuration, read once at startup

use std::path::PathBuf;
use std::time::Duration;

/// Which synthesis backend the server drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// External program, see `tts_core::CommandBackend`.
    Command,
    /// Local Piper voices from a map file (needs the `piper` feature).
    Piper,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub llm_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub backend: BackendKind,
    pub tts_command: String,
    pub model_map: PathBuf,
    /// Language key in the Piper map used when no voice is requested.
    pub default_language: String,
    pub default_voice: String,
    pub default_speed: f32,
    /// Chunk audio is written here when set, kept in memory otherwise.
    pub output_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            llm_timeout_secs: 120,
            request_timeout_secs: 60,
            cors_allowed_origins: None,
            backend: BackendKind::Command,
            tts_command: "kokoro-tts".to_string(),
            model_map: PathBuf::from("models/map.json"),
            default_language: "en_US".to_string(),
            default_voice: "af_sarah".to_string(),
            default_speed: 1.0,
            output_dir: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let backend = match env_string("TTS_BACKEND").as_deref() {
            Some("piper") => BackendKind::Piper,
            _ => BackendKind::Command,
        };

        let cors_allowed_origins = env_string("CORS_ALLOWED_ORIGINS").map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        Self {
            port: env_parse("PORT").unwrap_or(defaults.port),
            llm_timeout_secs: env_parse("LLM_TIMEOUT_SECS").unwrap_or(defaults.llm_timeout_secs),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout_secs),
            cors_allowed_origins,
            backend,
            tts_command: env_string("TTS_COMMAND").unwrap_or(defaults.tts_command),
            model_map: env_string("TTS_MODEL_MAP")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_map),
            default_language: env_string("TTS_DEFAULT_LANGUAGE")
                .unwrap_or(defaults.default_language),
            default_voice: env_string("TTS_DEFAULT_VOICE").unwrap_or(defaults.default_voice),
            default_speed: env_parse("TTS_DEFAULT_SPEED").unwrap_or(defaults.default_speed),
            output_dir: env_string("TTS_OUTPUT_DIR").map(PathBuf::from),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }
}
