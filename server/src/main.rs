use std::{net::SocketAddr, sync::Arc};

use llm_core::{LlmClient, LlmProvider};
use tokio::net::TcpListener;
use tracing::info;
use tts_core::{
    AudioStore, CommandBackend, MemoryStore, SpeechPipeline, StreamConfig, SynthesisBackend,
    WavDirStore,
};

use server::config::{BackendKind, ServerConfig};
use server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

fn build_backend(config: &ServerConfig) -> anyhow::Result<Arc<dyn SynthesisBackend>> {
    match config.backend {
        BackendKind::Command => {
            info!(command = %config.tts_command, "using command TTS backend");
            Ok(Arc::new(CommandBackend::new(&config.tts_command)))
        }
        #[cfg(feature = "piper")]
        BackendKind::Piper => {
            info!(map = %config.model_map.display(), "loading Piper voices");
            let backend =
                tts_core::PiperBackend::from_mapfile(&config.model_map, &config.default_language)?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "piper"))]
        BackendKind::Piper => {
            anyhow::bail!("TTS_BACKEND=piper needs the server built with the `piper` feature")
        }
    }
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting TTS/LLM server...");

    let config = ServerConfig::from_env();

    let provider = match std::env::var("LLM_PROVIDER").as_deref() {
        Ok("ollama") => LlmProvider::Ollama,
        _ => LlmProvider::OpenAI,
    };
    let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| provider.default_model().to_string());
    let llm = LlmClient::new(provider, &model)?;

    let backend = build_backend(&config)?;
    let store: Arc<dyn AudioStore> = match &config.output_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "writing chunk audio to disk");
            Arc::new(WavDirStore::new(dir)?)
        }
        None => Arc::new(MemoryStore),
    };
    let stream_config = StreamConfig::from_env();
    info!(
        max_chunk_chars = stream_config.max_chunk_chars,
        max_parallel = stream_config.max_parallel,
        fallback = stream_config.fallback_enabled,
        "speech pipeline configured"
    );
    let pipeline = SpeechPipeline::new(backend, store, stream_config);

    info!(
        "Server configuration loaded: port={}, llm_timeout={}s, request_timeout={}s",
        config.port, config.llm_timeout_secs, config.request_timeout_secs
    );
    let port = config.port;
    let app = server::app(AppState::new(pipeline, llm, config));

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT."))?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
