//! Common utilities for integration tests

#![allow(dead_code)]

use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use llm_core::{ChatCompletion, ChatMessage, LlmClient};
use server::config::ServerConfig;
use server::AppState;
use tower::ServiceExt;
use tts_core::{BackendOutput, MemoryStore, SpeechPipeline, StreamConfig, SynthesisBackend};

pub const SAMPLE_RATE: u32 = 16_000;

/// Emits 10 ms of a constant tone per character; fails any text containing `FAIL`.
pub struct ToneBackend;

impl SynthesisBackend for ToneBackend {
    fn synthesize_raw(&self, text: &str, _voice: &str, _speed: f32) -> anyhow::Result<BackendOutput> {
        if text.contains("FAIL") {
            anyhow::bail!("tone generator refused {text:?}");
        }
        let samples = vec![0.25f32; text.chars().count() * (SAMPLE_RATE as usize / 100)];
        Ok(BackendOutput::mono(samples, SAMPLE_RATE))
    }

    fn voices(&self) -> Vec<String> {
        vec!["af_sarah".to_string(), "am_adam".to_string()]
    }
}

/// Replies with a fixed markdown answer, optionally after a delay.
pub struct ScriptedLlm {
    pub reply: String,
    pub delay: Duration,
}

impl ChatCompletion for ScriptedLlm {
    fn complete(&self, _messages: &[ChatMessage]) -> anyhow::Result<String> {
        std::thread::sleep(self.delay);
        Ok(self.reply.clone())
    }
}

pub const MARKDOWN_REPLY: &str = "## Short answer\n\nRust is a **systems** language. \
    It gives you memory safety without a garbage collector.\n\n- Fast\n- Reliable";

pub fn test_state_with(reply: &str, delay: Duration, config: ServerConfig) -> AppState {
    let pipeline = SpeechPipeline::new(
        std::sync::Arc::new(ToneBackend),
        std::sync::Arc::new(MemoryStore),
        StreamConfig::default().with_max_chunk_chars(60),
    );
    let llm = LlmClient::with_completion(Box::new(ScriptedLlm {
        reply: reply.to_string(),
        delay,
    }));
    AppState::new(pipeline, llm, config)
}

/// Create a test app instance
pub fn create_test_app() -> Router {
    server::app(test_state_with(
        MARKDOWN_REPLY,
        Duration::ZERO,
        ServerConfig::default(),
    ))
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}
