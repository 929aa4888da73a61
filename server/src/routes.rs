use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    Json,
};
use futures_util::{SinkExt, StreamExt};
use llm_core::{ChatMessage, ConversationStats};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tts_core::{
    combine, encode_wav_base64, load_samples, resequence, AudioChunk, Delivery, SpeechOutput,
    DEFAULT_GAP_SECONDS,
};

use crate::error::ApiError;
use crate::metrics::MetricsResponse;
use crate::validation::{
    validate_chat_request, validate_conversation_id, validate_speed, validate_tts_request,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    pub text: String,
    pub voice: Option<String>,
    pub speed: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct ChunkBody {
    pub sequence_index: usize,
    pub text: String,
    pub duration_seconds: f64,
    pub is_final: bool,
    pub sample_rate: u32,
    pub audio_base64: String,
}

#[derive(Debug, Serialize)]
pub struct SpeechBody {
    pub run_id: String,
    pub normalized_text: String,
    pub delivery: Delivery,
    pub chunks: Vec<ChunkBody>,
    /// All chunks joined with short pauses; absent when there is no audio.
    pub audio_base64: Option<String>,
    pub sample_rate: Option<u32>,
    pub duration_seconds: f64,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: Option<String>,
    pub voice: Option<String>,
    pub speed: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub conversation_id: String,
    pub cleaned_text: String,
    pub speech: Option<SpeechBody>,
    /// Set when the reply could not be spoken; the text is still returned.
    pub speech_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub conversation_id: String,
    pub messages: Vec<ChatMessage>,
    pub stats: ConversationStats,
}

#[derive(Debug, Serialize)]
pub struct ClearHistoryResponse {
    pub conversation_id: String,
    pub cleared: bool,
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn list_voices(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.pipeline.voices())
}

fn chunk_body(chunk: &AudioChunk) -> anyhow::Result<ChunkBody> {
    let samples = load_samples(&chunk.audio)?;
    let sample_rate = chunk.audio.sample_rate();
    Ok(ChunkBody {
        sequence_index: chunk.sequence_index,
        text: chunk.text.clone(),
        duration_seconds: chunk.duration_seconds,
        is_final: chunk.is_final,
        sample_rate,
        audio_base64: encode_wav_base64(&samples, sample_rate)?,
    })
}

fn speech_body(output: SpeechOutput) -> anyhow::Result<SpeechBody> {
    let chunks = output
        .chunks
        .iter()
        .map(chunk_body)
        .collect::<anyhow::Result<Vec<_>>>()?;

    let (samples, sample_rate) = combine(&output.chunks, DEFAULT_GAP_SECONDS)?;
    let (audio_base64, sample_rate) = if samples.is_empty() {
        (None, None)
    } else {
        (Some(encode_wav_base64(&samples, sample_rate)?), Some(sample_rate))
    };

    Ok(SpeechBody {
        duration_seconds: output.total_duration_seconds(),
        run_id: output.run_id,
        normalized_text: output.normalized_text,
        delivery: output.delivery,
        chunks,
        audio_base64,
        sample_rate,
    })
}

async fn speak(
    state: &AppState,
    text: &str,
    voice: Option<&str>,
    speed: Option<f32>,
) -> Result<SpeechOutput, ApiError> {
    let voice = voice.unwrap_or(state.config.default_voice.as_str());
    let speed = speed.unwrap_or(state.config.default_speed);
    match state.pipeline.speak(text, voice, speed).await {
        Ok(output) => {
            state.metrics.speech.record_output(&output);
            Ok(output)
        }
        Err(e) => {
            state.metrics.speech.record_unavailable();
            Err(ApiError::Speech(e))
        }
    }
}

pub async fn tts_endpoint(
    State(state): State<AppState>,
    Json(req): Json<TtsRequest>,
) -> Result<Json<SpeechBody>, ApiError> {
    let started = Instant::now();
    let result = async {
        validate_tts_request(&req.text, req.speed)?;
        let output = speak(&state, &req.text, req.voice.as_deref(), req.speed).await?;
        Ok::<_, ApiError>(speech_body(output)?)
    }
    .await;

    state
        .metrics
        .tts
        .record_request(started.elapsed().as_millis() as u64);
    if result.is_err() {
        state.metrics.tts.record_error();
    }
    result.map(Json)
}

pub async fn chat_endpoint(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let started = Instant::now();
    let result = chat(&state, req).await;
    state
        .metrics
        .chat
        .record_request(started.elapsed().as_millis() as u64);
    if result.is_err() {
        state.metrics.chat.record_error();
    }
    result.map(Json)
}

async fn chat(state: &AppState, req: ChatRequest) -> Result<ChatResponse, ApiError> {
    validate_chat_request(&req.message, req.conversation_id.as_deref())?;
    validate_speed(req.speed)?;

    info!(
        message_len = req.message.len(),
        conversation_id = ?req.conversation_id,
        "chat request received"
    );

    // The LLM client blocks; keep it off the async workers
    let llm = Arc::clone(&state.llm);
    let message = req.message.clone();
    let conversation_id = req.conversation_id.clone();
    // A reply landing after the timeout must not show up in the history
    let deadline = Instant::now() + state.config.llm_timeout();
    let result = tokio::time::timeout(
        state.config.llm_timeout(),
        tokio::task::spawn_blocking(move || {
            llm.chat_with_deadline(conversation_id, &message, Some(deadline))
        }),
    )
    .await;

    let (reply, conversation_id) = match result {
        Ok(Ok(Ok(answer))) => answer,
        Ok(Ok(Err(e))) => return Err(ApiError::Llm(format!("{e:#}"))),
        Ok(Err(join_err)) => {
            error!("LLM task join error: {join_err}");
            return Err(ApiError::InternalError(format!("Task join error: {join_err}")));
        }
        Err(_) => {
            error!(
                timeout_secs = state.config.llm_timeout().as_secs(),
                "LLM request timed out"
            );
            return Err(ApiError::LlmTimeout);
        }
    };

    let (cleaned_text, speech, speech_error) =
        match speak(state, &reply, req.voice.as_deref(), req.speed).await {
            Ok(output) => (output.normalized_text.clone(), Some(speech_body(output)?), None),
            Err(e) => {
                warn!(error = %e, "reply could not be spoken");
                (tts_core::normalize_sections(&reply).join(" "), None, Some(e.to_string()))
            }
        };

    Ok(ChatResponse {
        reply,
        conversation_id,
        cleaned_text,
        speech,
        speech_error,
    })
}

pub async fn chat_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    validate_conversation_id(&id)?;
    let messages = state.llm.history(&id)?;
    let stats = state.llm.conversation_stats(&id)?;
    Ok(Json(HistoryResponse {
        conversation_id: id,
        messages,
        stats,
    }))
}

pub async fn clear_chat_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ClearHistoryResponse>, ApiError> {
    validate_conversation_id(&id)?;
    let cleared = state.llm.clear_history(&id)?;
    if !cleared {
        return Err(ApiError::NotFound(format!("conversation {id}")));
    }
    Ok(Json(ClearHistoryResponse {
        conversation_id: id,
        cleared,
    }))
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        timestamp: chrono::Utc::now(),
        uptime_seconds: state.started.elapsed().as_secs(),
        endpoints: crate::metrics::EndpointMetricsResponse {
            tts: state.metrics.tts.snapshot(),
            chat: state.metrics.chat.snapshot(),
        },
        speech: state.metrics.speech.snapshot(),
    })
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub text: String,
    pub voice: Option<String>,
    pub speed: Option<f32>,
}

/// Frames sent over `/tts/stream`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Status { status: &'static str, total_chunks: usize },
    Chunk(ChunkBody),
    Complete { run_id: String, delivery: Delivery },
    Error { error: String, code: u16 },
}

async fn send(socket: &mut WebSocket, msg: &StreamMessage) -> bool {
    let Ok(text) = serde_json::to_string(msg) else {
        return false;
    };
    socket.send(Message::Text(text.into())).await.is_ok()
}

pub async fn tts_stream_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    if let Err(e) = validate_tts_request(&params.text, params.speed) {
        return ws.on_upgrade(move |mut socket| async move {
            let msg = StreamMessage::Error {
                error: e.to_string(),
                code: 400,
            };
            send(&mut socket, &msg).await;
            let _ = socket.close().await;
        });
    }

    ws.on_upgrade(move |socket| stream_speech(socket, state, params))
}

/// Publish chunks in reading order as soon as each one and everything before
/// it has resolved.
async fn stream_speech(mut socket: WebSocket, state: AppState, params: StreamParams) {
    let voice = params
        .voice
        .unwrap_or_else(|| state.config.default_voice.clone());
    let speed = params.speed.unwrap_or(state.config.default_speed);

    let (normalized, chunks) = state.pipeline.prepare(&params.text);
    let total = chunks.len();
    let status = StreamMessage::Status {
        status: "synthesizing",
        total_chunks: total,
    };
    let mut connected = send(&mut socket, &status).await;

    let (tx, rx) = mpsc::unbounded_channel();
    let pipeline = Arc::clone(&state.pipeline);
    let run = tokio::spawn(async move {
        pipeline
            .speak_prepared(normalized, chunks, &voice, speed, Some(tx))
            .await
    });

    let ordered = resequence(rx, total);
    tokio::pin!(ordered);
    while connected {
        let Some(chunk) = ordered.next().await else {
            break;
        };
        match chunk_body(&chunk) {
            Ok(body) => connected = send(&mut socket, &StreamMessage::Chunk(body)).await,
            Err(e) => warn!(index = chunk.sequence_index, error = %e, "could not encode chunk"),
        }
    }

    let outcome = match run.await {
        Ok(Ok(output)) => {
            state.metrics.speech.record_output(&output);
            let mut frames = Vec::new();
            if output.delivery == Delivery::Fallback {
                frames.extend(
                    output
                        .chunks
                        .iter()
                        .filter_map(|c| chunk_body(c).ok())
                        .map(StreamMessage::Chunk),
                );
            }
            frames.push(StreamMessage::Complete {
                run_id: output.run_id,
                delivery: output.delivery,
            });
            frames
        }
        Ok(Err(e)) => {
            state.metrics.speech.record_unavailable();
            vec![StreamMessage::Error {
                error: e.to_string(),
                code: 503,
            }]
        }
        Err(join_err) => vec![StreamMessage::Error {
            error: format!("synthesis task failed: {join_err}"),
            code: 500,
        }],
    };

    if !connected {
        info!("stream client went away before the run finished");
        return;
    }
    for frame in &outcome {
        if !send(&mut socket, frame).await {
            return;
        }
    }
    let _ = socket.close().await;
}
