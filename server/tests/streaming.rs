//! WebSocket streaming tests against a live listener

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use common::*;

async fn spawn_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_test_app()).await.unwrap();
    });
    addr
}

fn query_text(text: &str) -> String {
    text.replace(' ', "%20").replace(',', "%2C")
}

/// Collect every JSON frame until the server closes the socket.
async fn stream_frames(addr: SocketAddr, text: &str) -> Vec<Value> {
    let url = format!("ws://{addr}/tts/stream?text={}", query_text(text));
    let (mut ws, _) = connect_async(url).await.unwrap();

    let mut frames = Vec::new();
    while let Some(msg) = tokio::time::timeout(Duration::from_secs(10), ws.next())
        .await
        .expect("stream stalled")
    {
        match msg.unwrap() {
            Message::Text(text) => frames.push(serde_json::from_str(text.as_str()).unwrap()),
            Message::Close(_) => break,
            _ => {}
        }
    }
    frames
}

fn chunk_indices(frames: &[Value]) -> Vec<u64> {
    frames
        .iter()
        .filter(|f| f["type"] == "chunk")
        .map(|f| f["sequence_index"].as_u64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_stream_sends_chunks_in_reading_order() {
    let addr = spawn_server().await;
    let text = "First sentence of the stream goes here. \
        Second sentence follows right after it. Third one closes the stream.";
    let frames = stream_frames(addr, text).await;

    assert_eq!(frames[0]["type"], "status");
    assert_eq!(frames[0]["total_chunks"], 3);
    assert_eq!(chunk_indices(&frames), vec![0, 1, 2]);

    let chunks: Vec<&Value> = frames.iter().filter(|f| f["type"] == "chunk").collect();
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk["is_final"], i == 2);
        assert_eq!(chunk["sample_rate"], SAMPLE_RATE);
        assert!(chunk["audio_base64"].as_str().unwrap().len() > 44);
    }
    assert_eq!(chunks[0]["text"], "First sentence of the stream goes here.");

    let last = frames.last().unwrap();
    assert_eq!(last["type"], "complete");
    assert_eq!(last["delivery"], json!({ "status": "complete" }));
}

#[tokio::test]
async fn test_stream_skips_failed_chunk() {
    let addr = spawn_server().await;
    let text = "The first sentence is perfectly fine to speak. \
        The second sentence will FAIL on purpose today. \
        The third sentence is also fine to speak aloud.";
    let frames = stream_frames(addr, text).await;

    assert_eq!(frames[0]["total_chunks"], 3);
    assert_eq!(chunk_indices(&frames), vec![0, 2]);
    let final_flags: Vec<bool> = frames
        .iter()
        .filter(|f| f["type"] == "chunk")
        .map(|f| f["is_final"].as_bool().unwrap())
        .collect();
    assert_eq!(final_flags, vec![false, true]);

    let last = frames.last().unwrap();
    assert_eq!(last["type"], "complete");
    assert_eq!(last["delivery"], json!({ "status": "degraded", "missing": [1] }));
}

#[tokio::test]
async fn test_stream_sends_fallback_chunk_before_complete() {
    let addr = spawn_server().await;
    // Too short to form a chunk, so the whole text is spoken in one call
    let frames = stream_frames(addr, "Hi.").await;

    let types: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
    assert_eq!(types, vec!["status", "chunk", "complete"]);
    assert_eq!(frames[0]["total_chunks"], 0);
    assert_eq!(frames[1]["sequence_index"], 0);
    assert_eq!(frames[1]["text"], "Hi.");
    assert_eq!(frames[1]["is_final"], true);
    assert_eq!(frames[2]["delivery"], json!({ "status": "fallback" }));
}

#[tokio::test]
async fn test_stream_reports_unavailable_speech() {
    let addr = spawn_server().await;
    let frames = stream_frames(addr, "Everything here will FAIL, no matter what.").await;

    let types: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
    assert_eq!(types, vec!["status", "error"]);
    assert_eq!(frames[1]["code"], 503);
    assert!(frames[1]["error"].as_str().unwrap().contains("unavailable"));
}

#[tokio::test]
async fn test_stream_rejects_invalid_request() {
    let addr = spawn_server().await;
    let frames = stream_frames(addr, " ").await;

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "error");
    assert_eq!(frames[0]["code"], 400);
}
