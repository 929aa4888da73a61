use std::collections::HashMap;
use std::env;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Your answers are read aloud, \
    so keep them conversational and avoid tables or long code listings.";

/// How many earlier turns are sent along with a new message.
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// Stored history per conversation is capped at this many windows.
const STORED_WINDOWS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Ollama,
}

impl LlmProvider {
    pub fn default_model(self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "gpt-3.5-turbo",
            LlmProvider::Ollama => "llama3.2:latest",
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "https://api.openai.com",
            LlmProvider::Ollama => "http://localhost:11434",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConversationStats {
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub total_characters: usize,
    pub avg_message_length: f64,
    pub duration_seconds: f64,
}

/// Anything that can answer a list of chat messages.
pub trait ChatCompletion: Send + Sync {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u16,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: ResponseMessage,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Blocking HTTP client for the OpenAI chat API or a local Ollama server.
pub struct HttpCompletion {
    provider: LlmProvider,
    model: String,
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpCompletion {
    /// Reads `LLM_BASE_URL` and, for OpenAI, `OPENAI_API_KEY`.
    pub fn new(provider: LlmProvider, model: &str) -> Result<Self> {
        let base_url = env::var("LLM_BASE_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| provider.default_base_url().to_string());
        let api_key = env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty());
        if provider == LlmProvider::OpenAI && api_key.is_none() {
            anyhow::bail!("OPENAI_API_KEY must be set in the environment");
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            provider,
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

impl ChatCompletion for HttpCompletion {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let wire: Vec<WireMessage<'_>> = messages
            .iter()
            .map(|m| WireMessage {
                role: &m.role,
                content: &m.content,
            })
            .collect();

        match self.provider {
            LlmProvider::OpenAI => {
                let url = format!("{}/v1/chat/completions", self.base_url);
                let mut request = self.client.post(url).json(&OpenAiRequest {
                    model: &self.model,
                    messages: wire,
                    max_tokens: 400,
                });
                if let Some(key) = &self.api_key {
                    request = request.bearer_auth(key);
                }
                let response = request
                    .send()?
                    .error_for_status()?
                    .json::<OpenAiResponse>()?;
                response
                    .choices
                    .into_iter()
                    .next()
                    .map(|choice| choice.message.content)
                    .ok_or_else(|| anyhow::anyhow!("OpenAI returned no choices"))
            }
            LlmProvider::Ollama => {
                let url = format!("{}/api/chat", self.base_url);
                let response = self
                    .client
                    .post(url)
                    .json(&OllamaRequest {
                        model: &self.model,
                        messages: wire,
                        stream: false,
                    })
                    .send()?
                    .error_for_status()?
                    .json::<OllamaResponse>()?;
                Ok(response.message.content)
            }
        }
    }
}

/// Chat client that keeps per-conversation history in memory.
pub struct LlmClient {
    completion: Box<dyn ChatCompletion>,
    system_prompt: String,
    history_window: usize,
    conversations: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl LlmClient {
    pub fn new(provider: LlmProvider, model: &str) -> Result<Self> {
        info!(?provider, model, "LLM client configured");
        Ok(Self::with_completion(Box::new(HttpCompletion::new(provider, model)?)))
    }

    pub fn with_completion(completion: Box<dyn ChatCompletion>) -> Self {
        Self {
            completion,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history_window: DEFAULT_HISTORY_WINDOW,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// Send `message` in the context of `conversation_id` (a new id is
    /// generated when `None`). Returns the reply and the conversation id.
    ///
    /// Blocks on the network call; the history lock is not held meanwhile.
    pub fn chat_with_history(
        &self,
        conversation_id: Option<String>,
        message: &str,
    ) -> Result<(String, String)> {
        self.chat_with_deadline(conversation_id, message, None)
    }

    /// Like [`chat_with_history`](Self::chat_with_history), but a reply that
    /// arrives after `deadline` is discarded and the history left unchanged.
    pub fn chat_with_deadline(
        &self,
        conversation_id: Option<String>,
        message: &str,
        deadline: Option<Instant>,
    ) -> Result<(String, String)> {
        let id = conversation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut prompt = vec![ChatMessage::new("system", &self.system_prompt)];
        {
            let conversations = self.lock()?;
            if let Some(history) = conversations.get(&id) {
                let skip = history.len().saturating_sub(self.history_window);
                prompt.extend(history.iter().skip(skip).cloned());
            }
        }
        let user = ChatMessage::new("user", message);
        prompt.push(user.clone());
        debug!(conversation_id = %id, context = prompt.len(), "sending chat request");

        let reply = self.completion.complete(&prompt)?;
        if deadline.is_some_and(|d| Instant::now() > d) {
            warn!(conversation_id = %id, "reply arrived after the deadline, not recorded");
            anyhow::bail!("reply for conversation {id} arrived after the deadline");
        }

        let cap = (self.history_window * STORED_WINDOWS).max(2);
        let mut conversations = self.lock()?;
        let history = conversations.entry(id.clone()).or_default();
        history.push(user);
        history.push(ChatMessage::new("assistant", &reply));
        if history.len() > cap {
            let excess = history.len() - cap;
            history.drain(..excess);
        }
        Ok((reply, id))
    }

    pub fn history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        Ok(self.lock()?.get(conversation_id).cloned().unwrap_or_default())
    }

    /// Returns whether the conversation existed.
    pub fn clear_history(&self, conversation_id: &str) -> Result<bool> {
        Ok(self.lock()?.remove(conversation_id).is_some())
    }

    pub fn conversation_stats(&self, conversation_id: &str) -> Result<ConversationStats> {
        let conversations = self.lock()?;
        let history = conversations
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Ok(stats_for(history))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<ChatMessage>>>> {
        self.conversations
            .lock()
            .map_err(|_| anyhow::anyhow!("conversation store lock poisoned"))
    }
}

fn stats_for(history: &[ChatMessage]) -> ConversationStats {
    let total_messages = history.len();
    let total_characters: usize = history.iter().map(|m| m.content.chars().count()).sum();
    let duration_seconds = match (history.first(), history.last()) {
        (Some(first), Some(last)) => {
            (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0
        }
        _ => 0.0,
    };
    ConversationStats {
        total_messages,
        user_messages: history.iter().filter(|m| m.role == "user").count(),
        assistant_messages: history.iter().filter(|m| m.role == "assistant").count(),
        total_characters,
        avg_message_length: if total_messages == 0 {
            0.0
        } else {
            (total_characters as f64 / total_messages as f64 * 10.0).round() / 10.0
        },
        duration_seconds,
    }
}
