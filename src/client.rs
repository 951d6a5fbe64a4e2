//! OpenAI-compatible inference client.
//!
//! The orchestrator talks to remote services only through the
//! [`InferenceService`] trait: a catalog listing and a streaming chat
//! completion. [`HttpService`] is the production implementation, speaking the
//! hosted-completion JSON protocol (`GET /models`, `POST /chat/completions`
//! with `stream: true`) that Ollama, vLLM, LM Studio and OpenAI all accept.
//!
//! ## Streaming wire format
//!
//! Completions arrive as server-sent events. Each `data:` line carries one
//! JSON chunk whose `choices[0].delta.content` holds the next text fragment;
//! `data: [DONE]` ends the stream. Network reads do not respect line
//! boundaries (or UTF-8 boundaries, which matters for CJK output), so
//! [`SseDecoder`] buffers raw bytes until a full line is available.

use crate::config::PoolSettings;
use crate::error::{HandwriteError, ServiceError};
use crate::pool::{ConnectionKey, Connector};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_stream::Stream;
use tracing::debug;

/// One delivered piece of a streaming completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Increment {
    /// Text delta, if this increment carries one. Role announcements,
    /// keep-alives and the final `finish_reason` chunk carry none.
    pub text: Option<String>,
}

impl Increment {
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            text: Some(s.into()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// A finite, consumed-once sequence of increments in arrival order.
pub type IncrementStream = Pin<Box<dyn Stream<Item = Result<Increment, ServiceError>> + Send>>;

/// A remote service able to list its models and stream chat completions.
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Identifiers of the models the service currently serves.
    async fn list_models(&self) -> Result<Vec<String>, ServiceError>;

    /// Issue a streaming chat completion.
    async fn stream_chat(&self, request: &StageRequest) -> Result<IncrementStream, ServiceError>;

    /// Release transport resources. Called once by
    /// [`crate::pool::ClientPool::release_all`].
    async fn shutdown(&self) {}
}

// ── Request body ─────────────────────────────────────────────────────────

/// Body of one chat-completion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

impl StageRequest {
    /// A single user turn carrying an instruction followed by images.
    pub fn multimodal(
        model: impl Into<String>,
        prompt: impl Into<String>,
        image_urls: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut parts = vec![ContentPart::Text {
            text: prompt.into(),
        }];
        parts.extend(
            image_urls
                .into_iter()
                .map(|url| ContentPart::ImageUrl {
                    image_url: ImageUrl { url },
                }),
        );
        Self::user(model, MessageContent::Parts(parts))
    }

    /// A single text-only user turn.
    pub fn text(model: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self::user(model, MessageContent::Text(instruction.into()))
    }

    fn user(model: impl Into<String>, content: MessageContent) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content,
            }],
            temperature: 0.0,
            max_tokens: None,
            stream: true,
        }
    }

    pub fn with_max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    /// Number of image parts across all messages.
    pub fn image_count(&self) -> usize {
        self.messages
            .iter()
            .map(|m| match &m.content {
                MessageContent::Parts(parts) => parts
                    .iter()
                    .filter(|p| matches!(p, ContentPart::ImageUrl { .. }))
                    .count(),
                MessageContent::Text(_) => 0,
            })
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

// ── Response bodies ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Decode one `data:` payload into an increment.
fn parse_increment(payload: &str) -> Result<Increment, ServiceError> {
    let chunk: StreamChunk = serde_json::from_str(payload)
        .map_err(|e| ServiceError::Protocol(format!("malformed stream chunk: {e}")))?;
    if let Some(err) = chunk.error {
        return Err(ServiceError::Protocol(format!("service reported: {err}")));
    }
    let text = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content);
    Ok(Increment { text })
}

// ── SSE decoding ─────────────────────────────────────────────────────────

/// One event recovered from the server-sent-event byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// Incremental line decoder for `text/event-stream` bodies.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes; returns every event completed by this chunk.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(ev) = decode_line(&line) {
                events.push(ev);
            }
        }
        events
    }

    /// Flush a trailing line that arrived without a newline.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let line = std::mem::take(&mut self.buf);
        decode_line(&line)
    }
}

fn decode_line(line: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\n', '\r']);
    let payload = line.strip_prefix("data:")?.trim_start();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(SseEvent::Done);
    }
    Some(SseEvent::Data(payload.to_string()))
}

/// Turn a streaming HTTP body into an [`IncrementStream`].
///
/// `permit` is held until the stream is dropped so the in-flight limit
/// covers the whole response, not just the request headers.
fn increment_stream<S, B, E>(body: S, permit: OwnedSemaphorePermit) -> IncrementStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    struct State<S> {
        body: Pin<Box<S>>,
        decoder: SseDecoder,
        pending: VecDeque<Result<Increment, ServiceError>>,
        done: bool,
        _permit: OwnedSemaphorePermit,
    }

    let state = State {
        body: Box::pin(body),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        done: false,
        _permit: permit,
    };

    let s = stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    for event in st.decoder.push(bytes.as_ref()) {
                        match event {
                            SseEvent::Done => {
                                st.done = true;
                                break;
                            }
                            SseEvent::Data(payload) => {
                                let item = parse_increment(&payload);
                                let failed = item.is_err();
                                st.pending.push_back(item);
                                if failed {
                                    st.done = true;
                                    break;
                                }
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    st.done = true;
                    st.pending
                        .push_back(Err(ServiceError::Transport(format!("stream interrupted: {e}"))));
                }
                None => {
                    st.done = true;
                    if let Some(SseEvent::Data(payload)) = st.decoder.finish() {
                        st.pending.push_back(parse_increment(&payload));
                    }
                }
            }
        }
    });

    Box::pin(s)
}

// ── HTTP implementation ──────────────────────────────────────────────────

/// Normalise a user-supplied server URL to the API base.
///
/// Operators paste either the base (`http://host:11434/v1`) or the full
/// completions URL (`https://host/serving/v1/chat/completions`); both must
/// resolve to the same base. Any other path is kept as given, so services
/// rooted somewhere other than `/v1` work unchanged.
pub fn normalize_base_url(server: &str) -> String {
    let base = server.trim().trim_end_matches('/');
    base.strip_suffix("/chat/completions")
        .unwrap_or(base)
        .trim_end_matches('/')
        .to_string()
}

/// Pooled HTTP client for one (server, credential) pair.
pub struct HttpService {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
    permits: Arc<Semaphore>,
}

impl HttpService {
    /// Build a client with the pool's timeout and connection limits.
    pub fn new(key: &ConnectionKey, settings: &PoolSettings) -> Result<Self, HandwriteError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .pool_max_idle_per_host(settings.max_idle_per_host)
            .build()
            .map_err(|e| HandwriteError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: normalize_base_url(&key.endpoint),
            api_key: key.api_key.clone(),
            http,
            permits: Arc::new(Semaphore::new(settings.max_connections.max(1))),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn permit(&self) -> Result<OwnedSemaphorePermit, ServiceError> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ServiceError::Transport("client has been shut down".into()))
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ServiceError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl InferenceService for HttpService {
    async fn list_models(&self) -> Result<Vec<String>, ServiceError> {
        let _permit = self.permit().await?;
        let url = format!("{}/models", self.base_url);
        debug!("GET {}", url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        let resp = check_status(resp).await?;

        let list: ModelList = resp
            .json()
            .await
            .map_err(|e| ServiceError::Protocol(format!("invalid model list: {e}")))?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    async fn stream_chat(&self, request: &StageRequest) -> Result<IncrementStream, ServiceError> {
        let permit = self.permit().await?;
        let url = format!("{}/chat/completions", self.base_url);
        debug!("POST {} model={}", url, request.model);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        let resp = check_status(resp).await?;

        Ok(increment_stream(resp.bytes_stream(), permit))
    }

    async fn shutdown(&self) {
        self.permits.close();
        debug!("Closed HTTP client for {}", self.base_url);
    }
}

/// Production [`Connector`]: one [`HttpService`] per connection key.
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    settings: PoolSettings,
}

impl HttpConnector {
    pub fn new(settings: PoolSettings) -> Self {
        Self { settings }
    }
}

impl Connector for HttpConnector {
    type Service = HttpService;

    fn connect(&self, key: &ConnectionKey) -> Result<HttpService, HandwriteError> {
        HttpService::new(key, &self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_keeps_v1_base() {
        assert_eq!(
            normalize_base_url("http://10.0.0.5:11434/v1"),
            "http://10.0.0.5:11434/v1"
        );
        assert_eq!(
            normalize_base_url("http://10.0.0.5:11434/v1/"),
            "http://10.0.0.5:11434/v1"
        );
    }

    #[test]
    fn normalize_strips_completions_path() {
        assert_eq!(
            normalize_base_url("https://llm.example.org/servingpod/abc/v1/chat/completions"),
            "https://llm.example.org/servingpod/abc/v1"
        );
    }

    #[test]
    fn normalize_keeps_non_v1_root() {
        assert_eq!(
            normalize_base_url("https://open.bigmodel.cn/api/paas/v4"),
            "https://open.bigmodel.cn/api/paas/v4"
        );
        assert_eq!(
            normalize_base_url("https://open.bigmodel.cn/api/paas/v4/chat/completions/"),
            "https://open.bigmodel.cn/api/paas/v4"
        );
        assert_eq!(normalize_base_url("http://localhost:8000"), "http://localhost:8000");
    }

    #[test]
    fn multimodal_request_serialises_parts_in_order() {
        let req = StageRequest::multimodal(
            "qwen3-vl",
            "read this",
            vec!["data:image/png;base64,AAAA".to_string()],
        );
        let json = serde_json::to_value(&req).unwrap();
        let content = &json["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "read this");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,AAAA");
        assert_eq!(json["stream"], true);
        assert!(json.get("max_tokens").is_none());
        assert_eq!(req.image_count(), 1);
    }

    #[test]
    fn text_request_carries_token_budget() {
        let req = StageRequest::text("qwen2.5", "only json").with_max_tokens(512);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0]["content"], "only json");
        assert_eq!(json["max_tokens"], 512);
        assert_eq!(req.image_count(), 0);
    }

    #[test]
    fn decoder_handles_split_lines_and_multibyte_chars() {
        let mut dec = SseDecoder::default();
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"张三\"}}]}\n".as_bytes();
        // Split inside the first CJK character.
        let cut = line.iter().position(|&b| b >= 0x80).unwrap() + 1;
        assert!(dec.push(&line[..cut]).is_empty());
        let events = dec.push(&line[cut..]);
        assert_eq!(events.len(), 1);
        let SseEvent::Data(payload) = &events[0] else {
            panic!("expected data event");
        };
        assert_eq!(parse_increment(payload).unwrap(), Increment::text("张三"));
    }

    #[test]
    fn decoder_ignores_comments_and_detects_done() {
        let mut dec = SseDecoder::default();
        let events = dec.push(b": keep-alive\r\nevent: message\r\ndata: [DONE]\r\n");
        assert_eq!(events, vec![SseEvent::Done]);
    }

    #[test]
    fn decoder_flushes_unterminated_line() {
        let mut dec = SseDecoder::default();
        assert!(dec.push(b"data: {\"choices\":[]}").is_empty());
        assert_eq!(
            dec.finish(),
            Some(SseEvent::Data("{\"choices\":[]}".to_string()))
        );
    }

    #[test]
    fn chunk_without_delta_content_is_empty_increment() {
        let inc = parse_increment(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap();
        assert_eq!(inc, Increment::empty());
        let inc = parse_increment(r#"{"choices":[]}"#).unwrap();
        assert_eq!(inc, Increment::empty());
    }

    #[test]
    fn error_chunk_is_protocol_failure() {
        let err = parse_increment(r#"{"error":{"message":"model crashed"}}"#).unwrap_err();
        assert!(err.to_string().contains("model crashed"));
        assert!(parse_increment("not json").is_err());
    }

    #[tokio::test]
    async fn increment_stream_stops_at_done() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\ndata: {\"choices\":[{\"delta\":{}}]}\n".to_vec()),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\ndata: [DONE]\n".to_vec()),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n".to_vec()),
        ];
        let permit = Arc::new(Semaphore::new(1)).acquire_owned().await.unwrap();
        let items: Vec<_> = increment_stream(stream::iter(chunks), permit).collect().await;
        let items: Vec<Increment> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            items,
            vec![Increment::text("a"), Increment::empty(), Increment::text("b")]
        );
    }

    #[tokio::test]
    async fn increment_stream_surfaces_transport_error() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n".to_vec()),
            Err("connection reset".to_string()),
        ];
        let permit = Arc::new(Semaphore::new(1)).acquire_owned().await.unwrap();
        let items: Vec<_> = increment_stream(stream::iter(chunks), permit).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(&items[1], Err(ServiceError::Transport(m)) if m.contains("connection reset")));
    }
}
