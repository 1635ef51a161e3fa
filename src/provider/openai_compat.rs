use super::sse::{SseEvent, SseParser};
use super::{ChatRequest, ChatStream, Message, ModelInfo, Provider, ProviderFuture, ProviderKind, StreamEvent};
use anyhow::{anyhow, Context};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// Chat Completions client for Fireworks, OpenAI and Together AI.
#[derive(Clone)]
pub struct OpenAiCompatProvider {
    http: reqwest::Client,
    kind: ProviderKind,
    api_key: String,
    api_base: Url,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("kind", &self.kind)
            .field("api_base", &self.api_base.as_str())
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatProvider {
    pub fn new(http: reqwest::Client, kind: ProviderKind, api_key: impl Into<String>) -> anyhow::Result<Self> {
        Self::with_base_url(http, kind, api_key, kind.default_base_url())
    }

    pub fn with_base_url(
        http: reqwest::Client,
        kind: ProviderKind,
        api_key: impl Into<String>,
        base_url: &str,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http,
            kind,
            api_key: api_key.into(),
            api_base: parse_base_url(base_url)?,
        })
    }

    fn build_url(&self, path: &str) -> anyhow::Result<Url> {
        self.api_base
            .join(path)
            .with_context(|| format!("invalid {} endpoint: {path}", self.kind.display_name()))
    }

    fn headers(&self) -> anyhow::Result<HeaderMap> {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut v = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| anyhow!("{} API key contains invalid characters", self.kind.display_name()))?;
        v.set_sensitive(true);
        h.insert(AUTHORIZATION, v);
        Ok(h)
    }
}

/// Parse a base URL, adding the trailing slash `Url::join` needs to keep the last path segment.
pub fn parse_base_url(base: &str) -> anyhow::Result<Url> {
    let base = base.trim();
    let normalized = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    };
    Url::parse(&normalized).with_context(|| format!("invalid base URL: {base}"))
}

impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn stream_chat(&self, req: ChatRequest) -> ProviderFuture<ChatStream> {
        let this = self.clone();

        Box::pin(async move {
            let url = this.build_url("chat/completions")?;
            let mut headers = this.headers()?;
            headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
            let api = this.kind.display_name();

            let body = ChatCompletionRequest {
                model: req.model,
                messages: req.messages,
                stream: true,
                reasoning_effort: req.reasoning_effort,
            };

            let resp = this
                .http
                .post(url)
                .headers(headers)
                .json(&body)
                .send()
                .await
                .with_context(|| format!("failed to start {api} request"))?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(anyhow!("{api} API error: HTTP {status}: {}", error_detail(&text)));
            }

            let (tx, rx) = mpsc::channel::<anyhow::Result<StreamEvent>>(64);

            tokio::spawn(async move {
                let mut stream = resp.bytes_stream();
                let mut parser = SseParser::new();
                let mut finished = false;

                while let Some(item) = stream.next().await {
                    let bytes = match item {
                        Ok(b) => b,
                        Err(e) => {
                            let _ = tx.send(Err(anyhow!(e).context("network stream error"))).await;
                            return;
                        }
                    };

                    for ev in parser.push(&bytes) {
                        match ev.and_then(|ev| decode_event(ev, &mut finished)) {
                            Ok(Some(out)) => {
                                let done = out == StreamEvent::Done;
                                if tx.send(Ok(out)).await.is_err() || done {
                                    return;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                let _ = tx.send(Err(e)).await;
                                return;
                            }
                        }
                    }
                }

                let tail = parser.finish().map(|ev| ev.and_then(|ev| decode_event(ev, &mut finished)));
                match tail {
                    Some(Ok(Some(out))) => {
                        let done = out == StreamEvent::Done;
                        if tx.send(Ok(out)).await.is_err() || done {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                    _ => {}
                }

                // Some servers close the body right after the final chunk without sending [DONE].
                if finished {
                    let _ = tx.send(Ok(StreamEvent::Done)).await;
                }
            });

            Ok(Box::pin(ReceiverStream::new(rx)) as ChatStream)
        })
    }

    fn list_models(&self) -> ProviderFuture<Vec<ModelInfo>> {
        let this = self.clone();

        Box::pin(async move {
            let url = this.build_url("models")?;
            let api = this.kind.display_name();

            let resp = this
                .http
                .get(url)
                .headers(this.headers()?)
                .send()
                .await
                .with_context(|| format!("failed to reach {api} API"))?;

            let status = resp.status();
            let body = resp
                .bytes()
                .await
                .with_context(|| format!("failed to read {api} model list"))?;
            if !status.is_success() {
                return Err(anyhow!(
                    "{api} API error: HTTP {status}: {}",
                    error_detail(&String::from_utf8_lossy(&body))
                ));
            }

            let list: ModelList = serde_json::from_slice(&body)
                .with_context(|| format!("failed to parse {api} model list"))?;
            Ok(list.into_models())
        })
    }
}

/// Turn one SSE payload into a stream event. `finished` records that a choice reported a finish reason.
fn decode_event(ev: SseEvent, finished: &mut bool) -> anyhow::Result<Option<StreamEvent>> {
    let SseEvent::Data(data) = ev else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if data == "[DONE]" {
        return Ok(Some(StreamEvent::Done));
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(data).context("failed to parse SSE JSON")?;
    if let Some(err) = chunk.error {
        return Err(anyhow!("provider reported an error mid-stream: {}", err.message));
    }

    let mut text = String::new();
    for choice in &chunk.choices {
        if let Some(t) = choice.delta.as_ref().and_then(|d| d.content.as_deref()) {
            text.push_str(t);
        }
        if choice.finish_reason.is_some() {
            *finished = true;
        }
    }

    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(StreamEvent::Delta(text)))
    }
}

/// Pull the human-readable message out of an `{"error": {...}}` body, falling back to the raw text.
fn error_detail(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: ErrorBody,
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(env) => env.error.message,
        Err(_) => body.trim().to_string(),
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// OpenAI and Fireworks wrap the list in `data`; Together returns a bare array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ModelList {
    Wrapped { data: Vec<ModelInfo> },
    Bare(Vec<ModelInfo>),
}

impl ModelList {
    fn into_models(self) -> Vec<ModelInfo> {
        match self {
            ModelList::Wrapped { data } => data,
            ModelList::Bare(models) => models,
        }
    }
}
