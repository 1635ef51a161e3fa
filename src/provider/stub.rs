use super::{ChatRequest, ChatStream, Message, ModelInfo, Provider, ProviderFuture, Role, StreamEvent};
use anyhow::anyhow;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// How a scripted generation ends.
#[derive(Debug, Clone)]
enum Ending {
    Done,
    /// `stream_chat` itself fails, before any chunk.
    Refuse(String),
    /// An error item after the chunks.
    Error(String),
    /// The stream closes without a terminal event.
    Truncate,
    /// The stream never ends.
    Hang,
}

#[derive(Debug, Clone)]
enum Script {
    /// Replies with a think block about the last user turn, then echoes it.
    Echo,
    Chunks(Vec<String>),
}

/// Offline provider: scripted chunks, no network. Backs `--provider stub` and the tests.
#[derive(Debug, Clone)]
pub struct StubProvider {
    script: Script,
    ending: Ending,
    models: Vec<String>,
    delay: Duration,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StubProvider {
    pub fn new() -> Self {
        Self {
            script: Script::Echo,
            ending: Ending::Done,
            models: vec!["stub-r1".to_string()],
            delay: Duration::from_millis(40),
            requests: Arc::default(),
        }
    }

    pub fn scripted<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Script::Chunks(chunks.into_iter().map(Into::into).collect()),
            delay: Duration::ZERO,
            ..Self::new()
        }
    }

    pub fn refusing(msg: impl Into<String>) -> Self {
        Self {
            ending: Ending::Refuse(msg.into()),
            ..Self::new()
        }
    }

    pub fn failing_after<I, S>(chunks: I, msg: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ending: Ending::Error(msg.into()),
            ..Self::scripted(chunks)
        }
    }

    pub fn truncated<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ending: Ending::Truncate,
            ..Self::scripted(chunks)
        }
    }

    pub fn hanging() -> Self {
        Self {
            ending: Ending::Hang,
            ..Self::scripted(["<think>"])
        }
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn chunks_for(&self, req: &ChatRequest) -> Vec<String> {
        match &self.script {
            Script::Chunks(chunks) => chunks.clone(),
            Script::Echo => {
                let last = req
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m: &Message| m.content.as_str())
                    .unwrap_or_default();
                let turns = req.messages.iter().filter(|m| m.role == Role::User).count();
                vec![
                    "<think>\n".to_string(),
                    format!("model {} on turn {turns}.\n", req.model),
                    "</think>\n\n".to_string(),
                    "You said: ".to_string(),
                    last.to_string(),
                ]
            }
        }
    }
}

impl Provider for StubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn stream_chat(&self, req: ChatRequest) -> ProviderFuture<ChatStream> {
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(req.clone());
        }
        let chunks = self.chunks_for(&req);
        let ending = self.ending.clone();
        let delay = self.delay;

        Box::pin(async move {
            if let Ending::Refuse(msg) = &ending {
                return Err(anyhow!("{msg}"));
            }

            let (tx, rx) = mpsc::channel::<anyhow::Result<StreamEvent>>(32);

            tokio::spawn(async move {
                for chunk in chunks {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if tx.send(Ok(StreamEvent::Delta(chunk))).await.is_err() {
                        return;
                    }
                }

                match ending {
                    Ending::Done => {
                        let _ = tx.send(Ok(StreamEvent::Done)).await;
                    }
                    Ending::Error(msg) => {
                        let _ = tx.send(Err(anyhow!("{msg}"))).await;
                    }
                    Ending::Hang => {
                        // Hold the sender open until the receiver goes away.
                        tx.closed().await;
                    }
                    Ending::Truncate | Ending::Refuse(_) => {}
                }
            });

            Ok(Box::pin(ReceiverStream::new(rx)) as ChatStream)
        })
    }

    fn list_models(&self) -> ProviderFuture<Vec<ModelInfo>> {
        let models = self.models.clone();
        let ending = self.ending.clone();
        Box::pin(async move {
            if let Ending::Refuse(msg) = ending {
                return Err(anyhow!("{msg}"));
            }
            Ok(models.into_iter().map(|id| ModelInfo { id }).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn request(text: &str) -> ChatRequest {
        ChatRequest {
            model: "stub-r1".into(),
            messages: vec![Message::user(text)],
            reasoning_effort: None,
        }
    }

    #[tokio::test]
    async fn echo_ends_with_done() {
        let p = StubProvider::new().with_delay(Duration::ZERO);
        let events: Vec<_> = p
            .stream_chat(request("hi"))
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(events.last(), Some(&StreamEvent::Done));
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Delta(t) => Some(t.as_str()),
                StreamEvent::Done => None,
            })
            .collect();
        assert!(text.contains("</think>"));
        assert!(text.ends_with("You said: hi"));
        assert_eq!(p.requests().len(), 1);
    }

    #[tokio::test]
    async fn refusing_fails_before_streaming() {
        let p = StubProvider::refusing("HTTP 401");
        assert!(p.stream_chat(request("hi")).await.is_err());
        assert!(p.list_models().await.is_err());
    }

    #[tokio::test]
    async fn truncated_stream_has_no_done() {
        let p = StubProvider::truncated(["a", "b"]);
        let events: Vec<_> = p
            .stream_chat(request("hi"))
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(
            events,
            vec![StreamEvent::Delta("a".into()), StreamEvent::Delta("b".into())]
        );
    }
}
