use futures_core::future::BoxFuture;
use futures_core::stream::BoxStream;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of a lane's history. Serializes in the Chat Completions message shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,

    /// Full lane history, ending with the new user turn.
    pub messages: Vec<Message>,

    /// Sent as `reasoning_effort` when set (Fireworks low mode).
    pub reasoning_effort: Option<String>,
}

/// Item of a generation stream.
///
/// A well-formed stream yields any number of `Delta`s and then exactly one `Done`.
/// A stream that ends without `Done` was cut off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelInfo {
    pub id: String,
}

pub type ChatStream = BoxStream<'static, anyhow::Result<StreamEvent>>;

pub type ProviderFuture<T> = BoxFuture<'static, anyhow::Result<T>>;

/// Provider interface: one streaming generation call and one model listing call.
pub trait Provider {
    fn name(&self) -> &'static str;

    /// Start streaming a response.
    fn stream_chat(&self, req: ChatRequest) -> ProviderFuture<ChatStream>;

    /// List the models the key can see. Used to check that a key is accepted.
    fn list_models(&self) -> ProviderFuture<Vec<ModelInfo>>;
}
