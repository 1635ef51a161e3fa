pub mod openai_compat;
pub mod sse;
pub mod stub;
mod types;

pub use types::{ChatRequest, ChatStream, Message, ModelInfo, Provider, ProviderFuture, Role, StreamEvent};

use serde::{Deserialize, Serialize};

/// Hosted API a lane talks to. All three speak the OpenAI Chat Completions dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Fireworks,
    #[serde(rename = "openai")]
    OpenAi,
    Together,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Fireworks, ProviderKind::OpenAi, ProviderKind::Together];

    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::Fireworks => "fireworks",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Together => "together",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProviderKind::Fireworks => "Fireworks",
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Together => "Together AI",
        }
    }

    /// Base URL of the OpenAI-compatible API. Always ends with `/` so relative joins keep the version segment.
    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::Fireworks => "https://api.fireworks.ai/inference/v1/",
            ProviderKind::OpenAi => "https://api.openai.com/v1/",
            ProviderKind::Together => "https://api.together.xyz/v1/",
        }
    }

    /// Environment variable that overrides the stored key.
    pub fn api_key_env(self) -> &'static str {
        match self {
            ProviderKind::Fireworks => "FIREWORKS_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Together => "TOGETHER_API_KEY",
        }
    }

    pub fn is_required(self) -> bool {
        matches!(self, ProviderKind::Fireworks)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
