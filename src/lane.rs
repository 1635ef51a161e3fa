use crate::provider::{Provider, ProviderKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A provider/mode pairing with its own conversation history.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum LaneId {
    /// DeepSeek R1 on Fireworks with low reasoning effort
    FireworksLow,
    /// DeepSeek R1 on Fireworks
    Fireworks,
    /// DeepSeek R1 on Together AI
    Together,
    /// o3-mini on OpenAI
    #[serde(rename = "openai")]
    #[value(name = "openai")]
    OpenAi,
}

impl LaneId {
    pub const ALL: [LaneId; 4] = [LaneId::FireworksLow, LaneId::Fireworks, LaneId::Together, LaneId::OpenAi];

    pub fn as_str(self) -> &'static str {
        match self {
            LaneId::FireworksLow => "fireworks-low",
            LaneId::Fireworks => "fireworks",
            LaneId::Together => "together",
            LaneId::OpenAi => "openai",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LaneId::FireworksLow => "DeepSeek R1 Low Mode",
            LaneId::Fireworks => "DeepSeek R1",
            LaneId::Together => "DeepSeek R1 on Together AI",
            LaneId::OpenAi => "o3-mini on OpenAI",
        }
    }

    pub fn provider(self) -> ProviderKind {
        match self {
            LaneId::FireworksLow | LaneId::Fireworks => ProviderKind::Fireworks,
            LaneId::Together => ProviderKind::Together,
            LaneId::OpenAi => ProviderKind::OpenAi,
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            LaneId::FireworksLow | LaneId::Fireworks => "accounts/fireworks/models/deepseek-r1",
            LaneId::Together => "deepseek-ai/DeepSeek-R1",
            LaneId::OpenAi => "o3-mini",
        }
    }

    pub fn default_reasoning_effort(self) -> Option<&'static str> {
        match self {
            LaneId::FireworksLow => Some("low"),
            _ => None,
        }
    }
}

impl std::fmt::Display for LaneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured lane, ready to dispatch to.
#[derive(Clone)]
pub struct Lane {
    pub id: LaneId,
    pub model: String,
    pub reasoning_effort: Option<String>,
    pub provider: Arc<dyn Provider + Send + Sync>,
}

impl Lane {
    /// Lane with the built-in model and reasoning effort for `id`.
    pub fn new(id: LaneId, provider: Arc<dyn Provider + Send + Sync>) -> Self {
        Self {
            id,
            model: id.default_model().to_string(),
            reasoning_effort: id.default_reasoning_effort().map(str::to_string),
            provider,
        }
    }

    pub fn label(&self) -> &'static str {
        self.id.label()
    }
}

impl std::fmt::Debug for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lane")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("reasoning_effort", &self.reasoning_effort)
            .field("provider", &self.provider.name())
            .finish()
    }
}
