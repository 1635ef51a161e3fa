use crate::lane::LaneId;
use clap::{Parser, Subcommand};

/// Ask DeepSeek R1 on several providers at once and compare the answers.
#[derive(Debug, Parser)]
#[command(name = "r1-arena")]
#[command(version)]
#[command(about = "Side-by-side chat with several hosted LLM providers", long_about = None)]
pub struct Args {
    /// Backend for every lane (default: config/provider or "openai-compat"; "stub" works offline)
    #[arg(long = "provider")]
    pub provider: Option<String>,

    /// Only use these lanes (repeatable; default: every lane with a key)
    #[arg(short = 'l', long = "lane", value_name = "LANE")]
    pub lanes: Vec<LaneId>,

    /// Per-lane timeout in seconds (default: config/lane_timeout_secs or 300)
    #[arg(long = "timeout", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Print the reasoning block of each answer, not just the answer
    #[arg(long = "show-thinking")]
    pub show_thinking: bool,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (positional). Without a prompt or subcommand, starts a line-mode chat.
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage stored API keys
    Keys {
        #[command(subcommand)]
        cmd: KeysCommand,
    },

    /// Check the stored keys against each provider's model list
    Probe,

    /// Run the side-by-side terminal chat UI
    #[cfg(feature = "tui")]
    Tui,
}

#[derive(Debug, Subcommand)]
pub enum KeysCommand {
    /// Validate and save keys (Fireworks is required)
    Set {
        /// Fireworks API key
        #[arg(long = "fireworks", value_name = "KEY")]
        fireworks: String,
        /// OpenAI API key (optional)
        #[arg(long = "openai", value_name = "KEY")]
        openai: Option<String>,
        /// Together AI API key (optional)
        #[arg(long = "together", value_name = "KEY")]
        together: Option<String>,
    },
    /// Show stored keys, masked
    Show,
}
