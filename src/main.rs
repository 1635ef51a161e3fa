mod app;
mod cli;
mod config;
mod conversation;
mod credentials;
mod dispatch;
mod lane;
mod paths;
mod probe;
mod provider;
mod think;

#[cfg(feature = "tui")]
mod tui;

use anyhow::Context;
use clap::Parser;
use credentials::CredentialSet;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Lane output goes to stdout; keep log lines out of it unless asked for.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = cli::Args::parse();

    // Resolve and create dirs early.
    let config_dir = paths::config_dir()?;
    let _state_dir = paths::state_dir()?;

    let cfg = config::Config::load_optional(config_dir.join("config.toml"))?.unwrap_or_default();
    tracing::debug!(?config_dir, ?cfg, "resolved config");

    let provider_name = app::provider_name(args.provider.as_deref(), &cfg).to_string();

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    match args.cmd {
        Some(cli::Command::Keys { cmd }) => {
            return match cmd {
                cli::KeysCommand::Set {
                    fireworks,
                    openai,
                    together,
                } => {
                    let candidate = CredentialSet::new(fireworks, openai, together);
                    app::cmd_keys_set(&http, &cfg, &provider_name, candidate).await
                }
                cli::KeysCommand::Show => app::cmd_keys_show(),
            };
        }
        Some(cli::Command::Probe) => {
            return app::cmd_probe(&http, &cfg, &provider_name).await;
        }
        #[cfg(feature = "tui")]
        Some(cli::Command::Tui) => {
            let session = start_session(&http, &cfg, &provider_name, &args.lanes, args.timeout)?;
            return tui::run_tui(session).await;
        }
        None => {}
    }

    let mut session = start_session(&http, &cfg, &provider_name, &args.lanes, args.timeout)?;

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        return app::run_repl(&mut session, args.show_thinking).await;
    }

    app::run_prompt(&mut session, &prompt, args.show_thinking).await
}

fn start_session(
    http: &reqwest::Client,
    cfg: &config::Config,
    provider_name: &str,
    only: &[lane::LaneId],
    timeout_secs: Option<u64>,
) -> anyhow::Result<dispatch::Session> {
    let creds = app::load_credentials()?;
    let lanes = app::build_lanes(http, cfg, &creds, provider_name, only)?;

    let mut options = cfg.dispatch_options();
    if let Some(secs) = timeout_secs.filter(|s| *s > 0) {
        options.lane_timeout = Duration::from_secs(secs);
    }
    Ok(dispatch::Session::new(lanes, options))
}
