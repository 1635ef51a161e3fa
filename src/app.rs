use crate::config::Config;
use crate::credentials::{self, CredentialSet};
use crate::dispatch::{LaneOutcome, LaneResult, LaneUpdate, Session};
use crate::lane::{Lane, LaneId};
use crate::provider::openai_compat::OpenAiCompatProvider;
use crate::provider::stub::StubProvider;
use crate::provider::{Provider, ProviderKind};
use crate::{paths, probe};
use anyhow::Context;
use std::io::Write;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

pub const DEFAULT_PROVIDER: &str = "openai-compat";

/// Backend name from the command line, then config, then the default.
pub fn provider_name<'a>(cli: Option<&'a str>, cfg: &'a Config) -> &'a str {
    cli.or(cfg.provider.as_deref()).unwrap_or(DEFAULT_PROVIDER)
}

/// Client for `kind`, honouring a `base_url` override from any lane that uses it.
pub fn connect(
    http: &reqwest::Client,
    cfg: &Config,
    provider_name: &str,
    kind: ProviderKind,
    key: &str,
) -> anyhow::Result<Box<dyn Provider + Send + Sync>> {
    let base_url = LaneId::ALL
        .into_iter()
        .filter(|id| id.provider() == kind)
        .find_map(|id| cfg.lane(id).and_then(|l| l.base_url.as_deref()));
    connect_with_base(http, provider_name, kind, key, base_url)
}

fn connect_with_base(
    http: &reqwest::Client,
    provider_name: &str,
    kind: ProviderKind,
    key: &str,
    base_url: Option<&str>,
) -> anyhow::Result<Box<dyn Provider + Send + Sync>> {
    match provider_name {
        DEFAULT_PROVIDER => {
            let p = match base_url {
                Some(base) => OpenAiCompatProvider::with_base_url(http.clone(), kind, key, base)?,
                None => OpenAiCompatProvider::new(http.clone(), kind, key)?,
            };
            Ok(Box::new(p))
        }
        "stub" => Ok(Box::new(StubProvider::new())),
        other => anyhow::bail!("unknown provider: {other}"),
    }
}

/// Every lane that is enabled, selected (when `only` is non-empty) and has a key.
pub fn build_lanes(
    http: &reqwest::Client,
    cfg: &Config,
    creds: &CredentialSet,
    provider_name: &str,
    only: &[LaneId],
) -> anyhow::Result<Vec<Lane>> {
    creds
        .require()
        .context("set a key with `r1-arena keys set --fireworks <KEY>` or FIREWORKS_API_KEY")?;

    let mut lanes = Vec::new();
    for id in LaneId::ALL {
        if !only.is_empty() && !only.contains(&id) {
            continue;
        }
        if !cfg.lane_enabled(id) {
            tracing::debug!(lane = %id, "lane disabled in config");
            continue;
        }
        let Some(key) = creds.key_for(id.provider()) else {
            tracing::debug!(lane = %id, "no {} key; skipping lane", id.provider().display_name());
            continue;
        };

        let lane_cfg = cfg.lane(id);
        let base_url = lane_cfg.and_then(|l| l.base_url.as_deref());
        let provider = connect_with_base(http, provider_name, id.provider(), key, base_url)
            .with_context(|| format!("failed to set up lane {id}"))?;

        let mut lane = Lane::new(id, Arc::from(provider));
        if let Some(model) = lane_cfg.and_then(|l| l.model.clone()) {
            lane.model = model;
        }
        if let Some(effort) = lane_cfg.and_then(|l| l.reasoning_effort.clone()) {
            lane.reasoning_effort = Some(effort);
        }
        lanes.push(lane);
    }

    if lanes.is_empty() {
        anyhow::bail!("no lanes available: every selected lane is disabled or has no API key");
    }
    tracing::debug!(?lanes, "configured lanes");
    Ok(lanes)
}

/// Stored keys with environment overrides applied.
pub fn load_credentials() -> anyhow::Result<CredentialSet> {
    let path = paths::credentials_path()?;
    let stored = credentials::load_optional(&path)?.unwrap_or_default();
    Ok(stored.with_env_overrides())
}

pub async fn cmd_keys_set(
    http: &reqwest::Client,
    cfg: &Config,
    provider_name: &str,
    candidate: CredentialSet,
) -> anyhow::Result<()> {
    let path = paths::credentials_path()?;
    let saved = credentials::load_optional(&path)?;

    let res = probe::validate(&candidate, saved.as_ref(), |kind: ProviderKind, key: &str| {
        connect(http, cfg, provider_name, kind, key)
    })
    .await;

    let report = match res {
        Ok(report) => report,
        Err(e) => {
            for err in e.into_list() {
                eprintln!("{err}");
            }
            anyhow::bail!("API keys were not saved");
        }
    };

    let mut out = std::io::stdout();
    if report.unchanged {
        writeln!(out, "Keys unchanged.")?;
        return Ok(());
    }

    credentials::save_atomic(&path, &candidate)?;
    for (kind, count) in &report.models {
        writeln!(out, "{}: ok ({count} models)", kind.display_name())?;
    }
    writeln!(out, "Saved keys to: {}", path.display())?;
    Ok(())
}

pub fn cmd_keys_show() -> anyhow::Result<()> {
    let path = paths::credentials_path()?;
    let stored = credentials::load_optional(&path)?;
    let mut out = std::io::stdout();

    writeln!(out, "Credentials file: {}", path.display())?;
    let Some(stored) = stored else {
        writeln!(out, "(no keys saved)")?;
        return Ok(());
    };

    for kind in ProviderKind::ALL {
        let shown = stored.key_for(kind).map(credentials::mask);
        let env = std::env::var(kind.api_key_env()).is_ok_and(|v| !v.trim().is_empty());
        let note = if env {
            format!(" (overridden by {})", kind.api_key_env())
        } else {
            String::new()
        };
        writeln!(
            out,
            "{:<12} {}{note}",
            kind.display_name(),
            shown.as_deref().unwrap_or("-")
        )?;
    }
    Ok(())
}

pub async fn cmd_probe(http: &reqwest::Client, cfg: &Config, provider_name: &str) -> anyhow::Result<()> {
    let stored = credentials::load_optional(paths::credentials_path()?)?;
    let creds = stored.clone().unwrap_or_default().with_env_overrides();
    let report = check_keys_in_effect(&creds, stored.as_ref(), |kind: ProviderKind, key: &str| {
        connect(http, cfg, provider_name, kind, key)
    })
    .await;

    let mut out = std::io::stdout();
    match report {
        Ok(report) => {
            for (kind, count) in report.models {
                writeln!(out, "{}: ok ({count} models)", kind.display_name())?;
            }
            Ok(())
        }
        Err(e) => {
            for err in e.into_list() {
                writeln!(out, "{err}")?;
            }
            anyhow::bail!("one or more keys were rejected")
        }
    }
}

/// Check the keys in effect. Keys that match the stored file count as previously saved.
async fn check_keys_in_effect<F>(
    creds: &CredentialSet,
    stored: Option<&CredentialSet>,
    connect: F,
) -> Result<probe::ProbeReport, credentials::CredentialError>
where
    F: Fn(ProviderKind, &str) -> anyhow::Result<Box<dyn Provider + Send + Sync>>,
{
    probe::check(creds, stored, connect).await
}

/// One turn, results printed when every lane has settled.
pub async fn run_prompt(session: &mut Session, prompt: &str, show_thinking: bool) -> anyhow::Result<()> {
    let results = submit_with_progress(session, prompt).await?;
    let mut out = std::io::stdout();
    print_results(&mut out, &results, show_thinking)?;
    Ok(())
}

/// Line-mode chat. Each line is one turn; `/quit`, `/clear` and `/lanes` are commands.
pub async fn run_repl(session: &mut Session, show_thinking: bool) -> anyhow::Result<()> {
    let mut out = std::io::stdout();
    writeln!(
        out,
        "Lanes: {}. Type a message and press Enter. Commands: /quit, /clear, /lanes",
        lane_names(session.lanes())
    )?;

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        write!(out, "> ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
            break;
        };
        let msg = line.trim();
        match msg {
            "" => continue,
            "/quit" => break,
            "/clear" => {
                session.clear()?;
                writeln!(out, "(history cleared)")?;
                continue;
            }
            "/lanes" => {
                for lane in session.lanes() {
                    writeln!(out, "{:<14} {} ({})", lane.id, lane.label(), lane.model)?;
                }
                continue;
            }
            _ => {}
        }

        match submit_with_progress(session, msg).await {
            Ok(results) => print_results(&mut out, &results, show_thinking)?,
            Err(e) => writeln!(out, "error: {e:#}")?,
        }
    }

    Ok(())
}

fn lane_names(lanes: &[Lane]) -> String {
    lanes.iter().map(|l| l.id.as_str()).collect::<Vec<_>>().join(", ")
}

/// Submit a turn, reporting each lane on stderr as it settles.
async fn submit_with_progress(session: &mut Session, input: &str) -> anyhow::Result<Vec<LaneResult>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<LaneUpdate>();
    let progress = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            match update {
                LaneUpdate::Delta { .. } => {}
                LaneUpdate::Finished { lane, elapsed } => {
                    eprintln!("  {lane}: done in {} ms", elapsed.as_millis());
                }
                LaneUpdate::Failed { lane, .. } => {
                    eprintln!("  {lane}: failed");
                }
            }
        }
    });

    let results = session.submit(input, Some(tx)).await;
    // The sender was moved into the turn and is gone now, so the progress task drains and exits.
    let _ = progress.await;
    results
}

pub fn print_results(out: &mut dyn Write, results: &[LaneResult], show_thinking: bool) -> std::io::Result<()> {
    for r in results {
        writeln!(
            out,
            "== {} [{}] · {} ms",
            r.lane.label(),
            r.lane,
            r.outcome.elapsed().as_millis()
        )?;

        match &r.outcome {
            LaneOutcome::Failed { error, .. } => {
                writeln!(out, "error: {error}")?;
            }
            LaneOutcome::Completed { .. } => {
                let Some(split) = r.outcome.display() else {
                    continue;
                };
                if !split.has_answer() {
                    // No usable marker: show the reply as it came.
                    writeln!(out, "{}", split.reasoning.trim())?;
                } else {
                    if show_thinking {
                        for line in split.reasoning_body().lines() {
                            writeln!(out, "  | {line}")?;
                        }
                        writeln!(out)?;
                    }
                    writeln!(out, "{}", split.answer.trim())?;
                }
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LaneConfig;
    use std::time::Duration;

    fn render(results: &[LaneResult], show_thinking: bool) -> String {
        let mut buf = Vec::new();
        print_results(&mut buf, results, show_thinking).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn completed(lane: LaneId, content: &str) -> LaneResult {
        LaneResult {
            lane,
            outcome: LaneOutcome::Completed {
                content: content.to_string(),
                elapsed: Duration::from_millis(1200),
            },
        }
    }

    #[test]
    fn prints_answer_and_optional_reasoning() {
        let results = vec![completed(LaneId::Fireworks, "<think>\nhmm\n</think>\n\n42")];

        let plain = render(&results, false);
        assert!(plain.contains("== DeepSeek R1 [fireworks] · 1200 ms"));
        assert!(plain.contains("42"));
        assert!(!plain.contains("hmm"));

        let verbose = render(&results, true);
        assert!(verbose.contains("  | hmm"));
    }

    #[test]
    fn prints_whole_reply_without_marker() {
        let out = render(&[completed(LaneId::OpenAi, "plain answer")], false);
        assert!(out.contains("plain answer"));
    }

    #[test]
    fn prints_lane_errors() {
        let results = vec![LaneResult {
            lane: LaneId::Together,
            outcome: LaneOutcome::Failed {
                error: "Together AI API error: HTTP 401".into(),
                elapsed: Duration::ZERO,
            },
        }];
        assert!(render(&results, false).contains("error: Together AI API error: HTTP 401"));
    }

    #[test]
    fn lanes_follow_available_keys() {
        let http = reqwest::Client::new();
        let cfg = Config::default();

        let creds = CredentialSet::new("fw", None, None);
        let lanes = build_lanes(&http, &cfg, &creds, "stub", &[]).unwrap();
        let ids: Vec<_> = lanes.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![LaneId::FireworksLow, LaneId::Fireworks]);

        let creds = CredentialSet::new("fw", Some("sk".into()), Some("tg".into()));
        let lanes = build_lanes(&http, &cfg, &creds, "stub", &[]).unwrap();
        assert_eq!(lanes.len(), 4);
    }

    #[test]
    fn lanes_require_fireworks_key() {
        let http = reqwest::Client::new();
        let creds = CredentialSet::new("", Some("sk".into()), None);
        assert!(build_lanes(&http, &Config::default(), &creds, "stub", &[]).is_err());
    }

    #[test]
    fn lane_selection_and_config_overrides() {
        let http = reqwest::Client::new();
        let mut cfg = Config::default();
        cfg.lanes.insert(
            "fireworks".into(),
            LaneConfig {
                model: Some("accounts/fireworks/models/deepseek-v3".into()),
                ..LaneConfig::default()
            },
        );
        cfg.lanes.insert(
            "fireworks-low".into(),
            LaneConfig {
                enabled: Some(false),
                ..LaneConfig::default()
            },
        );

        let creds = CredentialSet::new("fw", None, None);
        let lanes = build_lanes(&http, &cfg, &creds, DEFAULT_PROVIDER, &[]).unwrap();
        assert_eq!(lanes.len(), 1);
        assert_eq!(lanes[0].model, "accounts/fireworks/models/deepseek-v3");
        assert_eq!(lanes[0].provider.name(), "fireworks");

        let only = build_lanes(&http, &Config::default(), &creds, "stub", &[LaneId::FireworksLow]).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].id, LaneId::FireworksLow);

        assert!(build_lanes(&http, &Config::default(), &creds, "stub", &[LaneId::OpenAi]).is_err());
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let http = reqwest::Client::new();
        let creds = CredentialSet::new("fw", None, None);
        assert!(build_lanes(&http, &Config::default(), &creds, "carrier-pigeon", &[]).is_err());
    }

    #[test]
    fn base_url_override_is_optional() {
        let http = reqwest::Client::new();
        let p = connect_with_base(&http, DEFAULT_PROVIDER, ProviderKind::Together, "k", None).unwrap();
        assert_eq!(p.name(), ProviderKind::Together.name());

        assert!(connect_with_base(&http, DEFAULT_PROVIDER, ProviderKind::Together, "k", Some("http://127.0.0.1:9/v1")).is_ok());
        assert!(connect_with_base(&http, DEFAULT_PROVIDER, ProviderKind::Together, "k", Some("not a url")).is_err());
    }

    #[test]
    fn provider_name_precedence() {
        let cfg = Config {
            provider: Some("stub".into()),
            ..Config::default()
        };
        assert_eq!(provider_name(Some("openai-compat"), &cfg), "openai-compat");
        assert_eq!(provider_name(None, &cfg), "stub");
        assert_eq!(provider_name(None, &Config::default()), DEFAULT_PROVIDER);
    }

    fn empty_catalog(kind: ProviderKind, _key: &str) -> anyhow::Result<Box<dyn Provider + Send + Sync>> {
        let models: Vec<String> = match kind {
            ProviderKind::Fireworks => Vec::new(),
            _ => vec!["m".to_string()],
        };
        Ok(Box::new(StubProvider::new().with_models(models)))
    }

    #[tokio::test]
    async fn stored_required_key_stays_trusted_with_empty_list() {
        let stored = CredentialSet::new("fw-saved", None, None);
        let report = check_keys_in_effect(&stored.clone(), Some(&stored), empty_catalog).await.unwrap();
        assert_eq!(report.models, vec![(ProviderKind::Fireworks, 0)]);
        assert!(!report.unchanged);
    }

    #[tokio::test]
    async fn env_key_differing_from_stored_is_treated_as_new() {
        let stored = CredentialSet::new("fw-saved", None, None);
        let in_effect = CredentialSet::new("fw-from-env", None, None);
        let err = check_keys_in_effect(&in_effect, Some(&stored), empty_catalog).await.unwrap_err();
        assert_eq!(err.provider(), Some(ProviderKind::Fireworks));

        let err = check_keys_in_effect(&stored, None, empty_catalog).await.unwrap_err();
        assert!(err.to_string().starts_with("Invalid Fireworks API key"));
    }

    #[tokio::test]
    async fn stub_session_round_trip() {
        let http = reqwest::Client::new();
        let creds = CredentialSet::new("fw", None, None);
        let lanes = build_lanes(&http, &Config::default(), &creds, "stub", &[]).unwrap();
        let mut session = Session::new(lanes, Config::default().dispatch_options());

        let results = session.submit("ping", None).await.unwrap();
        assert!(results.iter().all(|r| r.outcome.is_completed()));
        let out = render(&results, false);
        assert!(out.contains("You said: ping"));
    }
}
