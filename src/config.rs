use crate::dispatch::{DispatchOptions, DEFAULT_LANE_TIMEOUT};
use crate::lane::LaneId;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Backend for every lane: "openai-compat" (default) or "stub" for offline runs.
    pub provider: Option<String>,

    /// Per-lane generation timeout in seconds.
    pub lane_timeout_secs: Option<u64>,

    /// Per-lane overrides, keyed by lane id (e.g. `[lanes.together]`).
    #[serde(default)]
    pub lanes: BTreeMap<String, LaneConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LaneConfig {
    pub enabled: Option<bool>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub reasoning_effort: Option<String>,
}

impl Config {
    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg = Self::parse(&s).with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let cfg: Config = toml::from_str(s)?;
        for key in cfg.lanes.keys() {
            if !LaneId::ALL.iter().any(|id| id.as_str() == key) {
                tracing::warn!(lane = %key, "ignoring config for unknown lane");
            }
        }
        Ok(cfg)
    }

    pub fn lane(&self, id: LaneId) -> Option<&LaneConfig> {
        self.lanes.get(id.as_str())
    }

    pub fn lane_enabled(&self, id: LaneId) -> bool {
        self.lane(id).and_then(|l| l.enabled).unwrap_or(true)
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            lane_timeout: self
                .lane_timeout_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_LANE_TIMEOUT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lane_overrides() {
        let cfg = Config::parse(
            r#"
            lane_timeout_secs = 90

            [lanes.openai]
            enabled = false

            [lanes.together]
            model = "deepseek-ai/DeepSeek-R1-Distill-Llama-70B"
            base_url = "http://localhost:8080/v1"
            "#,
        )
        .unwrap();

        assert!(!cfg.lane_enabled(LaneId::OpenAi));
        assert!(cfg.lane_enabled(LaneId::Fireworks));
        assert_eq!(
            cfg.lane(LaneId::Together).and_then(|l| l.model.as_deref()),
            Some("deepseek-ai/DeepSeek-R1-Distill-Llama-70B")
        );
        assert_eq!(cfg.dispatch_options().lane_timeout, Duration::from_secs(90));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = Config::parse("").unwrap();
        assert!(cfg.provider.is_none());
        assert_eq!(cfg.dispatch_options().lane_timeout, DEFAULT_LANE_TIMEOUT);
        assert!(LaneId::ALL.iter().all(|id| cfg.lane_enabled(*id)));
    }

    #[test]
    fn zero_timeout_falls_back_to_default() {
        let cfg = Config::parse("lane_timeout_secs = 0").unwrap();
        assert_eq!(cfg.dispatch_options().lane_timeout, DEFAULT_LANE_TIMEOUT);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_optional(dir.path().join("config.toml")).unwrap().is_none());
    }

    #[test]
    fn invalid_toml_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "lanes = 3").unwrap();
        let err = Config::load_optional(&path).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }
}
