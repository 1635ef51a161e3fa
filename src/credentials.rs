use crate::provider::ProviderKind;
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// API keys held by the user. Fireworks is required; the others enable extra lanes.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    #[serde(default)]
    pub fireworks: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub together: Option<String>,
}

// Keys must never end up in logs.
impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSet")
            .field("fireworks", &mask(&self.fireworks))
            .field("openai", &self.openai.as_deref().map(mask))
            .field("together", &self.together.as_deref().map(mask))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("Fireworks API key is required")]
    MissingRequired,

    #[error("Invalid {} API key: {reason}", .provider.display_name())]
    Rejected { provider: ProviderKind, reason: String },

    #[error("{}", join_errors(.0))]
    Multiple(Vec<CredentialError>),
}

impl CredentialError {
    /// Flatten into per-provider errors, e.g. to show each next to its own key.
    pub fn into_list(self) -> Vec<CredentialError> {
        match self {
            CredentialError::Multiple(errs) => errs.into_iter().flat_map(CredentialError::into_list).collect(),
            other => vec![other],
        }
    }

    pub fn provider(&self) -> Option<ProviderKind> {
        match self {
            CredentialError::MissingRequired => Some(ProviderKind::Fireworks),
            CredentialError::Rejected { provider, .. } => Some(*provider),
            CredentialError::Multiple(_) => None,
        }
    }
}

fn join_errors(errs: &[CredentialError]) -> String {
    errs.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl CredentialSet {
    /// Build from user input. Keys are trimmed; blank optional keys count as absent.
    pub fn new(fireworks: impl Into<String>, openai: Option<String>, together: Option<String>) -> Self {
        Self {
            fireworks: fireworks.into().trim().to_string(),
            openai: non_blank(openai),
            together: non_blank(together),
        }
    }

    /// Fail unless the required key is present.
    pub fn require(&self) -> Result<(), CredentialError> {
        if self.fireworks.trim().is_empty() {
            return Err(CredentialError::MissingRequired);
        }
        Ok(())
    }

    pub fn key_for(&self, kind: ProviderKind) -> Option<&str> {
        let key = match kind {
            ProviderKind::Fireworks => Some(self.fireworks.as_str()),
            ProviderKind::OpenAi => self.openai.as_deref(),
            ProviderKind::Together => self.together.as_deref(),
        };
        key.map(str::trim).filter(|k| !k.is_empty())
    }

    /// Present keys in provider order.
    pub fn keys(&self) -> impl Iterator<Item = (ProviderKind, &str)> + '_ {
        ProviderKind::ALL
            .into_iter()
            .filter_map(|kind| self.key_for(kind).map(|k| (kind, k)))
    }

    /// Apply `FIREWORKS_API_KEY`, `OPENAI_API_KEY` and `TOGETHER_API_KEY` on top of stored keys.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|kind| std::env::var(kind.api_key_env()).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(ProviderKind) -> Option<String>) -> Self {
        for kind in ProviderKind::ALL {
            let Some(v) = non_blank(lookup(kind)) else {
                continue;
            };
            match kind {
                ProviderKind::Fireworks => self.fireworks = v,
                ProviderKind::OpenAi => self.openai = Some(v),
                ProviderKind::Together => self.together = Some(v),
            }
        }
        self
    }
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// `fw-abc...wxyz` style preview of a key.
pub fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<CredentialSet>> {
    let path = path.as_ref();
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(anyhow!(e)).with_context(|| format!("failed to read credentials: {}", path.display())),
    };
    let creds: CredentialSet = serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse credentials JSON: {}", path.display()))?;
    Ok(Some(creds))
}

pub fn save_atomic(path: impl AsRef<Path>, creds: &CredentialSet) -> anyhow::Result<()> {
    let path = path.as_ref();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create credentials directory: {}", dir.display()))?;

    let tmp = tmp_path(path);
    let bytes = serde_json::to_vec_pretty(creds).context("failed to serialize credentials")?;
    std::fs::write(&tmp, bytes).with_context(|| format!("failed to write temp credentials: {}", tmp.display()))?;
    restrict_permissions(&tmp)?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move credentials into place: {}", path.display()))?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("failed to restrict permissions: {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut p = path.to_path_buf();
    let file = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "credentials.json".to_string());
    p.set_file_name(format!("{file}.tmp"));
    p
}
