//! Checks API keys by listing models before they are saved.

use crate::credentials::{CredentialError, CredentialSet};
use crate::provider::{Provider, ProviderKind};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Models visible per probed key.
    pub models: Vec<(ProviderKind, usize)>,
    /// Nothing was probed because the candidate equals the saved set.
    pub unchanged: bool,
}

/// Validate `candidate` against the providers.
///
/// - A blank required key fails before any request is made.
/// - A candidate identical to `saved` is accepted without probing.
/// - Every present key is probed; all rejections are reported together.
/// - An empty model list rejects a key, except a required key that was already
///   saved, which stays trusted.
pub async fn validate<F>(
    candidate: &CredentialSet,
    saved: Option<&CredentialSet>,
    connect: F,
) -> Result<ProbeReport, CredentialError>
where
    F: Fn(ProviderKind, &str) -> anyhow::Result<Box<dyn Provider + Send + Sync>>,
{
    candidate.require()?;

    if saved == Some(candidate) {
        tracing::debug!("credentials unchanged; skipping probe");
        return Ok(ProbeReport {
            models: Vec::new(),
            unchanged: true,
        });
    }

    check(candidate, saved, connect).await
}

/// List models for every key in `candidate`, even when it matches `saved`.
///
/// `saved` only matters for the empty-list rule: a required key equal to the saved one stays trusted.
pub async fn check<F>(
    candidate: &CredentialSet,
    saved: Option<&CredentialSet>,
    connect: F,
) -> Result<ProbeReport, CredentialError>
where
    F: Fn(ProviderKind, &str) -> anyhow::Result<Box<dyn Provider + Send + Sync>>,
{
    candidate.require()?;

    let mut report = ProbeReport::default();
    let mut errors = Vec::new();

    for (kind, key) in candidate.keys() {
        let listed = match connect(kind, key) {
            Ok(provider) => provider.list_models().await,
            Err(e) => Err(e),
        };

        match listed {
            Ok(models) if !models.is_empty() => {
                tracing::debug!(provider = %kind, models = models.len(), "key accepted");
                report.models.push((kind, models.len()));
            }
            Ok(_) => {
                let previously_saved = saved.and_then(|s| s.key_for(kind)) == Some(key);
                if kind.is_required() && previously_saved {
                    tracing::info!(provider = %kind, "empty model list for saved key; keeping it");
                    report.models.push((kind, 0));
                } else {
                    errors.push(CredentialError::Rejected {
                        provider: kind,
                        reason: "no models are available for this key".to_string(),
                    });
                }
            }
            Err(e) => {
                tracing::warn!(provider = %kind, error = %format!("{e:#}"), "key rejected");
                errors.push(CredentialError::Rejected {
                    provider: kind,
                    reason: format!("{e:#}"),
                });
            }
        }
    }

    match errors.len() {
        0 => Ok(report),
        1 => Err(errors.remove(0)),
        _ => Err(CredentialError::Multiple(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::stub::StubProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Connector where each provider's behaviour is picked by the key text.
    fn connector(calls: &AtomicUsize) -> impl Fn(ProviderKind, &str) -> anyhow::Result<Box<dyn Provider + Send + Sync>> + '_ {
        move |_kind: ProviderKind, key: &str| {
            calls.fetch_add(1, Ordering::SeqCst);
            let p = match key {
                k if k.starts_with("bad") => StubProvider::refusing("API error: HTTP 401 Unauthorized"),
                k if k.starts_with("empty") => StubProvider::new().with_models(Vec::<String>::new()),
                _ => StubProvider::new(),
            };
            let p: Box<dyn Provider + Send + Sync> = Box::new(p);
            Ok(p)
        }
    }

    #[tokio::test]
    async fn blank_required_key_fails_without_network() {
        let calls = AtomicUsize::new(0);
        let candidate = CredentialSet::new("   ", Some("sk".into()), None);
        let err = validate(&candidate, None, connector(&calls)).await.unwrap_err();
        assert_eq!(err, CredentialError::MissingRequired);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unchanged_credentials_skip_probe() {
        let calls = AtomicUsize::new(0);
        let saved = CredentialSet::new("bad-but-saved", None, None);
        let report = validate(&saved.clone(), Some(&saved), connector(&calls)).await.unwrap();
        assert!(report.unchanged);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn accepted_keys_report_model_counts() {
        let calls = AtomicUsize::new(0);
        let candidate = CredentialSet::new("fw", Some("sk".into()), Some("tg".into()));
        let report = validate(&candidate, None, connector(&calls)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            report.models,
            vec![
                (ProviderKind::Fireworks, 1),
                (ProviderKind::OpenAi, 1),
                (ProviderKind::Together, 1)
            ]
        );
    }

    #[tokio::test]
    async fn http_failure_is_scoped_to_provider() {
        let calls = AtomicUsize::new(0);
        let candidate = CredentialSet::new("fw", Some("bad-sk".into()), None);
        let err = validate(&candidate, None, connector(&calls)).await.unwrap_err();
        assert_eq!(err.provider(), Some(ProviderKind::OpenAi));
        assert!(err.to_string().starts_with("Invalid OpenAI API key"));
    }

    #[tokio::test]
    async fn all_failures_are_collected() {
        let calls = AtomicUsize::new(0);
        let candidate = CredentialSet::new("bad-fw", None, Some("bad-tg".into()));
        let err = validate(&candidate, None, connector(&calls)).await.unwrap_err();
        let providers: Vec<_> = err.into_list().iter().filter_map(|e| e.provider()).collect();
        assert_eq!(providers, vec![ProviderKind::Fireworks, ProviderKind::Together]);
    }

    #[tokio::test]
    async fn empty_list_rejects_new_required_key() {
        let calls = AtomicUsize::new(0);
        let candidate = CredentialSet::new("empty-fw", None, None);
        let err = validate(&candidate, None, connector(&calls)).await.unwrap_err();
        assert_eq!(err.provider(), Some(ProviderKind::Fireworks));
    }

    #[tokio::test]
    async fn empty_list_trusted_for_saved_required_key() {
        let calls = AtomicUsize::new(0);
        let saved = CredentialSet::new("empty-fw", None, None);
        let candidate = CredentialSet::new("empty-fw", Some("sk".into()), None);
        let report = validate(&candidate, Some(&saved), connector(&calls)).await.unwrap();
        assert_eq!(report.models, vec![(ProviderKind::Fireworks, 0), (ProviderKind::OpenAi, 1)]);
    }

    #[tokio::test]
    async fn check_lists_models_even_when_unchanged() {
        let calls = AtomicUsize::new(0);
        let saved = CredentialSet::new("empty-fw", None, None);
        let report = check(&saved.clone(), Some(&saved), connector(&calls)).await.unwrap();
        assert!(!report.unchanged);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.models, vec![(ProviderKind::Fireworks, 0)]);

        let err = check(&saved, None, connector(&calls)).await.unwrap_err();
        assert_eq!(err.provider(), Some(ProviderKind::Fireworks));
    }

    #[tokio::test]
    async fn check_still_rejects_blank_required_key() {
        let calls = AtomicUsize::new(0);
        let candidate = CredentialSet::new("", None, None);
        assert_eq!(
            check(&candidate, None, connector(&calls)).await.unwrap_err(),
            CredentialError::MissingRequired
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_list_rejects_optional_key_even_if_saved() {
        let calls = AtomicUsize::new(0);
        let saved = CredentialSet::new("fw", Some("empty-sk".into()), None);
        let candidate = CredentialSet::new("fw2", Some("empty-sk".into()), None);
        let err = validate(&candidate, Some(&saved), connector(&calls)).await.unwrap_err();
        assert_eq!(err.provider(), Some(ProviderKind::OpenAi));
    }
}
