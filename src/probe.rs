//! Bounded-time reachability checks for local backends.
//!
//! Probing is advisory: it never errors and never touches shared state.

use crate::provider::foundry::DEFAULT_API_KEY;
use crate::provider::trim_base;
use crate::types::ProviderKind;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use std::time::Duration;

/// Budget for an explicit connection check.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Budget for opportunistic checks (startup, status display).
pub const QUICK_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    /// Health endpoint answered 200.
    Ready,
    /// Health endpoint answered 401: a server is there but wants other credentials.
    Unauthorized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Normalized base URL to hand to the adapter.
    pub url: String,
    pub reachability: Reachability,
}

/// Health-check `url` for `provider` within `timeout`.
///
/// The cloud provider has no health contract; its URL is returned unchecked.
pub async fn probe(
    http: &reqwest::Client,
    provider: ProviderKind,
    url: &str,
    timeout: Duration,
) -> Option<Endpoint> {
    match provider {
        ProviderKind::Foundry => probe_openai_compatible(http, url, timeout).await,
        ProviderKind::Ollama => probe_ollama(http, url, timeout).await,
        ProviderKind::Gemini => Some(Endpoint {
            url: trim_base(url),
            reachability: Reachability::Ready,
        }),
    }
}

/// Try `{base}/models` then `{base}/v1/models`; servers differ in mount point.
///
/// On success the endpoint is the base with exactly one trailing `/v1`.
pub async fn probe_openai_compatible(
    http: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Option<Endpoint> {
    let clean = trim_base(url);
    let candidates = [format!("{clean}/models"), format!("{clean}/v1/models")];

    let attempt = async {
        for candidate in &candidates {
            let res = http
                .get(candidate)
                .header(AUTHORIZATION, format!("Bearer {DEFAULT_API_KEY}"))
                .send()
                .await;
            match res {
                Ok(resp) if resp.status().is_success() => return Some(Reachability::Ready),
                Ok(resp) if resp.status() == StatusCode::UNAUTHORIZED => {
                    return Some(Reachability::Unauthorized)
                }
                Ok(resp) => {
                    tracing::debug!(%candidate, status = %resp.status(), "health check rejected");
                }
                Err(e) => {
                    tracing::debug!(%candidate, error = %e, "health check failed");
                }
            }
        }
        None
    };

    let reachability = run_bounded(url, timeout, attempt).await?;
    let endpoint = if clean.ends_with("/v1") {
        clean
    } else {
        format!("{clean}/v1")
    };
    tracing::debug!(%endpoint, ?reachability, "openai-compatible server found");
    Some(Endpoint {
        url: endpoint,
        reachability,
    })
}

/// `GET {base}/api/tags` must answer 200.
pub async fn probe_ollama(
    http: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Option<Endpoint> {
    let clean = trim_base(url);
    let tags = format!("{clean}/api/tags");
    let attempt = async {
        match http.get(&tags).send().await {
            Ok(resp) if resp.status().is_success() => Some(Reachability::Ready),
            Ok(resp) => {
                tracing::debug!(%tags, status = %resp.status(), "ollama health check rejected");
                None
            }
            Err(e) => {
                tracing::debug!(%tags, error = %e, "ollama health check failed");
                None
            }
        }
    };
    let reachability = run_bounded(url, timeout, attempt).await?;
    Some(Endpoint {
        url: clean,
        reachability,
    })
}

/// Race `attempt` against `timeout`. The losing side is dropped before return.
async fn run_bounded<F>(url: &str, timeout: Duration, attempt: F) -> Option<Reachability>
where
    F: std::future::Future<Output = Option<Reachability>>,
{
    match tokio::time::timeout(timeout, attempt).await {
        Ok(found) => found,
        Err(_) => {
            tracing::debug!(url, ?timeout, "health check timed out");
            None
        }
    }
}
