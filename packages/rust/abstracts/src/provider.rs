//! Abstract source interface and the Semantic Scholar implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use paperscout_shared::{PaperScoutError, Result};

/// User-Agent string for provider requests.
const USER_AGENT: &str = concat!("PaperScout/", env!("CARGO_PKG_VERSION"));

/// An abstract source.
///
/// `Ok(None)` means the provider definitively has no abstract for the paper —
/// a soft, non-retryable outcome. Errors are transport problems.
#[async_trait]
pub trait AbstractProvider: Send + Sync {
    async fn fetch(&self, title: &str, year: i32, doi: Option<&str>)
    -> Result<Option<String>>;
}

// ---------------------------------------------------------------------------
// Semantic Scholar
// ---------------------------------------------------------------------------

/// Semantic Scholar Graph API client.
///
/// Looks papers up by DOI first when one is known, falling back to a
/// title search limited to one hit.
pub struct SemanticScholarProvider {
    client: Client,
    base_url: Url,
}

impl SemanticScholarProvider {
    /// Default Semantic Scholar API origin.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.semanticscholar.org";

    pub fn new(base_url: Url, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PaperScoutError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// Fetch by DOI. `Ok(None)` covers both "no such paper" and "no abstract".
    async fn fetch_by_doi(&self, doi: &str) -> Result<Option<String>> {
        let endpoint = self
            .base_url
            .join(&format!("/graph/v1/paper/DOI:{doi}"))
            .map_err(|e| PaperScoutError::Network(format!("bad base URL: {e}")))?;

        let response = self
            .client
            .get(endpoint.as_str())
            .query(&[("fields", "abstract")])
            .send()
            .await
            .map_err(|e| PaperScoutError::Network(format!("semanticscholar: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(PaperScoutError::rate_limited(format!(
                "semanticscholar: HTTP {status}"
            )));
        }
        if !status.is_success() {
            return Ok(None);
        }

        let body: PaperResponse = response
            .json()
            .await
            .map_err(|e| PaperScoutError::parse(format!("semanticscholar response: {e}")))?;

        Ok(body.r#abstract)
    }

    /// Fetch by title search, taking the top hit.
    async fn fetch_by_title(&self, title: &str, year: i32) -> Result<Option<String>> {
        let endpoint = self
            .base_url
            .join("/graph/v1/paper/search")
            .map_err(|e| PaperScoutError::Network(format!("bad base URL: {e}")))?;

        let response = self
            .client
            .get(endpoint.as_str())
            .query(&[
                ("query", title),
                ("limit", "1"),
                ("fields", "abstract"),
                ("year", &year.to_string()),
            ])
            .send()
            .await
            .map_err(|e| PaperScoutError::Network(format!("semanticscholar: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(PaperScoutError::rate_limited(format!(
                "semanticscholar: HTTP {status}"
            )));
        }
        if !status.is_success() {
            return Err(PaperScoutError::Network(format!(
                "semanticscholar: HTTP {status}"
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| PaperScoutError::parse(format!("semanticscholar response: {e}")))?;

        Ok(body
            .data
            .into_iter()
            .next()
            .and_then(|paper| paper.r#abstract))
    }
}

#[async_trait]
impl AbstractProvider for SemanticScholarProvider {
    async fn fetch(
        &self,
        title: &str,
        year: i32,
        doi: Option<&str>,
    ) -> Result<Option<String>> {
        if let Some(doi) = doi {
            match self.fetch_by_doi(doi).await {
                Ok(Some(text)) => return Ok(Some(text)),
                Ok(None) => debug!(%doi, "no abstract by DOI, trying title search"),
                Err(e @ PaperScoutError::RateLimited { .. }) => return Err(e),
                Err(e) => debug!(%doi, error = %e, "DOI lookup failed, trying title search"),
            }
        }

        self.fetch_by_title(title, year).await
    }
}

// ---------------------------------------------------------------------------
// Semantic Scholar wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PaperResponse {
    #[serde(default)]
    r#abstract: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<PaperResponse>,
}
