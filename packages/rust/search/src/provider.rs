//! Bibliographic search provider interface and the DBLP implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use paperscout_shared::{PaperScoutError, Result};

/// User-Agent string for provider requests.
const USER_AGENT: &str = concat!("PaperScout/", env!("CARGO_PKG_VERSION"));

/// One raw hit from a bibliographic search, before normalization.
#[derive(Debug, Clone)]
pub struct RawHit {
    pub title: String,
    pub authors: Vec<String>,
    pub year: i32,
    pub venue: String,
    /// Electronic-edition URL, if the provider reports one.
    pub url: Option<String>,
}

/// A bibliographic search source.
///
/// `search` issues one bounded query for `(stream_key, keyword)` and returns
/// hits published in `year_from` or later.
#[async_trait]
pub trait BiblioProvider: Send + Sync {
    async fn search(&self, stream_key: &str, keyword: &str, year_from: i32)
    -> Result<Vec<RawHit>>;
}

// ---------------------------------------------------------------------------
// DBLP
// ---------------------------------------------------------------------------

/// DBLP publication-search API client.
pub struct DblpProvider {
    client: Client,
    base_url: Url,
    /// Per-query hit cap (`h` parameter).
    limit: u32,
}

impl DblpProvider {
    /// Default DBLP API origin.
    pub const DEFAULT_BASE_URL: &'static str = "https://dblp.org";

    pub fn new(base_url: Url, limit: u32, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PaperScoutError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            limit,
        })
    }
}

#[async_trait]
impl BiblioProvider for DblpProvider {
    async fn search(
        &self,
        stream_key: &str,
        keyword: &str,
        year_from: i32,
    ) -> Result<Vec<RawHit>> {
        let endpoint = self
            .base_url
            .join("/search/publ/api")
            .map_err(|e| PaperScoutError::Network(format!("bad base URL: {e}")))?;
        let query = format!("stream:{stream_key}: {keyword}");

        debug!(%stream_key, %keyword, "querying dblp");

        let limit = self.limit.to_string();
        let response = self
            .client
            .get(endpoint.as_str())
            .query(&[
                ("q", query.as_str()),
                ("format", "json"),
                ("h", limit.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PaperScoutError::Network(format!("dblp: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(PaperScoutError::rate_limited(format!("dblp: HTTP {status}")));
        }
        if !status.is_success() {
            return Err(PaperScoutError::Network(format!("dblp: HTTP {status}")));
        }

        let body: DblpResponse = response
            .json()
            .await
            .map_err(|e| PaperScoutError::parse(format!("dblp response: {e}")))?;

        let hits = body
            .result
            .hits
            .hit
            .into_iter()
            .filter_map(|hit| raw_hit_from_info(hit.info, year_from))
            .collect();

        Ok(hits)
    }
}

/// Convert one DBLP `info` object into a [`RawHit`], applying the year floor.
fn raw_hit_from_info(info: DblpInfo, year_from: i32) -> Option<RawHit> {
    let year = match info.year.parse::<i32>() {
        Ok(y) => y,
        Err(_) => {
            warn!(title = %info.title, year = %info.year, "dropping hit with non-numeric year");
            return None;
        }
    };
    if year < year_from {
        return None;
    }

    let authors = match info.authors {
        Some(block) => block.author.into_names(),
        None => Vec::new(),
    };

    Some(RawHit {
        title: info.title,
        authors,
        year,
        venue: info.venue.unwrap_or_default(),
        url: info.ee,
    })
}

// ---------------------------------------------------------------------------
// DBLP wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DblpResponse {
    result: DblpResult,
}

#[derive(Debug, Deserialize)]
struct DblpResult {
    hits: DblpHits,
}

#[derive(Debug, Deserialize)]
struct DblpHits {
    #[serde(default)]
    hit: Vec<DblpHit>,
}

#[derive(Debug, Deserialize)]
struct DblpHit {
    info: DblpInfo,
}

#[derive(Debug, Deserialize)]
struct DblpInfo {
    #[serde(default)]
    title: String,
    #[serde(default)]
    venue: Option<String>,
    #[serde(default)]
    year: String,
    #[serde(default)]
    authors: Option<DblpAuthors>,
    /// Electronic-edition URL.
    #[serde(default)]
    ee: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DblpAuthors {
    author: DblpAuthorList,
}

/// DBLP encodes a single author as an object and several as an array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DblpAuthorList {
    One(DblpAuthor),
    Many(Vec<DblpAuthor>),
}

impl DblpAuthorList {
    fn into_names(self) -> Vec<String> {
        match self {
            Self::One(a) => vec![a.text],
            Self::Many(list) => list.into_iter().map(|a| a.text).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DblpAuthor {
    #[serde(default)]
    text: String,
}
