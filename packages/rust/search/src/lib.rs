//! Search aggregation across bibliographic targets.
//!
//! For every (target × keyword) pair the aggregator issues one bounded
//! provider query, normalizes the hits, deduplicates them by normalized
//! title + year, orders the survivors (year descending, title ascending),
//! assigns RowIds in that final order, and writes the search table.
//!
//! With resume enabled an existing search table short-circuits the whole
//! stage: the table is loaded verbatim and no queries are issued.

mod provider;

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, instrument, warn};

use paperscout_shared::{PaperRecord, PaperScoutError, Result, RowId, RunConfig};

pub use provider::{BiblioProvider, DblpProvider, RawHit};

/// Outcome of the search stage.
#[derive(Debug)]
pub struct SearchOutcome {
    /// Deduplicated records in final table order.
    pub records: Vec<PaperRecord>,
    /// Whether an existing table was reused instead of querying.
    pub resumed: bool,
    /// Failed queries as (query description, error message).
    pub failed_queries: Vec<(String, String)>,
}

/// Run the search stage and persist the search table.
///
/// Per-query failures are logged and skipped; the stage is fatal only when
/// every query fails, or when the merged result set is empty.
#[instrument(skip_all, fields(run = %cfg.run_name))]
pub async fn run_search(
    provider: &dyn BiblioProvider,
    cfg: &RunConfig,
) -> Result<SearchOutcome> {
    let table_path = cfg.search_table_path();

    if cfg.resume && table_path.exists() {
        let records = paperscout_store::read_table(&table_path)?;
        info!(
            path = %table_path.display(),
            rows = records.len(),
            "reusing existing search table"
        );
        return Ok(SearchOutcome {
            records,
            resumed: true,
            failed_queries: Vec::new(),
        });
    }

    let mut candidates: Vec<Candidate> = Vec::new();
    let mut failed_queries: Vec<(String, String)> = Vec::new();
    let total_queries = cfg.keywords.len() * cfg.targets.len();

    for keyword in &cfg.keywords {
        for target in &cfg.targets {
            match provider
                .search(&target.stream_key, keyword, cfg.start_year)
                .await
            {
                Ok(hits) => {
                    info!(
                        target = %target.label,
                        %keyword,
                        hits = hits.len(),
                        "search query complete"
                    );
                    for hit in hits {
                        candidates.push(Candidate::from_hit(hit, &target.label, keyword));
                    }
                }
                Err(e) => {
                    let desc = format!("{}/{keyword}", target.stream_key);
                    warn!(query = %desc, error = %e, "search query failed, skipping");
                    failed_queries.push((desc, e.to_string()));
                }
            }
        }
    }

    if !failed_queries.is_empty() && failed_queries.len() == total_queries {
        return Err(PaperScoutError::Network(format!(
            "all {total_queries} search queries failed"
        )));
    }

    let records = finalize_candidates(candidates)?;

    paperscout_store::write_table(&table_path, &records)?;
    info!(
        path = %table_path.display(),
        rows = records.len(),
        failed_queries = failed_queries.len(),
        "search table written"
    );

    Ok(SearchOutcome {
        records,
        resumed: false,
        failed_queries,
    })
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

static DOI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"doi\.org/(10\.\d{4,}/[-._;()/:a-zA-Z0-9]+)").expect("valid regex")
});

/// Canonical form of a title for deduplication: case-folded, whitespace
/// collapsed, trimmed.
pub fn normalize_title(title: &str) -> String {
    WHITESPACE
        .replace_all(title.trim(), " ")
        .to_lowercase()
}

/// Extract a DOI from an electronic-edition URL.
pub fn extract_doi(url: &str) -> Option<String> {
    DOI.captures(url).map(|c| c[1].to_string())
}

// ---------------------------------------------------------------------------
// Dedup + ordering
// ---------------------------------------------------------------------------

/// One hit with its run provenance, pre-dedup.
struct Candidate {
    title: String,
    authors: Vec<String>,
    year: i32,
    venue: String,
    source: String,
    keyword: String,
    url: Option<String>,
}

impl Candidate {
    fn from_hit(hit: RawHit, source: &str, keyword: &str) -> Self {
        Self {
            title: WHITESPACE.replace_all(hit.title.trim(), " ").into_owned(),
            authors: hit.authors,
            year: hit.year,
            venue: hit.venue,
            source: source.to_string(),
            keyword: keyword.to_string(),
            url: hit.url,
        }
    }

    fn dedup_key(&self) -> (String, i32) {
        (normalize_title(&self.title), self.year)
    }
}

/// Deduplicate, order, and assign RowIds.
///
/// Duplicate key: prefer the candidate with the longer author list; on equal
/// counts keep the first seen. Final order is year descending, then title
/// ascending (case-insensitive).
fn finalize_candidates(candidates: Vec<Candidate>) -> Result<Vec<PaperRecord>> {
    let mut kept: Vec<Candidate> = Vec::new();
    let mut by_key: HashMap<(String, i32), usize> = HashMap::new();

    for candidate in candidates {
        let key = candidate.dedup_key();
        match by_key.get(&key) {
            Some(&idx) => {
                if candidate.authors.len() > kept[idx].authors.len() {
                    kept[idx] = candidate;
                }
            }
            None => {
                by_key.insert(key, kept.len());
                kept.push(candidate);
            }
        }
    }

    if kept.is_empty() {
        return Err(PaperScoutError::validation(
            "search produced no records matching the configured targets and keywords",
        ));
    }

    kept.sort_by(|a, b| {
        b.year
            .cmp(&a.year)
            .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
    });

    let records = kept
        .into_iter()
        .enumerate()
        .map(|(i, c)| PaperRecord {
            row_id: RowId::from_index(i),
            title: c.title,
            authors: c.authors.join(", "),
            year: c.year,
            venue: c.venue,
            source: c.source,
            keyword: c.keyword,
            doi: c.url.as_deref().and_then(extract_doi),
            url: c.url,
            abstract_ref: None,
            score: None,
            rationale: None,
        })
        .collect();

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use paperscout_shared::SearchTarget;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config(output_dir: PathBuf) -> RunConfig {
        RunConfig {
            run_name: "test".into(),
            keywords: vec!["planning".into()],
            targets: vec![SearchTarget::new("conf/icra", "ICRA")],
            start_year: 2022,
            output_dir,
            abstract_dir_name: "abstracts".into(),
            search_limit: 100,
            abstract_delay_ms: 0,
            resume: true,
        }
    }

    fn temp_output() -> PathBuf {
        std::env::temp_dir().join(format!("ps_search_{}", uuid::Uuid::now_v7()))
    }

    fn hit(title: &str, authors: &[&str], year: i32) -> RawHit {
        RawHit {
            title: title.into(),
            authors: authors.iter().map(|a| a.to_string()).collect(),
            year,
            venue: "ICRA".into(),
            url: None,
        }
    }

    fn candidates(hits: Vec<RawHit>) -> Vec<Candidate> {
        hits.into_iter()
            .map(|h| Candidate::from_hit(h, "ICRA", "planning"))
            .collect()
    }

    #[test]
    fn normalize_collapses_case_and_whitespace() {
        assert_eq!(
            normalize_title("  Planning\t in  Rough   Terrain "),
            "planning in rough terrain"
        );
        assert_eq!(normalize_title("PLANNING"), normalize_title("planning"));
    }

    #[test]
    fn doi_extraction() {
        assert_eq!(
            extract_doi("https://doi.org/10.1109/ICRA.2023.123456").as_deref(),
            Some("10.1109/ICRA.2023.123456")
        );
        assert_eq!(extract_doi("https://arxiv.org/abs/2301.00001"), None);
    }

    #[test]
    fn dedup_collapses_whitespace_and_case_variants() {
        let records = finalize_candidates(candidates(vec![
            hit("Planning  in Rough Terrain", &["A. One"], 2023),
            hit("planning in rough terrain", &["A. One"], 2023),
        ]))
        .expect("finalize");
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn dedup_prefers_more_complete_author_list() {
        let records = finalize_candidates(candidates(vec![
            hit("Planning X", &["A. One"], 2023),
            hit("Planning X", &["A. One", "B. Two", "C. Three"], 2023),
        ]))
        .expect("finalize");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].author_count(), 3);
    }

    #[test]
    fn dedup_keeps_first_seen_on_equal_authors() {
        let records = finalize_candidates(candidates(vec![
            hit("Planning X", &["A. One"], 2023),
            hit("Planning  X", &["Z. Other"], 2023),
        ]))
        .expect("finalize");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].authors, "A. One");
    }

    #[test]
    fn same_title_different_year_is_not_a_duplicate() {
        let records = finalize_candidates(candidates(vec![
            hit("Planning X", &["A. One"], 2022),
            hit("Planning X", &["A. One"], 2023),
        ]))
        .expect("finalize");
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn ordering_is_year_desc_then_title_asc() {
        let records = finalize_candidates(candidates(vec![
            hit("Zebra Crossing Planning", &["A"], 2022),
            hit("Bravo Paths", &["A"], 2023),
            hit("alpha terrain", &["A"], 2023),
        ]))
        .expect("finalize");

        let titles: Vec<&str> = records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["alpha terrain", "Bravo Paths", "Zebra Crossing Planning"]
        );
        assert_eq!(records[0].row_id, RowId::from("r1"));
        assert_eq!(records[2].row_id, RowId::from("r3"));
    }

    // -----------------------------------------------------------------------
    // Stage tests
    // -----------------------------------------------------------------------

    /// Provider returning canned hits and counting calls.
    struct CannedProvider {
        hits: Vec<RawHit>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BiblioProvider for CannedProvider {
        async fn search(
            &self,
            _stream_key: &str,
            _keyword: &str,
            _year_from: i32,
        ) -> paperscout_shared::Result<Vec<RawHit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.hits.clone())
        }
    }

    /// Provider that always fails.
    struct FailingProvider;

    #[async_trait]
    impl BiblioProvider for FailingProvider {
        async fn search(
            &self,
            _stream_key: &str,
            _keyword: &str,
            _year_from: i32,
        ) -> paperscout_shared::Result<Vec<RawHit>> {
            Err(PaperScoutError::Network("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn search_stage_writes_table() {
        let out = temp_output();
        let cfg = test_config(out.clone());
        let provider = CannedProvider {
            hits: vec![
                hit("Planning X", &["A. One"], 2023),
                hit("Older Work", &["B. Two"], 2022),
            ],
            calls: AtomicUsize::new(0),
        };

        let outcome = run_search(&provider, &cfg).await.expect("run search");
        assert!(!outcome.resumed);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].title, "Planning X");

        let reloaded = paperscout_store::read_table(&cfg.search_table_path()).expect("read");
        assert_eq!(reloaded, outcome.records);

        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn resume_skips_queries_entirely() {
        let out = temp_output();
        let cfg = test_config(out.clone());
        let provider = CannedProvider {
            hits: vec![hit("Planning X", &["A. One"], 2023)],
            calls: AtomicUsize::new(0),
        };

        run_search(&provider, &cfg).await.expect("first run");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let outcome = run_search(&provider, &cfg).await.expect("second run");
        assert!(outcome.resumed);
        assert_eq!(outcome.records.len(), 1);
        // No further provider calls were made.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn all_failed_queries_are_fatal() {
        let out = temp_output();
        let cfg = test_config(out.clone());

        let result = run_search(&FailingProvider, &cfg).await;
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("all 1 search queries failed")
        );

        let _ = std::fs::remove_dir_all(&out);
    }
}
