//! Abstract fetching and caching.
//!
//! For each record without an abstract reference the stage fetches the
//! abstract, writes it as an addressable document keyed by RowId, and links
//! the record to it. A document already on disk short-circuits the fetch —
//! per-record resume. Fetches are strictly sequential with a configurable
//! delay between network requests to respect provider rate limits.

mod provider;
mod store;

use std::time::Duration;

use tracing::{info, instrument, warn};

use paperscout_shared::{PaperRecord, Result, RowId, RunConfig};

pub use provider::{AbstractProvider, SemanticScholarProvider};
pub use store::AbstractStore;

/// Outcome of the abstract-indexing stage.
#[derive(Debug)]
pub struct IndexOutcome {
    /// Input records with `abstract_ref` filled in where available.
    pub records: Vec<PaperRecord>,
    /// Abstracts fetched over the network this run.
    pub fetched: usize,
    /// Records relinked to documents already on disk.
    pub cached: usize,
    /// Records the provider had no abstract for.
    pub not_found: usize,
    /// Soft fetch failures as (RowId, error message).
    pub errors: Vec<(RowId, String)>,
}

/// Run the abstract-indexing stage and persist the indexed table.
///
/// Fetch failures are soft: the record keeps an empty reference and proceeds
/// to scoring without an abstract.
#[instrument(skip_all, fields(run = %cfg.run_name, records = records.len()))]
pub async fn run_indexing(
    provider: &dyn AbstractProvider,
    cfg: &RunConfig,
    mut records: Vec<PaperRecord>,
) -> Result<IndexOutcome> {
    let store = AbstractStore::open(cfg.abstract_dir())?;
    let delay = Duration::from_millis(cfg.abstract_delay_ms);

    let mut fetched = 0usize;
    let mut cached = 0usize;
    let mut not_found = 0usize;
    let mut errors: Vec<(RowId, String)> = Vec::new();

    for record in records.iter_mut() {
        if store.contains(&record.row_id) {
            record.abstract_ref = Some(AbstractStore::document_ref(&record.row_id));
            cached += 1;
            continue;
        }

        match provider
            .fetch(&record.title, record.year, record.doi.as_deref())
            .await
        {
            Ok(Some(text)) => {
                let doc_ref = store.write(
                    &record.row_id,
                    &record.title,
                    record.doi.as_deref(),
                    &text,
                )?;
                record.abstract_ref = Some(doc_ref);
                fetched += 1;
            }
            Ok(None) => {
                info!(row_id = %record.row_id, title = %record.title, "no abstract available");
                not_found += 1;
            }
            Err(e) => {
                warn!(row_id = %record.row_id, error = %e, "abstract fetch failed, continuing");
                errors.push((record.row_id.clone(), e.to_string()));
            }
        }

        // Pace only actual network fetches; cache hits skip the delay.
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    paperscout_store::write_table(&cfg.indexed_table_path(), &records)?;
    info!(
        path = %cfg.indexed_table_path().display(),
        fetched,
        cached,
        not_found,
        errors = errors.len(),
        "indexed table written"
    );

    Ok(IndexOutcome {
        records,
        fetched,
        cached,
        not_found,
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use paperscout_shared::{PaperScoutError, SearchTarget};
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
        std::env::temp_dir().join(format!("ps_index_{}", uuid::Uuid::now_v7()))
    }

    fn record(id: &str, title: &str) -> PaperRecord {
        PaperRecord {
            row_id: RowId::from(id),
            title: title.into(),
            authors: "A. One".into(),
            year: 2023,
            venue: "ICRA".into(),
            source: "ICRA".into(),
            keyword: "planning".into(),
            doi: None,
            url: None,
            abstract_ref: None,
            score: None,
            rationale: None,
        }
    }

    /// Provider scripted per title; counts network fetches.
    struct ScriptedProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AbstractProvider for ScriptedProvider {
        async fn fetch(
            &self,
            title: &str,
            _year: i32,
            _doi: Option<&str>,
        ) -> paperscout_shared::Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match title {
                "Missing" => Ok(None),
                "Broken" => Err(PaperScoutError::Network("connection reset".into())),
                other => Ok(Some(format!("Abstract of {other}."))),
            }
        }
    }

    #[tokio::test]
    async fn indexing_links_fetched_documents() {
        let out = temp_output();
        let cfg = test_config(out.clone());
        let provider = ScriptedProvider {
            calls: AtomicUsize::new(0),
        };

        let outcome = run_indexing(
            &provider,
            &cfg,
            vec![record("r1", "Planning X"), record("r2", "Missing")],
        )
        .await
        .expect("run indexing");

        assert_eq!(outcome.fetched, 1);
        assert_eq!(outcome.not_found, 1);
        assert_eq!(outcome.records[0].abstract_ref.as_deref(), Some("r1.json"));
        // Not-found leaves the reference unset but the record proceeds.
        assert_eq!(outcome.records[1].abstract_ref, None);

        let store = AbstractStore::open(cfg.abstract_dir()).unwrap();
        assert_eq!(
            store.read_text(&RowId::from("r1")).as_deref(),
            Some("Abstract of Planning X.")
        );

        // The indexed table landed on disk.
        let table = paperscout_store::read_table(&cfg.indexed_table_path()).expect("read");
        assert_eq!(table, outcome.records);

        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn second_run_fetches_nothing() {
        let out = temp_output();
        let cfg = test_config(out.clone());
        let provider = ScriptedProvider {
            calls: AtomicUsize::new(0),
        };

        let records = vec![record("r1", "Planning X"), record("r2", "Terrain Y")];
        run_indexing(&provider, &cfg, records.clone())
            .await
            .expect("first run");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        let outcome = run_indexing(&provider, &cfg, records)
            .await
            .expect("second run");
        // Idempotent: every document came from the cache this time.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.cached, 2);
        assert_eq!(outcome.fetched, 0);
        assert_eq!(outcome.records[1].abstract_ref.as_deref(), Some("r2.json"));

        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn fetch_failure_is_soft() {
        let out = temp_output();
        let cfg = test_config(out.clone());
        let provider = ScriptedProvider {
            calls: AtomicUsize::new(0),
        };

        let outcome = run_indexing(
            &provider,
            &cfg,
            vec![record("r1", "Broken"), record("r2", "Planning X")],
        )
        .await
        .expect("stage must not fail");

        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].0, RowId::from("r1"));
        assert_eq!(outcome.records[0].abstract_ref, None);
        // The pipeline continued past the failure.
        assert_eq!(outcome.records[1].abstract_ref.as_deref(), Some("r2.json"));

        let _ = std::fs::remove_dir_all(&out);
    }
}
