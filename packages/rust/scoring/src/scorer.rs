//! Concurrent relevance scoring with per-record checkpointing.
//!
//! Records are partitioned into fixed-size batches; each batch's requests
//! run concurrently under a semaphore capped at `max_workers`, and the batch
//! is joined before the next one starts, so an interrupt loses at most one
//! in-flight batch. Every parsed response is appended to the checkpoint
//! immediately, and RowIds the checkpoint already marks `scored` are never
//! dispatched again. The scored table is rebuilt in input RowId order
//! regardless of completion order.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use paperscout_abstracts::AbstractStore;
use paperscout_shared::{
    AiConfig, CheckpointEntry, PaperRecord, PaperScoutError, Result, RowId, ScoreStatus,
};

use crate::checkpoint::CheckpointLog;
use crate::client::CompletionClient;

/// Payload stand-in for records without a readable abstract.
const NO_ABSTRACT: &str = "No abstract available.";

/// Outcome of the scoring stage.
#[derive(Debug)]
pub struct ScoreOutcome {
    /// Scored records in input RowId order; failed rows are excluded.
    pub records: Vec<PaperRecord>,
    /// RowIds whose retry budget was exhausted.
    pub failed: Vec<RowId>,
    /// Records skipped because the checkpoint already marked them scored.
    pub skipped: usize,
    /// Requests dispatched this run.
    pub dispatched: usize,
}

/// Score every record not yet checkpointed, then rebuild the scored table.
#[instrument(skip_all, fields(records = records.len()))]
pub async fn run_scoring(
    client: Arc<dyn CompletionClient>,
    checkpoint: Arc<CheckpointLog>,
    abstracts: &AbstractStore,
    ai: &AiConfig,
    records: &[PaperRecord],
) -> Result<ScoreOutcome> {
    let pending: Vec<&PaperRecord> = records
        .iter()
        .filter(|r| !checkpoint.has_scored(&r.row_id))
        .collect();
    let skipped = records.len() - pending.len();

    info!(
        pending = pending.len(),
        skipped,
        batch_size = ai.batch_size,
        max_workers = ai.max_workers,
        "scoring stage starting"
    );

    let semaphore = Arc::new(Semaphore::new(ai.max_workers));
    let system_prompt: Arc<str> = Arc::from(ai.system_prompt.as_str());
    let mut dispatched = 0usize;

    for (batch_no, batch) in pending.chunks(ai.batch_size).enumerate() {
        let mut handles = Vec::with_capacity(batch.len());

        for record in batch {
            let payload = build_user_payload(record, abstracts);
            let client = client.clone();
            let checkpoint = checkpoint.clone();
            let sem = semaphore.clone();
            let prompt = system_prompt.clone();
            let row_id = record.row_id.clone();
            let max_retries = ai.max_retries;
            let backoff_ms = ai.retry_backoff_ms;
            dispatched += 1;

            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                score_one(
                    client,
                    checkpoint,
                    prompt,
                    row_id,
                    payload,
                    max_retries,
                    backoff_ms,
                )
                .await
            }));
        }

        for handle in handles {
            handle
                .await
                .map_err(|e| PaperScoutError::Scoring(format!("scoring task failed: {e}")))??;
        }

        debug!(batch = batch_no + 1, "scoring batch checkpointed");
    }

    // Rebuild in input order; completion order is irrelevant from here on.
    let outcomes = checkpoint.entries();
    let mut scored = Vec::new();
    let mut failed = Vec::new();

    for record in records {
        match outcomes.get(&record.row_id) {
            Some(entry) if entry.status == ScoreStatus::Scored => {
                let mut enriched = record.clone();
                enriched.score = entry.score;
                enriched.rationale = entry.rationale.clone();
                scored.push(enriched);
            }
            Some(_) => failed.push(record.row_id.clone()),
            None => {
                warn!(row_id = %record.row_id, "record missing from checkpoint after scoring");
                failed.push(record.row_id.clone());
            }
        }
    }

    info!(
        scored = scored.len(),
        failed = failed.len(),
        skipped,
        dispatched,
        "scoring stage complete"
    );

    Ok(ScoreOutcome {
        records: scored,
        failed,
        skipped,
        dispatched,
    })
}

/// Score one record with bounded retries, recording the terminal outcome.
async fn score_one(
    client: Arc<dyn CompletionClient>,
    checkpoint: Arc<CheckpointLog>,
    system_prompt: Arc<str>,
    row_id: RowId,
    payload: String,
    max_retries: u32,
    backoff_ms: u64,
) -> Result<()> {
    let mut last_error = String::new();

    for attempt in 1..=max_retries {
        let (error, rate_limited) = match client.complete(&system_prompt, &payload).await {
            Ok(text) => match parse_score_response(&text) {
                Ok((score, reason)) => {
                    checkpoint.record(CheckpointEntry::scored(row_id.clone(), score, reason))?;
                    return Ok(());
                }
                Err(e) => (e, false),
            },
            Err(e) => {
                let rate_limited = matches!(e, PaperScoutError::RateLimited { .. });
                (e, rate_limited)
            }
        };

        warn!(%row_id, attempt, max_retries, error = %error, "scoring attempt failed");
        last_error = error.to_string();

        if attempt < max_retries {
            // Linear backoff, stretched when the provider is throttling us.
            let multiplier: u64 = if rate_limited { 5 } else { 1 };
            tokio::time::sleep(Duration::from_millis(
                backoff_ms * u64::from(attempt) * multiplier,
            ))
            .await;
        }
    }

    checkpoint.record(CheckpointEntry::failed(row_id, last_error))?;
    Ok(())
}

/// Build the user payload for one record: title plus cached abstract text.
fn build_user_payload(record: &PaperRecord, abstracts: &AbstractStore) -> String {
    let text = match record.abstract_ref {
        Some(_) => abstracts
            .read_text(&record.row_id)
            .unwrap_or_else(|| NO_ABSTRACT.to_string()),
        None => NO_ABSTRACT.to_string(),
    };
    format!("Title: {}\nAbstract: {}", record.title, text)
}

/// Parse `{"score": <number>, "reason": <string>}` out of a completion,
/// tolerating Markdown code fences around the JSON.
pub fn parse_score_response(raw: &str) -> Result<(f64, String)> {
    #[derive(Deserialize)]
    struct Reply {
        score: f64,
        reason: String,
    }

    let cleaned = raw.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();

    let reply: Reply = serde_json::from_str(cleaned).map_err(|e| {
        let mut excerpt: String = raw.chars().take(120).collect();
        if excerpt.len() < raw.len() {
            excerpt.push('…');
        }
        PaperScoutError::parse(format!("completion is not a score object: {e} (got: {excerpt})"))
    })?;

    Ok((reply.score, reply.reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_ai_config() -> AiConfig {
        AiConfig {
            system_prompt: "rate the paper".into(),
            model: "mock".into(),
            base_url: "http://unused".into(),
            temperature: 0.1,
            batch_size: 5,
            max_workers: 3,
            timeout_secs: 5,
            max_retries: 3,
            retry_backoff_ms: 1,
            api_key_env: "PS_TEST_UNSET".into(),
            api_key: Some("sk-test".into()),
        }
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ps_score_{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    fn record(id: &str, title: &str, abstract_ref: Option<&str>) -> PaperRecord {
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
            abstract_ref: abstract_ref.map(str::to_string),
            score: None,
            rationale: None,
        }
    }

    /// Scripted endpoint: responses keyed by title, with optional per-title
    /// delays to force out-of-order completion.
    struct ScriptedClient {
        responses: HashMap<String, String>,
        delays_ms: HashMap<String, u64>,
        calls: AtomicUsize,
        payloads: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(responses: &[(&str, &str)]) -> Self {
            Self {
                responses: responses
                    .iter()
                    .map(|(t, r)| (t.to_string(), r.to_string()))
                    .collect(),
                delays_ms: HashMap::new(),
                calls: AtomicUsize::new(0),
                payloads: Mutex::new(Vec::new()),
            }
        }

        fn with_delay(mut self, title: &str, ms: u64) -> Self {
            self.delays_ms.insert(title.to_string(), ms);
            self
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(
            &self,
            _system_prompt: &str,
            user_payload: &str,
        ) -> paperscout_shared::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.payloads
                .lock()
                .unwrap()
                .push(user_payload.to_string());

            let title = user_payload
                .lines()
                .next()
                .and_then(|l| l.strip_prefix("Title: "))
                .unwrap_or_default()
                .to_string();

            if let Some(ms) = self.delays_ms.get(&title) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }

            match self.responses.get(&title) {
                Some(response) => Ok(response.clone()),
                None => Err(PaperScoutError::Network("no scripted response".into())),
            }
        }
    }

    fn open_fixtures(dir: &PathBuf) -> (Arc<CheckpointLog>, AbstractStore) {
        let checkpoint =
            Arc::new(CheckpointLog::open(dir.join("ckpt.jsonl")).expect("open checkpoint"));
        let store = AbstractStore::open(dir.join("abstracts")).expect("open store");
        (checkpoint, store)
    }

    #[test]
    fn parse_accepts_plain_and_fenced_json() {
        let (score, reason) =
            parse_score_response(r#"{"score": 8, "reason": "relevant"}"#).expect("plain");
        assert_eq!(score, 8.0);
        assert_eq!(reason, "relevant");

        let fenced = "```json\n{\"score\": 3, \"reason\": \"structured roads\"}\n```";
        let (score, _) = parse_score_response(fenced).expect("fenced");
        assert_eq!(score, 3.0);
    }

    #[test]
    fn parse_rejects_malformed_output() {
        assert!(parse_score_response("the paper is great").is_err());
        assert!(parse_score_response(r#"{"score": "high"}"#).is_err());
        assert!(parse_score_response(r#"{"reason": "no score"}"#).is_err());
    }

    #[tokio::test]
    async fn scores_records_and_preserves_input_order() {
        let dir = temp_dir();
        let (checkpoint, store) = open_fixtures(&dir);

        // r1 completes last, r3 first; output order must still be r1, r2, r3.
        let client = Arc::new(
            ScriptedClient::new(&[
                ("Slow Paper", r#"{"score": 5, "reason": "core"}"#),
                ("Medium Paper", r#"{"score": 4, "reason": "adjacent"}"#),
                ("Fast Paper", r#"{"score": 1, "reason": "unrelated"}"#),
            ])
            .with_delay("Slow Paper", 40)
            .with_delay("Medium Paper", 20),
        );

        let records = vec![
            record("r1", "Slow Paper", None),
            record("r2", "Medium Paper", None),
            record("r3", "Fast Paper", None),
        ];

        let outcome = run_scoring(client, checkpoint, &store, &test_ai_config(), &records)
            .await
            .expect("run scoring");

        let ids: Vec<&str> = outcome.records.iter().map(|r| r.row_id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2", "r3"]);
        assert_eq!(outcome.records[0].score, Some(5.0));
        assert_eq!(outcome.records[2].rationale.as_deref(), Some("unrelated"));
        assert!(outcome.failed.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn checkpointed_rows_are_not_dispatched_again() {
        let dir = temp_dir();
        let (checkpoint, store) = open_fixtures(&dir);

        checkpoint
            .record(CheckpointEntry::scored(RowId::from("r1"), 4.0, "seen before"))
            .expect("seed checkpoint");

        let client = Arc::new(ScriptedClient::new(&[(
            "New Paper",
            r#"{"score": 2, "reason": "weak"}"#,
        )]));

        let records = vec![
            record("r1", "Old Paper", None),
            record("r2", "New Paper", None),
        ];

        let outcome = run_scoring(
            client.clone(),
            checkpoint,
            &store,
            &test_ai_config(),
            &records,
        )
        .await
        .expect("run scoring");

        // Only r2 hit the endpoint; r1 came from the checkpoint.
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.dispatched, 1);
        assert_eq!(outcome.records[0].score, Some(4.0));
        assert_eq!(
            outcome.records[0].rationale.as_deref(),
            Some("seen before")
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn second_full_run_makes_no_calls() {
        let dir = temp_dir();
        let (checkpoint, store) = open_fixtures(&dir);

        let client = Arc::new(ScriptedClient::new(&[(
            "Planning X",
            r#"{"score": 8, "reason": "relevant"}"#,
        )]));
        let records = vec![record("r1", "Planning X", None)];

        run_scoring(
            client.clone(),
            checkpoint.clone(),
            &store,
            &test_ai_config(),
            &records,
        )
        .await
        .expect("first run");

        let outcome = run_scoring(
            client.clone(),
            checkpoint,
            &store,
            &test_ai_config(),
            &records,
        )
        .await
        .expect("second run");

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.dispatched, 0);
        assert_eq!(outcome.records[0].score, Some(8.0));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn retry_exhaustion_marks_failed_and_excludes_row() {
        let dir = temp_dir();
        let (checkpoint, store) = open_fixtures(&dir);

        // No scripted response for this title: every attempt fails.
        let client = Arc::new(ScriptedClient::new(&[(
            "Good Paper",
            r#"{"score": 4, "reason": "fine"}"#,
        )]));

        let records = vec![
            record("r1", "Good Paper", None),
            record("r3", "Doomed Paper", None),
        ];

        let outcome = run_scoring(
            client.clone(),
            checkpoint.clone(),
            &store,
            &test_ai_config(),
            &records,
        )
        .await
        .expect("run scoring");

        // 1 call for r1 + max_retries for r3.
        assert_eq!(client.calls.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.failed, vec![RowId::from("r3")]);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].row_id, RowId::from("r1"));

        let entry = checkpoint.get(&RowId::from("r3")).expect("failed entry");
        assert_eq!(entry.status, ScoreStatus::Failed);
        assert!(entry.rationale.unwrap().contains("network error"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_abstract_still_gets_scored() {
        let dir = temp_dir();
        let (checkpoint, store) = open_fixtures(&dir);

        let client = Arc::new(ScriptedClient::new(&[(
            "No Abstract Paper",
            r#"{"score": 2, "reason": "judged by title"}"#,
        )]));

        let records = vec![record("r2", "No Abstract Paper", None)];
        let outcome = run_scoring(
            client.clone(),
            checkpoint,
            &store,
            &test_ai_config(),
            &records,
        )
        .await
        .expect("run scoring");

        assert_eq!(outcome.records[0].score, Some(2.0));
        let payloads = client.payloads.lock().unwrap();
        assert!(payloads[0].contains(NO_ABSTRACT));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn parse_failures_consume_the_retry_budget() {
        let dir = temp_dir();
        let (checkpoint, store) = open_fixtures(&dir);

        let client = Arc::new(ScriptedClient::new(&[(
            "Rambling Paper",
            "I cannot provide a score for this paper.",
        )]));

        let records = vec![record("r1", "Rambling Paper", None)];
        let outcome = run_scoring(
            client.clone(),
            checkpoint,
            &store,
            &test_ai_config(),
            &records,
        )
        .await
        .expect("run scoring");

        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.failed, vec![RowId::from("r1")]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
