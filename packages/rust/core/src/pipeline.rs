//! End-to-end run pipeline: search → abstract indexing → scoring → done.
//!
//! The orchestrator only sequences the stages, passes the immutable run
//! configuration through, and short-circuits a stage when its resume
//! condition holds (an existing search table; cached abstract documents;
//! checkpointed scores). A fatal stage error halts the run and leaves every
//! artifact already on disk in place for a future resume.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument};
use uuid::Uuid;

use paperscout_abstracts::{AbstractProvider, AbstractStore};
use paperscout_scoring::{CheckpointLog, CompletionClient};
use paperscout_search::BiblioProvider;
use paperscout_shared::{AiConfig, PaperScoutError, Result, RowId, RunConfig};

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// The fixed, linear pipeline state machine. No backward transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Search,
    IndexAbstracts,
    Score,
    Done,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Search => "search",
            Self::IndexAbstracts => "index-abstracts",
            Self::Score => "score",
            Self::Done => "done",
        };
        write!(f, "{name}")
    }
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a stage.
    fn stage(&self, stage: PipelineStage);
    /// Called with human-readable status detail within a stage.
    fn note(&self, message: &str);
    /// Called when the pipeline completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _stage: PipelineStage) {}
    fn note(&self, _message: &str) {}
    fn done(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

/// Final report of a pipeline run: artifact paths plus per-stage accounting.
#[derive(Debug)]
pub struct RunSummary {
    /// Identifier for this process invocation (not persisted across resumes).
    pub run_id: Uuid,
    pub search_table: PathBuf,
    pub indexed_table: PathBuf,
    pub analysis_table: PathBuf,
    pub abstract_dir: PathBuf,
    pub checkpoint_path: PathBuf,
    /// Records in the search table.
    pub records_total: usize,
    /// Whether the search stage reused an existing table.
    pub search_resumed: bool,
    /// Search queries that failed and were skipped.
    pub failed_queries: usize,
    pub abstracts_fetched: usize,
    pub abstracts_cached: usize,
    pub abstracts_not_found: usize,
    /// Soft abstract-fetch failures as (RowId, error message).
    pub abstract_errors: Vec<(RowId, String)>,
    /// Rows in the final analysis table.
    pub scored: usize,
    /// Rows skipped as already checkpointed.
    pub already_scored: usize,
    /// Rows whose scoring retry budget was exhausted.
    pub failed: Vec<RowId>,
    pub elapsed: std::time::Duration,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run the full pipeline.
///
/// 1. Search: aggregate and deduplicate bibliographic hits
/// 2. Index: fetch and cache abstracts
/// 3. Score: rate relevance with the language model, checkpointed
/// 4. Done: write the final analysis table and compact the checkpoint
#[instrument(skip_all, fields(run = %run_cfg.run_name))]
pub async fn run_pipeline(
    run_cfg: &RunConfig,
    ai_cfg: &AiConfig,
    biblio: &dyn BiblioProvider,
    abstracts: &dyn AbstractProvider,
    completion: Arc<dyn CompletionClient>,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let start = Instant::now();
    let run_id = Uuid::now_v7();

    std::fs::create_dir_all(&run_cfg.output_dir)
        .map_err(|e| PaperScoutError::io(&run_cfg.output_dir, e))?;

    info!(%run_id, targets = run_cfg.targets.len(), keywords = run_cfg.keywords.len(), "starting run");

    // --- Stage 1: search ---
    progress.stage(PipelineStage::Search);
    let search = paperscout_search::run_search(biblio, run_cfg).await?;
    progress.note(&format!(
        "{} records{}",
        search.records.len(),
        if search.resumed { " (reused)" } else { "" }
    ));

    // --- Stage 2: abstract indexing ---
    progress.stage(PipelineStage::IndexAbstracts);
    let indexed = paperscout_abstracts::run_indexing(abstracts, run_cfg, search.records).await?;
    progress.note(&format!(
        "{} fetched, {} cached, {} without abstract",
        indexed.fetched, indexed.cached, indexed.not_found
    ));

    // --- Stage 3: scoring ---
    progress.stage(PipelineStage::Score);
    let checkpoint = Arc::new(CheckpointLog::open(run_cfg.checkpoint_path())?);
    let abstract_store = AbstractStore::open(run_cfg.abstract_dir())?;
    let scoring = paperscout_scoring::run_scoring(
        completion,
        checkpoint.clone(),
        &abstract_store,
        ai_cfg,
        &indexed.records,
    )
    .await?;
    progress.note(&format!(
        "{} scored, {} failed, {} already checkpointed",
        scoring.records.len(),
        scoring.failed.len(),
        scoring.skipped
    ));

    // --- Done: final table + checkpoint compaction ---
    progress.stage(PipelineStage::Done);
    paperscout_store::write_table(&run_cfg.analysis_table_path(), &scoring.records)?;
    checkpoint.compact()?;

    let summary = RunSummary {
        run_id,
        search_table: run_cfg.search_table_path(),
        indexed_table: run_cfg.indexed_table_path(),
        analysis_table: run_cfg.analysis_table_path(),
        abstract_dir: run_cfg.abstract_dir(),
        checkpoint_path: run_cfg.checkpoint_path(),
        records_total: indexed.records.len(),
        search_resumed: search.resumed,
        failed_queries: search.failed_queries.len(),
        abstracts_fetched: indexed.fetched,
        abstracts_cached: indexed.cached,
        abstracts_not_found: indexed.not_found,
        abstract_errors: indexed.errors,
        scored: scoring.records.len(),
        already_scored: scoring.skipped,
        failed: scoring.failed,
        elapsed: start.elapsed(),
    };

    progress.done(&summary);

    info!(
        run_id = %summary.run_id,
        records = summary.records_total,
        scored = summary.scored,
        failed = summary.failed.len(),
        elapsed_ms = summary.elapsed.as_millis(),
        "run complete"
    );

    Ok(summary)
}
