//! Durable scoring checkpoint: an append-only JSONL log.
//!
//! One line per recorded outcome, flushed and synced on every write, so a
//! crash loses at most the entry being written — and a torn trailing line is
//! discarded on the next load instead of poisoning the log. All mutation is
//! serialized through one internal mutex; concurrent scorer workers share
//! the log behind an `Arc`.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use paperscout_shared::{CheckpointEntry, PaperScoutError, Result, RowId, ScoreStatus};

/// Append-only checkpoint log mapping RowId to its scoring outcome.
pub struct CheckpointLog {
    path: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    file: File,
    entries: HashMap<RowId, CheckpointEntry>,
}

impl CheckpointLog {
    /// Open the log at `path`, replaying existing entries.
    ///
    /// A missing file yields an empty mapping. The latest line per RowId
    /// wins, except that a `scored` entry is never replaced by `failed`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PaperScoutError::io(parent, e))?;
        }

        let entries = load_entries(&path)?;
        if !entries.is_empty() {
            info!(path = %path.display(), entries = entries.len(), "checkpoint loaded");
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| PaperScoutError::io(&path, e))?;

        Ok(Self {
            path,
            inner: Mutex::new(Inner { file, entries }),
        })
    }

    /// Whether `row_id` has a durable `scored` entry.
    ///
    /// Failed entries return `false` so a later run re-attempts them.
    pub fn has_scored(&self, row_id: &RowId) -> bool {
        let inner = self.inner.lock().expect("checkpoint lock poisoned");
        matches!(
            inner.entries.get(row_id),
            Some(entry) if entry.status == ScoreStatus::Scored
        )
    }

    /// The recorded entry for `row_id`, if any.
    pub fn get(&self, row_id: &RowId) -> Option<CheckpointEntry> {
        let inner = self.inner.lock().expect("checkpoint lock poisoned");
        inner.entries.get(row_id).cloned()
    }

    /// Snapshot of the full mapping.
    pub fn entries(&self) -> HashMap<RowId, CheckpointEntry> {
        let inner = self.inner.lock().expect("checkpoint lock poisoned");
        inner.entries.clone()
    }

    /// Number of recorded RowIds.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("checkpoint lock poisoned");
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Durably record one scoring outcome (append, flush, sync).
    ///
    /// A `failed` entry never overwrites an existing `scored` one.
    pub fn record(&self, entry: CheckpointEntry) -> Result<()> {
        let mut inner = self.inner.lock().expect("checkpoint lock poisoned");

        if entry.status == ScoreStatus::Failed
            && matches!(
                inner.entries.get(&entry.row_id),
                Some(existing) if existing.status == ScoreStatus::Scored
            )
        {
            debug!(row_id = %entry.row_id, "ignoring failed entry for already-scored row");
            return Ok(());
        }

        let mut line = serde_json::to_string(&entry)
            .map_err(|e| PaperScoutError::Storage(format!("checkpoint entry: {e}")))?;
        line.push('\n');

        inner
            .file
            .write_all(line.as_bytes())
            .map_err(|e| PaperScoutError::io(&self.path, e))?;
        inner
            .file
            .sync_data()
            .map_err(|e| PaperScoutError::io(&self.path, e))?;

        inner.entries.insert(entry.row_id.clone(), entry);
        Ok(())
    }

    /// Rewrite the log with one line per RowId, atomically.
    ///
    /// The compacted log is written to a temp file and renamed into place;
    /// the append handle is reopened on the new file.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("checkpoint lock poisoned");

        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut out = File::create(&tmp).map_err(|e| PaperScoutError::io(&tmp, e))?;
            let mut entries: Vec<&CheckpointEntry> = inner.entries.values().collect();
            entries.sort_by(|a, b| a.row_id.cmp(&b.row_id));
            for entry in entries {
                let line = serde_json::to_string(entry)
                    .map_err(|e| PaperScoutError::Storage(format!("checkpoint entry: {e}")))?;
                writeln!(out, "{line}").map_err(|e| PaperScoutError::io(&tmp, e))?;
            }
            out.sync_data().map_err(|e| PaperScoutError::io(&tmp, e))?;
        }
        std::fs::rename(&tmp, &self.path).map_err(|e| PaperScoutError::io(&self.path, e))?;

        inner.file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| PaperScoutError::io(&self.path, e))?;

        debug!(path = %self.path.display(), entries = inner.entries.len(), "checkpoint compacted");
        Ok(())
    }
}

/// Replay the log, discarding unparsable lines (a torn trailing write).
fn load_entries(path: &Path) -> Result<HashMap<RowId, CheckpointEntry>> {
    let mut entries = HashMap::new();

    if !path.exists() {
        return Ok(entries);
    }

    let file = File::open(path).map_err(|e| PaperScoutError::io(path, e))?;
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| PaperScoutError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CheckpointEntry>(&line) {
            Ok(entry) => {
                let keep = match entries.get(&entry.row_id) {
                    Some(existing) => {
                        !(existing.status == ScoreStatus::Scored
                            && entry.status == ScoreStatus::Failed)
                    }
                    None => true,
                };
                if keep {
                    entries.insert(entry.row_id.clone(), entry);
                }
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "discarding unparsable checkpoint line"
                );
            }
        }
    }

    Ok(entries)
}
