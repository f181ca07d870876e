//! Tabular record persistence.
//!
//! Every pipeline stage reads and writes plain CSV tables of
//! [`PaperRecord`]s keyed by RowId, so intermediate and final artifacts stay
//! directly reviewable by a human. Whole-table writes go through a temp file
//! and rename so an interrupted run never leaves a half-written table behind.

use std::path::Path;

use paperscout_shared::{PaperRecord, PaperScoutError, Result};

/// Read a full table of records from `path`, preserving row order.
pub fn read_table(path: &Path) -> Result<Vec<PaperRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| PaperScoutError::Storage(format!("{}: {e}", path.display())))?;

    let mut records = Vec::new();
    for row in reader.deserialize() {
        let record: PaperRecord =
            row.map_err(|e| PaperScoutError::Storage(format!("{}: {e}", path.display())))?;
        records.push(record);
    }

    tracing::debug!(path = %path.display(), rows = records.len(), "table loaded");
    Ok(records)
}

/// Write a full table of records to `path`, replacing any existing file.
///
/// The table is written to `<path>.tmp` first and renamed into place.
pub fn write_table(path: &Path, records: &[PaperRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PaperScoutError::io(parent, e))?;
    }

    let tmp = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp)
            .map_err(|e| PaperScoutError::Storage(format!("{}: {e}", tmp.display())))?;
        for record in records {
            writer
                .serialize(record)
                .map_err(|e| PaperScoutError::Storage(format!("{}: {e}", tmp.display())))?;
        }
        writer
            .flush()
            .map_err(|e| PaperScoutError::io(&tmp, e))?;
    }
    std::fs::rename(&tmp, path).map_err(|e| PaperScoutError::io(path, e))?;

    tracing::debug!(path = %path.display(), rows = records.len(), "table written");
    Ok(())
}

/// Append records to an existing table, writing headers only for a new file.
pub fn append_records(path: &Path, records: &[PaperRecord]) -> Result<()> {
    if !path.exists() {
        return write_table(path, records);
    }

    let file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| PaperScoutError::io(path, e))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    for record in records {
        writer
            .serialize(record)
            .map_err(|e| PaperScoutError::Storage(format!("{}: {e}", path.display())))?;
    }
    writer.flush().map_err(|e| PaperScoutError::io(path, e))?;
    Ok(())
}
