//! On-disk store of abstract documents, one JSON file per RowId.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};

use paperscout_shared::{AbstractDocument, PaperScoutError, Result, RowId};

/// Addressable store of [`AbstractDocument`]s under a single directory.
///
/// Documents are keyed by RowId (`<dir>/<row_id>.json`); existence of the
/// file is the per-record resume signal for the indexing stage.
pub struct AbstractStore {
    dir: PathBuf,
}

impl AbstractStore {
    /// Open the store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| PaperScoutError::io(&dir, e))?;
        Ok(Self { dir })
    }

    /// The document address recorded in the table's `abstract_ref` column.
    pub fn document_ref(row_id: &RowId) -> String {
        format!("{row_id}.json")
    }

    /// Filesystem path of the document for `row_id`.
    pub fn path_for(&self, row_id: &RowId) -> PathBuf {
        self.dir.join(Self::document_ref(row_id))
    }

    /// Whether a document for `row_id` already exists on disk.
    pub fn contains(&self, row_id: &RowId) -> bool {
        self.path_for(row_id).exists()
    }

    /// Persist an abstract for `row_id` and return its document reference.
    pub fn write(&self, row_id: &RowId, title: &str, doi: Option<&str>, text: &str) -> Result<String> {
        let doc = AbstractDocument {
            row_id: row_id.clone(),
            title: title.to_string(),
            doi: doi.map(str::to_string),
            text: text.to_string(),
            content_hash: compute_hash(text),
            fetched_at: Utc::now(),
        };

        let path = self.path_for(row_id);
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| PaperScoutError::Storage(format!("{}: {e}", path.display())))?;
        std::fs::write(&path, json).map_err(|e| PaperScoutError::io(&path, e))?;

        Ok(Self::document_ref(row_id))
    }

    /// Load the document for `row_id`, if present and readable.
    pub fn read(&self, row_id: &RowId) -> Result<Option<AbstractDocument>> {
        let path = self.path_for(row_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = read_file(&path)?;
        let doc = serde_json::from_str(&content)
            .map_err(|e| PaperScoutError::parse(format!("{}: {e}", path.display())))?;
        Ok(Some(doc))
    }

    /// Abstract text for `row_id`, or `None` for missing/corrupt documents.
    ///
    /// The scorer treats an unreadable document the same as an unfetched one.
    pub fn read_text(&self, row_id: &RowId) -> Option<String> {
        match self.read(row_id) {
            Ok(Some(doc)) => Some(doc.text),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(%row_id, error = %e, "unreadable abstract document");
                None
            }
        }
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| PaperScoutError::io(path, e))
}

/// Compute SHA-256 hash of content.
fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
