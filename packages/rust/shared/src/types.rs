//! Core domain types for PaperScout runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RowId
// ---------------------------------------------------------------------------

/// Stable identifier for one paper record, assigned once at search time.
///
/// RowIds are `r1`, `r2`, ... in the final order of the search table and are
/// the join key for every downstream stage; they are never reassigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub String);

impl RowId {
    /// RowId for the record at `index` in the search table (`r1`-based).
    pub fn from_index(index: usize) -> Self {
        Self(format!("r{}", index + 1))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RowId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// SearchTarget
// ---------------------------------------------------------------------------

/// One bibliographic source to query: a venue stream key plus display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTarget {
    /// Provider stream key, e.g. `journals/ijrr` or `conf/icra`.
    pub stream_key: String,
    /// Human-readable label, e.g. `IJRR` or `ICRA`.
    pub label: String,
}

impl SearchTarget {
    pub fn new(stream_key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            stream_key: stream_key.into(),
            label: label.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// PaperRecord
// ---------------------------------------------------------------------------

/// One row of the search/indexed/analysis tables.
///
/// The same fixed schema serves all three tables: fields filled in by later
/// stages stay `None` (empty CSV cells) until that stage runs. Created by the
/// search aggregator, enriched by the abstract cache (`abstract_ref`) and the
/// relevance scorer (`score`, `rationale`), never deleted mid-run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    /// Stable join key, assigned once at search time.
    pub row_id: RowId,
    /// Paper title as reported by the provider.
    pub title: String,
    /// Comma-joined author display names.
    pub authors: String,
    /// Publication year.
    pub year: i32,
    /// Venue string as reported by the provider.
    pub venue: String,
    /// Display label of the search target that surfaced the hit.
    pub source: String,
    /// Query keyword that surfaced the hit.
    pub keyword: String,
    /// DOI extracted from the electronic-edition URL, if any.
    #[serde(default)]
    pub doi: Option<String>,
    /// Electronic-edition URL, if any.
    #[serde(default)]
    pub url: Option<String>,
    /// Address of the cached abstract document (set by the abstract stage).
    #[serde(default)]
    pub abstract_ref: Option<String>,
    /// Relevance score (set by the scoring stage).
    #[serde(default)]
    pub score: Option<f64>,
    /// Scoring rationale (set by the scoring stage).
    #[serde(default)]
    pub rationale: Option<String>,
}

impl PaperRecord {
    /// Number of authors in the comma-joined display string.
    pub fn author_count(&self) -> usize {
        self.authors
            .split(',')
            .filter(|a| !a.trim().is_empty())
            .count()
    }
}

// ---------------------------------------------------------------------------
// AbstractDocument
// ---------------------------------------------------------------------------

/// The `abstracts/<row_id>.json` payload: one paper's abstract plus metadata.
///
/// Stored as an individually addressable unit and referenced from the table
/// by `abstract_ref`, keeping the main table small and the cache independent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbstractDocument {
    /// Owning record.
    pub row_id: RowId,
    /// Paper title at fetch time.
    pub title: String,
    /// DOI used for the lookup, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    /// Abstract text.
    #[serde(rename = "abstract")]
    pub text: String,
    /// SHA-256 hash of the abstract text.
    pub content_hash: String,
    /// When the abstract was fetched.
    pub fetched_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Terminal scoring state for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreStatus {
    /// The record was scored and belongs in the analysis table.
    Scored,
    /// All retry attempts were exhausted; excluded from the analysis table.
    Failed,
}

/// One line of the checkpoint log: the durable scoring outcome for a RowId.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub row_id: RowId,
    /// Present iff `status == Scored`.
    #[serde(default)]
    pub score: Option<f64>,
    /// Scoring rationale, or the final error message for failed entries.
    #[serde(default)]
    pub rationale: Option<String>,
    pub status: ScoreStatus,
    /// When the entry was recorded.
    pub at: DateTime<Utc>,
}

impl CheckpointEntry {
    /// Entry for a successfully parsed scoring response.
    pub fn scored(row_id: RowId, score: f64, rationale: impl Into<String>) -> Self {
        Self {
            row_id,
            score: Some(score),
            rationale: Some(rationale.into()),
            status: ScoreStatus::Scored,
            at: Utc::now(),
        }
    }

    /// Entry for a record whose retry budget is exhausted.
    pub fn failed(row_id: RowId, reason: impl Into<String>) -> Self {
        Self {
            row_id,
            score: None,
            rationale: Some(reason.into()),
            status: ScoreStatus::Failed,
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_id_from_index_is_one_based() {
        assert_eq!(RowId::from_index(0).as_str(), "r1");
        assert_eq!(RowId::from_index(41).as_str(), "r42");
    }

    #[test]
    fn row_id_serializes_transparently() {
        let id = RowId::from("r7");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"r7\"");
        let parsed: RowId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, id);
    }

    #[test]
    fn author_count_ignores_empty_segments() {
        let record = PaperRecord {
            row_id: RowId::from("r1"),
            title: "Planning X".into(),
            authors: "Ada Lovelace, Alan Turing, ".into(),
            year: 2023,
            venue: "ICRA".into(),
            source: "ICRA".into(),
            keyword: "planning".into(),
            doi: None,
            url: None,
            abstract_ref: None,
            score: None,
            rationale: None,
        };
        assert_eq!(record.author_count(), 2);
    }

    #[test]
    fn checkpoint_entry_roundtrip() {
        let entry = CheckpointEntry::scored(RowId::from("r3"), 4.0, "on-topic");
        let line = serde_json::to_string(&entry).expect("serialize");
        let parsed: CheckpointEntry = serde_json::from_str(&line).expect("deserialize");
        assert_eq!(parsed.status, ScoreStatus::Scored);
        assert_eq!(parsed.score, Some(4.0));

        let failed = CheckpointEntry::failed(RowId::from("r4"), "network error: timeout");
        let line = serde_json::to_string(&failed).expect("serialize");
        assert!(line.contains("\"failed\""));
        let parsed: CheckpointEntry = serde_json::from_str(&line).expect("deserialize");
        assert_eq!(parsed.score, None);
    }

    #[test]
    fn abstract_document_field_name() {
        let doc = AbstractDocument {
            row_id: RowId::from("r1"),
            title: "Planning X".into(),
            doi: Some("10.1234/xyz".into()),
            text: "We study planning.".into(),
            content_hash: "deadbeef".into(),
            fetched_at: Utc::now(),
        };
        let json = serde_json::to_string(&doc).expect("serialize");
        // The text field serializes under the conventional "abstract" key.
        assert!(json.contains("\"abstract\":\"We study planning.\""));
    }
}
