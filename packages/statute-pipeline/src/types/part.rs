use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DocumentId, PartId};

/// Processing status of a part.
///
/// Transitions within one run: `pending → processing → {processed | failed |
/// skipped}`. The reclaimer moves `processing → failed` on timeout, and a
/// full reprocess resets any state back to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartStatus {
    Pending,
    Processing,
    Processed,
    Failed,
    Skipped,
}

impl PartStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartStatus::Pending => "pending",
            PartStatus::Processing => "processing",
            PartStatus::Processed => "processed",
            PartStatus::Failed => "failed",
            PartStatus::Skipped => "skipped",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "pending" => Some(PartStatus::Pending),
            "processing" => Some(PartStatus::Processing),
            "processed" => Some(PartStatus::Processed),
            "failed" => Some(PartStatus::Failed),
            "skipped" => Some(PartStatus::Skipped),
            _ => None,
        }
    }

    /// Whether a part in this state is eligible for a resume run.
    pub fn is_resumable(&self) -> bool {
        matches!(self, PartStatus::Pending | PartStatus::Failed)
    }
}

impl std::fmt::Display for PartStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Part metadata, persisted as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartMeta {
    pub error: Option<String>,
}

/// One contiguous chunk of a document's text, processed independently.
///
/// `raw_text` is immutable once ingested; status transitions drive the
/// pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    pub id: PartId,
    pub document_id: DocumentId,
    pub part_number: i32,
    pub title: String,
    pub raw_text: String,
    pub status: PartStatus,
    pub provisions_count: i32,
    pub rules_count: i32,
    pub processed_at: Option<DateTime<Utc>>,
    pub meta: PartMeta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Part {
    pub fn new(
        document_id: DocumentId,
        part_number: i32,
        title: impl Into<String>,
        raw_text: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PartId::new(),
            document_id,
            part_number,
            title: title.into(),
            raw_text: raw_text.into(),
            status: PartStatus::Pending,
            provisions_count: 0,
            rules_count: 0,
            processed_at: None,
            meta: PartMeta::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: PartStatus) -> Self {
        self.status = status;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resumable_statuses() {
        assert!(PartStatus::Pending.is_resumable());
        assert!(PartStatus::Failed.is_resumable());
        assert!(!PartStatus::Processing.is_resumable());
        assert!(!PartStatus::Processed.is_resumable());
        assert!(!PartStatus::Skipped.is_resumable());
    }
}
