use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::events::Stage;
use crate::types::DocumentId;

/// Lifecycle status of a document.
///
/// `pending` doubles as "ready for human review": the pipeline parks a
/// document there after a completed run, an aborted run, or an empty resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Pending,
    Processing,
    Processed,
    ProcessingFailed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
            DocumentStatus::ProcessingFailed => "processing_failed",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "draft" => Some(DocumentStatus::Draft),
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "processed" => Some(DocumentStatus::Processed),
            "processing_failed" => Some(DocumentStatus::ProcessingFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared control/state surface for a document, persisted as JSON metadata.
///
/// `abort_requested` is the flag the controller polls at part boundaries;
/// `progress` is non-decreasing within a single run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentMeta {
    pub stage: Option<Stage>,
    pub progress: u8,
    pub abort_requested: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_provisions: Option<usize>,
    pub total_rules: Option<usize>,
    pub parts_processed: Option<usize>,
    pub processing_time_ms: Option<u64>,
    pub error: Option<String>,
}

/// A regulatory document, composed of ordered parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub status: DocumentStatus,
    pub effective_date: Option<NaiveDate>,
    pub summary: Option<String>,
    pub meta: DocumentMeta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: DocumentId::new(),
            title: title.into(),
            status: DocumentStatus::Draft,
            effective_date: None,
            summary: None,
            meta: DocumentMeta::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: DocumentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_effective_date(mut self, date: NaiveDate) -> Self {
        self.effective_date = Some(date);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_round_trip() {
        for status in [
            DocumentStatus::Draft,
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Processed,
            DocumentStatus::ProcessingFailed,
        ] {
            assert_eq!(DocumentStatus::from_label(status.as_str()), Some(status));
        }
        assert_eq!(DocumentStatus::from_label("bogus"), None);
    }
}
