//! Processing events - an append-only log of stage transitions.
//!
//! Events are strictly additive observability: emission failure is logged
//! and swallowed, never propagated to the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::traits::DocumentStore;
use crate::types::{DocumentId, EventId, PartId};

/// Kind of processing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Started,
    StageStarted,
    StageCompleted,
    Completed,
    Failed,
    Retried,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Started => "started",
            EventType::StageStarted => "stage_started",
            EventType::StageCompleted => "stage_completed",
            EventType::Completed => "completed",
            EventType::Failed => "failed",
            EventType::Retried => "retried",
            EventType::Warning => "warning",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ProvisionExtraction,
    RulesExtraction,
    Finalization,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ProvisionExtraction => "provision_extraction",
            Stage::RulesExtraction => "rules_extraction",
            Stage::Finalization => "finalization",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "provision_extraction" => Some(Stage::ProvisionExtraction),
            "rules_extraction" => Some(Stage::RulesExtraction),
            "finalization" => Some(Stage::Finalization),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome status carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::InProgress => "in_progress",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
            EventStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the append-only processing log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingEvent {
    pub id: EventId,
    pub document_id: DocumentId,
    pub part_id: Option<PartId>,
    pub event_type: EventType,
    pub stage: Option<Stage>,
    pub status: EventStatus,
    pub message: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ProcessingEvent {
    pub fn new(
        document_id: DocumentId,
        event_type: EventType,
        status: EventStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            document_id,
            part_id: None,
            event_type,
            stage: None,
            status,
            message: message.into(),
            details: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_part(mut self, part_id: PartId) -> Self {
        self.part_id = Some(part_id);
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Fire-and-forget event sink over a [`DocumentStore`].
///
/// Append errors are logged locally and swallowed so that observability can
/// never become a new source of pipeline failure.
pub struct EventEmitter<'a, S: DocumentStore> {
    store: &'a S,
}

impl<'a, S: DocumentStore> EventEmitter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn emit(&self, event: ProcessingEvent) {
        if let Err(err) = self.store.append_event(&event).await {
            tracing::warn!(
                document_id = %event.document_id,
                event_type = %event.event_type,
                error = %err,
                "Failed to append processing event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, Result};
    use crate::types::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    /// Store whose event sink always fails.
    struct BrokenEventStore;

    #[async_trait]
    impl DocumentStore for BrokenEventStore {
        async fn get_document(&self, _id: DocumentId) -> Result<Option<Document>> {
            unimplemented!()
        }
        async fn update_document_status(
            &self,
            _id: DocumentId,
            _status: DocumentStatus,
        ) -> Result<()> {
            unimplemented!()
        }
        async fn update_document_meta(&self, _id: DocumentId, _meta: &DocumentMeta) -> Result<()> {
            unimplemented!()
        }
        async fn update_document_progress(&self, _id: DocumentId, _progress: u8) -> Result<()> {
            unimplemented!()
        }
        async fn set_document_summary(&self, _id: DocumentId, _summary: &str) -> Result<()> {
            unimplemented!()
        }
        async fn abort_requested(&self, _id: DocumentId) -> Result<bool> {
            unimplemented!()
        }
        async fn set_abort_requested(&self, _id: DocumentId, _requested: bool) -> Result<()> {
            unimplemented!()
        }
        async fn get_part(&self, _id: PartId) -> Result<Option<Part>> {
            unimplemented!()
        }
        async fn list_parts(&self, _document_id: DocumentId) -> Result<Vec<Part>> {
            unimplemented!()
        }
        async fn list_parts_with_status(
            &self,
            _document_id: DocumentId,
            _statuses: &[PartStatus],
        ) -> Result<Vec<Part>> {
            unimplemented!()
        }
        async fn reset_parts(&self, _document_id: DocumentId) -> Result<()> {
            unimplemented!()
        }
        async fn update_part_status(
            &self,
            _id: PartId,
            _status: PartStatus,
            _error: Option<&str>,
        ) -> Result<()> {
            unimplemented!()
        }
        async fn mark_part_processed(
            &self,
            _id: PartId,
            _provisions_count: i32,
            _rules_count: i32,
        ) -> Result<()> {
            unimplemented!()
        }
        async fn find_stuck_parts(
            &self,
            _document_id: DocumentId,
            _stale_before: DateTime<Utc>,
        ) -> Result<Vec<Part>> {
            unimplemented!()
        }
        async fn replace_part_results(
            &self,
            _document_id: DocumentId,
            _part_id: PartId,
            _provisions: &[Provision],
            _rules: &[ComplianceRule],
        ) -> Result<()> {
            unimplemented!()
        }
        async fn replace_document_results(
            &self,
            _document_id: DocumentId,
            _run_id: RunId,
            _provisions: &[Provision],
            _rules: &[ComplianceRule],
        ) -> Result<()> {
            unimplemented!()
        }
        async fn list_provisions(&self, _document_id: DocumentId) -> Result<Vec<Provision>> {
            unimplemented!()
        }
        async fn list_rules(&self, _document_id: DocumentId) -> Result<Vec<ComplianceRule>> {
            unimplemented!()
        }
        async fn count_results(&self, _document_id: DocumentId) -> Result<(usize, usize)> {
            unimplemented!()
        }
        async fn append_event(&self, _event: &ProcessingEvent) -> Result<()> {
            Err(PipelineError::storage("event sink unavailable"))
        }
    }

    #[tokio::test]
    async fn emit_swallows_store_errors() {
        let store = BrokenEventStore;
        let emitter = EventEmitter::new(&store);

        // Must not panic or surface the storage error.
        emitter
            .emit(ProcessingEvent::new(
                DocumentId::new(),
                EventType::Warning,
                EventStatus::Completed,
                "best effort",
            ))
            .await;
    }
}
