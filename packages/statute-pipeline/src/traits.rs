//! Core trait seams: the segment store and the extraction oracle.
//!
//! Both are async traits so the pipeline can run against Postgres and a real
//! LLM in production, and against in-memory fakes in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::events::ProcessingEvent;
use crate::types::{
    ComplianceRule, Document, DocumentId, DocumentMeta, DocumentStatus, Part, PartId, PartStatus,
    Provision, RunId,
};

/// Storage for documents, parts, extraction results, and processing events.
///
/// Result rows are versioned by [`RunId`]: each document points at its
/// active run, rewrites insert under a fresh run and flip the pointer in one
/// transaction, so a crash mid-rewrite never leaves a document with zero
/// rows.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // Documents
    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>>;
    async fn update_document_status(&self, id: DocumentId, status: DocumentStatus) -> Result<()>;
    async fn update_document_meta(&self, id: DocumentId, meta: &DocumentMeta) -> Result<()>;

    /// Targeted progress update; must not clobber other metadata fields
    /// (in particular a concurrently raised abort flag).
    async fn update_document_progress(&self, id: DocumentId, progress: u8) -> Result<()>;

    async fn set_document_summary(&self, id: DocumentId, summary: &str) -> Result<()>;

    /// Read the cooperative-cancellation flag.
    async fn abort_requested(&self, id: DocumentId) -> Result<bool>;

    /// Raise or clear the cooperative-cancellation flag.
    async fn set_abort_requested(&self, id: DocumentId, requested: bool) -> Result<()>;

    // Parts
    async fn get_part(&self, id: PartId) -> Result<Option<Part>>;

    /// All parts of a document, ordered by part number.
    async fn list_parts(&self, document_id: DocumentId) -> Result<Vec<Part>>;

    /// Parts of a document in any of the given statuses, ordered by part
    /// number.
    async fn list_parts_with_status(
        &self,
        document_id: DocumentId,
        statuses: &[PartStatus],
    ) -> Result<Vec<Part>>;

    /// Reset every part of a document to `pending`, clearing counts,
    /// errors, and processing timestamps (full-reprocess semantics).
    async fn reset_parts(&self, document_id: DocumentId) -> Result<()>;

    async fn update_part_status(
        &self,
        id: PartId,
        status: PartStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Mark a part `processed` with its extraction counts and timestamp.
    async fn mark_part_processed(
        &self,
        id: PartId,
        provisions_count: i32,
        rules_count: i32,
    ) -> Result<()>;

    /// Parts stuck in `processing` whose last update predates the cutoff.
    async fn find_stuck_parts(
        &self,
        document_id: DocumentId,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<Part>>;

    // Extraction results
    /// Replace the stored provisions/rules of a single part, leaving other
    /// parts' rows untouched.
    async fn replace_part_results(
        &self,
        document_id: DocumentId,
        part_id: PartId,
        provisions: &[Provision],
        rules: &[ComplianceRule],
    ) -> Result<()>;

    /// Replace the whole document's stored results: write rows under
    /// `run_id`, flip the document's active-run pointer, and drop rows from
    /// older runs, all in one transaction.
    async fn replace_document_results(
        &self,
        document_id: DocumentId,
        run_id: RunId,
        provisions: &[Provision],
        rules: &[ComplianceRule],
    ) -> Result<()>;

    /// All stored provisions of a document's active run, ordered by source
    /// part number.
    async fn list_provisions(&self, document_id: DocumentId) -> Result<Vec<Provision>>;

    /// All stored rules of a document's active run, ordered by source part.
    async fn list_rules(&self, document_id: DocumentId) -> Result<Vec<ComplianceRule>>;

    /// (provisions, rules) counts across the document's active run.
    async fn count_results(&self, document_id: DocumentId) -> Result<(usize, usize)>;

    // Events
    async fn append_event(&self, event: &ProcessingEvent) -> Result<()>;
}

/// Per-call options for the oracle.
#[derive(Debug, Clone, Default)]
pub struct OracleOptions {
    /// Model override; `None` uses the client's default.
    pub model: Option<String>,

    /// Output token budget for the call.
    pub max_tokens: Option<u32>,
}

/// The external text-generation service performing extraction and
/// summarization.
///
/// Implementations wrap a specific provider and own their retry/backoff.
/// Returned JSON is untrusted: the pipeline validates every enumerated
/// field against its allow-list before persistence.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Send a system instruction and a user message, returning the parsed
    /// JSON response.
    async fn call(
        &self,
        system_instruction: &str,
        user_message: &str,
        options: &OracleOptions,
    ) -> Result<serde_json::Value>;
}
