//! Pipeline controller: orchestrates a full, resume, or single-part run.
//!
//! Processing is sequential across parts so oracle calls and events stay
//! deterministically ordered. Concurrent invocations on the same document
//! are not guarded against; one in-flight run per document is the caller's
//! responsibility.

use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::events::{EventEmitter, EventStatus, EventType, ProcessingEvent, Stage};
use crate::pipeline::finalize::finalize_document;
use crate::pipeline::processor::process_part;
use crate::pipeline::reclaimer::reclaim_stuck_parts;
use crate::traits::{DocumentStore, Oracle};
use crate::types::{Document, DocumentId, DocumentStatus, PartId, PartStatus};

/// How a run selects its part set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessMode {
    /// Reset every part to `pending` and reprocess from scratch.
    #[default]
    Full,

    /// Reclaim stuck parts, then process only `pending`/`failed` parts.
    Resume,
}

/// A processing trigger.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub document_id: DocumentId,

    pub mode: ProcessMode,

    /// When set, overrides `mode`: exactly this part is reprocessed and no
    /// other part's stored results are touched.
    pub reprocess_part_id: Option<PartId>,
}

impl ProcessRequest {
    pub fn full(document_id: DocumentId) -> Self {
        Self {
            document_id,
            mode: ProcessMode::Full,
            reprocess_part_id: None,
        }
    }

    pub fn resume(document_id: DocumentId) -> Self {
        Self {
            document_id,
            mode: ProcessMode::Resume,
            reprocess_part_id: None,
        }
    }

    pub fn single_part(document_id: DocumentId, part_id: PartId) -> Self {
        Self {
            document_id,
            mode: ProcessMode::Full,
            reprocess_part_id: Some(part_id),
        }
    }
}

/// Structured outcome of a run.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub document_id: DocumentId,

    /// Parts that reached `processed` in this run (skipped parts excluded).
    pub parts_processed: usize,

    /// Stored provision total after the run (post-dedup for full/resume).
    pub provisions_extracted: usize,

    /// Stored rule total after the run (post-dedup for full/resume).
    pub rules_extracted: usize,

    pub processing_time_ms: u64,

    /// True when the run stopped at a part boundary on an abort request.
    pub stopped: bool,

    /// On abort: how many parts the loop got through before stopping.
    pub parts_completed: Option<usize>,

    /// Single-part mode: the part that was reprocessed.
    pub part_id: Option<PartId>,

    /// Single-part mode: document-wide stored totals after the rewrite.
    pub total_provisions: Option<usize>,

    /// Single-part mode: document-wide stored totals after the rewrite.
    pub total_rules: Option<usize>,
}

impl ProcessReport {
    fn new(document_id: DocumentId, started: Instant) -> Self {
        Self {
            document_id,
            parts_processed: 0,
            provisions_extracted: 0,
            rules_extracted: 0,
            processing_time_ms: started.elapsed().as_millis() as u64,
            stopped: false,
            parts_completed: None,
            part_id: None,
            total_provisions: None,
            total_rules: None,
        }
    }
}

/// The document processing pipeline.
///
/// Generic over its storage backend and oracle so production runs against
/// Postgres and a real LLM while tests use in-memory fakes.
pub struct Pipeline<S, O> {
    store: S,
    oracle: O,
    config: PipelineConfig,
}

impl<S, O> Pipeline<S, O>
where
    S: DocumentStore,
    O: Oracle,
{
    pub fn new(store: S, oracle: O) -> Self {
        Self {
            store,
            oracle,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one processing invocation.
    ///
    /// Cancellation is cooperative and coarse-grained: the token and the
    /// document's abort flag are checked once per part boundary, never
    /// mid-part, so a part that is already mid-extraction always runs to
    /// completion (or failure) before an abort takes effect.
    pub async fn process(
        &self,
        request: &ProcessRequest,
        cancel: CancellationToken,
    ) -> Result<ProcessReport> {
        let started = Instant::now();
        let result = self.run(request, &cancel, started).await;

        // Only document-level storage failures are fatal enough to park the
        // document in processing_failed; part-level failures were already
        // isolated inside the loop.
        if let Err(err) = &result {
            if matches!(err, PipelineError::Storage(_)) {
                self.mark_document_failed(request.document_id, err).await;
            }
        }
        result
    }

    async fn run(
        &self,
        request: &ProcessRequest,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<ProcessReport> {
        let document = self
            .store
            .get_document(request.document_id)
            .await?
            .ok_or(PipelineError::DocumentNotFound {
                id: request.document_id,
            })?;
        let events = EventEmitter::new(&self.store);

        if let Some(part_id) = request.reprocess_part_id {
            return self
                .run_single_part(&document, part_id, &events, started)
                .await;
        }
        self.run_multi(&document, request.mode, &events, cancel, started)
            .await
    }

    async fn run_multi(
        &self,
        document: &Document,
        mode: ProcessMode,
        events: &EventEmitter<'_, S>,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<ProcessReport> {
        let document_id = document.id;

        let parts = match mode {
            ProcessMode::Full => {
                self.store.reset_parts(document_id).await?;
                self.store.list_parts(document_id).await?
            }
            ProcessMode::Resume => {
                reclaim_stuck_parts(&self.store, events, document_id, self.config.stale_after)
                    .await?;
                self.store
                    .list_parts_with_status(
                        document_id,
                        &[PartStatus::Pending, PartStatus::Failed],
                    )
                    .await?
            }
        };

        // Nothing left to resume: the document is ready for review as-is.
        if parts.is_empty() && mode == ProcessMode::Resume {
            self.store
                .update_document_status(document_id, DocumentStatus::Pending)
                .await?;
            let (total_provisions, total_rules) = self.store.count_results(document_id).await?;
            events
                .emit(ProcessingEvent::new(
                    document_id,
                    EventType::Completed,
                    EventStatus::Completed,
                    "No pending or failed parts; nothing to resume",
                ))
                .await;
            tracing::info!(document_id = %document_id, "Nothing to resume");
            let mut report = ProcessReport::new(document_id, started);
            report.provisions_extracted = total_provisions;
            report.rules_extracted = total_rules;
            return Ok(report);
        }

        let mut meta = document.meta.clone();
        meta.stage = Some(Stage::ProvisionExtraction);
        meta.progress = 0;
        meta.started_at = Some(Utc::now());
        meta.completed_at = None;
        meta.total_provisions = None;
        meta.total_rules = None;
        meta.parts_processed = None;
        meta.processing_time_ms = None;
        meta.error = None;
        self.store.update_document_meta(document_id, &meta).await?;
        self.store
            .update_document_status(document_id, DocumentStatus::Processing)
            .await?;

        tracing::info!(
            document_id = %document_id,
            mode = ?mode,
            parts = parts.len(),
            "Document processing started"
        );
        events
            .emit(
                ProcessingEvent::new(
                    document_id,
                    EventType::Started,
                    EventStatus::InProgress,
                    format!("Processing {} parts", parts.len()),
                )
                .with_details(json!({ "mode": mode, "parts": parts.len() })),
            )
            .await;

        let total = parts.len();
        let mut parts_processed = 0usize;

        for (index, part) in parts.iter().enumerate() {
            if cancel.is_cancelled() || self.store.abort_requested(document_id).await? {
                return self
                    .stop_on_abort(document_id, events, index, total, parts_processed, started)
                    .await;
            }

            match process_part(part, &self.store, &self.oracle, events, &self.config).await {
                Ok(outcome) => {
                    if !outcome.skipped {
                        parts_processed += 1;
                    }
                }
                Err(err) => {
                    // One bad part must not abort the document.
                    tracing::error!(
                        part_id = %part.id,
                        part_number = part.part_number,
                        error = %err,
                        "Part processing failed; continuing with remaining parts"
                    );
                    self.store
                        .update_part_status(part.id, PartStatus::Failed, Some(&err.to_string()))
                        .await?;
                    events
                        .emit(
                            ProcessingEvent::new(
                                document_id,
                                EventType::Failed,
                                EventStatus::Failed,
                                format!("Part {} failed: {err}", part.part_number),
                            )
                            .with_part(part.id)
                            .with_stage(Stage::RulesExtraction),
                        )
                        .await;
                }
            }

            let progress = ((index + 1) * 100 / total) as u8;
            self.store
                .update_document_progress(document_id, progress)
                .await?;
        }

        let (total_provisions, total_rules) = finalize_document(
            &self.store,
            &self.oracle,
            events,
            &self.config,
            document_id,
            parts_processed,
            started,
        )
        .await?;

        events
            .emit(
                ProcessingEvent::new(
                    document_id,
                    EventType::Completed,
                    EventStatus::Completed,
                    "Document processing completed",
                )
                .with_details(json!({
                    "parts_processed": parts_processed,
                    "total_provisions": total_provisions,
                    "total_rules": total_rules,
                })),
            )
            .await;
        tracing::info!(
            document_id = %document_id,
            parts_processed,
            total_provisions,
            total_rules,
            "Document processing completed"
        );

        let mut report = ProcessReport::new(document_id, started);
        report.parts_processed = parts_processed;
        report.provisions_extracted = total_provisions;
        report.rules_extracted = total_rules;
        Ok(report)
    }

    async fn stop_on_abort(
        &self,
        document_id: DocumentId,
        events: &EventEmitter<'_, S>,
        parts_completed: usize,
        total: usize,
        parts_processed: usize,
        started: Instant,
    ) -> Result<ProcessReport> {
        self.store.set_abort_requested(document_id, false).await?;
        self.store
            .update_document_status(document_id, DocumentStatus::Pending)
            .await?;

        tracing::warn!(
            document_id = %document_id,
            parts_completed,
            total,
            "Processing aborted by request"
        );
        events
            .emit(
                ProcessingEvent::new(
                    document_id,
                    EventType::Warning,
                    EventStatus::Completed,
                    format!("Processing stopped after {parts_completed} of {total} parts"),
                )
                .with_details(json!({ "parts_completed": parts_completed })),
            )
            .await;

        let mut report = ProcessReport::new(document_id, started);
        report.parts_processed = parts_processed;
        report.stopped = true;
        report.parts_completed = Some(parts_completed);
        Ok(report)
    }

    async fn run_single_part(
        &self,
        document: &Document,
        part_id: PartId,
        events: &EventEmitter<'_, S>,
        started: Instant,
    ) -> Result<ProcessReport> {
        let document_id = document.id;
        let part = self
            .store
            .get_part(part_id)
            .await?
            .ok_or(PipelineError::PartNotFound { id: part_id })?;
        if part.document_id != document_id {
            return Err(PipelineError::PartMismatch {
                part_id,
                document_id,
            });
        }

        let mut meta = document.meta.clone();
        meta.stage = Some(Stage::ProvisionExtraction);
        meta.error = None;
        self.store.update_document_meta(document_id, &meta).await?;
        self.store
            .update_document_status(document_id, DocumentStatus::Processing)
            .await?;
        events
            .emit(
                ProcessingEvent::new(
                    document_id,
                    EventType::Started,
                    EventStatus::InProgress,
                    format!("Reprocessing part {}", part.part_number),
                )
                .with_part(part_id),
            )
            .await;

        match process_part(&part, &self.store, &self.oracle, events, &self.config).await {
            Ok(outcome) => {
                // Only this part's rows were replaced; totals must reflect
                // every part's current stored rows, so re-query the store.
                let (total_provisions, total_rules) =
                    self.store.count_results(document_id).await?;

                meta.stage = None;
                meta.total_provisions = Some(total_provisions);
                meta.total_rules = Some(total_rules);
                self.store.update_document_meta(document_id, &meta).await?;
                self.store
                    .update_document_status(document_id, DocumentStatus::Pending)
                    .await?;

                events
                    .emit(
                        ProcessingEvent::new(
                            document_id,
                            EventType::Completed,
                            EventStatus::Completed,
                            format!("Part {} reprocessed", part.part_number),
                        )
                        .with_part(part_id)
                        .with_details(json!({
                            "provisions": outcome.provisions.len(),
                            "rules": outcome.rules.len(),
                            "total_provisions": total_provisions,
                            "total_rules": total_rules,
                        })),
                    )
                    .await;

                let mut report = ProcessReport::new(document_id, started);
                report.parts_processed = usize::from(!outcome.skipped);
                report.provisions_extracted = outcome.provisions.len();
                report.rules_extracted = outcome.rules.len();
                report.part_id = Some(part_id);
                report.total_provisions = Some(total_provisions);
                report.total_rules = Some(total_rules);
                Ok(report)
            }
            Err(err) => {
                self.store
                    .update_part_status(part_id, PartStatus::Failed, Some(&err.to_string()))
                    .await?;
                events
                    .emit(
                        ProcessingEvent::new(
                            document_id,
                            EventType::Failed,
                            EventStatus::Failed,
                            format!("Part {} failed: {err}", part.part_number),
                        )
                        .with_part(part_id)
                        .with_stage(Stage::RulesExtraction),
                    )
                    .await;
                self.store
                    .update_document_status(document_id, DocumentStatus::Pending)
                    .await?;
                Err(err)
            }
        }
    }

    /// Best-effort terminal mark after a document-level storage failure.
    async fn mark_document_failed(&self, document_id: DocumentId, err: &PipelineError) {
        if let Ok(Some(document)) = self.store.get_document(document_id).await {
            let mut meta = document.meta;
            meta.error = Some(err.to_string());
            let _ = self.store.update_document_meta(document_id, &meta).await;
            let _ = self
                .store
                .update_document_status(document_id, DocumentStatus::ProcessingFailed)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::testing::MockOracle;
    use crate::traits::{Oracle, OracleOptions};
    use crate::types::{Part, Provision};
    use async_trait::async_trait;
    use serde_json::json;

    /// Enough text to clear the minimum-content threshold.
    fn body(marker: &str) -> String {
        format!("{marker} Section 1. Every taxable person shall register for tax purposes. ")
            .repeat(3)
    }

    fn provisions_response(section: &str) -> serde_json::Value {
        json!({
            "provisions": [
                {"section_number": section, "title": "t", "content": format!("content of {section}"), "provision_type": "obligation"}
            ]
        })
    }

    fn seed_document(store: &MemoryStore, markers: &[&str]) -> (DocumentId, Vec<Part>) {
        let document = crate::types::Document::new("Tax Act 2025");
        let document_id = document.id;
        store.insert_document(document);

        let mut parts = Vec::new();
        for (i, marker) in markers.iter().enumerate() {
            let part = Part::new(document_id, i as i32 + 1, format!("Part {}", i + 1), body(marker));
            store.insert_part(part.clone());
            parts.push(part);
        }
        (document_id, parts)
    }

    async fn store_part_results(
        store: &MemoryStore,
        document_id: DocumentId,
        part: &Part,
        sections: &[&str],
    ) {
        use crate::traits::DocumentStore;
        let provisions: Vec<Provision> = sections
            .iter()
            .map(|s| Provision::new(document_id, part.id, part.part_number, *s, format!("old {s}")))
            .collect();
        store
            .replace_part_results(document_id, part.id, &provisions, &[])
            .await
            .unwrap();
        store
            .mark_part_processed(part.id, provisions.len() as i32, 0)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn full_mode_resets_processed_parts_and_reextracts() {
        let store = MemoryStore::new();
        let (document_id, parts) = seed_document(&store, &["alpha", "beta"]);
        // Part 2 was previously processed with stored rows.
        store_part_results(&store, document_id, &parts[1], &["90", "91", "92", "93", "94"]).await;

        let oracle = MockOracle::new()
            .with_response_when(&["legal analyst", "alpha"], provisions_response("1"))
            .with_response_when(&["legal analyst", "beta"], provisions_response("2"));

        let pipeline = Pipeline::new(store.clone(), oracle.clone());
        let report = pipeline
            .process(&ProcessRequest::full(document_id), CancellationToken::new())
            .await
            .unwrap();

        assert!(!report.stopped);
        assert_eq!(report.parts_processed, 2);
        assert_eq!(report.provisions_extracted, 2);

        // Part 2's five old provisions are gone; it was re-extracted from scratch.
        let sections: Vec<String> = store
            .provisions_for(document_id)
            .iter()
            .map(|p| p.section_number.clone())
            .collect();
        assert_eq!(sections, vec!["1", "2"]);

        // 2 parts x (1 provisions + 6 rule categories) + 1 summary call.
        assert_eq!(oracle.call_count(), 15);

        let document = store.document(document_id).unwrap();
        assert_eq!(document.status, DocumentStatus::Pending);
        assert_eq!(document.meta.progress, 100);
        assert_eq!(document.meta.total_provisions, Some(2));
        assert!(document.summary.is_some());
    }

    #[tokio::test]
    async fn resume_touches_only_pending_and_failed_parts() {
        let store = MemoryStore::new();
        let (document_id, parts) = seed_document(&store, &["alpha", "beta", "gamma"]);

        // Part 1 already processed in an earlier run, with stored rows.
        store_part_results(&store, document_id, &parts[0], &["10"]).await;
        // Part 3 failed in the earlier run.
        {
            use crate::traits::DocumentStore;
            store
                .update_part_status(parts[2].id, PartStatus::Failed, Some("oracle error"))
                .await
                .unwrap();
        }

        let oracle = MockOracle::new()
            .with_response_when(&["legal analyst", "beta"], provisions_response("20"))
            .with_response_when(&["legal analyst", "gamma"], provisions_response("30"));

        let pipeline = Pipeline::new(store.clone(), oracle.clone());
        let report = pipeline
            .process(&ProcessRequest::resume(document_id), CancellationToken::new())
            .await
            .unwrap();

        // Part 1 was never re-extracted.
        assert!(oracle
            .calls()
            .iter()
            .all(|call| !call.user.contains("alpha")));
        let untouched = store.part(parts[0].id).unwrap();
        assert_eq!(untouched.status, PartStatus::Processed);
        assert_eq!(untouched.provisions_count, 1);

        // But its stored rows still contribute to the final totals.
        assert_eq!(report.parts_processed, 2);
        assert_eq!(report.provisions_extracted, 3);
        assert_eq!(store.provisions_for(document_id).len(), 3);
    }

    #[tokio::test]
    async fn resume_with_nothing_pending_returns_without_oracle_calls() {
        let store = MemoryStore::new();
        let (document_id, parts) = seed_document(&store, &["alpha"]);
        store_part_results(&store, document_id, &parts[0], &["1", "2"]).await;

        let oracle = MockOracle::new();
        let pipeline = Pipeline::new(store.clone(), oracle.clone());
        let report = pipeline
            .process(&ProcessRequest::resume(document_id), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(oracle.call_count(), 0);
        assert_eq!(report.parts_processed, 0);
        assert_eq!(report.provisions_extracted, 2);
        assert_eq!(
            store.document(document_id).unwrap().status,
            DocumentStatus::Pending
        );
    }

    #[tokio::test]
    async fn preexisting_abort_flag_stops_before_the_first_part() {
        let store = MemoryStore::new();
        let (document_id, _) = seed_document(&store, &["alpha", "beta"]);
        {
            use crate::traits::DocumentStore;
            store.set_abort_requested(document_id, true).await.unwrap();
        }

        let oracle = MockOracle::new();
        let pipeline = Pipeline::new(store.clone(), oracle.clone());
        let report = pipeline
            .process(&ProcessRequest::full(document_id), CancellationToken::new())
            .await
            .unwrap();

        assert!(report.stopped);
        assert_eq!(report.parts_completed, Some(0));
        assert_eq!(oracle.call_count(), 0);
        assert!(store.provisions_for(document_id).is_empty());

        let document = store.document(document_id).unwrap();
        assert_eq!(document.status, DocumentStatus::Pending);
        assert!(!document.meta.abort_requested);
    }

    /// Oracle that raises the document's abort flag as a side effect of
    /// every call, simulating a user pressing stop mid-part.
    #[derive(Clone)]
    struct AbortRaisingOracle {
        inner: MockOracle,
        store: MemoryStore,
        document_id: DocumentId,
    }

    #[async_trait]
    impl Oracle for AbortRaisingOracle {
        async fn call(
            &self,
            system_instruction: &str,
            user_message: &str,
            options: &OracleOptions,
        ) -> crate::error::Result<serde_json::Value> {
            use crate::traits::DocumentStore;
            let result = self.inner.call(system_instruction, user_message, options).await;
            self.store
                .set_abort_requested(self.document_id, true)
                .await
                .ok();
            result
        }
    }

    #[tokio::test]
    async fn abort_mid_part_takes_effect_at_the_next_boundary() {
        let store = MemoryStore::new();
        let (document_id, parts) = seed_document(&store, &["alpha", "beta", "gamma"]);

        let oracle = AbortRaisingOracle {
            inner: MockOracle::new()
                .with_response_when(&["legal analyst", "alpha"], provisions_response("1")),
            store: store.clone(),
            document_id,
        };

        let pipeline = Pipeline::new(store.clone(), oracle);
        let report = pipeline
            .process(&ProcessRequest::full(document_id), CancellationToken::new())
            .await
            .unwrap();

        // Part 1 ran to completion; the abort was honored before part 2.
        assert!(report.stopped);
        assert_eq!(report.parts_completed, Some(1));
        assert_eq!(report.parts_processed, 1);

        // Part 1 kept its rows; no part beyond it has any.
        let provisions = store.provisions_for(document_id);
        assert_eq!(provisions.len(), 1);
        assert!(provisions.iter().all(|p| p.source_part_id == parts[0].id));

        let document = store.document(document_id).unwrap();
        assert_eq!(document.status, DocumentStatus::Pending);
        assert!(!document.meta.abort_requested);
        assert_eq!(store.part(parts[1].id).unwrap().status, PartStatus::Pending);
    }

    #[tokio::test]
    async fn one_failing_part_does_not_abort_the_document() {
        let store = MemoryStore::new();
        let (document_id, parts) = seed_document(&store, &["alpha", "beta"]);

        let oracle = MockOracle::new()
            .with_failure("alpha")
            .with_response_when(&["legal analyst", "beta"], provisions_response("2"));

        let pipeline = Pipeline::new(store.clone(), oracle);
        let report = pipeline
            .process(&ProcessRequest::full(document_id), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.parts_processed, 1);
        assert_eq!(report.provisions_extracted, 1);

        let failed = store.part(parts[0].id).unwrap();
        assert_eq!(failed.status, PartStatus::Failed);
        assert!(failed.meta.error.is_some());
        assert_eq!(store.part(parts[1].id).unwrap().status, PartStatus::Processed);

        // The failure is on record, at the rules_extraction stage.
        assert!(store.events().iter().any(|e| {
            e.event_type == EventType::Failed && e.stage == Some(Stage::RulesExtraction)
        }));
        assert_eq!(
            store.document(document_id).unwrap().status,
            DocumentStatus::Pending
        );
    }

    #[tokio::test]
    async fn single_part_reprocess_leaves_other_parts_rows_intact() {
        let store = MemoryStore::new();
        let (document_id, parts) = seed_document(&store, &["alpha", "beta"]);
        store_part_results(&store, document_id, &parts[0], &["10", "11"]).await;
        store_part_results(&store, document_id, &parts[1], &["20"]).await;

        let oracle = MockOracle::new().with_response_when(
            &["legal analyst", "beta"],
            json!({
                "provisions": [
                    {"section_number": "20", "content": "new"},
                    {"section_number": "21", "content": "new"},
                    {"section_number": "22", "content": "new"}
                ]
            }),
        );

        let pipeline = Pipeline::new(store.clone(), oracle);
        let request = ProcessRequest::single_part(document_id, parts[1].id);
        let report = pipeline
            .process(&request, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.part_id, Some(parts[1].id));
        assert_eq!(report.provisions_extracted, 3);
        // Totals are the sum across all parts' current stored rows.
        assert_eq!(report.total_provisions, Some(5));

        let part1_rows: Vec<_> = store
            .provisions_for(document_id)
            .into_iter()
            .filter(|p| p.source_part_id == parts[0].id)
            .collect();
        assert_eq!(part1_rows.len(), 2);
        assert!(part1_rows.iter().all(|p| p.content.starts_with("old")));
    }

    #[tokio::test]
    async fn single_part_failure_marks_the_part_and_surfaces_the_error() {
        let store = MemoryStore::new();
        let (document_id, parts) = seed_document(&store, &["alpha"]);

        let oracle = MockOracle::new().with_failure("alpha");
        let pipeline = Pipeline::new(store.clone(), oracle);
        let request = ProcessRequest::single_part(document_id, parts[0].id);
        let result = pipeline.process(&request, CancellationToken::new()).await;

        assert!(matches!(result, Err(PipelineError::Oracle(_))));
        assert_eq!(store.part(parts[0].id).unwrap().status, PartStatus::Failed);
        assert_eq!(
            store.document(document_id).unwrap().status,
            DocumentStatus::Pending
        );
    }

    #[tokio::test]
    async fn unknown_document_is_an_error() {
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(store, MockOracle::new());
        let result = pipeline
            .process(
                &ProcessRequest::full(DocumentId::new()),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(PipelineError::DocumentNotFound { .. })));
    }

    #[tokio::test]
    async fn duplicate_sections_across_parts_are_deduplicated() {
        let store = MemoryStore::new();
        let (document_id, _) = seed_document(&store, &["alpha", "beta"]);

        // Both parts report section 7; beta's copy has the longer content.
        let oracle = MockOracle::new()
            .with_response_when(
                &["legal analyst", "alpha"],
                json!({"provisions": [{"section_number": "7", "content": "short"}]}),
            )
            .with_response_when(
                &["legal analyst", "beta"],
                json!({"provisions": [{"section_number": "7.", "content": "much longer winning content"}]}),
            )
            .with_response_when(
                &["compliance engineer", "rate", "alpha"],
                json!({"rules": [{"rule_code": "R1", "rule_name": "a", "parameters": {"rate": 5}}]}),
            )
            .with_response_when(
                &["compliance engineer", "rate", "beta"],
                json!({"rules": [{"rule_code": "r-1", "rule_name": "b", "parameters": {"band": "low"}}]}),
            );

        let pipeline = Pipeline::new(store.clone(), oracle);
        let report = pipeline
            .process(&ProcessRequest::full(document_id), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.provisions_extracted, 1);
        let provisions = store.provisions_for(document_id);
        assert_eq!(provisions[0].content, "much longer winning content");

        // Duplicate rule codes merged with a parameter union.
        assert_eq!(report.rules_extracted, 1);
        let rules = store.rules_for(document_id);
        assert_eq!(rules[0].parameters.get("rate"), Some(&json!(5)));
        assert_eq!(rules[0].parameters.get("band"), Some(&json!("low")));
    }
}
