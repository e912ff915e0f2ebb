//! Finalization: dedup, staged rewrite, summary, document bookkeeping.

use std::time::Instant;

use chrono::Utc;
use serde_json::json;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::events::{EventEmitter, EventStatus, EventType, ProcessingEvent, Stage};
use crate::pipeline::dedup::{dedupe_provisions, dedupe_rules};
use crate::pipeline::prompts;
use crate::traits::{DocumentStore, Oracle, OracleOptions};
use crate::types::{ComplianceRule, DocumentId, DocumentStatus, Provision, RunId};

/// Finalize a full/resume run.
///
/// Re-reads the whole stored result set (so parts processed by earlier runs
/// still contribute), dedups across it, rewrites the document's results
/// under a fresh run id, generates the review summary, and parks the
/// document in `pending` with its totals recorded.
///
/// Returns `(total_provisions, total_rules)` after dedup.
pub async fn finalize_document<S, O>(
    store: &S,
    oracle: &O,
    events: &EventEmitter<'_, S>,
    config: &PipelineConfig,
    document_id: DocumentId,
    parts_processed: usize,
    started: Instant,
) -> Result<(usize, usize)>
where
    S: DocumentStore,
    O: Oracle,
{
    events
        .emit(
            ProcessingEvent::new(
                document_id,
                EventType::StageStarted,
                EventStatus::InProgress,
                "Deduplicating and persisting extraction results",
            )
            .with_stage(Stage::Finalization),
        )
        .await;

    let provisions = dedupe_provisions(store.list_provisions(document_id).await?);
    let rules = dedupe_rules(store.list_rules(document_id).await?);

    let run_id = RunId::new();
    store
        .replace_document_results(document_id, run_id, &provisions, &rules)
        .await?;

    let document = store
        .get_document(document_id)
        .await?
        .ok_or(PipelineError::DocumentNotFound { id: document_id })?;

    let summary = generate_summary(
        oracle,
        config,
        &document.title,
        &provisions,
        &rules,
        parts_processed,
    )
    .await;
    store.set_document_summary(document_id, &summary).await?;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let mut meta = document.meta.clone();
    meta.stage = None;
    meta.progress = 100;
    meta.completed_at = Some(Utc::now());
    meta.total_provisions = Some(provisions.len());
    meta.total_rules = Some(rules.len());
    meta.parts_processed = Some(parts_processed);
    meta.processing_time_ms = Some(elapsed_ms);
    meta.error = None;
    store.update_document_meta(document_id, &meta).await?;
    store
        .update_document_status(document_id, DocumentStatus::Pending)
        .await?;

    events
        .emit(
            ProcessingEvent::new(
                document_id,
                EventType::StageCompleted,
                EventStatus::Completed,
                format!(
                    "Persisted {} provisions and {} rules",
                    provisions.len(),
                    rules.len()
                ),
            )
            .with_stage(Stage::Finalization)
            .with_details(json!({
                "total_provisions": provisions.len(),
                "total_rules": rules.len(),
                "elapsed_ms": elapsed_ms,
            })),
        )
        .await;

    Ok((provisions.len(), rules.len()))
}

/// Generate the review summary, falling back to a templated string on any
/// oracle failure. Summary generation is never allowed to fail the run.
pub async fn generate_summary<O: Oracle>(
    oracle: &O,
    config: &PipelineConfig,
    document_title: &str,
    provisions: &[Provision],
    rules: &[ComplianceRule],
    parts_processed: usize,
) -> String {
    let provision_titles: Vec<String> = provisions
        .iter()
        .take(config.summary_top_items)
        .map(|p| {
            if p.title.is_empty() {
                format!("Section {}", p.section_number)
            } else {
                format!("Section {} - {}", p.section_number, p.title)
            }
        })
        .collect();
    let rule_codes: Vec<String> = rules
        .iter()
        .take(config.summary_top_items)
        .map(|r| r.rule_code.clone())
        .collect();

    let options = OracleOptions {
        model: config.summary_model.clone(),
        max_tokens: Some(config.summary_max_tokens),
    };
    let user = prompts::summary_user_message(
        document_title,
        &provision_titles,
        &rule_codes,
        parts_processed,
    );

    match oracle.call(prompts::SUMMARY_PROMPT, &user, &options).await {
        Ok(response) => match response.get("summary").and_then(|v| v.as_str()) {
            Some(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
            _ => {
                tracing::warn!("Summary response missing text, using fallback");
                fallback_summary(provisions.len(), rules.len(), parts_processed)
            }
        },
        Err(err) => {
            tracing::warn!(error = %err, "Summary generation failed, using fallback");
            fallback_summary(provisions.len(), rules.len(), parts_processed)
        }
    }
}

/// Count-based summary used whenever the oracle cannot produce one.
pub fn fallback_summary(provisions: usize, rules: usize, parts_processed: usize) -> String {
    format!(
        "Processed {parts_processed} parts, extracting {provisions} provisions and {rules} compliance rules. Results are pending review."
    )
}
