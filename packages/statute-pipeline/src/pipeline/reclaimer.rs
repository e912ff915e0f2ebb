//! Stuck-work reclamation.
//!
//! A crashed or killed run leaves its in-flight part stranded in
//! `processing`. Before a resume selects its part set, anything that has
//! been `processing` longer than the staleness threshold is reset to
//! `failed` so the resume picks it up again.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use crate::error::Result;
use crate::events::{EventEmitter, EventStatus, EventType, ProcessingEvent};
use crate::traits::DocumentStore;
use crate::types::{DocumentId, PartStatus};

/// Reset parts stuck in `processing` beyond `stale_after` to `failed`.
///
/// Emits one warning event listing the affected part numbers. Returns the
/// affected part numbers in ascending order.
pub async fn reclaim_stuck_parts<S: DocumentStore>(
    store: &S,
    events: &EventEmitter<'_, S>,
    document_id: DocumentId,
    stale_after: Duration,
) -> Result<Vec<i32>> {
    let cutoff = Utc::now() - chrono::Duration::seconds(stale_after.as_secs() as i64);
    let stuck = store.find_stuck_parts(document_id, cutoff).await?;
    if stuck.is_empty() {
        return Ok(Vec::new());
    }

    let minutes = stale_after.as_secs() / 60;
    let mut part_numbers = Vec::with_capacity(stuck.len());

    for part in &stuck {
        store
            .update_part_status(
                part.id,
                PartStatus::Failed,
                Some(&format!(
                    "processing timed out after {minutes} minutes; reset for retry"
                )),
            )
            .await?;
        part_numbers.push(part.part_number);
    }
    part_numbers.sort_unstable();

    tracing::warn!(
        document_id = %document_id,
        parts = ?part_numbers,
        "Reclaimed parts stuck in processing"
    );

    events
        .emit(
            ProcessingEvent::new(
                document_id,
                EventType::Warning,
                EventStatus::Completed,
                format!("Reset {} stuck parts for retry", part_numbers.len()),
            )
            .with_details(json!({ "part_numbers": part_numbers })),
        )
        .await;

    Ok(part_numbers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::types::{Document, Part};

    #[tokio::test]
    async fn stale_processing_part_is_reset_to_failed() {
        let store = MemoryStore::new();
        let document = Document::new("Test Act");
        let mut stuck = Part::new(document.id, 2, "Part II", "text").with_status(PartStatus::Processing);
        stuck.updated_at = Utc::now() - chrono::Duration::minutes(20);
        let fresh = Part::new(document.id, 3, "Part III", "text").with_status(PartStatus::Processing);
        let document_id = document.id;
        let stuck_id = stuck.id;
        let fresh_id = fresh.id;
        store.insert_document(document);
        store.insert_part(stuck);
        store.insert_part(fresh);

        let emitter = EventEmitter::new(&store);
        let reclaimed = reclaim_stuck_parts(
            &store,
            &emitter,
            document_id,
            Duration::from_secs(15 * 60),
        )
        .await
        .unwrap();

        assert_eq!(reclaimed, vec![2]);

        let reset = store.part(stuck_id).unwrap();
        assert_eq!(reset.status, PartStatus::Failed);
        assert!(reset.meta.error.as_deref().unwrap().contains("timed out"));

        // A part still within the threshold is left alone.
        assert_eq!(store.part(fresh_id).unwrap().status, PartStatus::Processing);

        // One warning event listing the affected part numbers.
        let events = store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Warning);
        assert_eq!(events[0].details["part_numbers"], serde_json::json!([2]));
    }

    #[tokio::test]
    async fn nothing_to_reclaim_emits_nothing() {
        let store = MemoryStore::new();
        let document = Document::new("Test Act");
        let document_id = document.id;
        store.insert_document(document);

        let emitter = EventEmitter::new(&store);
        let reclaimed = reclaim_stuck_parts(
            &store,
            &emitter,
            document_id,
            Duration::from_secs(15 * 60),
        )
        .await
        .unwrap();

        assert!(reclaimed.is_empty());
        assert!(store.events().is_empty());
    }
}
