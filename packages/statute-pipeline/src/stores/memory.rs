//! In-memory storage implementation for testing and development.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::events::ProcessingEvent;
use crate::traits::DocumentStore;
use crate::types::{
    ComplianceRule, Document, DocumentId, DocumentMeta, DocumentStatus, Part, PartId, PartStatus,
    Provision, RunId,
};

/// In-memory store for documents, parts, results, and events.
///
/// Useful for tests and development; data is lost on restart. Cloning is
/// cheap and clones share the same underlying state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    documents: Arc<RwLock<HashMap<DocumentId, Document>>>,
    parts: Arc<RwLock<HashMap<PartId, Part>>>,
    provisions: Arc<RwLock<HashMap<DocumentId, Vec<Provision>>>>,
    rules: Arc<RwLock<HashMap<DocumentId, Vec<ComplianceRule>>>>,
    events: Arc<RwLock<Vec<ProcessingEvent>>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document fixture.
    pub fn insert_document(&self, document: Document) {
        self.documents
            .write()
            .unwrap()
            .insert(document.id, document);
    }

    /// Seed a part fixture, preserving its timestamps as given.
    pub fn insert_part(&self, part: Part) {
        self.parts.write().unwrap().insert(part.id, part);
    }

    /// Current state of a document.
    pub fn document(&self, id: DocumentId) -> Option<Document> {
        self.documents.read().unwrap().get(&id).cloned()
    }

    /// Current state of a part.
    pub fn part(&self, id: PartId) -> Option<Part> {
        self.parts.read().unwrap().get(&id).cloned()
    }

    /// Stored provisions of a document.
    pub fn provisions_for(&self, document_id: DocumentId) -> Vec<Provision> {
        self.provisions
            .read()
            .unwrap()
            .get(&document_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Stored rules of a document.
    pub fn rules_for(&self, document_id: DocumentId) -> Vec<ComplianceRule> {
        self.rules
            .read()
            .unwrap()
            .get(&document_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every emitted event, in emission order.
    pub fn events(&self) -> Vec<ProcessingEvent> {
        self.events.read().unwrap().clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        Ok(self.documents.read().unwrap().get(&id).cloned())
    }

    async fn update_document_status(&self, id: DocumentId, status: DocumentStatus) -> Result<()> {
        if let Some(document) = self.documents.write().unwrap().get_mut(&id) {
            document.status = status;
            document.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_document_meta(&self, id: DocumentId, meta: &DocumentMeta) -> Result<()> {
        if let Some(document) = self.documents.write().unwrap().get_mut(&id) {
            document.meta = meta.clone();
            document.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_document_progress(&self, id: DocumentId, progress: u8) -> Result<()> {
        if let Some(document) = self.documents.write().unwrap().get_mut(&id) {
            document.meta.progress = progress;
            document.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_document_summary(&self, id: DocumentId, summary: &str) -> Result<()> {
        if let Some(document) = self.documents.write().unwrap().get_mut(&id) {
            document.summary = Some(summary.to_string());
            document.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn abort_requested(&self, id: DocumentId) -> Result<bool> {
        Ok(self
            .documents
            .read()
            .unwrap()
            .get(&id)
            .map(|d| d.meta.abort_requested)
            .unwrap_or(false))
    }

    async fn set_abort_requested(&self, id: DocumentId, requested: bool) -> Result<()> {
        if let Some(document) = self.documents.write().unwrap().get_mut(&id) {
            document.meta.abort_requested = requested;
            document.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_part(&self, id: PartId) -> Result<Option<Part>> {
        Ok(self.parts.read().unwrap().get(&id).cloned())
    }

    async fn list_parts(&self, document_id: DocumentId) -> Result<Vec<Part>> {
        let mut parts: Vec<Part> = self
            .parts
            .read()
            .unwrap()
            .values()
            .filter(|p| p.document_id == document_id)
            .cloned()
            .collect();
        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    async fn list_parts_with_status(
        &self,
        document_id: DocumentId,
        statuses: &[PartStatus],
    ) -> Result<Vec<Part>> {
        let mut parts: Vec<Part> = self
            .parts
            .read()
            .unwrap()
            .values()
            .filter(|p| p.document_id == document_id && statuses.contains(&p.status))
            .cloned()
            .collect();
        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    async fn reset_parts(&self, document_id: DocumentId) -> Result<()> {
        let now = Utc::now();
        for part in self.parts.write().unwrap().values_mut() {
            if part.document_id == document_id {
                part.status = PartStatus::Pending;
                part.provisions_count = 0;
                part.rules_count = 0;
                part.processed_at = None;
                part.meta = Default::default();
                part.updated_at = now;
            }
        }
        Ok(())
    }

    async fn update_part_status(
        &self,
        id: PartId,
        status: PartStatus,
        error: Option<&str>,
    ) -> Result<()> {
        if let Some(part) = self.parts.write().unwrap().get_mut(&id) {
            part.status = status;
            part.meta.error = error.map(str::to_string);
            part.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_part_processed(
        &self,
        id: PartId,
        provisions_count: i32,
        rules_count: i32,
    ) -> Result<()> {
        if let Some(part) = self.parts.write().unwrap().get_mut(&id) {
            let now = Utc::now();
            part.status = PartStatus::Processed;
            part.provisions_count = provisions_count;
            part.rules_count = rules_count;
            part.processed_at = Some(now);
            part.meta.error = None;
            part.updated_at = now;
        }
        Ok(())
    }

    async fn find_stuck_parts(
        &self,
        document_id: DocumentId,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<Part>> {
        Ok(self
            .parts
            .read()
            .unwrap()
            .values()
            .filter(|p| {
                p.document_id == document_id
                    && p.status == PartStatus::Processing
                    && p.updated_at < stale_before
            })
            .cloned()
            .collect())
    }

    async fn replace_part_results(
        &self,
        document_id: DocumentId,
        part_id: PartId,
        provisions: &[Provision],
        rules: &[ComplianceRule],
    ) -> Result<()> {
        {
            let mut all = self.provisions.write().unwrap();
            let entry = all.entry(document_id).or_default();
            entry.retain(|p| p.source_part_id != part_id);
            entry.extend_from_slice(provisions);
        }
        {
            let mut all = self.rules.write().unwrap();
            let entry = all.entry(document_id).or_default();
            entry.retain(|r| r.source_part_id != part_id);
            entry.extend_from_slice(rules);
        }
        Ok(())
    }

    async fn replace_document_results(
        &self,
        document_id: DocumentId,
        _run_id: RunId,
        provisions: &[Provision],
        rules: &[ComplianceRule],
    ) -> Result<()> {
        // The in-memory store holds a single result set per document, so
        // the staged swap degenerates to a plain replacement.
        self.provisions
            .write()
            .unwrap()
            .insert(document_id, provisions.to_vec());
        self.rules
            .write()
            .unwrap()
            .insert(document_id, rules.to_vec());
        Ok(())
    }

    async fn list_provisions(&self, document_id: DocumentId) -> Result<Vec<Provision>> {
        let mut provisions = self.provisions_for(document_id);
        provisions.sort_by_key(|p| p.source_part_number);
        Ok(provisions)
    }

    async fn list_rules(&self, document_id: DocumentId) -> Result<Vec<ComplianceRule>> {
        Ok(self.rules_for(document_id))
    }

    async fn count_results(&self, document_id: DocumentId) -> Result<(usize, usize)> {
        Ok((
            self.provisions_for(document_id).len(),
            self.rules_for(document_id).len(),
        ))
    }

    async fn append_event(&self, event: &ProcessingEvent) -> Result<()> {
        self.events.write().unwrap().push(event.clone());
        Ok(())
    }
}
