//! Postgres storage implementation.
//!
//! Result rows are tagged with the run that wrote them and become visible
//! when the document's `active_run_id` pointer flips, so a full rewrite is
//! atomic: a crash mid-rewrite leaves the previous run's rows in place
//! rather than a half-deleted document.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::events::ProcessingEvent;
use crate::traits::DocumentStore;
use crate::types::{
    ComplianceRule, Document, DocumentId, DocumentMeta, DocumentStatus, Part, PartId, PartMeta,
    PartStatus, Provision, ProvisionId, ProvisionType, RuleCategory, RuleId, RunId,
};

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Storage(Box::new(err))
    }
}

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_document(row: &sqlx::postgres::PgRow) -> Document {
        Document {
            id: DocumentId(row.get("id")),
            title: row.get("title"),
            status: DocumentStatus::from_label(row.get::<String, _>("status").as_str())
                .unwrap_or(DocumentStatus::Draft),
            effective_date: row.get("effective_date"),
            summary: row.get("summary"),
            meta: serde_json::from_value(row.get("meta")).unwrap_or_default(),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn map_part(row: &sqlx::postgres::PgRow) -> Part {
        Part {
            id: PartId(row.get("id")),
            document_id: DocumentId(row.get("document_id")),
            part_number: row.get("part_number"),
            title: row.get("title"),
            raw_text: row.get("raw_text"),
            status: PartStatus::from_label(row.get::<String, _>("status").as_str())
                .unwrap_or(PartStatus::Pending),
            provisions_count: row.get("provisions_count"),
            rules_count: row.get("rules_count"),
            processed_at: row.get("processed_at"),
            meta: serde_json::from_value::<PartMeta>(row.get("meta")).unwrap_or_default(),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn map_provision(row: &sqlx::postgres::PgRow) -> Provision {
        Provision {
            id: ProvisionId(row.get("id")),
            document_id: DocumentId(row.get("document_id")),
            section_number: row.get("section_number"),
            title: row.get("title"),
            content: row.get("content"),
            provision_type: ProvisionType::from_label(
                row.get::<String, _>("provision_type").as_str(),
            ),
            applies_to: serde_json::from_value(row.get("applies_to")).unwrap_or_default(),
            key_terms: serde_json::from_value(row.get("key_terms")).unwrap_or_default(),
            source_part_id: PartId(row.get("source_part_id")),
            source_part_number: row.get("source_part_number"),
        }
    }

    fn map_rule(row: &sqlx::postgres::PgRow) -> ComplianceRule {
        ComplianceRule {
            id: RuleId(row.get("id")),
            document_id: DocumentId(row.get("document_id")),
            rule_code: row.get("rule_code"),
            rule_name: row.get("rule_name"),
            rule_type: RuleCategory::from_label(row.get::<String, _>("rule_type").as_str())
                .unwrap_or(RuleCategory::Rate),
            conditions: row.get("conditions"),
            parameters: row
                .get::<serde_json::Value, _>("parameters")
                .as_object()
                .cloned()
                .unwrap_or_default(),
            actions: row.get("actions"),
            source_part_id: PartId(row.get("source_part_id")),
            is_active: row.get("is_active"),
            effective_from: row.get("effective_from"),
        }
    }

    async fn insert_provision<'e, E>(executor: E, run_id: Uuid, provision: &Provision) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            INSERT INTO provisions (
                id, document_id, run_id, source_part_id, source_part_number,
                section_number, title, content, provision_type, applies_to, key_terms
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(provision.id.0)
        .bind(provision.document_id.0)
        .bind(run_id)
        .bind(provision.source_part_id.0)
        .bind(provision.source_part_number)
        .bind(&provision.section_number)
        .bind(&provision.title)
        .bind(&provision.content)
        .bind(provision.provision_type.as_str())
        .bind(serde_json::json!(provision.applies_to))
        .bind(serde_json::json!(provision.key_terms))
        .execute(executor)
        .await?;
        Ok(())
    }

    async fn insert_rule<'e, E>(executor: E, run_id: Uuid, rule: &ComplianceRule) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            INSERT INTO compliance_rules (
                id, document_id, run_id, source_part_id, rule_code, rule_name,
                rule_type, conditions, parameters, actions, is_active, effective_from
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(rule.id.0)
        .bind(rule.document_id.0)
        .bind(run_id)
        .bind(rule.source_part_id.0)
        .bind(&rule.rule_code)
        .bind(&rule.rule_name)
        .bind(rule.rule_type.as_str())
        .bind(&rule.conditions)
        .bind(serde_json::Value::Object(rule.parameters.clone()))
        .bind(&rule.actions)
        .bind(rule.is_active)
        .bind(rule.effective_from)
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PostgresStore {
    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        let row = sqlx::query(
            r#"
            SELECT id, title, status, effective_date, summary, meta, created_at, updated_at
            FROM documents
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::map_document(&r)))
    }

    async fn update_document_status(&self, id: DocumentId, status: DocumentStatus) -> Result<()> {
        sqlx::query("UPDATE documents SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id.0)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_document_meta(&self, id: DocumentId, meta: &DocumentMeta) -> Result<()> {
        let meta = serde_json::to_value(meta).map_err(PipelineError::storage)?;
        sqlx::query("UPDATE documents SET meta = $2, updated_at = now() WHERE id = $1")
            .bind(id.0)
            .bind(meta)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_document_progress(&self, id: DocumentId, progress: u8) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET meta = jsonb_set(meta, '{progress}', to_jsonb($2::int)), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(i32::from(progress))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_document_summary(&self, id: DocumentId, summary: &str) -> Result<()> {
        sqlx::query("UPDATE documents SET summary = $2, updated_at = now() WHERE id = $1")
            .bind(id.0)
            .bind(summary)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn abort_requested(&self, id: DocumentId) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE((meta ->> 'abort_requested')::boolean, false) AS abort_requested
            FROM documents
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("abort_requested")).unwrap_or(false))
    }

    async fn set_abort_requested(&self, id: DocumentId, requested: bool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET meta = jsonb_set(meta, '{abort_requested}', to_jsonb($2::boolean)),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(requested)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_part(&self, id: PartId) -> Result<Option<Part>> {
        let row = sqlx::query(
            r#"
            SELECT id, document_id, part_number, title, raw_text, status,
                   provisions_count, rules_count, processed_at, meta, created_at, updated_at
            FROM document_parts
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::map_part(&r)))
    }

    async fn list_parts(&self, document_id: DocumentId) -> Result<Vec<Part>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, part_number, title, raw_text, status,
                   provisions_count, rules_count, processed_at, meta, created_at, updated_at
            FROM document_parts
            WHERE document_id = $1
            ORDER BY part_number
            "#,
        )
        .bind(document_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::map_part).collect())
    }

    async fn list_parts_with_status(
        &self,
        document_id: DocumentId,
        statuses: &[PartStatus],
    ) -> Result<Vec<Part>> {
        let labels: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, part_number, title, raw_text, status,
                   provisions_count, rules_count, processed_at, meta, created_at, updated_at
            FROM document_parts
            WHERE document_id = $1 AND status = ANY($2)
            ORDER BY part_number
            "#,
        )
        .bind(document_id.0)
        .bind(&labels)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::map_part).collect())
    }

    async fn reset_parts(&self, document_id: DocumentId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE document_parts
            SET status = 'pending', provisions_count = 0, rules_count = 0,
                processed_at = NULL, meta = '{}'::jsonb, updated_at = now()
            WHERE document_id = $1
            "#,
        )
        .bind(document_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_part_status(
        &self,
        id: PartId,
        status: PartStatus,
        error: Option<&str>,
    ) -> Result<()> {
        match error {
            Some(error) => {
                sqlx::query(
                    r#"
                    UPDATE document_parts
                    SET status = $2, meta = jsonb_set(meta, '{error}', to_jsonb($3::text)),
                        updated_at = now()
                    WHERE id = $1
                    "#,
                )
                .bind(id.0)
                .bind(status.as_str())
                .bind(error)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE document_parts
                    SET status = $2, meta = meta - 'error', updated_at = now()
                    WHERE id = $1
                    "#,
                )
                .bind(id.0)
                .bind(status.as_str())
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn mark_part_processed(
        &self,
        id: PartId,
        provisions_count: i32,
        rules_count: i32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE document_parts
            SET status = 'processed', provisions_count = $2, rules_count = $3,
                processed_at = now(), meta = meta - 'error', updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(provisions_count)
        .bind(rules_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_stuck_parts(
        &self,
        document_id: DocumentId,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<Part>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, part_number, title, raw_text, status,
                   provisions_count, rules_count, processed_at, meta, created_at, updated_at
            FROM document_parts
            WHERE document_id = $1 AND status = 'processing' AND updated_at < $2
            ORDER BY part_number
            "#,
        )
        .bind(document_id.0)
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::map_part).collect())
    }

    async fn replace_part_results(
        &self,
        document_id: DocumentId,
        part_id: PartId,
        provisions: &[Provision],
        rules: &[ComplianceRule],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Part-scoped rows join the document's active run; initialise the
        // pointer if this is the document's first write.
        let row = sqlx::query("SELECT active_run_id FROM documents WHERE id = $1 FOR UPDATE")
            .bind(document_id.0)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(PipelineError::DocumentNotFound { id: document_id })?;
        let run_id = match row.get::<Option<Uuid>, _>("active_run_id") {
            Some(run_id) => run_id,
            None => {
                let run_id = Uuid::now_v7();
                sqlx::query("UPDATE documents SET active_run_id = $2 WHERE id = $1")
                    .bind(document_id.0)
                    .bind(run_id)
                    .execute(&mut *tx)
                    .await?;
                run_id
            }
        };

        sqlx::query("DELETE FROM provisions WHERE document_id = $1 AND source_part_id = $2")
            .bind(document_id.0)
            .bind(part_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM compliance_rules WHERE document_id = $1 AND source_part_id = $2")
            .bind(document_id.0)
            .bind(part_id.0)
            .execute(&mut *tx)
            .await?;

        for provision in provisions {
            Self::insert_provision(&mut *tx, run_id, provision).await?;
        }
        for rule in rules {
            Self::insert_rule(&mut *tx, run_id, rule).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn replace_document_results(
        &self,
        document_id: DocumentId,
        run_id: RunId,
        provisions: &[Provision],
        rules: &[ComplianceRule],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for provision in provisions {
            Self::insert_provision(&mut *tx, run_id.0, provision).await?;
        }
        for rule in rules {
            Self::insert_rule(&mut *tx, run_id.0, rule).await?;
        }

        // Flip the active-run pointer, then drop superseded rows.
        sqlx::query("UPDATE documents SET active_run_id = $2, updated_at = now() WHERE id = $1")
            .bind(document_id.0)
            .bind(run_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM provisions WHERE document_id = $1 AND run_id <> $2")
            .bind(document_id.0)
            .bind(run_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM compliance_rules WHERE document_id = $1 AND run_id <> $2")
            .bind(document_id.0)
            .bind(run_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_provisions(&self, document_id: DocumentId) -> Result<Vec<Provision>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.document_id, p.source_part_id, p.source_part_number,
                   p.section_number, p.title, p.content, p.provision_type,
                   p.applies_to, p.key_terms
            FROM provisions p
            JOIN documents d ON d.id = p.document_id AND p.run_id = d.active_run_id
            WHERE p.document_id = $1
            ORDER BY p.source_part_number, p.section_number
            "#,
        )
        .bind(document_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::map_provision).collect())
    }

    async fn list_rules(&self, document_id: DocumentId) -> Result<Vec<ComplianceRule>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.document_id, r.source_part_id, r.rule_code, r.rule_name,
                   r.rule_type, r.conditions, r.parameters, r.actions, r.is_active,
                   r.effective_from
            FROM compliance_rules r
            JOIN documents d ON d.id = r.document_id AND r.run_id = d.active_run_id
            WHERE r.document_id = $1
            ORDER BY r.rule_code
            "#,
        )
        .bind(document_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::map_rule).collect())
    }

    async fn count_results(&self, document_id: DocumentId) -> Result<(usize, usize)> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT count(*) FROM provisions p
                 JOIN documents d ON d.id = p.document_id AND p.run_id = d.active_run_id
                 WHERE p.document_id = $1) AS provisions,
                (SELECT count(*) FROM compliance_rules r
                 JOIN documents d ON d.id = r.document_id AND r.run_id = d.active_run_id
                 WHERE r.document_id = $1) AS rules
            "#,
        )
        .bind(document_id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok((
            row.get::<i64, _>("provisions") as usize,
            row.get::<i64, _>("rules") as usize,
        ))
    }

    async fn append_event(&self, event: &ProcessingEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processing_events (
                id, document_id, part_id, event_type, stage, status, message, details, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.id.0)
        .bind(event.document_id.0)
        .bind(event.part_id.map(|p| p.0))
        .bind(event.event_type.as_str())
        .bind(event.stage.map(|s| s.as_str()))
        .bind(event.status.as_str())
        .bind(&event.message)
        .bind(&event.details)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
