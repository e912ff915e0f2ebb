//! Per-part extraction: provisions first, then rules chunked by category.
//!
//! Rule extraction is deliberately split into one oracle call per category:
//! asking for every rule in a large part at once risks the response being
//! truncated before it is syntactically complete, and a small per-category
//! response is independently recoverable.

use std::time::Instant;

use serde::Deserialize;
use serde_json::json;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::events::{EventEmitter, EventStatus, EventType, ProcessingEvent, Stage};
use crate::pipeline::prompts;
use crate::traits::{DocumentStore, Oracle, OracleOptions};
use crate::types::{ComplianceRule, Part, PartStatus, Provision, ProvisionType, RuleCategory};

/// What one part contributed to the run.
#[derive(Debug, Clone, Default)]
pub struct PartOutcome {
    pub provisions: Vec<Provision>,
    pub rules: Vec<ComplianceRule>,
    pub skipped: bool,
}

/// Untrusted provision candidate as the oracle reports it.
#[derive(Debug, Deserialize)]
struct RawProvision {
    #[serde(default)]
    section_number: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    provision_type: String,
    #[serde(default)]
    applies_to: Vec<String>,
    #[serde(default)]
    key_terms: Vec<String>,
}

/// Untrusted rule candidate as the oracle reports it.
#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(default)]
    rule_code: String,
    #[serde(default)]
    rule_name: String,
    #[serde(default)]
    rule_type: String,
    #[serde(default)]
    conditions: serde_json::Value,
    #[serde(default)]
    parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    actions: serde_json::Value,
    #[serde(default)]
    effective_from: Option<String>,
}

/// Run provision and rule extraction for one part.
///
/// Persists the part's rows and marks it `processed` on success. On oracle
/// failure the error propagates to the controller, which marks the part
/// `failed` and moves on; no rows are written for a failed part.
pub async fn process_part<S, O>(
    part: &Part,
    store: &S,
    oracle: &O,
    events: &EventEmitter<'_, S>,
    config: &PipelineConfig,
) -> Result<PartOutcome>
where
    S: DocumentStore,
    O: Oracle,
{
    if part.raw_text.trim().chars().count() < config.min_part_chars {
        tracing::info!(
            part_id = %part.id,
            part_number = part.part_number,
            length = part.raw_text.trim().len(),
            "Part text below minimum length - skipping"
        );
        store
            .update_part_status(part.id, PartStatus::Skipped, None)
            .await?;
        events
            .emit(
                ProcessingEvent::new(
                    part.document_id,
                    EventType::Warning,
                    EventStatus::Skipped,
                    format!("Part {} text too short to extract", part.part_number),
                )
                .with_part(part.id)
                .with_details(json!({
                    "length": part.raw_text.trim().chars().count(),
                    "minimum": config.min_part_chars,
                })),
            )
            .await;
        return Ok(PartOutcome {
            skipped: true,
            ..Default::default()
        });
    }

    store
        .update_part_status(part.id, PartStatus::Processing, None)
        .await?;

    let options = OracleOptions {
        model: config.extraction_model.clone(),
        max_tokens: Some(config.extraction_max_tokens),
    };

    let provisions = extract_provisions(part, oracle, events, &options).await?;
    let rules = extract_rules(part, oracle, events, config, &options).await?;

    store
        .replace_part_results(part.document_id, part.id, &provisions, &rules)
        .await?;
    store
        .mark_part_processed(part.id, provisions.len() as i32, rules.len() as i32)
        .await?;

    tracing::info!(
        part_id = %part.id,
        part_number = part.part_number,
        provisions = provisions.len(),
        rules = rules.len(),
        "Part processed"
    );

    Ok(PartOutcome {
        provisions,
        rules,
        skipped: false,
    })
}

/// One oracle call extracting every provision candidate in the part.
async fn extract_provisions<S, O>(
    part: &Part,
    oracle: &O,
    events: &EventEmitter<'_, S>,
    options: &OracleOptions,
) -> Result<Vec<Provision>>
where
    S: DocumentStore,
    O: Oracle,
{
    let started = Instant::now();
    events
        .emit(
            ProcessingEvent::new(
                part.document_id,
                EventType::StageStarted,
                EventStatus::InProgress,
                format!("Extracting provisions from part {}", part.part_number),
            )
            .with_part(part.id)
            .with_stage(Stage::ProvisionExtraction),
        )
        .await;

    let response = oracle
        .call(
            prompts::PROVISIONS_PROMPT,
            &prompts::part_user_message(part),
            options,
        )
        .await?;

    let provisions = validate_provisions(&response, part);

    events
        .emit(
            ProcessingEvent::new(
                part.document_id,
                EventType::StageCompleted,
                EventStatus::Completed,
                format!(
                    "Extracted {} provisions from part {}",
                    provisions.len(),
                    part.part_number
                ),
            )
            .with_part(part.id)
            .with_stage(Stage::ProvisionExtraction)
            .with_details(json!({
                "count": provisions.len(),
                "elapsed_ms": started.elapsed().as_millis() as u64,
            })),
        )
        .await;

    Ok(provisions)
}

/// Chunked rule extraction: one oracle call per category, results merged.
async fn extract_rules<S, O>(
    part: &Part,
    oracle: &O,
    events: &EventEmitter<'_, S>,
    config: &PipelineConfig,
    options: &OracleOptions,
) -> Result<Vec<ComplianceRule>>
where
    S: DocumentStore,
    O: Oracle,
{
    let started = Instant::now();
    events
        .emit(
            ProcessingEvent::new(
                part.document_id,
                EventType::StageStarted,
                EventStatus::InProgress,
                format!("Extracting rules from part {}", part.part_number),
            )
            .with_part(part.id)
            .with_stage(Stage::RulesExtraction),
        )
        .await;

    let mut rules = Vec::new();
    let mut by_category = serde_json::Map::new();

    for category in RuleCategory::ALL {
        let response = oracle
            .call(
                &prompts::rules_prompt(category, config.max_rules_per_category),
                &prompts::part_user_message(part),
                options,
            )
            .await?;

        let mut extracted = validate_rules(&response, part, category);
        if extracted.len() > config.max_rules_per_category {
            tracing::warn!(
                part_number = part.part_number,
                category = %category,
                count = extracted.len(),
                cap = config.max_rules_per_category,
                "Oracle exceeded the per-category rule cap - truncating"
            );
            extracted.truncate(config.max_rules_per_category);
        }

        by_category.insert(category.as_str().to_string(), json!(extracted.len()));
        rules.extend(extracted);
    }

    events
        .emit(
            ProcessingEvent::new(
                part.document_id,
                EventType::StageCompleted,
                EventStatus::Completed,
                format!(
                    "Extracted {} rules from part {}",
                    rules.len(),
                    part.part_number
                ),
            )
            .with_part(part.id)
            .with_stage(Stage::RulesExtraction)
            .with_details(json!({
                "count": rules.len(),
                "elapsed_ms": started.elapsed().as_millis() as u64,
                "by_category": by_category,
            })),
        )
        .await;

    Ok(rules)
}

/// Pull the candidate array out of an untrusted response body.
///
/// Accepts either `{"<key>": [...]}` or a bare top-level array.
fn candidate_array(response: &serde_json::Value, key: &str) -> Vec<serde_json::Value> {
    response
        .get(key)
        .and_then(serde_json::Value::as_array)
        .or_else(|| response.as_array())
        .cloned()
        .unwrap_or_default()
}

fn validate_provisions(response: &serde_json::Value, part: &Part) -> Vec<Provision> {
    let mut provisions = Vec::new();

    for candidate in candidate_array(response, "provisions") {
        let raw: RawProvision = match serde_json::from_value(candidate) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(
                    part_number = part.part_number,
                    error = %err,
                    "Discarding malformed provision candidate"
                );
                continue;
            }
        };
        if raw.section_number.trim().is_empty() || raw.content.trim().is_empty() {
            tracing::warn!(
                part_number = part.part_number,
                "Discarding provision candidate without section number or content"
            );
            continue;
        }

        provisions.push(
            Provision::new(
                part.document_id,
                part.id,
                part.part_number,
                raw.section_number.trim(),
                raw.content,
            )
            .with_title(raw.title)
            .with_type(ProvisionType::from_label(&raw.provision_type))
            .with_applies_to(raw.applies_to)
            .with_key_terms(raw.key_terms),
        );
    }

    provisions
}

fn validate_rules(
    response: &serde_json::Value,
    part: &Part,
    category: RuleCategory,
) -> Vec<ComplianceRule> {
    let mut rules = Vec::new();

    for candidate in candidate_array(response, "rules") {
        let raw: RawRule = match serde_json::from_value(candidate) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(
                    part_number = part.part_number,
                    category = %category,
                    error = %err,
                    "Discarding malformed rule candidate"
                );
                continue;
            }
        };
        if raw.rule_code.trim().is_empty() {
            tracing::warn!(
                part_number = part.part_number,
                category = %category,
                "Discarding rule candidate without a rule code"
            );
            continue;
        }

        let rule_type = RuleCategory::from_label(&raw.rule_type).unwrap_or(category);
        let effective_from = raw
            .effective_from
            .as_deref()
            .and_then(|date| chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").ok());

        let mut rule = ComplianceRule::new(
            part.document_id,
            part.id,
            raw.rule_code.trim(),
            raw.rule_name,
            rule_type,
        )
        .with_conditions(raw.conditions)
        .with_parameters(raw.parameters)
        .with_actions(raw.actions);
        rule.effective_from = effective_from;
        rules.push(rule);
    }

    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::testing::MockOracle;
    use crate::types::{Document, DocumentId};
    use serde_json::json;

    fn fixture(raw_text: &str) -> (MemoryStore, Part) {
        let store = MemoryStore::new();
        let document = Document::new("Test Act");
        let part = Part::new(document.id, 1, "Part I", raw_text);
        store.insert_document(document);
        store.insert_part(part.clone());
        (store, part)
    }

    fn long_text() -> String {
        "Section 1. Every taxable person shall register for tax. ".repeat(4)
    }

    #[tokio::test]
    async fn short_part_is_skipped_not_failed() {
        let (store, part) = fixture("Only forty characters of text go here..");
        let oracle = MockOracle::new();
        let emitter = EventEmitter::new(&store);

        let outcome = process_part(
            &part,
            &store,
            &oracle,
            &emitter,
            &PipelineConfig::default(),
        )
        .await
        .unwrap();

        assert!(outcome.skipped);
        assert!(outcome.provisions.is_empty());
        assert!(outcome.rules.is_empty());
        // No oracle traffic for a skipped part.
        assert_eq!(oracle.call_count(), 0);
        assert_eq!(store.part(part.id).unwrap().status, PartStatus::Skipped);

        // Exactly one skipped warning event.
        let events = store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Warning);
        assert_eq!(events[0].status, EventStatus::Skipped);
    }

    #[tokio::test]
    async fn one_rules_call_per_category() {
        let (store, part) = fixture(&long_text());
        let oracle = MockOracle::new();
        let emitter = EventEmitter::new(&store);

        process_part(
            &part,
            &store,
            &oracle,
            &emitter,
            &PipelineConfig::default(),
        )
        .await
        .unwrap();

        // 1 provisions call + 6 category calls.
        assert_eq!(oracle.call_count(), 7);
        for category in RuleCategory::ALL {
            let matching = oracle
                .calls()
                .iter()
                .filter(|call| call.system.contains(category.as_str()))
                .count();
            assert!(matching >= 1, "no call for category {category}");
        }
    }

    #[tokio::test]
    async fn invalid_provision_type_coerces_to_general() {
        let (store, part) = fixture(&long_text());
        let oracle = MockOracle::new().with_response(
            "provisions",
            json!({
                "provisions": [
                    {
                        "section_number": "4",
                        "title": "Imposition of tax",
                        "content": "Tax is imposed on income",
                        "provision_type": "levying"
                    },
                    {
                        "section_number": "5",
                        "title": "Exempt income",
                        "content": "Income of X is exempt",
                        "provision_type": "exemption"
                    }
                ]
            }),
        );
        let emitter = EventEmitter::new(&store);

        let outcome = process_part(
            &part,
            &store,
            &oracle,
            &emitter,
            &PipelineConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.provisions.len(), 2);
        assert_eq!(outcome.provisions[0].provision_type, ProvisionType::General);
        assert_eq!(
            outcome.provisions[1].provision_type,
            ProvisionType::Exemption
        );
    }

    #[tokio::test]
    async fn malformed_candidates_are_discarded() {
        let (store, part) = fixture(&long_text());
        let oracle = MockOracle::new().with_response(
            "provisions",
            json!({
                "provisions": [
                    "not an object",
                    {"title": "missing section and content"},
                    {"section_number": "9", "content": "kept"}
                ]
            }),
        );
        let emitter = EventEmitter::new(&store);

        let outcome = process_part(
            &part,
            &store,
            &oracle,
            &emitter,
            &PipelineConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.provisions.len(), 1);
        assert_eq!(outcome.provisions[0].section_number, "9");
    }

    #[tokio::test]
    async fn unknown_rule_type_falls_back_to_its_category() {
        let (store, part) = fixture(&long_text());
        let oracle = MockOracle::new().with_response_when(
            &["compliance engineer", "deadline"],
            json!({
                "rules": [
                    {"rule_code": "CIT-FILE", "rule_name": "Filing deadline", "rule_type": "calendar"}
                ]
            }),
        );
        let emitter = EventEmitter::new(&store);

        let outcome = process_part(
            &part,
            &store,
            &oracle,
            &emitter,
            &PipelineConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.rules.len(), 1);
        assert_eq!(outcome.rules[0].rule_type, RuleCategory::Deadline);
    }

    #[tokio::test]
    async fn oversized_category_response_is_truncated() {
        let (store, part) = fixture(&long_text());
        let rules: Vec<_> = (0..10)
            .map(|i| json!({"rule_code": format!("R-{i}"), "rule_name": "r"}))
            .collect();
        let oracle = MockOracle::new()
            .with_response_when(&["compliance engineer", "rate"], json!({ "rules": rules }));
        let emitter = EventEmitter::new(&store);

        let config = PipelineConfig::default().with_max_rules_per_category(3);
        let outcome = process_part(&part, &store, &oracle, &emitter, &config)
            .await
            .unwrap();

        assert_eq!(outcome.rules.len(), 3);
    }

    #[tokio::test]
    async fn processed_part_persists_rows_and_counts() {
        let (store, part) = fixture(&long_text());
        let oracle = MockOracle::new()
            .with_response(
                "provisions",
                json!({"provisions": [{"section_number": "1", "content": "text"}]}),
            )
            .with_response_when(
                &["compliance engineer", "rate"],
                json!({"rules": [{"rule_code": "PIT-RATE", "rule_name": "Rate"}]}),
            );
        let emitter = EventEmitter::new(&store);

        process_part(
            &part,
            &store,
            &oracle,
            &emitter,
            &PipelineConfig::default(),
        )
        .await
        .unwrap();

        let stored = store.part(part.id).unwrap();
        assert_eq!(stored.status, PartStatus::Processed);
        assert_eq!(stored.provisions_count, 1);
        assert_eq!(stored.rules_count, 1);
        assert!(stored.processed_at.is_some());

        assert_eq!(store.provisions_for(part.document_id).len(), 1);
        assert_eq!(store.rules_for(part.document_id).len(), 1);
    }
}
