//! Cross-part deduplication of extracted provisions and rules.
//!
//! Parts overlap at statute boundaries, so the same section or rule code can
//! be extracted from more than one part. Candidates are grouped by a
//! normalized key; first-seen ordering is preserved in the output.

use indexmap::map::Entry;
use indexmap::IndexMap;

use crate::types::{ComplianceRule, Provision};

/// Normalize a dedup key: lowercase, strip everything non-alphanumeric.
///
/// "Section 12(1)(a)" and "section 12 1 a" collapse to the same key.
pub fn normalize_key(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Deduplicate provisions by normalized section number.
///
/// On collision the candidate with the longer content wins outright; the
/// other is discarded, not merged. Candidates whose normalized key is empty
/// have no identity to merge on and pass through untouched.
pub fn dedupe_provisions(all: Vec<Provision>) -> Vec<Provision> {
    let mut keyed: IndexMap<String, Provision> = IndexMap::new();
    let mut keyless = Vec::new();

    for provision in all {
        let key = normalize_key(&provision.section_number);
        if key.is_empty() {
            keyless.push(provision);
            continue;
        }
        match keyed.entry(key) {
            Entry::Occupied(mut entry) => {
                if provision.content.len() > entry.get().content.len() {
                    entry.insert(provision);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(provision);
            }
        }
    }

    keyed.into_values().chain(keyless).collect()
}

/// Deduplicate rules by normalized rule code.
///
/// On collision the `parameters` maps are merged with a shallow overwrite
/// (the later-seen rule's keys win); every other field is retained from the
/// first-seen rule.
pub fn dedupe_rules(all: Vec<ComplianceRule>) -> Vec<ComplianceRule> {
    let mut keyed: IndexMap<String, ComplianceRule> = IndexMap::new();
    let mut keyless = Vec::new();

    for rule in all {
        let key = normalize_key(&rule.rule_code);
        if key.is_empty() {
            keyless.push(rule);
            continue;
        }
        match keyed.entry(key) {
            Entry::Occupied(mut entry) => {
                for (param, value) in rule.parameters {
                    entry.get_mut().parameters.insert(param, value);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(rule);
            }
        }
    }

    keyed.into_values().chain(keyless).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentId, PartId, RuleCategory};
    use serde_json::json;

    fn provision(section: &str, content: &str) -> Provision {
        Provision::new(DocumentId::new(), PartId::new(), 1, section, content)
    }

    fn rule(code: &str, params: serde_json::Value) -> ComplianceRule {
        let parameters = params.as_object().cloned().unwrap_or_default();
        ComplianceRule::new(
            DocumentId::new(),
            PartId::new(),
            code,
            "name",
            RuleCategory::Rate,
        )
        .with_parameters(parameters)
    }

    #[test]
    fn normalization_strips_punctuation_and_case() {
        assert_eq!(normalize_key("Section 12(1)(a)"), "section121a");
        assert_eq!(normalize_key("SEC-12.1.A"), "sec121a");
        assert_eq!(normalize_key("  ---  "), "");
    }

    #[test]
    fn longest_content_wins_regardless_of_order() {
        let short = provision("12(1)", "short");
        let long = provision("12 (1)", "considerably longer content");

        let forward = dedupe_provisions(vec![short.clone(), long.clone()]);
        let backward = dedupe_provisions(vec![long.clone(), short.clone()]);

        assert_eq!(forward.len(), 1);
        assert_eq!(backward.len(), 1);
        assert_eq!(forward[0].content, long.content);
        assert_eq!(backward[0].content, long.content);
    }

    #[test]
    fn distinct_sections_all_survive() {
        let deduped = dedupe_provisions(vec![
            provision("1", "a"),
            provision("2", "b"),
            provision("3", "c"),
        ]);
        assert_eq!(deduped.len(), 3);
    }

    #[test]
    fn first_seen_order_is_preserved() {
        let deduped = dedupe_provisions(vec![
            provision("9", "nine"),
            provision("2", "two"),
            provision("9.", "loser"),
        ]);
        let sections: Vec<_> = deduped.iter().map(|p| p.section_number.as_str()).collect();
        assert_eq!(sections, vec!["9", "2"]);
    }

    #[test]
    fn keyless_provisions_pass_through_unmerged() {
        let deduped = dedupe_provisions(vec![provision("—", "a"), provision("???", "b")]);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn rule_parameters_merge_to_a_union() {
        let first = rule("VAT-REG", json!({"threshold": 25_000_000, "currency": "NGN"}));
        let second = rule("vat reg", json!({"threshold": 100_000_000, "period": "annual"}));

        let deduped = dedupe_rules(vec![first, second]);
        assert_eq!(deduped.len(), 1);

        let params = &deduped[0].parameters;
        // Union of all keys; later-seen value wins the collision.
        assert_eq!(params.get("threshold"), Some(&json!(100_000_000)));
        assert_eq!(params.get("currency"), Some(&json!("NGN")));
        assert_eq!(params.get("period"), Some(&json!("annual")));
    }

    #[test]
    fn rule_non_parameter_fields_keep_first_seen() {
        let first = ComplianceRule::new(
            DocumentId::new(),
            PartId::new(),
            "PIT-01",
            "first name",
            RuleCategory::Rate,
        );
        let first_part = first.source_part_id;
        let second = ComplianceRule::new(
            DocumentId::new(),
            PartId::new(),
            "pit_01",
            "second name",
            RuleCategory::Penalty,
        );

        let deduped = dedupe_rules(vec![first, second]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].rule_name, "first name");
        assert_eq!(deduped[0].rule_type, RuleCategory::Rate);
        assert_eq!(deduped[0].source_part_id, first_part);
    }
}
