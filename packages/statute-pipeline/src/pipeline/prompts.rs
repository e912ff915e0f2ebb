//! Oracle prompts for the extraction pipeline.
//!
//! Each prompt documents its JSON output contract inline. Responses are
//! still treated as untrusted and validated field by field.

use crate::types::{Part, RuleCategory};

/// Cap on part text sent per oracle call.
const MAX_CONTENT_CHARS: usize = 24_000;

/// System instruction for the provision-extraction call (one per part).
pub const PROVISIONS_PROMPT: &str = r#"You are a legal analyst. Extract the distinct provisions from this portion of a statute.

For each provision capture:
1. Its section number exactly as printed
2. A short title
3. The full operative text
4. Its classification
5. Who or what it applies to
6. Key defined terms it introduces or relies on

Output JSON:
{
    "provisions": [
        {
            "section_number": "12",
            "title": "short descriptive title",
            "content": "full operative text of the provision",
            "provision_type": "definition | charge | exemption | relief | obligation | procedure | penalty | transitional | general",
            "applies_to": ["categories of persons or entities"],
            "key_terms": ["defined terms"]
        }
    ]
}

Be factual. Only extract what is explicitly stated in the text."#;

/// System instruction for one category of the chunked rule-extraction pass.
///
/// Rule extraction is split by category so each response stays small enough
/// to survive the oracle's output limit intact.
pub fn rules_prompt(category: RuleCategory, max_items: usize) -> String {
    format!(
        r#"You are a compliance engineer. From this portion of a statute, extract machine-actionable {category} rules: {hint}.

Extract at most {max_items} rules. Skip anything that is not a {category} rule.

Output JSON:
{{
    "rules": [
        {{
            "rule_code": "SHORT_STABLE_CODE",
            "rule_name": "human-readable name",
            "rule_type": "{category}",
            "conditions": {{"when": "plain-language description of when the rule applies"}},
            "parameters": {{"amounts, percentages and dates as machine-readable values": "..."}},
            "actions": ["what a compliant taxpayer must do"],
            "effective_from": "YYYY-MM-DD or null"
        }}
    ]
}}

Be factual. Only extract what is explicitly stated in the text."#,
        category = category.as_str(),
        hint = category.prompt_hint(),
        max_items = max_items,
    )
}

/// System instruction for the document summary call.
pub const SUMMARY_PROMPT: &str = r#"Write a 3-4 sentence executive summary of a processed statute for a compliance review queue.

Mention what the document covers, the most significant extracted items, and that the results await human review.

Output JSON:
{
    "summary": "the summary text"
}"#;

/// User message for the provision and rule extraction calls.
pub fn part_user_message(part: &Part) -> String {
    let text = truncate_chars(&part.raw_text, MAX_CONTENT_CHARS);
    format!(
        "Part {number}: {title}\n\nText:\n{text}",
        number = part.part_number,
        title = part.title,
        text = text,
    )
}

/// User message for the summary call, referencing the top extracted items.
pub fn summary_user_message(
    document_title: &str,
    provision_titles: &[String],
    rule_codes: &[String],
    parts_processed: usize,
) -> String {
    format!(
        "Document: {title}\nParts processed: {parts}\n\nTop provisions:\n{provisions}\n\nTop rules:\n{rules}",
        title = document_title,
        parts = parts_processed,
        provisions = bulleted(provision_titles),
        rules = bulleted(rule_codes),
    )
}

fn bulleted(items: &[String]) -> String {
    if items.is_empty() {
        return "- (none)".to_string();
    }
    items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentId;

    #[test]
    fn part_message_includes_number_and_title() {
        let part = Part::new(DocumentId::new(), 3, "Chargeable income", "Body text");
        let message = part_user_message(&part);
        assert!(message.starts_with("Part 3: Chargeable income"));
        assert!(message.contains("Body text"));
    }

    #[test]
    fn oversized_part_text_is_truncated() {
        let part = Part::new(DocumentId::new(), 1, "Long", "x".repeat(30_000));
        let message = part_user_message(&part);
        assert!(message.len() < 25_000);
    }

    #[test]
    fn rules_prompt_names_its_category() {
        let prompt = rules_prompt(RuleCategory::Deadline, 20);
        assert!(prompt.contains("deadline"));
        assert!(prompt.contains("at most 20"));
    }
}
