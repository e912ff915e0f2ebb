use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{DocumentId, PartId, RuleId};

/// Category of a compliance rule.
///
/// Doubles as the chunking dimension for rule extraction: each category is
/// requested from the oracle in its own call, and a rule whose reported type
/// does not name a known variant falls back to the category it was extracted
/// under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Rate,
    Threshold,
    Exemption,
    Deadline,
    Penalty,
    Relief,
}

impl RuleCategory {
    /// Extraction order for the chunked rule pass.
    pub const ALL: [RuleCategory; 6] = [
        RuleCategory::Rate,
        RuleCategory::Threshold,
        RuleCategory::Exemption,
        RuleCategory::Deadline,
        RuleCategory::Penalty,
        RuleCategory::Relief,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::Rate => "rate",
            RuleCategory::Threshold => "threshold",
            RuleCategory::Exemption => "exemption",
            RuleCategory::Deadline => "deadline",
            RuleCategory::Penalty => "penalty",
            RuleCategory::Relief => "relief",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "rate" => Some(RuleCategory::Rate),
            "threshold" => Some(RuleCategory::Threshold),
            "exemption" => Some(RuleCategory::Exemption),
            "deadline" => Some(RuleCategory::Deadline),
            "penalty" => Some(RuleCategory::Penalty),
            "relief" => Some(RuleCategory::Relief),
            _ => None,
        }
    }

    /// What this category covers, phrased for the extraction prompt.
    pub fn prompt_hint(&self) -> &'static str {
        match self {
            RuleCategory::Rate => "tax or levy rates, percentages, and bands",
            RuleCategory::Threshold => "monetary thresholds, registration limits, and caps",
            RuleCategory::Exemption => "exempt persons, goods, income, or activities",
            RuleCategory::Deadline => "filing, payment, and registration deadlines",
            RuleCategory::Penalty => "penalties, fines, surcharges, and interest",
            RuleCategory::Relief => "reliefs, deductions, allowances, and credits",
        }
    }
}

impl std::fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A machine-actionable compliance rule derived from provisions.
///
/// Inactive until a human reviews it. `parameters` is the only field merged
/// across duplicate rule codes during dedup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceRule {
    pub id: RuleId,
    pub document_id: DocumentId,
    pub rule_code: String,
    pub rule_name: String,
    pub rule_type: RuleCategory,
    pub conditions: serde_json::Value,
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub actions: serde_json::Value,
    pub source_part_id: PartId,
    pub is_active: bool,
    pub effective_from: Option<NaiveDate>,
}

impl ComplianceRule {
    pub fn new(
        document_id: DocumentId,
        source_part_id: PartId,
        rule_code: impl Into<String>,
        rule_name: impl Into<String>,
        rule_type: RuleCategory,
    ) -> Self {
        Self {
            id: RuleId::new(),
            document_id,
            rule_code: rule_code.into(),
            rule_name: rule_name.into(),
            rule_type,
            conditions: serde_json::Value::Null,
            parameters: serde_json::Map::new(),
            actions: serde_json::Value::Null,
            source_part_id,
            is_active: false,
            effective_from: None,
        }
    }

    pub fn with_conditions(mut self, conditions: serde_json::Value) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Map<String, serde_json::Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_actions(mut self, actions: serde_json::Value) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_effective_from(mut self, date: NaiveDate) -> Self {
        self.effective_from = Some(date);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_labels_round_trip() {
        for category in RuleCategory::ALL {
            assert_eq!(RuleCategory::from_label(category.as_str()), Some(category));
        }
        assert_eq!(RuleCategory::from_label("surcharge"), None);
    }
}
