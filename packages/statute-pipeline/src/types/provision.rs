use serde::{Deserialize, Serialize};

use crate::types::{DocumentId, PartId, ProvisionId};

/// Classification of an extracted provision.
///
/// Closed enumeration; oracle output is coerced to `General` when it does
/// not name a known variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionType {
    Definition,
    Charge,
    Exemption,
    Relief,
    Obligation,
    Procedure,
    Penalty,
    Transitional,
    General,
}

impl ProvisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionType::Definition => "definition",
            ProvisionType::Charge => "charge",
            ProvisionType::Exemption => "exemption",
            ProvisionType::Relief => "relief",
            ProvisionType::Obligation => "obligation",
            ProvisionType::Procedure => "procedure",
            ProvisionType::Penalty => "penalty",
            ProvisionType::Transitional => "transitional",
            ProvisionType::General => "general",
        }
    }

    /// Coerce an untrusted label into the closed enumeration.
    ///
    /// Unknown labels (and the oracle's occasional "other") collapse into
    /// `General`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "definition" => ProvisionType::Definition,
            "charge" | "charging" => ProvisionType::Charge,
            "exemption" => ProvisionType::Exemption,
            "relief" => ProvisionType::Relief,
            "obligation" => ProvisionType::Obligation,
            "procedure" | "procedural" => ProvisionType::Procedure,
            "penalty" => ProvisionType::Penalty,
            "transitional" => ProvisionType::Transitional,
            _ => ProvisionType::General,
        }
    }
}

impl std::fmt::Display for ProvisionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An extracted legal clause with section number, type, and applicability.
///
/// Every provision traces to exactly one source part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provision {
    pub id: ProvisionId,
    pub document_id: DocumentId,
    pub section_number: String,
    pub title: String,
    pub content: String,
    pub provision_type: ProvisionType,
    pub applies_to: Vec<String>,
    pub key_terms: Vec<String>,
    pub source_part_id: PartId,
    pub source_part_number: i32,
}

impl Provision {
    pub fn new(
        document_id: DocumentId,
        source_part_id: PartId,
        source_part_number: i32,
        section_number: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: ProvisionId::new(),
            document_id,
            section_number: section_number.into(),
            title: String::new(),
            content: content.into(),
            provision_type: ProvisionType::General,
            applies_to: Vec::new(),
            key_terms: Vec::new(),
            source_part_id,
            source_part_number,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_type(mut self, provision_type: ProvisionType) -> Self {
        self.provision_type = provision_type;
        self
    }

    pub fn with_applies_to(mut self, applies_to: Vec<String>) -> Self {
        self.applies_to = applies_to;
        self
    }

    pub fn with_key_terms(mut self, key_terms: Vec<String>) -> Self {
        self.key_terms = key_terms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_coercion_is_case_insensitive() {
        assert_eq!(ProvisionType::from_label("Exemption"), ProvisionType::Exemption);
        assert_eq!(ProvisionType::from_label("  penalty "), ProvisionType::Penalty);
    }

    #[test]
    fn unknown_labels_collapse_to_general() {
        assert_eq!(ProvisionType::from_label("other"), ProvisionType::General);
        assert_eq!(ProvisionType::from_label("miscellaneous"), ProvisionType::General);
        assert_eq!(ProvisionType::from_label(""), ProvisionType::General);
    }
}
