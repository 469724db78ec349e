//! Checklist catalog
//!
//! The ten-part legal checklist is a versioned data asset embedded at
//! compile time and validated at load. Its schema (part numbers, core
//! question, top risk pattern, cross-clause hints, deep-dive items) is part
//! of the public contract; runtime code only ever reads it.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

/// Errors from catalog loading
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid catalog: {0}")]
    Invalid(String),
}

/// A plain prose question about the contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub text: String,
}

/// One of the ten fixed legal topics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistPart {
    pub number: u8,
    pub title: String,
    pub core_question: String,
    pub top_risk_pattern: String,
    pub cross_clause_analysis: Vec<String>,
    pub deep_dive_checklist: Vec<ChecklistItem>,
}

/// The full versioned catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistCatalog {
    pub version: String,
    pub parts: Vec<ChecklistPart>,
}

/// Number of parts a valid catalog carries.
pub const CATALOG_PARTS: usize = 10;

const BUILTIN_CATALOG_YAML: &str = include_str!("../../assets/checklist.yaml");

static BUILTIN: OnceLock<ChecklistCatalog> = OnceLock::new();

impl ChecklistCatalog {
    /// Parse and validate a catalog from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, CatalogError> {
        let catalog: ChecklistCatalog = serde_yaml::from_str(yaml)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load the embedded catalog. The asset is validated at build-test time,
    /// so a failure here is a packaging defect.
    pub fn builtin() -> &'static ChecklistCatalog {
        BUILTIN.get_or_init(|| {
            ChecklistCatalog::from_yaml(BUILTIN_CATALOG_YAML)
                .expect("embedded checklist catalog must be valid")
        })
    }

    /// Look up a part by number.
    pub fn part(&self, number: u8) -> Option<&ChecklistPart> {
        self.parts.iter().find(|p| p.number == number)
    }

    /// All part numbers, ascending.
    pub fn part_numbers(&self) -> Vec<u8> {
        let mut numbers: Vec<u8> = self.parts.iter().map(|p| p.number).collect();
        numbers.sort_unstable();
        numbers
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.version.trim().is_empty() {
            return Err(CatalogError::Invalid("missing version".to_string()));
        }
        if self.parts.len() != CATALOG_PARTS {
            return Err(CatalogError::Invalid(format!(
                "expected {} parts, found {}",
                CATALOG_PARTS,
                self.parts.len()
            )));
        }
        let mut numbers: Vec<u8> = self.parts.iter().map(|p| p.number).collect();
        numbers.sort_unstable();
        if numbers != (1..=CATALOG_PARTS as u8).collect::<Vec<_>>() {
            return Err(CatalogError::Invalid(format!(
                "part numbers must be 1..={}, found {:?}",
                CATALOG_PARTS, numbers
            )));
        }
        for part in &self.parts {
            if part.title.trim().is_empty()
                || part.core_question.trim().is_empty()
                || part.top_risk_pattern.trim().is_empty()
            {
                return Err(CatalogError::Invalid(format!(
                    "part {} has an empty required field",
                    part.number
                )));
            }
            if part.deep_dive_checklist.is_empty() {
                return Err(CatalogError::Invalid(format!(
                    "part {} has no checklist items",
                    part.number
                )));
            }
            if part
                .deep_dive_checklist
                .iter()
                .any(|item| item.text.trim().is_empty())
            {
                return Err(CatalogError::Invalid(format!(
                    "part {} has an empty checklist item",
                    part.number
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = ChecklistCatalog::builtin();
        assert_eq!(catalog.parts.len(), CATALOG_PARTS);
        assert_eq!(catalog.part_numbers(), (1..=10).collect::<Vec<u8>>());
    }

    #[test]
    fn part_lookup_by_number() {
        let catalog = ChecklistCatalog::builtin();
        let part = catalog.part(4).unwrap();
        assert_eq!(part.number, 4);
        assert!(!part.deep_dive_checklist.is_empty());
        assert!(!part.cross_clause_analysis.is_empty());
        assert!(catalog.part(11).is_none());
    }

    #[test]
    fn wrong_part_count_is_rejected() {
        let yaml = r#"
version: "test"
parts:
  - number: 1
    title: "Only part"
    coreQuestion: "q"
    topRiskPattern: "p"
    crossClauseAnalysis: []
    deepDiveChecklist:
      - text: "item"
"#;
        let err = ChecklistCatalog::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, CatalogError::Invalid(_)));
    }

    #[test]
    fn duplicate_part_numbers_are_rejected() {
        let mut catalog = ChecklistCatalog::builtin().clone();
        catalog.parts[1].number = 1;
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn empty_item_text_is_rejected() {
        let mut catalog = ChecklistCatalog::builtin().clone();
        catalog.parts[0].deep_dive_checklist[0].text = "  ".to_string();
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn camel_case_wire_shape() {
        let catalog = ChecklistCatalog::builtin();
        let json = serde_json::to_string(&catalog.parts[0]).unwrap();
        assert!(json.contains("coreQuestion"));
        assert!(json.contains("topRiskPattern"));
        assert!(json.contains("crossClauseAnalysis"));
        assert!(json.contains("deepDiveChecklist"));
    }
}
