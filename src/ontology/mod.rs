//! Ontologies: named, versioned rule sets with extraction hints.

pub mod store;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

pub use store::{CachedOntologyStore, InMemoryOntologyStore, OntologyStore};

#[cfg(feature = "native")]
pub use store::DirectoryOntologyStore;

use crate::error::OntologyError;
use crate::oracle::Sort;
use crate::parser::FieldExtractor;
use crate::types::{ClaimMap, Rule, Severity};

/// A named, versioned set of compliance rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ontology {
    /// Ontology name.
    pub name: String,
    /// Version string.
    pub version: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Business domain, e.g. `lending`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Rules in evaluation order.
    pub rules: Vec<Rule>,
    /// Field extractors applied to free-text input.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extractors: BTreeMap<String, FieldExtractor>,
    /// Sort hints shared by every rule.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variable_types: BTreeMap<String, Sort>,
}

impl Ontology {
    /// Create an empty ontology.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            domain: None,
            rules: Vec::new(),
            extractors: BTreeMap::new(),
            variable_types: BTreeMap::new(),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Append a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Add a field extractor.
    #[must_use]
    pub fn with_extractor(mut self, field: impl Into<String>, extractor: FieldExtractor) -> Self {
        self.extractors.insert(field.into(), extractor);
        self
    }

    /// Add an ontology-wide sort hint.
    #[must_use]
    pub fn with_variable_type(mut self, variable: impl Into<String>, sort: Sort) -> Self {
        self.variable_types.insert(variable.into(), sort);
        self
    }

    /// Parse and validate an ontology document.
    ///
    /// # Errors
    ///
    /// Returns [`OntologyError::InvalidStructure`] if `name`, `version` or
    /// `rules` is missing, a rule lacks `name` or `expression`, or rule
    /// names repeat.
    pub fn from_value(document: Value) -> Result<Self, OntologyError> {
        check_document(&document)?;
        let ontology: Self = serde_json::from_value(document)
            .map_err(|e| OntologyError::InvalidStructure(e.to_string()))?;
        ontology.validate()?;
        Ok(ontology)
    }

    /// Parse and validate an ontology from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`OntologyError::Parse`] for malformed JSON, otherwise as
    /// [`Ontology::from_value`].
    pub fn from_json(json: &str) -> Result<Self, OntologyError> {
        let document: Value = serde_json::from_str(json)?;
        Self::from_value(document)
    }

    /// Check the invariants of a constructed ontology.
    ///
    /// # Errors
    ///
    /// Returns [`OntologyError::InvalidStructure`] on an empty name or
    /// version, a rule with an empty name or expression, or duplicate rule
    /// names.
    pub fn validate(&self) -> Result<(), OntologyError> {
        if self.name.trim().is_empty() {
            return Err(OntologyError::InvalidStructure("empty name".into()));
        }
        if self.version.trim().is_empty() {
            return Err(OntologyError::InvalidStructure("empty version".into()));
        }
        let mut seen = BTreeSet::new();
        for rule in &self.rules {
            if rule.name.trim().is_empty() {
                return Err(OntologyError::InvalidStructure("rule with empty name".into()));
            }
            if rule.expression.trim().is_empty() {
                return Err(OntologyError::InvalidStructure(format!(
                    "rule {} has an empty expression",
                    rule.name
                )));
            }
            if !seen.insert(rule.name.as_str()) {
                return Err(OntologyError::InvalidStructure(format!(
                    "duplicate rule name {}",
                    rule.name
                )));
            }
        }
        Ok(())
    }

    /// SHA-256 of the canonical (RFC 8785) form of the ontology, hex encoded.
    ///
    /// # Errors
    ///
    /// Returns an error if the ontology cannot be canonicalized.
    pub fn content_hash(&self) -> Result<String, OntologyError> {
        let canonical = serde_jcs::to_vec(self)
            .map_err(|e| OntologyError::InvalidStructure(e.to_string()))?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }

    /// `name@version#content_hash`, binding a result to this exact rule set.
    ///
    /// # Errors
    ///
    /// See [`Ontology::content_hash`].
    pub fn identifier(&self) -> Result<String, OntologyError> {
        Ok(format!(
            "{}@{}#{}",
            self.name,
            self.version,
            self.content_hash()?
        ))
    }

    /// Look up a rule by name.
    #[must_use]
    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// Variables of error-severity rules that `claims` does not provide, in
    /// rule order without repeats.
    #[must_use]
    pub fn missing_variables(&self, claims: &ClaimMap) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.rules
            .iter()
            .filter(|r| r.severity == Severity::Error)
            .flat_map(|r| r.variables.iter())
            .filter(|v| !claims.contains_key(v.as_str()))
            .filter(|v| seen.insert(v.as_str()))
            .cloned()
            .collect()
    }
}

/// Structural checks with messages naming the missing field.
fn check_document(document: &Value) -> Result<(), OntologyError> {
    let Some(object) = document.as_object() else {
        return Err(OntologyError::InvalidStructure(
            "ontology must be a JSON object".into(),
        ));
    };
    for field in ["name", "version", "rules"] {
        if !object.contains_key(field) {
            return Err(OntologyError::InvalidStructure(format!(
                "missing required field: {field}"
            )));
        }
    }
    let Some(rules) = object.get("rules").and_then(Value::as_array) else {
        return Err(OntologyError::InvalidStructure("rules must be a list".into()));
    };
    for (index, rule) in rules.iter().enumerate() {
        for field in ["name", "expression"] {
            if rule.get(field).is_none() {
                return Err(OntologyError::InvalidStructure(format!(
                    "rule {index} missing required field: {field}"
                )));
            }
        }
    }
    Ok(())
}
