//! Claim extraction: raw model output to a flat, typed claim map.
//!
//! Structured input (JSON objects and arrays) is flattened into dotted
//! paths. Text is first tried as serialized JSON, then run through the
//! key/value patterns, the domain battery, any ontology-supplied
//! [`FieldExtractor`]s and the derived-field rules. Text that yields nothing
//! is kept whole under `raw_content`.

pub mod coerce;
pub mod hints;
pub mod patterns;

use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub use coerce::{coerce_str, normalize_key};
pub use hints::{ExtractorPattern, FieldExtractor};

use crate::config::ParserConfig;
use crate::error::ExtractionError;
use crate::types::{Claim, ClaimMap, ClaimValue};

/// Path used when the top-level input is a sequence.
pub const ITEMS_PATH: &str = "items";

/// Path used when nothing could be extracted from text.
pub const RAW_CONTENT_PATH: &str = "raw_content";

/// Turns raw model output into a [`ClaimMap`].
///
/// Stateless apart from its configuration; safe to share between requests.
#[derive(Debug, Clone, Default)]
pub struct ClaimExtractor {
    config: ParserConfig,
}

impl ClaimExtractor {
    /// Create an extractor with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an extractor with the given configuration.
    #[must_use]
    pub const fn with_config(config: ParserConfig) -> Self {
        Self { config }
    }

    /// The extractor's configuration.
    #[must_use]
    pub const fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Extract claims from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::UnsupportedInputType`] for top-level
    /// booleans, numbers and nulls, and [`ExtractionError::DepthExceeded`]
    /// for structured input nested beyond the configured depth. String input
    /// never fails.
    pub fn extract(&self, raw: &Value) -> Result<ClaimMap, ExtractionError> {
        self.extract_with_hints(raw, &BTreeMap::new())
    }

    /// Extract claims, applying `hints` when the input is free text.
    ///
    /// # Errors
    ///
    /// See [`ClaimExtractor::extract`].
    pub fn extract_with_hints(
        &self,
        raw: &Value,
        hints: &BTreeMap<String, FieldExtractor>,
    ) -> Result<ClaimMap, ExtractionError> {
        match raw {
            Value::Object(map) => {
                let mut out = ClaimMap::new();
                self.flatten(map, "", 1, &mut out)?;
                Ok(out)
            }
            Value::Array(items) => {
                let mut out = ClaimMap::new();
                out.insert(ITEMS_PATH.to_string(), self.parse_array(items, 1)?);
                Ok(out)
            }
            Value::String(text) => Ok(self.extract_text_with_hints(text, hints)),
            other => Err(ExtractionError::UnsupportedInputType(
                coerce::json_type_name(other).to_string(),
            )),
        }
    }

    /// Extract claims from text. Never fails.
    #[must_use]
    pub fn extract_text(&self, text: &str) -> ClaimMap {
        self.extract_text_with_hints(text, &BTreeMap::new())
    }

    /// Extract claims from text with ontology hints. Never fails.
    #[must_use]
    pub fn extract_text_with_hints(
        &self,
        text: &str,
        hints: &BTreeMap<String, FieldExtractor>,
    ) -> ClaimMap {
        let trimmed = text.trim_start();
        if (trimmed.starts_with('{') || trimmed.starts_with('['))
            && let Ok(decoded) = serde_json::from_str::<Value>(text)
        {
            match self.extract_with_hints(&decoded, hints) {
                Ok(claims) => return claims,
                Err(e) => {
                    tracing::debug!(error = %e, "structured decode rejected, parsing as text");
                }
            }
        }
        self.parse_text(text, hints)
    }

    /// Turn a claim map into a list of typed claims.
    #[must_use]
    pub fn extract_claims(claims: &ClaimMap) -> Vec<Claim> {
        claims
            .iter()
            .map(|(path, value)| Claim::new(path.clone(), value.clone()))
            .collect()
    }

    fn flatten(
        &self,
        map: &Map<String, Value>,
        prefix: &str,
        depth: usize,
        out: &mut ClaimMap,
    ) -> Result<(), ExtractionError> {
        if depth > self.config.max_depth {
            return Err(ExtractionError::DepthExceeded {
                max: self.config.max_depth,
            });
        }
        for (key, value) in map {
            let key = normalize_key(key);
            let path = if prefix.is_empty() {
                key
            } else {
                format!("{prefix}.{key}")
            };
            match value {
                Value::Object(nested) => self.flatten(nested, &path, depth + 1, out)?,
                Value::Array(items) => {
                    let parsed = self.parse_array(items, depth + 1)?;
                    out.insert(path, parsed);
                }
                scalar => {
                    out.insert(path, Self::parse_scalar(scalar));
                }
            }
        }
        Ok(())
    }

    fn parse_array(&self, items: &[Value], depth: usize) -> Result<ClaimValue, ExtractionError> {
        if depth > self.config.max_depth {
            return Err(ExtractionError::DepthExceeded {
                max: self.config.max_depth,
            });
        }
        let mut parsed = Vec::with_capacity(items.len());
        for item in items {
            let value = match item {
                Value::Object(map) => {
                    let mut nested = ClaimMap::new();
                    self.flatten(map, "", depth + 1, &mut nested)?;
                    ClaimValue::Object(nested)
                }
                Value::Array(inner) => self.parse_array(inner, depth + 1)?,
                scalar => Self::parse_scalar(scalar),
            };
            parsed.push(value);
        }
        Ok(ClaimValue::Array(parsed))
    }

    fn parse_scalar(value: &Value) -> ClaimValue {
        match value {
            Value::Null => ClaimValue::Null,
            Value::Bool(b) => ClaimValue::Bool(*b),
            Value::Number(n) => coerce::coerce_number(n),
            Value::String(s) => coerce_str(s),
            Value::Array(_) | Value::Object(_) => ClaimValue::Null,
        }
    }

    fn parse_text(&self, text: &str, hints: &BTreeMap<String, FieldExtractor>) -> ClaimMap {
        let mut out = ClaimMap::new();
        patterns::key_values(text, &mut out);
        if self.config.domain_patterns {
            patterns::domain(text, &mut out);
        }
        hints::apply(hints, text, &mut out);
        if self.config.derive_fields {
            patterns::derive(text, &mut out);
        }

        if out.is_empty() {
            out.insert(
                RAW_CONTENT_PATH.to_string(),
                ClaimValue::Text(text.to_string()),
            );
        }
        tracing::debug!(fields = out.len(), "extracted claims from text");
        out
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::types::ClaimType;
    use serde_json::json;

    #[test]
    fn test_nested_object_flattening() {
        let extractor = ClaimExtractor::new();
        let claims = extractor
            .extract(&json!({
                "Applicant": {"Credit Score": 720, "income": "$85,000"},
                "decision": "approved",
                "tags": ["first-time", "fixed"]
            }))
            .unwrap();
        assert_eq!(claims.get("applicant.credit_score"), Some(&ClaimValue::Int(720)));
        assert_eq!(
            claims.get("applicant.income"),
            Some(&ClaimValue::Float(85_000.0))
        );
        assert_eq!(claims.get("decision"), Some(&ClaimValue::Bool(true)));
        assert_eq!(
            claims.get("tags"),
            Some(&ClaimValue::Array(vec![
                ClaimValue::Text("first-time".into()),
                ClaimValue::Text("fixed".into()),
            ]))
        );
    }

    #[test]
    fn test_top_level_array() {
        let extractor = ClaimExtractor::new();
        let claims = extractor
            .extract(&json!([{"amount": 5}, "yes"]))
            .unwrap();
        let mut first = ClaimMap::new();
        first.insert("amount".into(), ClaimValue::Int(5));
        assert_eq!(
            claims.get(ITEMS_PATH),
            Some(&ClaimValue::Array(vec![
                ClaimValue::Object(first),
                ClaimValue::Bool(true)
            ]))
        );
    }

    #[test]
    fn test_unsupported_top_level() {
        let extractor = ClaimExtractor::new();
        let err = extractor.extract(&json!(42)).unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedInputType(t) if t == "number"));
        assert!(extractor.extract(&Value::Null).is_err());
    }

    #[test]
    fn test_serialized_json_string() {
        let extractor = ClaimExtractor::new();
        let claims = extractor
            .extract(&json!(r#"{"amount": 150000, "credit_score": 550}"#))
            .unwrap();
        assert_eq!(claims.get("amount"), Some(&ClaimValue::Int(150_000)));
        assert_eq!(claims.get("credit_score"), Some(&ClaimValue::Int(550)));
    }

    #[test]
    fn test_scalar_json_string_is_text() {
        let extractor = ClaimExtractor::new();
        let claims = extractor.extract_text("720");
        assert_eq!(
            claims.get(RAW_CONTENT_PATH),
            Some(&ClaimValue::Text("720".into()))
        );
    }

    #[test]
    fn test_raw_content_fallback() {
        let extractor = ClaimExtractor::new();
        let claims = extractor.extract_text("Thanks for reaching out");
        assert_eq!(claims.len(), 1);
        assert_eq!(
            claims.get(RAW_CONTENT_PATH),
            Some(&ClaimValue::Text("Thanks for reaching out".into()))
        );
    }

    #[test]
    fn test_dti_and_compensating_factors() {
        let extractor = ClaimExtractor::new();
        let mut hints = BTreeMap::new();
        hints.insert(
            "dti".to_string(),
            FieldExtractor::Float {
                pattern: r"dti[:\s]+(\d+(?:\.\d+)?)".parse().unwrap(),
            },
        );
        let claims = extractor.extract_text_with_hints(
            "Your DTI: 45% but you have two compensating factors.",
            &hints,
        );
        assert_eq!(claims.get("dti"), Some(&ClaimValue::Float(45.0)));
        assert_eq!(claims.get("compensating_factors"), Some(&ClaimValue::Int(2)));
        assert_eq!(claims.get("debt_to_income_ratio"), Some(&ClaimValue::Int(45)));
    }

    #[test]
    fn test_currency_and_percentage_text() {
        let extractor = ClaimExtractor::new();
        let claims = extractor.extract_text("Loan amount: $75,000\nRate: 4.5%");
        assert_eq!(claims.get("loan_amount"), Some(&ClaimValue::Float(75_000.0)));
        assert_eq!(claims.get("rate"), Some(&ClaimValue::Float(0.045)));
    }

    #[test]
    fn test_depth_cap() {
        let extractor = ClaimExtractor::with_config(ParserConfig::default().with_max_depth(2));
        let deep = json!({"a": {"b": {"c": 1}}});
        assert!(matches!(
            extractor.extract(&deep),
            Err(ExtractionError::DepthExceeded { max: 2 })
        ));
        let claims = extractor.extract(&json!(deep.to_string())).unwrap();
        assert!(!claims.is_empty());
        assert!(!claims.contains_key("a.b.c"));
    }

    #[test]
    fn test_later_keys_overwrite() {
        let extractor = ClaimExtractor::new();
        let claims = extractor
            .extract(&json!({"Loan Amount": 1, "loan_amount": 2}))
            .unwrap();
        assert_eq!(claims.len(), 1);
    }

    #[test]
    fn test_extract_claims_types() {
        let extractor = ClaimExtractor::new();
        let map = extractor
            .extract(&json!({"closing": "2024-09-30", "ok": true, "rate": 0.05, "note": null}))
            .unwrap();
        let claims = ClaimExtractor::extract_claims(&map);
        let types: Vec<_> = claims.iter().map(|c| (c.path.as_str(), c.claim_type)).collect();
        assert_eq!(
            types,
            vec![
                ("closing", ClaimType::Date),
                ("note", ClaimType::Null),
                ("ok", ClaimType::Boolean),
                ("rate", ClaimType::Numeric),
            ]
        );
        assert!(claims.iter().all(|c| c.confidence == 1.0));
    }
}
