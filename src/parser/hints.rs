//! Ontology-supplied field extractors for free text.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::types::{ClaimMap, ClaimValue};

/// Negation cues looked for around a boolean keyword.
pub const NEGATION_PATTERNS: &[&str] = &[
    "not ",
    "no ",
    "avoid",
    "contraindicated",
    "don't",
    "cannot",
    "should not",
    "must not",
    "never ",
    "prohibited",
    " is not ",
    " not a ",
];

/// Characters of context inspected on each side of a keyword.
const NEGATION_WINDOW: usize = 30;

const fn default_true() -> bool {
    true
}

/// A regular expression compiled once, when the extractor is built or
/// deserialized. Serializes as its source text.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExtractorPattern(Regex);

impl ExtractorPattern {
    /// Compile a pattern.
    ///
    /// # Errors
    ///
    /// Returns the regex error when `pattern` is not a valid expression.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self)
    }

    /// The pattern source.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    fn captures<'t>(&self, text: &'t str) -> Option<Captures<'t>> {
        self.0.captures(text)
    }
}

impl fmt::Debug for ExtractorPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExtractorPattern").field(&self.as_str()).finish()
    }
}

impl PartialEq for ExtractorPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl FromStr for ExtractorPattern {
    type Err = regex::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ExtractorPattern {
    type Error = regex::Error;

    fn try_from(pattern: String) -> Result<Self, Self::Error> {
        Self::new(&pattern)
    }
}

impl From<ExtractorPattern> for String {
    fn from(pattern: ExtractorPattern) -> Self {
        pattern.as_str().to_string()
    }
}

/// How to pull one named field out of free text.
///
/// Patterns run against the lowercased text; numeric kinds read capture
/// group 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldExtractor {
    /// `true` when any keyword occurs, `false` when one occurs in a negated
    /// context or none occurs.
    Boolean {
        /// Keywords to look for.
        keywords: Vec<String>,
        /// Extra negation cues.
        #[serde(default)]
        negation_words: Vec<String>,
        /// Whether to look for negation around a keyword.
        #[serde(default = "default_true")]
        check_negation: bool,
    },
    /// Integer capture.
    Int {
        /// Regular expression.
        pattern: ExtractorPattern,
    },
    /// Float capture.
    Float {
        /// Regular expression.
        pattern: ExtractorPattern,
    },
    /// Money amount with an optional `k`/`m`/`b` suffix.
    Money {
        /// Regular expression.
        pattern: ExtractorPattern,
    },
    /// Percentage kept as the raw number.
    Percentage {
        /// Regular expression.
        pattern: ExtractorPattern,
    },
    /// Text capture (group 1, or the whole match).
    String {
        /// Regular expression.
        pattern: ExtractorPattern,
    },
}

impl FieldExtractor {
    /// Boolean keyword extractor with negation checking.
    #[must_use]
    pub fn keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Boolean {
            keywords: keywords.into_iter().map(Into::into).collect(),
            negation_words: Vec::new(),
            check_negation: true,
        }
    }

    /// Apply the extractor to `lowered` (the lowercased text).
    ///
    /// Returns `None` when the pattern does not match or the capture does not
    /// parse.
    #[must_use]
    pub fn extract(&self, lowered: &str) -> Option<ClaimValue> {
        match self {
            Self::Boolean {
                keywords,
                negation_words,
                check_negation,
            } => Some(ClaimValue::Bool(keyword_present(
                lowered,
                keywords,
                negation_words,
                *check_negation,
            ))),
            Self::Int { pattern } => {
                let caps = pattern.captures(lowered)?;
                let raw = group_one(&caps)?.replace(',', "");
                raw.parse::<i64>().ok().map(ClaimValue::Int)
            }
            Self::Float { pattern } | Self::Percentage { pattern } => {
                let caps = pattern.captures(lowered)?;
                let raw = group_one(&caps)?.replace(',', "");
                raw.parse::<f64>().ok().map(ClaimValue::Float)
            }
            Self::Money { pattern } => {
                let caps = pattern.captures(lowered)?;
                let number = caps.get(1)?;
                let amount = number.as_str().replace(',', "").parse::<f64>().ok()?;
                let whole = caps.get(0)?;
                let suffix = lowered[number.end()..whole.end()].trim_start();
                let multiplier = match suffix.chars().next() {
                    Some('k') => 1_000.0,
                    Some('m') => 1_000_000.0,
                    Some('b') => 1_000_000_000.0,
                    _ => 1.0,
                };
                Some(ClaimValue::Float(amount * multiplier))
            }
            Self::String { pattern } => {
                let caps = pattern.captures(lowered)?;
                let text = caps.get(1).or_else(|| caps.get(0))?;
                Some(ClaimValue::Text(text.as_str().to_string()))
            }
        }
    }
}

fn group_one<'a>(caps: &'a Captures<'_>) -> Option<&'a str> {
    caps.get(1).map(|m| m.as_str())
}

fn keyword_present(
    lowered: &str,
    keywords: &[String],
    negation_words: &[String],
    check_negation: bool,
) -> bool {
    let mut found = false;
    for keyword in keywords {
        let keyword = keyword.to_lowercase();
        let Some(position) = lowered.find(&keyword) else {
            continue;
        };
        found = true;
        if check_negation {
            let context = window(lowered, position, position + keyword.len());
            let negated = NEGATION_PATTERNS.iter().any(|neg| context.contains(neg))
                || negation_words
                    .iter()
                    .any(|neg| context.contains(neg.to_lowercase().as_str()));
            if negated {
                return false;
            }
        }
    }
    found
}

/// Up to [`NEGATION_WINDOW`] characters either side of `start..end`.
fn window(text: &str, start: usize, end: usize) -> &str {
    let from = text[..start]
        .char_indices()
        .rev()
        .take(NEGATION_WINDOW)
        .last()
        .map_or(start, |(i, _)| i);
    let to = text[end..]
        .char_indices()
        .nth(NEGATION_WINDOW)
        .map_or(text.len(), |(i, _)| end + i);
    &text[from..to]
}

/// Run every extractor over `text`, inserting the fields that produced a value.
pub fn apply(extractors: &BTreeMap<String, FieldExtractor>, text: &str, out: &mut ClaimMap) {
    let lowered = text.to_lowercase();
    for (field, extractor) in extractors {
        if let Some(value) = extractor.extract(&lowered) {
            tracing::debug!(field = %field, value = %value, "extractor matched");
            out.insert(field.clone(), value);
        }
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_keyword() {
        let ex = FieldExtractor::keywords(["metformin"]);
        assert_eq!(
            ex.extract("start metformin 500mg daily"),
            Some(ClaimValue::Bool(true))
        );
        assert_eq!(
            ex.extract("take rest and fluids"),
            Some(ClaimValue::Bool(false))
        );
    }

    #[test]
    fn test_boolean_negation_context() {
        let ex = FieldExtractor::keywords(["metformin"]);
        assert_eq!(
            ex.extract("metformin is contraindicated here"),
            Some(ClaimValue::Bool(false))
        );
        let ex = FieldExtractor::Boolean {
            keywords: vec!["guarantee".into()],
            negation_words: vec![],
            check_negation: false,
        };
        assert_eq!(
            ex.extract("we do not guarantee anything"),
            Some(ClaimValue::Bool(true))
        );
    }

    #[test]
    fn test_custom_negation_word() {
        let ex = FieldExtractor::Boolean {
            keywords: vec!["refund".into()],
            negation_words: vec!["ineligible".into()],
            check_negation: true,
        };
        assert_eq!(
            ex.extract("you are ineligible for a refund"),
            Some(ClaimValue::Bool(false))
        );
    }

    #[test]
    fn test_numeric_kinds() {
        let text = "dti: 45% with credit score 720 and fees of $12,000";
        let dti = FieldExtractor::Percentage {
            pattern: r"dti[:\s]+(\d+(?:\.\d+)?)".parse().unwrap(),
        };
        assert_eq!(dti.extract(text), Some(ClaimValue::Float(45.0)));
        let score = FieldExtractor::Int {
            pattern: r"credit score (\d+)".parse().unwrap(),
        };
        assert_eq!(score.extract(text), Some(ClaimValue::Int(720)));
        let fees = FieldExtractor::Money {
            pattern: r"fees of \$([\d,]+)".parse().unwrap(),
        };
        assert_eq!(fees.extract(text), Some(ClaimValue::Float(12_000.0)));
    }

    #[test]
    fn test_money_suffix() {
        let ex = FieldExtractor::Money {
            pattern: r"\$(\d+(?:\.\d+)?)\s*[kmb]?".parse().unwrap(),
        };
        assert_eq!(
            ex.extract("a loan of $1.5m"),
            Some(ClaimValue::Float(1_500_000.0))
        );
        assert_eq!(
            ex.extract("a loan of $250k"),
            Some(ClaimValue::Float(250_000.0))
        );
        assert_eq!(
            ex.extract("a loan of $900"),
            Some(ClaimValue::Float(900.0))
        );
    }

    #[test]
    fn test_string_and_invalid_pattern() {
        let ex = FieldExtractor::String {
            pattern: r"status: (\w+)".parse().unwrap(),
        };
        assert_eq!(
            ex.extract("status: pending"),
            Some(ClaimValue::Text("pending".into()))
        );
        assert!("(unclosed".parse::<ExtractorPattern>().is_err());
        let bad: Result<FieldExtractor, _> =
            serde_json::from_str(r#"{"type": "int", "pattern": "(unclosed"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_pattern_serializes_as_source() {
        let ex = FieldExtractor::Int {
            pattern: r"score (\d+)".parse().unwrap(),
        };
        let json = serde_json::to_value(&ex).unwrap();
        assert_eq!(json["pattern"], r"score (\d+)");
        let back: FieldExtractor = serde_json::from_value(json).unwrap();
        assert_eq!(back, ex);
    }

    #[test]
    fn test_deserialize_from_ontology() {
        let ex: FieldExtractor = serde_json::from_str(
            r#"{"type": "boolean", "keywords": ["escrow waived"]}"#,
        )
        .unwrap();
        assert_eq!(
            ex,
            FieldExtractor::Boolean {
                keywords: vec!["escrow waived".into()],
                negation_words: vec![],
                check_negation: true,
            }
        );
    }

    #[test]
    fn test_window_multibyte() {
        let text = "ééééé keyword ééééé";
        let start = text.find("keyword").unwrap();
        let ctx = window(text, start, start + "keyword".len());
        assert_eq!(ctx, text);
    }
}
