//! Scalar coercion and key normalization.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::ClaimValue;

/// Words read as `true`.
pub const TRUE_WORDS: &[&str] = &["true", "yes", "approved"];

/// Words read as `false`.
pub const FALSE_WORDS: &[&str] = &["false", "no", "denied", "rejected"];

static PERCENTAGE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+\.?\d*)%$").expect("percentage regex is valid"));

static CURRENCY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$?[\d,]+\.?\d*$").expect("currency regex is valid"));

static NUMERIC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+\.?\d*$").expect("numeric regex is valid"));

static NON_WORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("non-word regex is valid"));

static WHITESPACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

/// Coerce a text value into the most specific claim value.
///
/// First match wins: boolean keyword, percentage (divided by 100), currency,
/// plain number, then text. Dates stay text. A currency match needs a `$` or
/// a `,` separator, so `"720"` stays an integer.
#[must_use]
pub fn coerce_str(raw: &str) -> ClaimValue {
    let value = raw.trim();
    let lowered = value.to_lowercase();

    if TRUE_WORDS.contains(&lowered.as_str()) {
        return ClaimValue::Bool(true);
    }
    if FALSE_WORDS.contains(&lowered.as_str()) {
        return ClaimValue::Bool(false);
    }

    if let Some(caps) = PERCENTAGE_REGEX.captures(value)
        && let Ok(number) = caps[1].parse::<f64>()
    {
        return ClaimValue::Float(number / 100.0);
    }

    if CURRENCY_REGEX.is_match(value)
        && (value.starts_with('$') || value.contains(','))
        && let Ok(number) = value.replace(['$', ','], "").parse::<f64>()
    {
        return ClaimValue::Float(number);
    }

    if NUMERIC_REGEX.is_match(value) {
        if !value.contains('.')
            && let Ok(int) = value.parse::<i64>()
        {
            return ClaimValue::Int(int);
        }
        if let Ok(number) = value.parse::<f64>() {
            return ClaimValue::Float(number);
        }
    }

    ClaimValue::Text(value.to_string())
}

/// Normalize a key: strip punctuation, trim, lowercase, and join words with
/// underscores.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    let stripped = NON_WORD_REGEX.replace_all(key, "");
    let lowered = stripped.trim().to_lowercase();
    WHITESPACE_REGEX.replace_all(&lowered, "_").into_owned()
}

/// Name of a JSON value's type, for error messages.
#[must_use]
pub const fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Convert a JSON number, keeping integers exact.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn coerce_number(number: &serde_json::Number) -> ClaimValue {
    if let Some(int) = number.as_i64() {
        ClaimValue::Int(int)
    } else if let Some(uint) = number.as_u64() {
        ClaimValue::Float(uint as f64)
    } else {
        ClaimValue::Float(number.as_f64().unwrap_or(f64::NAN))
    }
}
