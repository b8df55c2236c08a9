//! Natural-language extraction patterns.

use regex::Regex;
use std::sync::LazyLock;

use super::coerce::{coerce_str, normalize_key};
use crate::types::{ClaimMap, ClaimValue};

/// `key: value`, `key = value`, `"key" is value`, `key -> value`, in order.
static KEY_VALUE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"([A-Za-z_][A-Za-z0-9_ \t]*?):[ \t]*([^\n]+)",
        r"([A-Za-z_][A-Za-z0-9_ \t]*?)[ \t]*=[ \t]*([^\n]+)",
        r#""([^"]+)"\s+is\s+([^\n]+)"#,
        r"([A-Za-z_][A-Za-z0-9_ \t]*?)[ \t]*->[ \t]*([^\n]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("key/value regex is valid"))
    .collect()
});

/// One entry of the domain battery.
struct DomainPattern {
    regex: Regex,
    key: &'static str,
    /// Fixed value; `None` means coerce capture group 1.
    value: Option<bool>,
}

static DOMAIN_PATTERNS: LazyLock<Vec<DomainPattern>> = LazyLock::new(|| {
    [
        (r"(?i)approved", "decision", Some(true)),
        (r"(?i)(denied|rejected)", "decision", Some(false)),
        (r"(?i)loan amount[:\s]+\$?([\d,]+)", "loan_amount", None),
        (r"(?i)interest rate[:\s]+([\d.]+)%?", "interest_rate", None),
        (r"(?i)credit score[:\s]+(\d+)", "credit_score", None),
        (r"(?i)\bdti[:\s]+([\d.]+)%?", "debt_to_income_ratio", None),
        (r"(?i)debt.to.income[:\s]+([\d.]+)%?", "debt_to_income_ratio", None),
    ]
    .into_iter()
    .map(|(pattern, key, value)| DomainPattern {
        regex: Regex::new(pattern).expect("domain regex is valid"),
        key,
        value,
    })
    .collect()
});

static NUMBER_WORDS: &[(&str, i64)] = &[
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("multiple", 2),
    ("several", 2),
    ("numerous", 2),
];

/// Words before "compensating" inspected for a count.
const COUNT_LOOKBEHIND: usize = 3;

/// Apply the key/value patterns, later patterns overwriting earlier ones.
pub fn key_values(text: &str, out: &mut ClaimMap) {
    for pattern in KEY_VALUE_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            let key = normalize_key(&caps[1]);
            if key.is_empty() {
                continue;
            }
            out.insert(key, coerce_str(&caps[2]));
        }
    }
}

/// Apply the built-in lending battery.
pub fn domain(text: &str, out: &mut ClaimMap) {
    for pattern in DOMAIN_PATTERNS.iter() {
        let Some(caps) = pattern.regex.captures(text) else {
            continue;
        };
        let value = match pattern.value {
            Some(fixed) => ClaimValue::Bool(fixed),
            None => match caps.get(1) {
                Some(m) => coerce_str(m.as_str()),
                None => continue,
            },
        };
        out.insert(pattern.key.to_string(), value);
    }
}

/// Compute fields that depend on other fields or on the text as a whole.
pub fn derive(text: &str, out: &mut ClaimMap) {
    let lowered = text.to_lowercase();
    if let Some(count) = compensating_factors(&lowered) {
        out.insert("compensating_factors".to_string(), ClaimValue::Int(count));
    }

    let fees = out.get("fees").and_then(ClaimValue::as_f64);
    let amount = out.get("loan_amount").and_then(ClaimValue::as_f64);
    if let (Some(fees), Some(amount)) = (fees, amount)
        && amount > 0.0
    {
        out.insert(
            "fee_percentage".to_string(),
            ClaimValue::Float(fees * 100.0 / amount),
        );
    }
}

/// Count of compensating factors mentioned in `lowered`, if any are.
fn compensating_factors(lowered: &str) -> Option<i64> {
    let position = lowered.find("compensating")?;
    let before: Vec<&str> = lowered[..position]
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let count = before
        .iter()
        .rev()
        .take(COUNT_LOOKBEHIND)
        .find_map(|word| {
            NUMBER_WORDS
                .iter()
                .find(|(w, _)| w == word)
                .map(|(_, n)| *n)
                .or_else(|| word.parse::<i64>().ok())
        })
        .unwrap_or(1);
    Some(count)
}
