//! Core data structures for `OxiProof`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use crate::oracle::{Sort, Value};

static DATE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").expect("date regex is valid"));

static AGGREGATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(sum|count|avg|max|min)\s*\(").expect("aggregate regex is valid")
});

/// A flat mapping from dotted claim paths to values.
///
/// Ordered, so iteration and serialization are deterministic.
pub type ClaimMap = BTreeMap<String, ClaimValue>;

/// A value extracted from model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValue {
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// Text (dates are kept as text).
    Text(String),
    /// Sequence of element-wise parsed values.
    Array(Vec<ClaimValue>),
    /// Nested mapping inside an array element.
    Object(ClaimMap),
}

impl ClaimValue {
    /// The claim type of this value.
    #[must_use]
    pub fn claim_type(&self) -> ClaimType {
        match self {
            Self::Null => ClaimType::Null,
            Self::Bool(_) => ClaimType::Boolean,
            Self::Int(_) => ClaimType::Integer,
            Self::Float(_) => ClaimType::Numeric,
            Self::Text(s) if DATE_REGEX.is_match(s) => ClaimType::Date,
            Self::Text(_) => ClaimType::String,
            Self::Array(_) => ClaimType::Array,
            Self::Object(_) => ClaimType::Object,
        }
    }

    /// Numeric view of the value.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Boolean view of the value.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Solver view of a scalar value; `None` for null, arrays and objects.
    #[must_use]
    pub fn to_oracle_value(&self) -> Option<Value> {
        match self {
            Self::Bool(b) => Some(Value::Bool(*b)),
            Self::Int(i) => Some(Value::Int(*i)),
            Self::Float(f) => Some(Value::Real(*f)),
            Self::Text(s) => Some(Value::Str(s.clone())),
            Self::Null | Self::Array(_) | Self::Object(_) => None,
        }
    }

    /// Sort a variable bound to this value would have.
    #[must_use]
    pub fn sort(&self) -> Option<Sort> {
        self.to_oracle_value().map(|v| v.sort())
    }
}

impl fmt::Display for ClaimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("<unprintable>"),
        }
    }
}

impl From<bool> for ClaimValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for ClaimValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for ClaimValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for ClaimValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ClaimValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Type tag of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimType {
    /// Boolean claim.
    Boolean,
    /// Integer claim.
    Integer,
    /// Non-integer number.
    Numeric,
    /// Free text.
    String,
    /// ISO-8601 date kept as text.
    Date,
    /// List of values.
    Array,
    /// Nested mapping (only inside arrays).
    Object,
    /// Explicit null.
    Null,
}

/// A single typed fact extracted from model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// Normalized dotted path.
    pub path: String,
    /// Extracted value.
    pub value: ClaimValue,
    /// Type tag.
    #[serde(rename = "type")]
    pub claim_type: ClaimType,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f64,
}

impl Claim {
    /// Create a claim with full confidence.
    #[must_use]
    pub fn new(path: impl Into<String>, value: ClaimValue) -> Self {
        Self {
            path: path.into(),
            claim_type: value.claim_type(),
            value,
            confidence: 1.0,
        }
    }
}

/// Rule severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocking; checked by default.
    #[default]
    Error,
    /// Advisory.
    Warning,
    /// Informational.
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        };
        f.write_str(s)
    }
}

/// How a rule expression is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// `var op threshold`
    NumericRange,
    /// Propositional logic over declared variables.
    BooleanLogic,
    /// Regular-expression matching.
    StringPattern,
    /// Dates and durations.
    Temporal,
    /// Quantified relations.
    Relational,
    /// Aggregates over collections.
    Aggregate,
}

impl RuleType {
    /// Infer the rule type from the expression's surface syntax.
    ///
    /// Keywords are matched as whole tokens, so `is_denial` does not read as
    /// `not` and `amount` does not read as `count(`.
    #[must_use]
    pub fn infer(expression: &str) -> Self {
        let lowered = expression.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|t| !t.is_empty())
            .collect();
        let has = |words: &[&str]| tokens.iter().any(|t| words.contains(t));

        if has(&["forall", "exists"]) {
            Self::Relational
        } else if AGGREGATE_REGEX.is_match(&lowered) {
            Self::Aggregate
        } else if has(&["regex", "pattern", "matches"]) {
            Self::StringPattern
        } else if has(&["date", "time", "duration"]) {
            Self::Temporal
        } else if has(&["and", "or", "not", "implies"])
            || lowered.contains("&&")
            || lowered.contains("||")
            || lowered.contains("=>")
        {
            Self::BooleanLogic
        } else if ["<=", ">=", "==", "!=", "<", ">"]
            .iter()
            .any(|op| lowered.contains(op))
        {
            Self::NumericRange
        } else {
            Self::BooleanLogic
        }
    }

    /// Snake-case name of the rule type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NumericRange => "numeric_range",
            Self::BooleanLogic => "boolean_logic",
            Self::StringPattern => "string_pattern",
            Self::Temporal => "temporal",
            Self::Relational => "relational",
            Self::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named compliance rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RuleDocument")]
pub struct Rule {
    /// Unique name within the ontology.
    pub name: String,
    /// Compilation strategy, inferred once unless given explicitly.
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    /// Human-readable expression.
    pub expression: String,
    /// Declared variables, in order.
    #[serde(default)]
    pub variables: Vec<String>,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Severity.
    #[serde(default)]
    pub severity: Severity,
    /// Per-variable sort hints.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variable_types: BTreeMap<String, Sort>,
}

#[derive(Deserialize)]
struct RuleDocument {
    name: String,
    expression: String,
    #[serde(rename = "type", default)]
    rule_type: Option<RuleType>,
    #[serde(default)]
    variables: Vec<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    severity: Severity,
    #[serde(default)]
    variable_types: BTreeMap<String, Sort>,
}

impl From<RuleDocument> for Rule {
    fn from(doc: RuleDocument) -> Self {
        Self {
            rule_type: doc
                .rule_type
                .unwrap_or_else(|| RuleType::infer(&doc.expression)),
            name: doc.name,
            expression: doc.expression,
            variables: doc.variables,
            description: doc.description,
            severity: doc.severity,
            variable_types: doc.variable_types,
        }
    }
}

impl Rule {
    /// Create an error-severity rule, inferring its type.
    #[must_use]
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        let expression = expression.into();
        Self {
            name: name.into(),
            rule_type: RuleType::infer(&expression),
            expression,
            variables: Vec::new(),
            description: String::new(),
            severity: Severity::Error,
            variable_types: BTreeMap::new(),
        }
    }

    /// Set the declared variables.
    #[must_use]
    pub fn with_variables<I, S>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables = variables.into_iter().map(Into::into).collect();
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Override the inferred rule type.
    #[must_use]
    pub fn with_type(mut self, rule_type: RuleType) -> Self {
        self.rule_type = rule_type;
        self
    }

    /// Add a sort hint for a variable.
    #[must_use]
    pub fn with_variable_type(mut self, variable: impl Into<String>, sort: Sort) -> Self {
        self.variable_types.insert(variable.into(), sort);
        self
    }
}

/// Evidence that a rule's negation is satisfiable given the claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Violated rule.
    pub constraint_name: String,
    /// Rule description.
    pub description: String,
    /// Rule severity.
    pub severity: Severity,
    /// The rule's expression.
    pub expected: String,
    /// Offending value, or null.
    pub actual: ClaimValue,
    /// Claim path the violation refers to.
    pub path: String,
    /// Assignment returned by the oracle.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counterexample: BTreeMap<String, Value>,
}

/// Per-rule verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    /// Negation UNSAT.
    Satisfied,
    /// Negation SAT.
    Violated,
    /// Oracle returned UNKNOWN; counted as satisfied.
    Indeterminate,
    /// Compiled to `true` without a real check.
    Vacuous,
    /// Compilation or checking raised an error.
    Failed,
}

/// Verdict for one attempted rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
    /// Rule name.
    pub rule: String,
    /// Verdict.
    pub status: RuleStatus,
}

/// Overall solver status of a verification batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverStatus {
    /// Every attempted rule got a definite answer.
    #[default]
    Complete,
    /// At least one rule was indeterminate or vacuous.
    Partial,
}

/// Outcome of verifying claims against an ontology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// `true` iff there are no violations.
    pub verified: bool,
    /// Violations in rule order.
    pub violations: Vec<Violation>,
    /// Rules attempted, including ones that errored.
    pub constraints_checked: usize,
    /// Wall time of the batch.
    pub execution_time_ms: f64,
    /// Overall solver status.
    pub solver_status: SolverStatus,
    /// One outcome per attempted rule.
    #[serde(default)]
    pub rule_outcomes: Vec<RuleOutcome>,
}

impl VerificationResult {
    /// Number of violations.
    #[must_use]
    pub fn violation_count(&self) -> usize {
        self.violations.len()
    }

    /// Whether any violation has error severity.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(|v| v.severity == Severity::Error)
    }

    /// Names of violated rules.
    #[must_use]
    pub fn violated_rules(&self) -> Vec<&str> {
        self.violations
            .iter()
            .map(|v| v.constraint_name.as_str())
            .collect()
    }
}

/// Which rules of an ontology to check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSelection {
    /// Every error-severity rule.
    #[default]
    Default,
    /// Exactly these rules, in this order.
    Only(Vec<String>),
}

impl RuleSelection {
    /// An allowlist, or the default selection when `names` is empty.
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            Self::Default
        } else {
            Self::Only(names)
        }
    }
}
