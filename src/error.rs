//! Unified error types for `OxiProof`.

use thiserror::Error;

/// The main error type for `OxiProof` operations.
///
/// Every variant means the pipeline could not produce a verdict. A verdict of
/// non-compliance is never an error: it is an `Ok` result with
/// `verified == false`.
#[derive(Debug, Error)]
pub enum OxiProofError {
    /// Claim extraction errors
    #[error("Input extraction failure: {0}")]
    Extraction(#[from] ExtractionError),

    /// Ontology loading or validation errors
    #[error("Ontology error: {0}")]
    Ontology(#[from] OntologyError),

    /// Oracle errors that escaped per-rule isolation
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// Proof generation errors
    #[error("Proof error: {0}")]
    Proof(#[from] ProofError),

    /// Persistence or certificate store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration or request validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OxiProofError {
    /// Whether this error represents a process failure ("could not verify").
    ///
    /// Always `true`; kept as an explicit API so callers never confuse an
    /// error with a negative verdict.
    #[must_use]
    pub const fn is_process_failure(&self) -> bool {
        true
    }
}

/// Errors raised while turning raw output into claims.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The top-level input is not a mapping, sequence or text
    #[error("Unsupported input type: {0}")]
    UnsupportedInputType(String),

    /// Nesting deeper than the configured cap
    #[error("Input nesting exceeds maximum depth {max}")]
    DepthExceeded {
        /// Configured maximum depth
        max: usize,
    },
}

/// Errors related to ontology loading and validation.
#[derive(Debug, Error)]
pub enum OntologyError {
    /// No ontology under this name/version
    #[error("Ontology not found: {name} (version {version})")]
    NotFound {
        /// Requested ontology name
        name: String,
        /// Requested version, or `latest`
        version: String,
    },

    /// The document is missing required fields or is malformed
    #[error("Invalid ontology structure: {0}")]
    InvalidStructure(String),

    /// The backing storage could not be read
    #[error("Ontology IO error: {0}")]
    Io(String),

    /// The document is not valid JSON
    #[error("Ontology parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors reported by a satisfiability oracle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// A formula mentions a variable that was never declared
    #[error("Undeclared variable: {0}")]
    UndeclaredVariable(String),

    /// A variable was declared twice with different sorts
    #[error("Variable {name} already declared as {existing}, not {requested}")]
    SortConflict {
        /// Variable name
        name: String,
        /// Sort of the first declaration
        existing: String,
        /// Sort of the rejected declaration
        requested: String,
    },

    /// An atom compares values of incompatible sorts
    #[error("Sort mismatch: {0}")]
    SortMismatch(String),

    /// `pop` was called without a matching `push`
    #[error("Cannot pop the base scope")]
    EmptyScope,

    /// `model` was requested without a preceding SAT result
    #[error("No model available: last check was not SAT")]
    NoModel,
}

/// Errors raised while compiling or checking a single rule.
///
/// These never abort a batch: the engine converts them into synthetic
/// error-severity violations.
#[derive(Debug, Error)]
pub enum RuleError {
    /// The expression does not fit its rule type's grammar
    #[error("Invalid expression '{expression}': {reason}")]
    InvalidExpression {
        /// The offending expression
        expression: String,
        /// Why it was rejected
        reason: String,
    },

    /// Comparison operator outside the supported set
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    /// A numeric rule was bound to a non-numeric claim
    #[error("Variable {variable} holds a non-numeric value")]
    NonNumericValue {
        /// Variable name
        variable: String,
    },

    /// Rule type without a compiler under the strict policy
    #[error("Unsupported rule type: {0}")]
    UnsupportedRuleType(String),

    /// The oracle rejected the compiled rule
    #[error("Oracle failure: {0}")]
    Oracle(#[from] OracleError),
}

/// Errors related to proof certificate generation.
#[derive(Debug, Error)]
pub enum ProofError {
    /// Canonical serialization failed
    #[error("Canonical serialization failed: {0}")]
    Serialization(String),

    /// The signing key is unusable
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    /// A stored value could not be decoded
    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// Errors raised by persistence and certificate stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Backend failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// A type alias for Results with [`OxiProofError`].
pub type Result<T> = std::result::Result<T, OxiProofError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OxiProofError::Config("missing content".into());
        assert_eq!(err.to_string(), "Configuration error: missing content");
    }

    #[test]
    fn test_extraction_error_conversion() {
        let err: OxiProofError = ExtractionError::UnsupportedInputType("number".into()).into();
        assert!(matches!(err, OxiProofError::Extraction(_)));
        assert!(err.is_process_failure());
    }

    #[test]
    fn test_ontology_not_found_display() {
        let err = OntologyError::NotFound {
            name: "lending".into(),
            version: "latest".into(),
        };
        assert_eq!(
            err.to_string(),
            "Ontology not found: lending (version latest)"
        );
    }

    #[test]
    fn test_rule_error_from_oracle() {
        let err: RuleError = OracleError::UndeclaredVariable("x".into()).into();
        assert!(matches!(err, RuleError::Oracle(OracleError::UndeclaredVariable(_))));
    }
}
