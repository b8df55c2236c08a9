//! Configuration management for `OxiProof`.

use serde::{Deserialize, Serialize};

/// Global configuration for `OxiProof`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OxiProofConfig {
    /// Claim extractor configuration.
    pub parser: ParserConfig,
    /// Verification engine configuration.
    pub engine: EngineConfig,
    /// Proof generator configuration.
    pub proof: ProofConfig,
    /// Service pipeline configuration.
    pub service: ServiceConfig,
}

/// Configuration for the claim extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Maximum nesting depth of structured input.
    pub max_depth: usize,
    /// Whether to compute derived fields from free text.
    pub derive_fields: bool,
    /// Whether to run the built-in domain patterns on free text.
    pub domain_patterns: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_depth: 32,
            derive_fields: true,
            domain_patterns: true,
        }
    }
}

impl ParserConfig {
    /// Set the maximum nesting depth.
    #[must_use]
    pub const fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Enable or disable derived fields.
    #[must_use]
    pub const fn with_derive_fields(mut self, derive_fields: bool) -> Self {
        self.derive_fields = derive_fields;
        self
    }

    /// Enable or disable the domain pattern battery.
    #[must_use]
    pub const fn with_domain_patterns(mut self, domain_patterns: bool) -> Self {
        self.domain_patterns = domain_patterns;
        self
    }
}

/// What to do with rule types that have no compiler yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnsupportedRulePolicy {
    /// Report the rule as a processing failure.
    #[default]
    Strict,
    /// Compile to `true` and log that the rule is not fully implemented.
    Permissive,
}

/// Per-rule oracle timeout used when none is configured.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Configuration for the verification engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-rule oracle timeout in milliseconds.
    pub timeout_ms: u64,
    /// Handling of unsupported rule types.
    pub unsupported_rule_policy: UnsupportedRulePolicy,
    /// Assignment budget for the built-in oracle.
    pub max_search_candidates: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            unsupported_rule_policy: UnsupportedRulePolicy::Strict,
            max_search_candidates: crate::oracle::native::DEFAULT_MAX_CANDIDATES,
        }
    }
}

impl EngineConfig {
    /// Set the per-rule timeout.
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// The per-rule bound to apply for a requested timeout.
    ///
    /// Zero is never returned: a zero request falls back to the configured
    /// timeout, and a zero configuration to [`DEFAULT_TIMEOUT_MS`].
    #[must_use]
    pub const fn effective_timeout_ms(&self, requested_ms: u64) -> u64 {
        if requested_ms > 0 {
            requested_ms
        } else if self.timeout_ms > 0 {
            self.timeout_ms
        } else {
            DEFAULT_TIMEOUT_MS
        }
    }

    /// Set the unsupported rule policy.
    #[must_use]
    pub const fn with_unsupported_rule_policy(mut self, policy: UnsupportedRulePolicy) -> Self {
        self.unsupported_rule_policy = policy;
        self
    }

    /// Set the built-in oracle's candidate budget.
    #[must_use]
    pub const fn with_max_search_candidates(mut self, max: usize) -> Self {
        self.max_search_candidates = max;
        self
    }
}

/// Configuration for the proof generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProofConfig {
    /// Environment variable holding the hex-encoded signing key.
    pub signing_key_env: Option<String>,
    /// Version string written into certificates.
    pub certificate_version: String,
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            signing_key_env: Some("OXIPROOF_SIGNING_KEY".to_string()),
            certificate_version: "1.0.0".to_string(),
        }
    }
}

/// Configuration for the end-to-end service pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Issue certificates for failed verifications too.
    pub proof_on_failure: bool,
    /// Retention of stored verification records, in seconds.
    pub result_ttl_secs: u64,
    /// Serve repeated requests from stored records.
    pub use_result_cache: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            proof_on_failure: false,
            result_ttl_secs: 86_400,
            use_result_cache: true,
        }
    }
}

impl OxiProofConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file (native only).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    #[cfg(feature = "native")]
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file (native only).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    #[cfg(feature = "native")]
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> crate::error::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed.
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> crate::error::Result<String> {
        let content = serde_json::to_string_pretty(self)?;
        Ok(content)
    }

    /// Set parser configuration.
    #[must_use]
    pub fn with_parser(mut self, parser: ParserConfig) -> Self {
        self.parser = parser;
        self
    }

    /// Set engine configuration.
    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Set proof configuration.
    #[must_use]
    pub fn with_proof(mut self, proof: ProofConfig) -> Self {
        self.proof = proof;
        self
    }

    /// Set service configuration.
    #[must_use]
    pub fn with_service(mut self, service: ServiceConfig) -> Self {
        self.service = service;
        self
    }
}
