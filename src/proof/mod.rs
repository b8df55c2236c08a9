//! Proof certificates.
//!
//! A certificate binds a verification result to a digest of the input and
//! the ontology it was checked against, and carries an HMAC-SHA256
//! signature over the RFC 8785 canonical form of every field except
//! `signature`, `metadata` and `hash`. Changing any signed field after
//! generation makes [`ProofGenerator::verify_proof`] return `false`.

pub mod bundle;
pub mod signing;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub use bundle::{AuditEntry, BundleMetadata, ProofBundle};
pub use signing::SigningKey;

use crate::config::ProofConfig;
use crate::error::ProofError;
use crate::types::{ClaimValue, RuleStatus, VerificationResult, Violation};

/// Signature algorithm identifier.
pub const ALGORITHM: &str = "HMAC-SHA256";

/// Digest algorithm identifier.
pub const HASH_ALGORITHM: &str = "SHA256";

/// Fields excluded from the signed payload.
const UNSIGNED_FIELDS: [&str; 3] = ["signature", "metadata", "hash"];

/// Hex characters kept in the short reference hash.
const SHORT_HASH_LEN: usize = 16;

/// One step of the solver trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum TraceStep {
    /// A rule that held (or was treated as holding).
    CheckConstraint {
        /// Rule name.
        constraint: String,
        /// Rule verdict.
        result: RuleStatus,
    },
    /// A rule whose negation was satisfiable, or which failed to check.
    ViolationFound {
        /// Rule name.
        constraint: String,
        /// The rule's expression.
        expected: String,
        /// Offending value.
        actual: ClaimValue,
    },
    /// Trailing summary.
    FinalResult {
        /// Overall verdict.
        verified: bool,
        /// Rules attempted.
        total_constraints: usize,
        /// Violations recorded.
        total_violations: usize,
    },
}

/// Unsigned descriptive metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMetadata {
    /// Generation time (RFC 3339).
    pub generated_at: String,
    /// Version of the generating crate.
    pub generator_version: String,
    /// Digest algorithm.
    pub hash_algorithm: String,
    /// Signature algorithm.
    pub signature_algorithm: String,
    /// Fingerprint of the signing key.
    pub key_fingerprint: String,
}

/// A signed record of one verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofCertificate {
    /// Certificate id (UUID v4).
    pub id: String,
    /// Verification this certificate covers.
    pub verification_id: String,
    /// Issue time (RFC 3339, UTC).
    pub timestamp: String,
    /// SHA-256 of the canonical input.
    pub input_hash: String,
    /// SHA-256 of the ontology identifier.
    pub ontology_hash: String,
    /// Ontology name.
    pub ontology_name: String,
    /// Verdict.
    pub result: bool,
    /// Per-rule trace with a trailing summary.
    pub solver_trace: Vec<TraceStep>,
    /// Violations as reported by the engine.
    pub violations: Vec<Violation>,
    /// Wall time of the verification, to the microsecond.
    pub execution_time_ms: f64,
    /// Signature algorithm.
    pub algorithm: String,
    /// Certificate format version.
    pub version: String,
    /// Base64 HMAC over the canonical signed fields.
    #[serde(default)]
    pub signature: String,
    /// Unsigned metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CertificateMetadata>,
    /// Short reference digest of the signed certificate (unsigned).
    #[serde(default)]
    pub hash: String,
}

impl ProofCertificate {
    /// Number of violations recorded.
    #[must_use]
    pub fn violation_count(&self) -> usize {
        self.violations.len()
    }

    /// Serialize to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::Serialization`] if serialization fails.
    pub fn to_json(&self) -> Result<String, ProofError> {
        serde_json::to_string_pretty(self).map_err(|e| ProofError::Serialization(e.to_string()))
    }

    /// Parse from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::Encoding`] if the text is not a certificate.
    pub fn from_json(json: &str) -> Result<Self, ProofError> {
        serde_json::from_str(json).map_err(|e| ProofError::Encoding(e.to_string()))
    }
}

/// Issues and checks proof certificates.
#[derive(Debug, Clone)]
pub struct ProofGenerator {
    key: SigningKey,
    version: String,
}

impl ProofGenerator {
    /// Create a generator signing with `key`.
    #[must_use]
    pub fn new(key: SigningKey) -> Self {
        Self {
            key,
            version: ProofConfig::default().certificate_version,
        }
    }

    /// Create a generator from configuration, generating a key when none is
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::InvalidKey`] if the configured key is invalid.
    pub fn from_config(config: &ProofConfig) -> Result<Self, ProofError> {
        Ok(Self::new(SigningKey::from_config(config)?).with_version(&config.certificate_version))
    }

    /// Set the certificate version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// The signing key.
    #[must_use]
    pub const fn key(&self) -> &SigningKey {
        &self.key
    }

    /// Issue a certificate.
    ///
    /// `original_claims` is hashed in canonical form; `ontology_identifier`
    /// is hashed as a string and its part before `@` becomes the
    /// certificate's ontology name.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::Serialization`] if canonicalization fails.
    pub fn generate<T: Serialize + ?Sized>(
        &self,
        verification_id: &str,
        original_claims: &T,
        ontology_identifier: &str,
        result: &VerificationResult,
    ) -> Result<ProofCertificate, ProofError> {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let mut certificate = ProofCertificate {
            id: uuid::Uuid::new_v4().to_string(),
            verification_id: verification_id.to_string(),
            timestamp: timestamp.clone(),
            input_hash: sha256_hex(&canonical(original_claims)?),
            ontology_hash: sha256_hex(ontology_identifier.as_bytes()),
            ontology_name: ontology_identifier
                .split('@')
                .next()
                .unwrap_or(ontology_identifier)
                .to_string(),
            result: result.verified,
            solver_trace: solver_trace(result),
            violations: result.violations.clone(),
            execution_time_ms: round_micros(result.execution_time_ms),
            algorithm: ALGORITHM.to_string(),
            version: self.version.clone(),
            signature: String::new(),
            metadata: None,
            hash: String::new(),
        };

        let payload = signed_payload(&to_document(&certificate)?)?;
        certificate.signature = BASE64.encode(self.key.sign(&payload)?);
        certificate.metadata = Some(CertificateMetadata {
            generated_at: timestamp,
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
            hash_algorithm: HASH_ALGORITHM.to_string(),
            signature_algorithm: ALGORITHM.to_string(),
            key_fingerprint: self.key.fingerprint(),
        });
        let mut document = to_document(&certificate)?;
        if let Value::Object(map) = &mut document {
            map.remove("hash");
        }
        let mut short = sha256_hex(&canonical(&document)?);
        short.truncate(SHORT_HASH_LEN);
        certificate.hash = short;

        tracing::info!(
            proof_id = %certificate.id,
            verification_id = %verification_id,
            result = certificate.result,
            "generated proof certificate"
        );
        Ok(certificate)
    }

    /// Check a certificate's signature.
    #[must_use]
    pub fn verify_proof(&self, certificate: &ProofCertificate) -> bool {
        match to_document(certificate) {
            Ok(document) => self.verify_document(&document),
            Err(e) => {
                tracing::error!(error = %e, "could not serialize certificate for verification");
                false
            }
        }
    }

    /// Check the signature of a certificate held as a JSON document.
    ///
    /// Returns `false` when the signature is missing, empty or not base64.
    #[must_use]
    pub fn verify_document(&self, document: &Value) -> bool {
        let Some(signature) = document
            .get("signature")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        else {
            tracing::warn!("certificate has no signature");
            return false;
        };
        let Ok(signature) = BASE64.decode(signature) else {
            tracing::warn!("certificate signature is not valid base64");
            return false;
        };
        match signed_payload(document) {
            Ok(payload) => self.key.verify(&payload, &signature),
            Err(e) => {
                tracing::error!(error = %e, "could not canonicalize certificate");
                false
            }
        }
    }

    /// Package a certificate for archival.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::Serialization`] if the bundle cannot be
    /// canonicalized.
    pub fn export_bundle(
        &self,
        certificate: &ProofCertificate,
        include_metadata: bool,
    ) -> Result<ProofBundle, ProofError> {
        ProofBundle::new(certificate.clone(), include_metadata)
    }

    /// Summarize a certificate for an audit log.
    #[must_use]
    pub fn audit_entry(&self, certificate: &ProofCertificate) -> AuditEntry {
        AuditEntry::from(certificate)
    }
}

/// The trace: one step per rule outcome, then the summary.
fn solver_trace(result: &VerificationResult) -> Vec<TraceStep> {
    let mut trace: Vec<TraceStep> = result
        .rule_outcomes
        .iter()
        .filter(|o| !matches!(o.status, RuleStatus::Violated | RuleStatus::Failed))
        .map(|o| TraceStep::CheckConstraint {
            constraint: o.rule.clone(),
            result: o.status,
        })
        .collect();
    trace.extend(result.violations.iter().map(|v| TraceStep::ViolationFound {
        constraint: v.constraint_name.clone(),
        expected: v.expected.clone(),
        actual: v.actual.clone(),
    }));
    trace.push(TraceStep::FinalResult {
        verified: result.verified,
        total_constraints: result.constraints_checked,
        total_violations: result.violations.len(),
    });
    trace
}

fn round_micros(ms: f64) -> f64 {
    (ms * 1000.0).round() / 1000.0
}

fn to_document<T: Serialize + ?Sized>(value: &T) -> Result<Value, ProofError> {
    serde_json::to_value(value).map_err(|e| ProofError::Serialization(e.to_string()))
}

pub(crate) fn canonical<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ProofError> {
    serde_jcs::to_vec(value).map_err(|e| ProofError::Serialization(e.to_string()))
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Canonical bytes of `document` without the unsigned fields.
fn signed_payload(document: &Value) -> Result<Vec<u8>, ProofError> {
    let Value::Object(map) = document else {
        return Err(ProofError::Encoding("certificate must be a JSON object".into()));
    };
    let mut map = map.clone();
    for field in UNSIGNED_FIELDS {
        map.remove(field);
    }
    canonical(&map)
}
