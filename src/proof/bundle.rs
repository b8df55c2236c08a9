//! Archival bundles and audit entries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ALGORITHM, HASH_ALGORITHM, ProofCertificate, canonical, sha256_hex};
use crate::error::ProofError;

/// Bundle format version.
pub const BUNDLE_FORMAT_VERSION: &str = "1.0.0";

/// Signature characters kept in an audit entry.
const AUDIT_SIGNATURE_CHARS: usize = 32;

/// Descriptive metadata attached to a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleMetadata {
    /// Signature algorithm of the certificate.
    pub algorithm: String,
    /// Digest algorithm.
    pub hash_algorithm: String,
    /// Producing library.
    pub generator: String,
    /// Producing library version.
    pub generator_version: String,
}

impl Default for BundleMetadata {
    fn default() -> Self {
        Self {
            algorithm: ALGORITHM.to_string(),
            hash_algorithm: HASH_ALGORITHM.to_string(),
            generator: env!("CARGO_PKG_NAME").to_string(),
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A certificate packaged for archival with its own integrity digest.
///
/// The digest is SHA-256 over the canonical bundle without the digest
/// field. It detects corruption, not forgery: anyone can recompute it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofBundle {
    /// The packaged certificate.
    pub proof: ProofCertificate,
    /// Export time (RFC 3339, UTC).
    pub export_time: String,
    /// Bundle format version.
    pub format_version: String,
    /// Optional metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BundleMetadata>,
    /// Integrity digest.
    pub bundle_digest: String,
}

impl ProofBundle {
    /// Package `proof`, stamping the export time and digest.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::Serialization`] if canonicalization fails.
    pub fn new(proof: ProofCertificate, include_metadata: bool) -> Result<Self, ProofError> {
        let mut bundle = Self {
            proof,
            export_time: chrono::Utc::now().to_rfc3339(),
            format_version: BUNDLE_FORMAT_VERSION.to_string(),
            metadata: include_metadata.then(BundleMetadata::default),
            bundle_digest: String::new(),
        };
        bundle.bundle_digest = bundle.compute_digest()?;
        tracing::debug!(proof_id = %bundle.proof.id, "exported proof bundle");
        Ok(bundle)
    }

    /// Whether the stored digest matches the contents.
    #[must_use]
    pub fn verify_digest(&self) -> bool {
        self.compute_digest()
            .is_ok_and(|digest| digest == self.bundle_digest)
    }

    fn compute_digest(&self) -> Result<String, ProofError> {
        let mut document =
            serde_json::to_value(self).map_err(|e| ProofError::Serialization(e.to_string()))?;
        if let Value::Object(map) = &mut document {
            map.remove("bundle_digest");
        }
        Ok(sha256_hex(&canonical(&document)?))
    }
}

/// Compact audit-log record of a certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Certificate id.
    pub proof_id: String,
    /// Verification id.
    pub verification_id: String,
    /// Issue time.
    pub timestamp: String,
    /// Verdict.
    pub result: bool,
    /// Ontology name.
    pub ontology: String,
    /// Input digest.
    pub input_hash: String,
    /// Signature prefix followed by `...`.
    pub signature: String,
    /// Number of violations.
    pub violations_count: usize,
    /// Verification wall time.
    pub execution_time_ms: f64,
}

impl From<&ProofCertificate> for AuditEntry {
    fn from(certificate: &ProofCertificate) -> Self {
        let prefix: String = certificate
            .signature
            .chars()
            .take(AUDIT_SIGNATURE_CHARS)
            .collect();
        Self {
            proof_id: certificate.id.clone(),
            verification_id: certificate.verification_id.clone(),
            timestamp: certificate.timestamp.clone(),
            result: certificate.result,
            ontology: certificate.ontology_name.clone(),
            input_hash: certificate.input_hash.clone(),
            signature: format!("{prefix}..."),
            violations_count: certificate.violations.len(),
            execution_time_ms: certificate.execution_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::{ProofGenerator, SigningKey};
    use crate::types::VerificationResult;
    use serde_json::json;

    fn certificate() -> (ProofGenerator, ProofCertificate) {
        let generator = ProofGenerator::new(SigningKey::generate());
        let result = VerificationResult {
            verified: true,
            violations: Vec::new(),
            constraints_checked: 3,
            execution_time_ms: 0.5,
            solver_status: crate::types::SolverStatus::Complete,
            rule_outcomes: Vec::new(),
        };
        let cert = generator
            .generate("v-9", &json!({"amount": 1}), "lending@1", &result)
            .unwrap();
        (generator, cert)
    }

    #[test]
    fn test_bundle_digest() {
        let (generator, cert) = certificate();
        let bundle = generator.export_bundle(&cert, true).unwrap();
        assert!(bundle.verify_digest());
        assert_eq!(bundle.format_version, BUNDLE_FORMAT_VERSION);
        assert_eq!(
            bundle.metadata.as_ref().map(|m| m.generator.as_str()),
            Some("oxiproof")
        );
        assert!(generator.verify_proof(&bundle.proof));

        let mut tampered = bundle.clone();
        tampered.proof.result = false;
        assert!(!tampered.verify_digest());

        let bare = generator.export_bundle(&cert, false).unwrap();
        assert!(bare.metadata.is_none());
        assert!(bare.verify_digest());
    }

    #[test]
    fn test_bundle_survives_json() {
        let (generator, cert) = certificate();
        let bundle = generator.export_bundle(&cert, true).unwrap();
        let json = serde_json::to_string(&bundle).unwrap();
        let parsed: ProofBundle = serde_json::from_str(&json).unwrap();
        assert!(parsed.verify_digest());
    }

    #[test]
    fn test_audit_entry() {
        let (generator, cert) = certificate();
        let entry = generator.audit_entry(&cert);
        assert_eq!(entry.proof_id, cert.id);
        assert_eq!(entry.ontology, "lending");
        assert_eq!(entry.violations_count, 0);
        assert!(entry.signature.ends_with("..."));
        assert_eq!(entry.signature.len(), AUDIT_SIGNATURE_CHARS + 3);
        assert!(cert.signature.starts_with(entry.signature.trim_end_matches("...")));
    }
}
