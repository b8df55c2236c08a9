//! `OxiProof` - compliance verification for generative-model output.
//!
//! `OxiProof` checks what a model said against a versioned ontology of
//! compliance rules and issues a signed, tamper-evident certificate when the
//! output complies:
//!
//! - **Parser**: turns JSON or free text into a flat map of typed claims
//! - **Engine**: compiles each rule into a formula and asks a satisfiability
//!   oracle whether the claims can break it
//! - **Proof**: signs the verdict, its trace and the input digest
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use oxiproof::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), OxiProofError> {
//!     let service = VerificationService::builder().build()?;
//!     service
//!         .ontologies()
//!         .insert(
//!             Ontology::new("lending", "1.0.0")
//!                 .with_rule(Rule::new("max_amount", "amount <= 100000").with_variables(["amount"])),
//!         )
//!         .await?;
//!
//!     let outcome = service
//!         .verify(VerificationRequest::new(json!({"amount": 50000}), "lending"))
//!         .await?;
//!
//!     println!("verified: {}", outcome.result.verified);
//!     if let Some(certificate) = &outcome.certificate {
//!         println!("certificate: {}", certificate.id);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `native` (default): filesystem ontology store and config file helpers
//! - `smt` (default): `OxiZ` SMT solver behind [`oracle::OxizOracle`]; without
//!   it the in-process [`oracle::NativeOracle`] decides every check
//!
//! # Architecture
//!
//! ```text
//! Request
//!   │
//!   ▼
//! ┌──────────────────┐
//! │ Ontology store   │  ← versioned rule sets, cached
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Claim extractor  │  ← JSON flattening, text patterns
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Engine + oracle  │  ← one formula per rule, push/pop isolation
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Proof generator  │  ← HMAC-SHA256 over canonical JSON
//! └────────┬─────────┘
//!          ▼
//!       Outcome
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod ontology;
pub mod oracle;
pub mod parser;
pub mod proof;
pub mod service;
pub mod store;
pub mod types;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::config::{
        EngineConfig, OxiProofConfig, ParserConfig, ProofConfig, ServiceConfig,
        UnsupportedRulePolicy,
    };
    pub use crate::engine::{
        CatalogueEntry, CompiledRule, FormulaCatalogue, FormulaSource, RuleCompiler,
        VerificationEngine,
    };
    pub use crate::error::{
        ExtractionError, OntologyError, OracleError, OxiProofError, ProofError, RuleError,
        StoreError,
    };
    #[cfg(feature = "native")]
    pub use crate::ontology::DirectoryOntologyStore;
    pub use crate::ontology::{CachedOntologyStore, InMemoryOntologyStore, Ontology, OntologyStore};
    #[cfg(feature = "smt")]
    pub use crate::oracle::OxizOracle;
    pub use crate::oracle::{
        CheckOutcome, CmpOp, DefaultOracle, Formula, Model, NativeOracle, SatOracle, Sort, Term,
        Value,
    };
    pub use crate::parser::{ClaimExtractor, ExtractorPattern, FieldExtractor};
    pub use crate::proof::{
        AuditEntry, ProofBundle, ProofCertificate, ProofGenerator, SigningKey, TraceStep,
    };
    pub use crate::service::{
        VerificationOutcome, VerificationRequest, VerificationService, VerificationServiceBuilder,
    };
    pub use crate::store::{
        CertificateStore, InMemoryCertificateStore, InMemoryVerificationStore,
        VerificationRecord, VerificationStore,
    };
    pub use crate::types::{
        Claim, ClaimMap, ClaimType, ClaimValue, Rule, RuleOutcome, RuleSelection, RuleStatus,
        RuleType, Severity, SolverStatus, VerificationResult, Violation,
    };
}

pub use error::{OxiProofError, Result};

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use serde_json::json;

    fn ontology() -> Ontology {
        Ontology::from_value(json!({
            "name": "lending",
            "version": "2.1.0",
            "rules": [
                {
                    "name": "max_amount",
                    "expression": "amount <= 100000",
                    "variables": ["amount"]
                },
                {
                    "name": "min_credit_score",
                    "expression": "credit_score >= 600",
                    "variables": ["credit_score"]
                },
                {
                    "name": "fee_disclosure",
                    "expression": "fees < 5",
                    "variables": ["fees"],
                    "severity": "warning"
                }
            ]
        }))
        .expect("valid ontology")
    }

    #[tokio::test]
    async fn test_full_pipeline_integration() {
        let service = VerificationService::builder()
            .with_generator(ProofGenerator::new(SigningKey::generate()))
            .build()
            .expect("Failed to build service");
        service
            .ontologies()
            .insert(ontology())
            .await
            .expect("Failed to insert ontology");

        let outcome = service
            .verify(VerificationRequest::new(
                json!({"amount": 50000, "credit_score": 720, "fees": 9}),
                "lending",
            ))
            .await
            .expect("Failed to verify");

        assert!(outcome.result.verified);
        assert_eq!(outcome.result.constraints_checked, 2);
        let certificate = outcome.certificate.expect("certificate issued");
        assert_eq!(certificate.ontology_name, "lending");
        assert!(service.verify_certificate(&certificate));

        let json = certificate.to_json().expect("Failed to serialize");
        let parsed = ProofCertificate::from_json(&json).expect("Failed to parse");
        assert!(service.generator().verify_proof(&parsed));

        let mut forged = parsed;
        forged.result = false;
        assert!(!service.verify_certificate(&forged));
    }

    #[tokio::test]
    async fn test_text_pipeline() {
        let service = VerificationService::builder()
            .with_generator(ProofGenerator::new(SigningKey::generate()))
            .build()
            .expect("Failed to build service");
        service
            .ontologies()
            .insert(ontology())
            .await
            .expect("Failed to insert ontology");

        let outcome = service
            .verify(
                VerificationRequest::new(json!("amount: 150000\ncredit_score: 640"), "lending")
                    .with_rules(["max_amount", "min_credit_score"]),
            )
            .await
            .expect("Failed to verify");

        assert!(!outcome.result.verified);
        assert_eq!(outcome.result.violated_rules(), vec!["max_amount"]);
        assert!(outcome.certificate.is_none());
    }

    #[test]
    fn test_engine_without_service() {
        let claims = ClaimExtractor::new()
            .extract(&json!({"amount": 100_001}))
            .expect("Failed to extract");
        let result = VerificationEngine::new(EngineConfig::default()).verify(
            &claims,
            &ontology(),
            &RuleSelection::Default,
        );
        assert!(!result.verified);
        assert_eq!(result.violations[0].constraint_name, "max_amount");
    }
}
