//! End-to-end verification pipeline.
//!
//! ```text
//! request -> cache lookup -> ontology load -> claim extraction
//!         -> verification -> certificate -> stores -> outcome
//! ```
//!
//! Failures before verification starts (invalid request, missing ontology,
//! unextractable content) and store failures are returned as errors.
//! Non-compliance is an `Ok` outcome with `result.verified == false`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::OxiProofConfig;
use crate::engine::{FormulaCatalogue, OracleFactory, VerificationEngine, default_oracle_factory};
use crate::error::{OxiProofError, Result};
use crate::ontology::{InMemoryOntologyStore, OntologyStore};
use crate::oracle::{DefaultOracle, SatOracle};
use crate::parser::ClaimExtractor;
use crate::proof::{ProofCertificate, ProofGenerator, sha256_hex};
use crate::store::{
    CertificateStore, InMemoryCertificateStore, InMemoryVerificationStore, VerificationRecord,
    VerificationStore,
};
use crate::types::{RuleSelection, VerificationResult};

/// Caller id used when a request names none.
pub const ANONYMOUS_CALLER: &str = "anonymous";

fn anonymous() -> String {
    ANONYMOUS_CALLER.to_string()
}

/// A verification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRequest {
    /// Model output: structured JSON or a JSON string of free text.
    pub content: Value,
    /// Ontology name.
    pub ontology: String,
    /// Ontology version; latest when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Rule allowlist; empty selects every error-severity rule.
    #[serde(default)]
    pub rules: Vec<String>,
    /// Per-rule oracle timeout override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Requesting caller.
    #[serde(default = "anonymous")]
    pub caller_id: String,
}

impl VerificationRequest {
    /// Create a request for the latest version of `ontology`.
    #[must_use]
    pub fn new(content: Value, ontology: impl Into<String>) -> Self {
        Self {
            content,
            ontology: ontology.into(),
            version: None,
            rules: Vec::new(),
            timeout_ms: None,
            caller_id: anonymous(),
        }
    }

    /// Pin the ontology version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Restrict verification to the named rules.
    #[must_use]
    pub fn with_rules<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules = rules.into_iter().map(Into::into).collect();
        self
    }

    /// Override the per-rule timeout.
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the caller id.
    #[must_use]
    pub fn with_caller_id(mut self, caller_id: impl Into<String>) -> Self {
        self.caller_id = caller_id.into();
        self
    }

    /// Reject requests without content or without an ontology name.
    ///
    /// # Errors
    ///
    /// Returns [`OxiProofError::Config`] naming the missing field.
    pub fn validate(&self) -> Result<()> {
        let empty = match &self.content {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            Value::Bool(_) | Value::Number(_) => false,
        };
        if empty {
            return Err(OxiProofError::Config("missing 'content'".into()));
        }
        if self.ontology.trim().is_empty() {
            return Err(OxiProofError::Config("missing 'ontology'".into()));
        }
        Ok(())
    }

    /// SHA-256 of the canonical `{content, ontology, rules}` with rules
    /// sorted, identifying repeated requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the content cannot be canonicalized.
    pub fn cache_key(&self) -> Result<String> {
        let mut rules = self.rules.clone();
        rules.sort();
        let document = serde_json::json!({
            "content": self.content,
            "ontology": self.ontology,
            "rules": rules,
        });
        let canonical = serde_jcs::to_vec(&document)?;
        Ok(sha256_hex(&canonical))
    }
}

/// Result of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    /// Verification id (the original one for cached results).
    pub verification_id: String,
    /// Verification result.
    pub result: VerificationResult,
    /// Issued certificate, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<ProofCertificate>,
    /// Where the certificate was stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_location: Option<String>,
    /// Ontology version used.
    pub ontology_version: String,
    /// Whether the result came from a stored record.
    pub cached: bool,
}

/// The verification pipeline wired to its stores.
pub struct VerificationService<S, V, C, O = DefaultOracle> {
    config: OxiProofConfig,
    ontologies: S,
    records: V,
    certificates: C,
    extractor: ClaimExtractor,
    engine: VerificationEngine<O>,
    generator: ProofGenerator,
}

impl<S, V, C, O> std::fmt::Debug for VerificationService<S, V, C, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationService")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .field("generator", &self.generator)
            .finish_non_exhaustive()
    }
}

impl VerificationService<InMemoryOntologyStore, InMemoryVerificationStore, InMemoryCertificateStore>
{
    /// A builder preloaded with in-memory stores and the native oracle.
    #[must_use]
    pub fn builder() -> VerificationServiceBuilder<
        InMemoryOntologyStore,
        InMemoryVerificationStore,
        InMemoryCertificateStore,
    > {
        VerificationServiceBuilder {
            config: OxiProofConfig::default(),
            ontologies: InMemoryOntologyStore::new(),
            records: InMemoryVerificationStore::new(),
            certificates: InMemoryCertificateStore::new(),
            oracle_factory: default_oracle_factory(),
            catalogue: None,
            generator: None,
        }
    }
}

impl<S, V, C, O> VerificationService<S, V, C, O>
where
    S: OntologyStore,
    V: VerificationStore,
    C: CertificateStore,
    O: SatOracle,
{
    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &OxiProofConfig {
        &self.config
    }

    /// The ontology store.
    pub const fn ontologies(&self) -> &S {
        &self.ontologies
    }

    /// The verification record store.
    pub const fn records(&self) -> &V {
        &self.records
    }

    /// The certificate store.
    pub const fn certificates(&self) -> &C {
        &self.certificates
    }

    /// The proof generator.
    pub const fn generator(&self) -> &ProofGenerator {
        &self.generator
    }

    /// Run the pipeline for one request.
    ///
    /// # Errors
    ///
    /// Returns an error when the request is invalid, the ontology cannot be
    /// loaded, the content cannot be extracted, a certificate cannot be
    /// generated or a store fails.
    pub async fn verify(&self, request: VerificationRequest) -> Result<VerificationOutcome> {
        request.validate()?;
        let cache_key = request.cache_key()?;

        if self.config.service.use_result_cache
            && let Some(outcome) = self.cached_outcome(&request, &cache_key).await?
        {
            return Ok(outcome);
        }

        let verification_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            verification_id = %verification_id,
            ontology = %request.ontology,
            rules = request.rules.len(),
            caller = %request.caller_id,
            "starting verification request"
        );

        let ontology = self
            .ontologies
            .load(&request.ontology, request.version.as_deref())
            .await?;
        let claims = self
            .extractor
            .extract_with_hints(&request.content, &ontology.extractors)?;
        tracing::debug!(verification_id = %verification_id, claims = claims.len(), "extracted claims");

        let selection = RuleSelection::from_names(request.rules.iter().cloned());
        let timeout_ms = request
            .timeout_ms
            .unwrap_or(self.config.engine.timeout_ms);
        let result = self
            .engine
            .verify_with_timeout(&claims, &ontology, &selection, timeout_ms);

        let (certificate, certificate_location) =
            if result.verified || self.config.service.proof_on_failure {
                let certificate = self.generator.generate(
                    &verification_id,
                    &claims,
                    &ontology.identifier()?,
                    &result,
                )?;
                let location = self
                    .certificates
                    .put(&request.caller_id, &verification_id, &certificate)
                    .await?;
                (Some(certificate), Some(location))
            } else {
                (None, None)
            };

        let timestamp = chrono::Utc::now();
        let expires_at = match self.config.service.result_ttl_secs {
            0 => None,
            secs => i64::try_from(secs)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .and_then(|ttl| timestamp.checked_add_signed(ttl)),
        };
        self.records
            .save(VerificationRecord {
                verification_id: verification_id.clone(),
                caller_id: request.caller_id.clone(),
                ontology_name: ontology.name.clone(),
                ontology_version: ontology.version.clone(),
                timestamp,
                cache_key,
                result: result.clone(),
                certificate_location: certificate_location.clone(),
                expires_at,
            })
            .await?;

        tracing::info!(
            verification_id = %verification_id,
            verified = result.verified,
            violations = result.violations.len(),
            "verification request complete"
        );
        Ok(VerificationOutcome {
            verification_id,
            result,
            certificate,
            certificate_location,
            ontology_version: ontology.version,
            cached: false,
        })
    }

    /// Look up a stored verification.
    ///
    /// # Errors
    ///
    /// Returns an error if the record store fails.
    pub async fn get_verification(&self, verification_id: &str) -> Result<Option<VerificationRecord>> {
        Ok(self.records.get(verification_id).await?)
    }

    /// Check a certificate against this service's signing key.
    #[must_use]
    pub fn verify_certificate(&self, certificate: &ProofCertificate) -> bool {
        self.generator.verify_proof(certificate)
    }

    async fn cached_outcome(
        &self,
        request: &VerificationRequest,
        cache_key: &str,
    ) -> Result<Option<VerificationOutcome>> {
        let Some(record) = self.records.find_by_cache_key(cache_key).await? else {
            return Ok(None);
        };
        if request
            .version
            .as_deref()
            .is_some_and(|v| v != record.ontology_version)
        {
            return Ok(None);
        }
        let certificate = match &record.certificate_location {
            Some(_) => {
                self.certificates
                    .get(&record.caller_id, &record.verification_id)
                    .await?
            }
            None => None,
        };
        tracing::info!(
            verification_id = %record.verification_id,
            cache_key = %cache_key,
            "serving cached verification"
        );
        Ok(Some(VerificationOutcome {
            verification_id: record.verification_id,
            result: record.result,
            certificate,
            certificate_location: record.certificate_location,
            ontology_version: record.ontology_version,
            cached: true,
        }))
    }
}

/// Builder for [`VerificationService`].
pub struct VerificationServiceBuilder<S, V, C, O = DefaultOracle> {
    config: OxiProofConfig,
    ontologies: S,
    records: V,
    certificates: C,
    oracle_factory: OracleFactory<O>,
    catalogue: Option<FormulaCatalogue>,
    generator: Option<ProofGenerator>,
}

impl<S, V, C, O> VerificationServiceBuilder<S, V, C, O>
where
    S: OntologyStore,
    V: VerificationStore,
    C: CertificateStore,
    O: SatOracle,
{
    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: OxiProofConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a different ontology store.
    pub fn with_ontology_store<S2: OntologyStore>(
        self,
        ontologies: S2,
    ) -> VerificationServiceBuilder<S2, V, C, O> {
        VerificationServiceBuilder {
            config: self.config,
            ontologies,
            records: self.records,
            certificates: self.certificates,
            oracle_factory: self.oracle_factory,
            catalogue: self.catalogue,
            generator: self.generator,
        }
    }

    /// Use a different verification record store.
    pub fn with_verification_store<V2: VerificationStore>(
        self,
        records: V2,
    ) -> VerificationServiceBuilder<S, V2, C, O> {
        VerificationServiceBuilder {
            config: self.config,
            ontologies: self.ontologies,
            records,
            certificates: self.certificates,
            oracle_factory: self.oracle_factory,
            catalogue: self.catalogue,
            generator: self.generator,
        }
    }

    /// Use a different certificate store.
    pub fn with_certificate_store<C2: CertificateStore>(
        self,
        certificates: C2,
    ) -> VerificationServiceBuilder<S, V, C2, O> {
        VerificationServiceBuilder {
            config: self.config,
            ontologies: self.ontologies,
            records: self.records,
            certificates,
            oracle_factory: self.oracle_factory,
            catalogue: self.catalogue,
            generator: self.generator,
        }
    }

    /// Use a different oracle backend.
    pub fn with_oracle<O2, F>(self, factory: F) -> VerificationServiceBuilder<S, V, C, O2>
    where
        O2: SatOracle,
        F: Fn(&crate::config::EngineConfig) -> O2 + Send + Sync + 'static,
    {
        VerificationServiceBuilder {
            config: self.config,
            ontologies: self.ontologies,
            records: self.records,
            certificates: self.certificates,
            oracle_factory: Arc::new(factory),
            catalogue: self.catalogue,
            generator: self.generator,
        }
    }

    /// Replace the formula catalogue.
    #[must_use]
    pub fn with_catalogue(mut self, catalogue: FormulaCatalogue) -> Self {
        self.catalogue = Some(catalogue);
        self
    }

    /// Sign with an explicit generator instead of one built from config.
    #[must_use]
    pub fn with_generator(mut self, generator: ProofGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Build the service.
    ///
    /// # Errors
    ///
    /// Returns an error if no generator was given and the configured signing
    /// key is invalid.
    pub fn build(self) -> Result<VerificationService<S, V, C, O>> {
        let generator = match self.generator {
            Some(generator) => generator,
            None => ProofGenerator::from_config(&self.config.proof)?,
        };
        let mut engine = VerificationEngine::from_factory(
            self.config.engine.clone(),
            self.oracle_factory,
        );
        if let Some(catalogue) = self.catalogue {
            engine = engine.with_catalogue(catalogue);
        }
        Ok(VerificationService {
            extractor: ClaimExtractor::with_config(self.config.parser.clone()),
            engine,
            generator,
            config: self.config,
            ontologies: self.ontologies,
            records: self.records,
            certificates: self.certificates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::error::OntologyError;
    use crate::ontology::Ontology;
    use crate::parser::FieldExtractor;
    use crate::proof::SigningKey;
    use crate::types::Rule;
    use serde_json::json;

    fn lending() -> Ontology {
        Ontology::new("lending", "1.0.0")
            .with_rule(Rule::new("max_amount", "amount <= 100000").with_variables(["amount"]))
            .with_rule(
                Rule::new("min_credit_score", "credit_score >= 600")
                    .with_variables(["credit_score"]),
            )
            .with_rule(
                Rule::new("max_dti", "debt_to_income_ratio <= 0.43")
                    .with_variables(["debt_to_income_ratio"]),
            )
    }

    async fn service(
        config: OxiProofConfig,
    ) -> VerificationService<InMemoryOntologyStore, InMemoryVerificationStore, InMemoryCertificateStore>
    {
        let service = VerificationService::builder()
            .with_config(config)
            .with_generator(ProofGenerator::new(SigningKey::generate()))
            .build()
            .unwrap();
        service.ontologies().insert(lending()).await.unwrap();
        service
    }

    #[tokio::test]
    async fn test_compliant_request_issues_certificate() {
        let service = service(OxiProofConfig::default()).await;
        let request = VerificationRequest::new(
            json!({"amount": 50_000, "credit_score": 750, "debt_to_income_ratio": 0.35}),
            "lending",
        )
        .with_caller_id("alice");
        let outcome = service.verify(request).await.unwrap();

        assert!(outcome.result.verified);
        assert!(!outcome.cached);
        assert_eq!(outcome.ontology_version, "1.0.0");
        let certificate = outcome.certificate.unwrap();
        assert!(service.verify_certificate(&certificate));
        assert_eq!(
            outcome.certificate_location.as_deref(),
            Some(format!("mem://alice/{}/proof.json", outcome.verification_id).as_str())
        );
        let record = service
            .get_verification(&outcome.verification_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.caller_id, "alice");
        assert!(record.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_violation_without_certificate() {
        let service = service(OxiProofConfig::default()).await;
        let outcome = service
            .verify(VerificationRequest::new(
                json!({"amount": 150_000, "credit_score": 550}),
                "lending",
            ))
            .await
            .unwrap();
        assert!(!outcome.result.verified);
        assert_eq!(outcome.result.violation_count(), 2);
        assert!(outcome.certificate.is_none());
        assert!(service.certificates().is_empty().await);
    }

    #[tokio::test]
    async fn test_proof_on_failure() {
        let config = OxiProofConfig::default().with_service(ServiceConfig {
            proof_on_failure: true,
            ..ServiceConfig::default()
        });
        let service = service(config).await;
        let outcome = service
            .verify(VerificationRequest::new(json!({"amount": 150_000}), "lending"))
            .await
            .unwrap();
        let certificate = outcome.certificate.unwrap();
        assert!(!certificate.result);
        assert!(service.verify_certificate(&certificate));
    }

    #[tokio::test]
    async fn test_repeated_request_is_cached() {
        let service = service(OxiProofConfig::default()).await;
        let request = VerificationRequest::new(json!({"amount": 10}), "lending")
            .with_rules(["max_amount", "min_credit_score"]);
        let first = service.verify(request.clone()).await.unwrap();
        let reordered = request.clone().with_rules(["min_credit_score", "max_amount"]);
        let second = service.verify(reordered).await.unwrap();

        assert!(second.cached);
        assert_eq!(first.verification_id, second.verification_id);
        assert_eq!(first.result, second.result);

        let pinned = service
            .verify(request.with_version("0.9.0"))
            .await
            .unwrap_err();
        assert!(matches!(
            pinned,
            OxiProofError::Ontology(OntologyError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_cache_disabled() {
        let config = OxiProofConfig::default().with_service(ServiceConfig {
            use_result_cache: false,
            ..ServiceConfig::default()
        });
        let service = service(config).await;
        let request = VerificationRequest::new(json!({"amount": 10}), "lending");
        let first = service.verify(request.clone()).await.unwrap();
        let second = service.verify(request).await.unwrap();
        assert!(!second.cached);
        assert_ne!(first.verification_id, second.verification_id);
    }

    #[tokio::test]
    async fn test_hard_failures() {
        let service = service(OxiProofConfig::default()).await;

        let err = service
            .verify(VerificationRequest::new(json!(""), "lending"))
            .await
            .unwrap_err();
        assert!(matches!(err, OxiProofError::Config(_)));
        assert!(err.is_process_failure());

        let err = service
            .verify(VerificationRequest::new(json!({"a": 1}), " "))
            .await
            .unwrap_err();
        assert!(matches!(err, OxiProofError::Config(_)));

        let err = service
            .verify(VerificationRequest::new(json!({"a": 1}), "medical"))
            .await
            .unwrap_err();
        assert!(matches!(err, OxiProofError::Ontology(_)));

        let err = service
            .verify(VerificationRequest::new(json!(42), "lending"))
            .await
            .unwrap_err();
        assert!(matches!(err, OxiProofError::Extraction(_)));
    }

    #[tokio::test]
    async fn test_text_content_uses_ontology_extractors() {
        let service = service(OxiProofConfig::default()).await;
        let ontology = Ontology::new("advice", "1")
            .with_rule(
                Rule::new("disclaimer", "gives_advice implies has_disclaimer")
                    .with_variables(["gives_advice", "has_disclaimer"]),
            )
            .with_extractor("gives_advice", FieldExtractor::keywords(["you should buy"]))
            .with_extractor(
                "has_disclaimer",
                FieldExtractor::keywords(["risk disclosure"]),
            );
        service.ontologies().insert(ontology).await.unwrap();

        let outcome = service
            .verify(VerificationRequest::new(
                json!("You should buy this stock now."),
                "advice",
            ))
            .await
            .unwrap();
        assert!(!outcome.result.verified);
        assert_eq!(outcome.result.violated_rules(), vec!["disclaimer"]);

        let outcome = service
            .verify(VerificationRequest::new(
                json!("You should buy this stock. Risk disclosure: past results vary."),
                "advice",
            ))
            .await
            .unwrap();
        assert!(outcome.result.verified);
    }

    #[test]
    fn test_request_deserialization_defaults() {
        let request: VerificationRequest =
            serde_json::from_str(r#"{"content": "hi", "ontology": "lending"}"#).unwrap();
        assert_eq!(request.caller_id, ANONYMOUS_CALLER);
        assert!(request.rules.is_empty());
        assert!(request.version.is_none());
    }
}
