//! Persistence contracts for verification records and certificates.
//!
//! The in-memory implementations back tests and single-process
//! deployments; durable backends implement the same traits.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::proof::ProofCertificate;
use crate::types::VerificationResult;

/// A stored verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    /// Verification id.
    pub verification_id: String,
    /// Caller that requested the verification.
    pub caller_id: String,
    /// Ontology name.
    pub ontology_name: String,
    /// Ontology version actually used.
    pub ontology_version: String,
    /// When the verification ran.
    pub timestamp: DateTime<Utc>,
    /// Request fingerprint used for deduplication.
    pub cache_key: String,
    /// The verification result.
    pub result: VerificationResult,
    /// Where the certificate was stored, if one was issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_location: Option<String>,
    /// Retention deadline; `None` keeps the record indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl VerificationRecord {
    /// Whether the record is past its retention deadline at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Storage for verification records.
#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// Store a record, replacing any record with the same id.
    async fn save(&self, record: VerificationRecord) -> Result<(), StoreError>;

    /// Fetch a live record by verification id.
    async fn get(&self, verification_id: &str) -> Result<Option<VerificationRecord>, StoreError>;

    /// Fetch the newest live record with this cache key.
    async fn find_by_cache_key(
        &self,
        cache_key: &str,
    ) -> Result<Option<VerificationRecord>, StoreError>;

    /// Live records of one caller, newest first.
    async fn list_by_caller(&self, caller_id: &str) -> Result<Vec<VerificationRecord>, StoreError>;
}

/// Verification records held in memory. Expired records are invisible to
/// reads and dropped by [`purge_expired`](Self::purge_expired).
#[derive(Debug, Default)]
pub struct InMemoryVerificationStore {
    records: RwLock<HashMap<String, VerificationRecord>>,
}

impl InMemoryVerificationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired records, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        let removed = before - records.len();
        if removed > 0 {
            tracing::info!(removed, "purged expired verification records");
        }
        removed
    }

    /// Number of stored records, expired ones included.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl VerificationStore for InMemoryVerificationStore {
    async fn save(&self, record: VerificationRecord) -> Result<(), StoreError> {
        tracing::debug!(verification_id = %record.verification_id, "saving verification record");
        self.records
            .write()
            .await
            .insert(record.verification_id.clone(), record);
        Ok(())
    }

    async fn get(&self, verification_id: &str) -> Result<Option<VerificationRecord>, StoreError> {
        let now = Utc::now();
        Ok(self
            .records
            .read()
            .await
            .get(verification_id)
            .filter(|r| !r.is_expired_at(now))
            .cloned())
    }

    async fn find_by_cache_key(
        &self,
        cache_key: &str,
    ) -> Result<Option<VerificationRecord>, StoreError> {
        let now = Utc::now();
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.cache_key == cache_key && !r.is_expired_at(now))
            .max_by_key(|r| r.timestamp)
            .cloned())
    }

    async fn list_by_caller(&self, caller_id: &str) -> Result<Vec<VerificationRecord>, StoreError> {
        let now = Utc::now();
        let mut records: Vec<VerificationRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.caller_id == caller_id && !r.is_expired_at(now))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }
}

/// Durable storage for certificates, keyed by caller and verification.
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Store a certificate and return its location.
    async fn put(
        &self,
        caller_id: &str,
        verification_id: &str,
        certificate: &ProofCertificate,
    ) -> Result<String, StoreError>;

    /// Fetch a stored certificate.
    async fn get(
        &self,
        caller_id: &str,
        verification_id: &str,
    ) -> Result<Option<ProofCertificate>, StoreError>;
}

/// Certificates held in memory under `mem://{caller}/{verification}/proof.json`.
#[derive(Debug, Default)]
pub struct InMemoryCertificateStore {
    certificates: RwLock<HashMap<String, ProofCertificate>>,
}

impl InMemoryCertificateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Location of a certificate.
    #[must_use]
    pub fn location(caller_id: &str, verification_id: &str) -> String {
        format!("mem://{caller_id}/{verification_id}/proof.json")
    }

    /// Number of stored certificates.
    pub async fn len(&self) -> usize {
        self.certificates.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.certificates.read().await.is_empty()
    }
}

#[async_trait]
impl CertificateStore for InMemoryCertificateStore {
    async fn put(
        &self,
        caller_id: &str,
        verification_id: &str,
        certificate: &ProofCertificate,
    ) -> Result<String, StoreError> {
        if caller_id.contains('/') || verification_id.contains('/') {
            return Err(StoreError::Backend(
                "caller and verification ids must not contain '/'".into(),
            ));
        }
        let location = Self::location(caller_id, verification_id);
        self.certificates
            .write()
            .await
            .insert(location.clone(), certificate.clone());
        tracing::debug!(location = %location, "stored certificate");
        Ok(location)
    }

    async fn get(
        &self,
        caller_id: &str,
        verification_id: &str,
    ) -> Result<Option<ProofCertificate>, StoreError> {
        Ok(self
            .certificates
            .read()
            .await
            .get(&Self::location(caller_id, verification_id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::{ProofGenerator, SigningKey};
    use crate::types::SolverStatus;
    use chrono::Duration;

    fn result() -> VerificationResult {
        VerificationResult {
            verified: true,
            violations: Vec::new(),
            constraints_checked: 1,
            execution_time_ms: 0.1,
            solver_status: SolverStatus::Complete,
            rule_outcomes: Vec::new(),
        }
    }

    fn record(id: &str, caller: &str, key: &str, age_secs: i64) -> VerificationRecord {
        VerificationRecord {
            verification_id: id.into(),
            caller_id: caller.into(),
            ontology_name: "lending".into(),
            ontology_version: "1.0.0".into(),
            timestamp: Utc::now() - Duration::seconds(age_secs),
            cache_key: key.into(),
            result: result(),
            certificate_location: None,
            expires_at: Some(Utc::now() + Duration::hours(1)),
        }
    }

    #[tokio::test]
    async fn test_save_and_lookup() {
        let store = InMemoryVerificationStore::new();
        store.save(record("a", "alice", "k1", 10)).await.unwrap();
        store.save(record("b", "alice", "k1", 0)).await.unwrap();
        store.save(record("c", "bob", "k2", 5)).await.unwrap();

        assert_eq!(store.get("a").await.unwrap().unwrap().caller_id, "alice");
        assert!(store.get("zzz").await.unwrap().is_none());
        assert_eq!(
            store
                .find_by_cache_key("k1")
                .await
                .unwrap()
                .unwrap()
                .verification_id,
            "b"
        );
        let alice: Vec<String> = store
            .list_by_caller("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.verification_id)
            .collect();
        assert_eq!(alice, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_expired_records_are_hidden_and_purged() {
        let store = InMemoryVerificationStore::new();
        let mut expired = record("old", "alice", "k", 100);
        expired.expires_at = Some(Utc::now() - Duration::seconds(1));
        store.save(expired).await.unwrap();
        store.save(record("new", "alice", "other", 0)).await.unwrap();

        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.find_by_cache_key("k").await.unwrap().is_none());
        assert_eq!(store.len().await, 2);
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_certificate_store() {
        let store = InMemoryCertificateStore::new();
        let generator = ProofGenerator::new(SigningKey::generate());
        let cert = generator
            .generate("v-1", &serde_json::json!({}), "lending", &result())
            .unwrap();

        let location = store.put("alice", "v-1", &cert).await.unwrap();
        assert_eq!(location, "mem://alice/v-1/proof.json");
        assert_eq!(store.get("alice", "v-1").await.unwrap(), Some(cert.clone()));
        assert!(store.get("bob", "v-1").await.unwrap().is_none());
        assert!(store.put("a/b", "v", &cert).await.is_err());
        assert_eq!(store.len().await, 1);
    }
}
