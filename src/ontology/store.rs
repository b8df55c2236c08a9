//! Ontology storage backends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Ontology;
use crate::error::OntologyError;

/// Version label used when no explicit version is requested.
pub const LATEST: &str = "latest";

/// Default lifetime of a cached ontology.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Source of ontologies.
#[async_trait]
pub trait OntologyStore: Send + Sync {
    /// Load an ontology by name, at `version` or the latest one.
    ///
    /// # Errors
    ///
    /// Returns [`OntologyError::NotFound`] when absent and
    /// [`OntologyError::InvalidStructure`] when the stored document is
    /// malformed.
    async fn load(&self, name: &str, version: Option<&str>) -> Result<Ontology, OntologyError>;
}

fn not_found(name: &str, version: Option<&str>) -> OntologyError {
    OntologyError::NotFound {
        name: name.to_string(),
        version: version.unwrap_or(LATEST).to_string(),
    }
}

/// Ontologies held in memory. The most recently inserted version of a name
/// is its latest.
#[derive(Debug, Default)]
pub struct InMemoryOntologyStore {
    inner: RwLock<HashMap<String, NamedVersions>>,
}

#[derive(Debug, Default)]
struct NamedVersions {
    versions: HashMap<String, Ontology>,
    latest: Option<String>,
}

impl InMemoryOntologyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a validated ontology and mark it as the latest of its name.
    ///
    /// # Errors
    ///
    /// Returns [`OntologyError::InvalidStructure`] if validation fails.
    pub async fn insert(&self, ontology: Ontology) -> Result<(), OntologyError> {
        ontology.validate()?;
        let mut inner = self.inner.write().await;
        let entry = inner.entry(ontology.name.clone()).or_default();
        entry.latest = Some(ontology.version.clone());
        entry.versions.insert(ontology.version.clone(), ontology);
        Ok(())
    }

    /// Names of all stored ontologies, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl OntologyStore for InMemoryOntologyStore {
    async fn load(&self, name: &str, version: Option<&str>) -> Result<Ontology, OntologyError> {
        let inner = self.inner.read().await;
        let entry = inner.get(name).ok_or_else(|| not_found(name, version))?;
        let key = match version {
            Some(v) => Some(v),
            None => entry.latest.as_deref(),
        };
        key.and_then(|k| entry.versions.get(k))
            .cloned()
            .ok_or_else(|| not_found(name, version))
    }
}

/// Ontologies stored as JSON files under a root directory.
///
/// Layout: `{root}/{name}/v{version}/ontology.json` for pinned versions and
/// `{root}/{name}/latest/ontology.json` for the latest.
#[cfg(feature = "native")]
#[derive(Debug, Clone)]
pub struct DirectoryOntologyStore {
    root: std::path::PathBuf,
}

#[cfg(feature = "native")]
impl DirectoryOntologyStore {
    /// File name of every stored document.
    pub const FILE_NAME: &'static str = "ontology.json";

    /// Create a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the document for `name` at `version` (or latest).
    #[must_use]
    pub fn path_for(&self, name: &str, version: Option<&str>) -> std::path::PathBuf {
        let dir = match version {
            Some(v) => format!("v{v}"),
            None => LATEST.to_string(),
        };
        self.root.join(name).join(dir).join(Self::FILE_NAME)
    }

    /// Write `ontology` under its version and as the latest.
    ///
    /// # Errors
    ///
    /// Returns [`OntologyError::InvalidStructure`] if validation fails and
    /// [`OntologyError::Io`] if a file cannot be written.
    pub async fn save(&self, ontology: &Ontology) -> Result<(), OntologyError> {
        ontology.validate()?;
        let json = serde_json::to_string_pretty(ontology)?;
        for path in [
            self.path_for(&ontology.name, Some(&ontology.version)),
            self.path_for(&ontology.name, None),
        ] {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| OntologyError::Io(e.to_string()))?;
            }
            tokio::fs::write(&path, &json)
                .await
                .map_err(|e| OntologyError::Io(e.to_string()))?;
        }
        tracing::info!(
            ontology = %ontology.name,
            version = %ontology.version,
            "stored ontology"
        );
        Ok(())
    }
}

#[cfg(feature = "native")]
#[async_trait]
impl OntologyStore for DirectoryOntologyStore {
    async fn load(&self, name: &str, version: Option<&str>) -> Result<Ontology, OntologyError> {
        if name.contains(['/', '\\']) || name.contains("..") {
            return Err(OntologyError::InvalidStructure(format!(
                "invalid ontology name {name}"
            )));
        }
        let path = self.path_for(name, version);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(not_found(name, version));
            }
            Err(e) => return Err(OntologyError::Io(e.to_string())),
        };
        tracing::debug!(path = %path.display(), "loaded ontology document");
        Ontology::from_json(&json)
    }
}

/// A time-bounded cache in front of another store.
///
/// Entries are keyed by `name:version`, or `name:latest` when no version
/// was requested, and expire after the configured TTL.
pub struct CachedOntologyStore<S> {
    inner: S,
    ttl: Duration,
    entries: Arc<RwLock<HashMap<String, (Ontology, Instant)>>>,
}

impl<S> std::fmt::Debug for CachedOntologyStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedOntologyStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl<S: OntologyStore> CachedOntologyStore<S> {
    /// Wrap `inner` with the default TTL.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            ttl: DEFAULT_CACHE_TTL,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Set the TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Drop every cached version of `name`.
    pub async fn invalidate(&self, name: &str) {
        let prefix = format!("{name}:");
        self.entries
            .write()
            .await
            .retain(|key, _| !key.starts_with(&prefix));
        tracing::debug!(ontology = %name, "invalidated cached ontology");
    }

    /// Drop every cached entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of cached entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn cache_key(name: &str, version: Option<&str>) -> String {
        format!("{name}:{}", version.unwrap_or(LATEST))
    }
}

#[async_trait]
impl<S: OntologyStore> OntologyStore for CachedOntologyStore<S> {
    async fn load(&self, name: &str, version: Option<&str>) -> Result<Ontology, OntologyError> {
        let key = Self::cache_key(name, version);
        if let Some((ontology, stored_at)) = self.entries.read().await.get(&key)
            && stored_at.elapsed() < self.ttl
        {
            tracing::debug!(key = %key, "ontology cache hit");
            return Ok(ontology.clone());
        }

        let ontology = self.inner.load(name, version).await?;
        self.entries
            .write()
            .await
            .insert(key, (ontology.clone(), Instant::now()));
        Ok(ontology)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rule;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample(version: &str) -> Ontology {
        Ontology::new("lending", version).with_rule(Rule::new("max_amount", "amount <= 100000"))
    }

    #[tokio::test]
    async fn test_in_memory_versions_and_latest() {
        let store = InMemoryOntologyStore::new();
        store.insert(sample("1.0.0")).await.unwrap();
        store.insert(sample("1.1.0")).await.unwrap();

        assert_eq!(store.load("lending", None).await.unwrap().version, "1.1.0");
        assert_eq!(
            store.load("lending", Some("1.0.0")).await.unwrap().version,
            "1.0.0"
        );
        assert!(matches!(
            store.load("lending", Some("9")).await,
            Err(OntologyError::NotFound { version, .. }) if version == "9"
        ));
        assert!(matches!(
            store.load("medical", None).await,
            Err(OntologyError::NotFound { version, .. }) if version == LATEST
        ));
        assert_eq!(store.names().await, vec!["lending"]);
    }

    #[tokio::test]
    async fn test_in_memory_rejects_invalid() {
        let store = InMemoryOntologyStore::new();
        assert!(store.insert(Ontology::new("", "1")).await.is_err());
    }

    #[cfg(feature = "native")]
    #[tokio::test]
    async fn test_directory_store_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryOntologyStore::new(dir.path());
        store.save(&sample("2.0.0")).await.unwrap();

        assert!(dir.path().join("lending/v2.0.0/ontology.json").exists());
        assert!(dir.path().join("lending/latest/ontology.json").exists());
        assert_eq!(store.load("lending", None).await.unwrap(), sample("2.0.0"));
        assert_eq!(
            store.load("lending", Some("2.0.0")).await.unwrap(),
            sample("2.0.0")
        );
        assert!(matches!(
            store.load("lending", Some("1.0.0")).await,
            Err(OntologyError::NotFound { .. })
        ));
        assert!(matches!(
            store.load("../etc", None).await,
            Err(OntologyError::InvalidStructure(_))
        ));
    }

    #[cfg(feature = "native")]
    #[tokio::test]
    async fn test_directory_store_invalid_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken/latest/ontology.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"name": "broken", "rules": []}"#).unwrap();

        let store = DirectoryOntologyStore::new(dir.path());
        assert!(matches!(
            store.load("broken", None).await,
            Err(OntologyError::InvalidStructure(_))
        ));
    }

    struct CountingStore {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl OntologyStore for CountingStore {
        async fn load(&self, name: &str, version: Option<&str>) -> Result<Ontology, OntologyError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let mut ontology = sample(version.unwrap_or("3.0.0"));
            ontology.name = name.to_string();
            Ok(ontology)
        }
    }

    #[tokio::test]
    async fn test_cache_hits_and_invalidation() {
        let cache = CachedOntologyStore::new(CountingStore {
            loads: AtomicUsize::new(0),
        });
        cache.load("lending", None).await.unwrap();
        cache.load("lending", None).await.unwrap();
        cache.load("lending", Some("1.0.0")).await.unwrap();
        assert_eq!(cache.inner().loads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().await, 2);

        cache.invalidate("lending").await;
        assert!(cache.is_empty().await);
        cache.load("lending", None).await.unwrap();
        assert_eq!(cache.inner().loads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cache_expiry() {
        let cache = CachedOntologyStore::new(CountingStore {
            loads: AtomicUsize::new(0),
        })
        .with_ttl(Duration::ZERO);
        cache.load("lending", None).await.unwrap();
        cache.load("lending", None).await.unwrap();
        assert_eq!(cache.inner().loads.load(Ordering::SeqCst), 2);
    }
}
