//! Disk-backed embedding cache.
//!
//! Each document's embedding lives in `<root>/<storage key>.json`. A lookup
//! that finds the file never touches the provider; a miss computes the
//! embedding once and writes the record atomically (temp file + rename).

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{Embedding, UNLABELED};
use crate::error::{EmbeddingError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingRequest};
use crate::record::{EmbeddingRecord, storage_key};

/// Cache for embeddings to avoid redundant provider calls.
///
/// Concurrent misses for the same identifier are serialized so the provider
/// is called at most once per identifier; different identifiers proceed
/// independently.
pub struct EmbeddingCache {
    /// Directory holding one JSON record per document.
    root: PathBuf,

    /// Where embeddings come from on a miss.
    provider: Arc<dyn EmbeddingProvider>,

    /// Per-key locks for identifiers currently being computed or rewritten.
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EmbeddingCache {
    /// Open (and create if needed) a cache directory.
    pub async fn new(root: impl AsRef<Path>, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        debug!(
            "Opened embedding cache at {} (provider: {})",
            root.display(),
            provider.name()
        );

        Ok(Self {
            root,
            provider,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// The cache directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record for `identifier`.
    pub fn record_path(&self, identifier: &str) -> Result<PathBuf> {
        let key = storage_key(identifier)?;
        Ok(self.path_for_key(&key))
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// Look up an embedding without computing it.
    pub async fn get(&self, identifier: &str) -> Result<Option<Embedding>> {
        let path = self.record_path(identifier)?;
        read_vector(&path).await
    }

    /// Return the embedding for `identifier`, computing it from `text` on a
    /// miss.
    ///
    /// A record that exists but cannot be parsed, or has no vector, is
    /// reported as [`EmbeddingError::CorruptCacheEntry`] and never silently
    /// recomputed.
    pub async fn get_or_compute(&self, identifier: &str, text: &str) -> Result<Embedding> {
        let key = storage_key(identifier)?;
        let path = self.path_for_key(&key);

        if let Some(vector) = read_vector(&path).await? {
            debug!("Cache hit for {identifier}");
            return Ok(vector);
        }

        let lock = self.key_lock(&key).await;
        let result = {
            let _guard = lock.lock().await;
            self.compute_locked(identifier, &path, text).await
        };
        drop(lock);
        self.release_key(&key).await;

        result
    }

    /// Body of a miss; the caller holds the key lock.
    async fn compute_locked(&self, identifier: &str, path: &Path, text: &str) -> Result<Embedding> {
        // Another task may have finished the same identifier while we waited.
        if let Some(vector) = read_vector(path).await? {
            debug!("Cache hit for {identifier} after waiting on in-flight computation");
            return Ok(vector);
        }

        debug!("Cache miss for {identifier}, calling {}", self.provider.name());
        let response = self.provider.embed(EmbeddingRequest::new(text)).await?;

        let record =
            EmbeddingRecord::new(identifier, response.embedding.clone()).with_label(UNLABELED);
        write_record(path, &record).await?;
        info!(
            "Cached {}-dimensional embedding for {identifier}",
            response.dimension
        );

        Ok(response.embedding)
    }

    /// Rewrite an existing record with `label`.
    ///
    /// Returns `false` without writing when there is no record or it already
    /// carries that label.
    pub async fn annotate(&self, identifier: &str, label: &str) -> Result<bool> {
        let key = storage_key(identifier)?;
        let path = self.path_for_key(&key);

        let lock = self.key_lock(&key).await;
        let result = {
            let _guard = lock.lock().await;
            self.annotate_locked(identifier, &path, label).await
        };
        drop(lock);
        self.release_key(&key).await;

        if matches!(result, Ok(true)) {
            debug!("Labelled cached embedding {identifier} as {label}");
        }
        result
    }

    async fn annotate_locked(&self, identifier: &str, path: &Path, label: &str) -> Result<bool> {
        let Some(mut record) = read_record(path).await? else {
            return Ok(false);
        };
        if record.label.as_deref() == Some(label) {
            return Ok(false);
        }

        record.identifier.get_or_insert_with(|| identifier.to_string());
        record.label = Some(label.to_string());
        write_record(path, &record).await?;
        Ok(true)
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> Result<CacheStats> {
        let mut entries = 0;
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                entries += 1;
            }
        }

        Ok(CacheStats {
            entries,
            in_flight: self.in_flight.lock().await.len(),
        })
    }

    async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().await;
        Arc::clone(in_flight.entry(key.to_string()).or_default())
    }

    async fn release_key(&self, key: &str) {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            in_flight.remove(key);
        }
    }
}

/// Statistics about the embedding cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of records on disk.
    pub entries: usize,

    /// Identifiers currently being computed or rewritten.
    pub in_flight: usize,
}

/// Read a record, returning `None` if the file does not exist.
///
/// A returned record always carries a vector.
async fn read_record(path: &Path) -> Result<Option<EmbeddingRecord>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let corrupt = |reason: String| EmbeddingError::CorruptCacheEntry {
        path: path.to_path_buf(),
        reason,
    };

    let record: EmbeddingRecord =
        serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;
    if record.vector.is_none() {
        return Err(corrupt("record has no vector".to_string()));
    }

    Ok(Some(record))
}

async fn read_vector(path: &Path) -> Result<Option<Embedding>> {
    Ok(read_record(path).await?.and_then(|record| record.vector))
}

/// Write a record atomically using a temp file.
async fn write_record(path: &Path, record: &EmbeddingRecord) -> Result<()> {
    let content = serde_json::to_string_pretty(record)?;

    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, &content).await?;
    fs::rename(&temp_path, path).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::EmbeddingResponse;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Deterministic provider: the vector is derived from the text length.
    #[derive(Default)]
    struct CountingProvider {
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn default_model(&self) -> &str {
            "fake"
        }

        async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let embedding = vec![request.text.len() as f32, 1.0, 0.25];
            Ok(EmbeddingResponse {
                dimension: embedding.len(),
                embedding,
                model: "fake".to_string(),
                tokens_used: None,
            })
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        fn default_model(&self) -> &str {
            "none"
        }

        async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            Err(EmbeddingError::ApiRequest("unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_cache_miss_then_hit() {
        let temp_dir = TempDir::new().unwrap();
        let provider = Arc::new(CountingProvider::default());
        let cache = EmbeddingCache::new(temp_dir.path(), provider.clone())
            .await
            .unwrap();

        let first = cache.get_or_compute("doc one.pdf", "hello").await.unwrap();
        let second = cache.get_or_compute("doc one.pdf", "ignored").await.unwrap();

        assert_eq!(first, vec![5.0, 1.0, 0.25]);
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(temp_dir.path().join("doc_one.pdf.json").exists());
    }

    #[tokio::test]
    async fn test_cache_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();

        let original = {
            let cache = EmbeddingCache::new(temp_dir.path(), Arc::new(CountingProvider::default()))
                .await
                .unwrap();
            cache.get_or_compute("a.txt", "abc").await.unwrap()
        };

        let provider = Arc::new(CountingProvider::default());
        let cache = EmbeddingCache::new(temp_dir.path(), provider.clone())
            .await
            .unwrap();
        let reloaded = cache.get_or_compute("a.txt", "abc").await.unwrap();

        assert_eq!(reloaded, original);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_misses_compute_once() {
        let temp_dir = TempDir::new().unwrap();
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            delay: Some(Duration::from_millis(50)),
        });
        let cache = Arc::new(
            EmbeddingCache::new(temp_dir.path(), provider.clone())
                .await
                .unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_or_compute("same.pdf", "text").await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), vec![4.0, 1.0, 0.25]);
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().await.unwrap().in_flight, 0);
    }

    /// Completes only once `parties` embeddings are in flight together.
    struct BarrierProvider {
        barrier: tokio::sync::Barrier,
    }

    #[async_trait]
    impl EmbeddingProvider for BarrierProvider {
        fn name(&self) -> &str {
            "barrier"
        }

        fn default_model(&self) -> &str {
            "fake"
        }

        async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            self.barrier.wait().await;
            Ok(EmbeddingResponse {
                dimension: 1,
                embedding: vec![request.text.len() as f32],
                model: "fake".to_string(),
                tokens_used: None,
            })
        }
    }

    #[tokio::test]
    async fn test_misses_for_different_identifiers_run_in_parallel() {
        let temp_dir = TempDir::new().unwrap();
        let provider = Arc::new(BarrierProvider {
            barrier: tokio::sync::Barrier::new(2),
        });
        let cache = EmbeddingCache::new(temp_dir.path(), provider).await.unwrap();

        // Serialized misses would leave the first call waiting on the barrier forever.
        let (a, b) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(
                cache.get_or_compute("a.pdf", "a"),
                cache.get_or_compute("b.pdf", "bb")
            )
        })
        .await
        .unwrap();

        assert_eq!(a.unwrap(), vec![1.0]);
        assert_eq!(b.unwrap(), vec![2.0]);
    }

    #[tokio::test]
    async fn test_writes_leave_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let cache = EmbeddingCache::new(temp_dir.path(), Arc::new(CountingProvider::default()))
            .await
            .unwrap();

        cache.get_or_compute("a.pdf", "abc").await.unwrap();
        cache.annotate("a.pdf", "rent").await.unwrap();

        let files: Vec<String> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files, vec!["a.pdf.json".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("bad.json"), "{not json").unwrap();
        std::fs::write(temp_dir.path().join("empty.json"), r#"{"vector": null}"#).unwrap();

        let provider = Arc::new(CountingProvider::default());
        let cache = EmbeddingCache::new(temp_dir.path(), provider.clone())
            .await
            .unwrap();

        let err = cache.get_or_compute("bad", "text").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::CorruptCacheEntry { .. }));
        let err = cache.get_or_compute("empty", "text").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::CorruptCacheEntry { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_provider_error_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let cache = EmbeddingCache::new(temp_dir.path(), Arc::new(FailingProvider))
            .await
            .unwrap();

        let err = cache.get_or_compute("x.pdf", "text").await.unwrap_err();
        assert!(err.is_provider_error());
        assert_eq!(cache.stats().await.unwrap().entries, 0);
        assert_eq!(cache.get("x.pdf").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reads_legacy_record() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("old_invoice.pdf.json"),
            r#"{"Filename": "old invoice.pdf", "Vector": [0.5, 0.25]}"#,
        )
        .unwrap();

        let cache = EmbeddingCache::new(temp_dir.path(), Arc::new(FailingProvider))
            .await
            .unwrap();
        let vector = cache.get_or_compute("old invoice.pdf", "text").await.unwrap();
        assert_eq!(vector, vec![0.5, 0.25]);
    }

    #[tokio::test]
    async fn test_annotate() {
        let temp_dir = TempDir::new().unwrap();
        let cache = EmbeddingCache::new(temp_dir.path(), Arc::new(CountingProvider::default()))
            .await
            .unwrap();

        assert!(!cache.annotate("missing.pdf", "rent").await.unwrap());

        let vector = cache.get_or_compute("a.pdf", "abcd").await.unwrap();
        assert!(cache.annotate("a.pdf", "rent").await.unwrap());
        assert!(!cache.annotate("a.pdf", "rent").await.unwrap());

        let content = std::fs::read_to_string(cache.record_path("a.pdf").unwrap()).unwrap();
        let record: EmbeddingRecord = serde_json::from_str(&content).unwrap();
        assert_eq!(record.label.as_deref(), Some("rent"));
        assert_eq!(record.identifier.as_deref(), Some("a.pdf"));
        assert_eq!(record.vector, Some(vector));
    }
}
