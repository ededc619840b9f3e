//! Persistent per-paper cache
//!
//! One JSON index (`papers.json`) keyed by version-free ArXiv id, plus one
//! concept-map file per paper under `concept_maps/`. Every write replaces the
//! file atomically.

use crate::files::write_atomic;
use crate::{Result, StoreError};
use chrono::{DateTime, Utc};
use rover_core::{normalize_arxiv_id, ConceptMap, PaperInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub const CACHE_FILE: &str = "papers.json";
pub const CONCEPT_MAPS_DIR: &str = "concept_maps";

/// Everything remembered about one paper
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub paper: PaperInfo,

    #[serde(default)]
    pub repo_url: Option<String>,

    #[serde(default)]
    pub repo_path: Option<PathBuf>,

    #[serde(default)]
    pub corpus_id: Option<String>,

    /// Files accepted by the index on the last full indexing run
    #[serde(default)]
    pub indexed_files: Option<usize>,

    /// HEAD commit of the clone that was indexed
    #[serde(default)]
    pub revision: Option<String>,

    #[serde(default)]
    pub indexed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub concept_map_path: Option<PathBuf>,

    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,

    #[serde(default)]
    pub access_count: u64,
}

impl CacheEntry {
    pub fn new(paper: PaperInfo) -> Self {
        let now = Utc::now();
        Self {
            paper,
            repo_url: None,
            repo_path: None,
            corpus_id: None,
            indexed_files: None,
            revision: None,
            indexed_at: None,
            concept_map_path: None,
            created_at: now,
            last_accessed: now,
            access_count: 0,
        }
    }

    pub fn arxiv_id(&self) -> &str {
        &self.paper.arxiv_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedPaperSummary {
    pub arxiv_id: String,
    pub title: String,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
    pub has_repo: bool,
    pub has_concept_map: bool,
    pub indexed_files: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub total_papers: usize,
    pub total_size_bytes: u64,
    pub total_accesses: u64,
    pub papers: Vec<CachedPaperSummary>,
}

pub struct PaperCache {
    dir: PathBuf,
    entries: Mutex<BTreeMap<String, CacheEntry>>,
}

impl PaperCache {
    /// Open the cache in `dir`, creating it if needed. An unreadable index starts empty.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let index = dir.join(CACHE_FILE);
        let entries = match std::fs::read(&index) {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, CacheEntry>>(&bytes) {
                Ok(entries) => {
                    info!("Loaded paper cache with {} papers", entries.len());
                    entries
                }
                Err(e) => {
                    warn!("Ignoring unreadable paper cache {}: {}", index.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::io(&index, e)),
        };

        Ok(Self {
            dir,
            entries: Mutex::new(entries),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(CACHE_FILE)
    }

    pub fn concept_map_path(&self, arxiv_id: &str) -> PathBuf {
        let key = normalize_arxiv_id(arxiv_id).replace('/', "_");
        self.dir.join(CONCEPT_MAPS_DIR).join(format!("{}.json", key))
    }

    /// Callers hold the entries lock, so index writes land in order.
    async fn persist(&self, entries: &BTreeMap<String, CacheEntry>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        write_off_runtime(self.index_path(), bytes).await
    }

    /// Fetch an entry and record the access in memory.
    ///
    /// The access reaches disk with the next write to the index.
    #[instrument(skip(self))]
    pub async fn get(&self, arxiv_id: &str) -> Option<CacheEntry> {
        let key = normalize_arxiv_id(arxiv_id);
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(&key) else {
            debug!("Cache miss for {}", key);
            return None;
        };

        entry.access_count += 1;
        entry.last_accessed = Utc::now();
        debug!("Cache hit for {}", key);
        Some(entry.clone())
    }

    /// Fetch an entry without touching its access statistics.
    pub async fn peek(&self, arxiv_id: &str) -> Option<CacheEntry> {
        let key = normalize_arxiv_id(arxiv_id);
        self.entries.lock().await.get(&key).cloned()
    }

    pub async fn exists(&self, arxiv_id: &str) -> bool {
        let key = normalize_arxiv_id(arxiv_id);
        self.entries.lock().await.contains_key(&key)
    }

    /// Store an entry. An existing entry keeps its creation time and access count.
    #[instrument(skip(self, entry), fields(arxiv_id = %entry.paper.arxiv_id))]
    pub async fn set(&self, mut entry: CacheEntry) -> Result<()> {
        let key = normalize_arxiv_id(&entry.paper.arxiv_id);
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(&key) {
            entry.created_at = existing.created_at;
            entry.access_count = existing.access_count;
        }
        entry.access_count += 1;
        entry.last_accessed = Utc::now();
        entries.insert(key.clone(), entry);
        self.persist(&entries).await?;
        info!("Cached paper {}", key);
        Ok(())
    }

    /// Apply `apply` to an existing entry. Returns false when there is none.
    pub async fn update<F>(&self, arxiv_id: &str, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut CacheEntry),
    {
        let key = normalize_arxiv_id(arxiv_id);
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(&key) else {
            warn!("Cannot update missing cache entry {}", key);
            return Ok(false);
        };
        apply(entry);
        entry.last_accessed = Utc::now();
        self.persist(&entries).await?;
        Ok(true)
    }

    /// Remove an entry and its concept map. Returns false when there was none.
    #[instrument(skip(self))]
    pub async fn delete(&self, arxiv_id: &str) -> Result<bool> {
        let key = normalize_arxiv_id(arxiv_id);
        let mut entries = self.entries.lock().await;
        if entries.remove(&key).is_none() {
            return Ok(false);
        }
        self.persist(&entries).await?;
        remove_if_present(&self.concept_map_path(&key)).await?;
        info!("Deleted cache entry {}", key);
        Ok(true)
    }

    /// Remove every entry and concept map; returns how many entries were dropped.
    pub async fn clear_all(&self) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let removed = entries.len();
        entries.clear();
        self.persist(&entries).await?;

        let maps = self.dir.join(CONCEPT_MAPS_DIR);
        match tokio::fs::remove_dir_all(&maps).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&maps, e)),
        }
        warn!("Cleared paper cache ({} entries)", removed);
        Ok(removed)
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().await;

        let mut total_size_bytes = file_size(&self.index_path());
        let mut papers = Vec::with_capacity(entries.len());
        for (key, entry) in entries.iter() {
            let map_size = file_size(&self.concept_map_path(key));
            total_size_bytes += map_size;
            papers.push(CachedPaperSummary {
                arxiv_id: key.clone(),
                title: entry.paper.title.clone(),
                access_count: entry.access_count,
                last_accessed: entry.last_accessed,
                has_repo: entry.repo_url.is_some(),
                has_concept_map: map_size > 0,
                indexed_files: entry.indexed_files,
            });
        }

        CacheStats {
            total_papers: entries.len(),
            total_size_bytes,
            total_accesses: entries.values().map(|e| e.access_count).sum(),
            papers,
        }
    }

    /// Persist a concept map and point the paper's entry at it, if there is one.
    pub async fn save_concept_map(&self, arxiv_id: &str, map: &ConceptMap) -> Result<PathBuf> {
        let path = self.concept_map_path(arxiv_id);
        let bytes = serde_json::to_vec_pretty(map)?;
        write_off_runtime(path.clone(), bytes).await?;

        let recorded = path.clone();
        self.update(arxiv_id, move |entry| entry.concept_map_path = Some(recorded))
            .await?;
        debug!("Saved concept map to {}", path.display());
        Ok(path)
    }

    /// Load a saved concept map. Missing or unreadable maps yield `None`.
    pub fn load_concept_map(&self, arxiv_id: &str) -> Option<ConceptMap> {
        let path = self.concept_map_path(arxiv_id);
        let bytes = std::fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(map) => Some(map),
            Err(e) => {
                warn!("Ignoring unreadable concept map {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Atomic write on the blocking pool; `write_atomic` syncs before renaming.
async fn write_off_runtime(path: PathBuf, bytes: Vec<u8>) -> Result<()> {
    let target = path.clone();
    tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
        .await
        .map_err(|e| StoreError::io(&path, std::io::Error::other(e)))?
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn attention() -> PaperInfo {
        PaperInfo::new("1706.03762", "Attention Is All You Need")
    }

    #[tokio::test]
    async fn test_set_get_normalizes_version() {
        let dir = TempDir::new().unwrap();
        let cache = PaperCache::open(dir.path()).unwrap();
        cache.set(CacheEntry::new(attention())).await.unwrap();

        assert!(cache.exists("1706.03762v5").await);
        let entry = cache.get("https://arxiv.org/abs/1706.03762v2").await.unwrap();
        assert_eq!(entry.paper.title, "Attention Is All You Need");
        assert_eq!(entry.access_count, 2);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let cache = PaperCache::open(dir.path()).unwrap();
            cache.set(CacheEntry::new(attention())).await.unwrap();
            let updated = cache
                .update("1706.03762", |e| {
                    e.repo_url = Some("https://github.com/tensorflow/tensor2tensor".into());
                    e.indexed_files = Some(12);
                })
                .await
                .unwrap();
            assert!(updated);
        }

        let cache = PaperCache::open(dir.path()).unwrap();
        let entry = cache.peek("1706.03762").await.unwrap();
        assert_eq!(entry.indexed_files, Some(12));
        assert_eq!(entry.access_count, 1);
    }

    #[tokio::test]
    async fn test_get_counts_without_rewriting_index() {
        let dir = TempDir::new().unwrap();
        let cache = PaperCache::open(dir.path()).unwrap();
        cache.set(CacheEntry::new(attention())).await.unwrap();
        let index = dir.path().join(CACHE_FILE);
        let written = std::fs::read(&index).unwrap();

        cache.get("1706.03762").await.unwrap();
        cache.get("1706.03762").await.unwrap();
        assert!(cache.get("2010.11929").await.is_none());
        assert_eq!(std::fs::read(&index).unwrap(), written);
        assert_eq!(cache.peek("1706.03762").await.unwrap().access_count, 3);

        cache.update("1706.03762", |e| e.indexed_files = Some(4)).await.unwrap();
        let reopened = PaperCache::open(dir.path()).unwrap();
        assert_eq!(reopened.peek("1706.03762").await.unwrap().access_count, 3);
    }

    #[tokio::test]
    async fn test_update_missing_entry() {
        let dir = TempDir::new().unwrap();
        let cache = PaperCache::open(dir.path()).unwrap();
        assert!(!cache.update("2010.11929", |e| e.indexed_files = Some(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_index_starts_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CACHE_FILE), b"{not json").unwrap();
        let cache = PaperCache::open(dir.path()).unwrap();
        assert_eq!(cache.stats().await.total_papers, 0);
    }

    #[tokio::test]
    async fn test_concept_maps_and_delete() {
        let dir = TempDir::new().unwrap();
        let cache = PaperCache::open(dir.path()).unwrap();
        cache.set(CacheEntry::new(attention())).await.unwrap();

        let map = ConceptMap::fallback("Attention Is All You Need");
        let path = cache.save_concept_map("1706.03762", &map).await.unwrap();
        assert!(path.exists());
        assert_eq!(cache.load_concept_map("1706.03762v1"), Some(map));

        let stats = cache.stats().await;
        assert!(stats.papers[0].has_concept_map);
        assert!(stats.total_size_bytes > 0);

        assert!(cache.delete("1706.03762").await.unwrap());
        assert!(!path.exists());
        assert!(!cache.delete("1706.03762").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_all() {
        let dir = TempDir::new().unwrap();
        let cache = PaperCache::open(dir.path()).unwrap();
        cache.set(CacheEntry::new(attention())).await.unwrap();
        cache
            .set(CacheEntry::new(PaperInfo::new("2010.11929", "An Image is Worth 16x16 Words")))
            .await
            .unwrap();
        cache
            .save_concept_map("2010.11929", &ConceptMap::default())
            .await
            .unwrap();

        assert_eq!(cache.clear_all().await.unwrap(), 2);
        let stats = cache.stats().await;
        assert_eq!(stats.total_papers, 0);
        assert_eq!(stats.total_accesses, 0);
        assert!(cache.load_concept_map("2010.11929").is_none());
    }
}
