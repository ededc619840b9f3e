//! Corpus manager: one remote corpus per paper.

use crate::traits::SearchIndex;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

const PROBE_QUERY: &str = "test";

pub struct CorpusManager {
    index: Arc<dyn SearchIndex>,
    resolved: Mutex<HashMap<String, String>>,
    /// Serialises list-then-create for one paper at a time
    paper_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CorpusManager {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self {
            index,
            resolved: Mutex::new(HashMap::new()),
            paper_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn index(&self) -> &Arc<dyn SearchIndex> {
        &self.index
    }

    /// Corpus named `paper_id`, created on first use.
    ///
    /// Callers in this process never create duplicates. Two processes racing
    /// on the same paper can, since the service has no get-or-create call.
    #[instrument(skip(self))]
    pub async fn resolve_corpus(&self, paper_id: &str) -> Result<String> {
        if let Some(id) = self.known(paper_id).await {
            return Ok(id);
        }

        let lock = self.paper_lock(paper_id).await;
        let _guard = lock.lock().await;
        if let Some(id) = self.known(paper_id).await {
            return Ok(id);
        }

        let existing = self
            .index
            .list_corpora()
            .await?
            .into_iter()
            .find(|corpus| corpus.name == paper_id);

        let id = match existing {
            Some(corpus) => {
                debug!("Found corpus {} for {}", corpus.id, paper_id);
                corpus.id
            }
            None => {
                let id = self
                    .index
                    .create_corpus(paper_id, &format!("Source code for arXiv paper {}", paper_id))
                    .await?;
                info!("Created corpus {} for {}", id, paper_id);
                id
            }
        };

        self.resolved
            .lock()
            .await
            .insert(paper_id.to_string(), id.clone());
        Ok(id)
    }

    async fn known(&self, paper_id: &str) -> Option<String> {
        self.resolved.lock().await.get(paper_id).cloned()
    }

    async fn paper_lock(&self, paper_id: &str) -> Arc<Mutex<()>> {
        self.paper_locks
            .lock()
            .await
            .entry(paper_id.to_string())
            .or_default()
            .clone()
    }

    /// Whether a minimal query against the corpus returns anything.
    #[instrument(skip(self))]
    pub async fn has_documents(&self, corpus_id: &str) -> Result<bool> {
        let hits = self.index.query(corpus_id, PROBE_QUERY, 1).await?;
        Ok(!hits.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSearchIndex;
    use crate::AgentError;
    use async_trait::async_trait;
    use crate::traits::CorpusSummary;
    use rover_core::{IndexedDocument, Snippet};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Index whose corpus listing stalls until released, once `stall` is set
    struct StallingIndex {
        inner: FakeSearchIndex,
        stall: AtomicBool,
        listing: Notify,
        release: Notify,
    }

    impl StallingIndex {
        fn new() -> Self {
            Self {
                inner: FakeSearchIndex::new(),
                stall: AtomicBool::new(false),
                listing: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl SearchIndex for StallingIndex {
        async fn list_corpora(&self) -> crate::Result<Vec<CorpusSummary>> {
            if self.stall.load(Ordering::SeqCst) {
                self.listing.notify_one();
                self.release.notified().await;
            }
            self.inner.list_corpora().await
        }

        async fn create_corpus(&self, name: &str, description: &str) -> crate::Result<String> {
            self.inner.create_corpus(name, description).await
        }

        async fn index_document(&self, corpus_id: &str, document: &IndexedDocument) -> crate::Result<()> {
            self.inner.index_document(corpus_id, document).await
        }

        async fn query(&self, corpus_id: &str, text: &str, top_k: usize) -> crate::Result<Vec<Snippet>> {
            self.inner.query(corpus_id, text, top_k).await
        }
    }

    #[tokio::test]
    async fn test_resolve_corpus_is_idempotent() {
        let index = Arc::new(FakeSearchIndex::new());
        let manager = CorpusManager::new(index.clone());

        let first = manager.resolve_corpus("1706.03762").await.unwrap();
        let second = manager.resolve_corpus("1706.03762").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(index.create_calls(), 1);

        let other = manager.resolve_corpus("1810.04805").await.unwrap();
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn test_resolve_corpus_finds_existing_by_name() {
        let index = Arc::new(FakeSearchIndex::new().with_corpus("1706.03762", Vec::new()));
        let manager = CorpusManager::new(index.clone());

        let id = manager.resolve_corpus("1706.03762").await.unwrap();
        assert_eq!(id, "1");
        assert_eq!(index.create_calls(), 0);

        // a fresh manager (new process) lists again and still finds it
        let again = CorpusManager::new(index.clone());
        assert_eq!(again.resolve_corpus("1706.03762").await.unwrap(), "1");
        assert_eq!(index.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_resolution_creates_one_corpus() {
        let index = Arc::new(FakeSearchIndex::new());
        let manager = Arc::new(CorpusManager::new(index.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.resolve_corpus("2310.02170").await.unwrap() })
            })
            .collect();
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(index.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_slow_lookup_does_not_block_resolved_papers() {
        let index = Arc::new(StallingIndex::new());
        let manager = Arc::new(CorpusManager::new(index.clone()));
        let known = manager.resolve_corpus("1706.03762").await.unwrap();

        index.stall.store(true, Ordering::SeqCst);
        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.resolve_corpus("1810.04805").await.unwrap() })
        };
        index.listing.notified().await;

        let again = tokio::time::timeout(Duration::from_secs(1), manager.resolve_corpus("1706.03762"))
            .await
            .expect("resolved paper waited on another paper's lookup")
            .unwrap();
        assert_eq!(again, known);

        index.release.notify_one();
        let other = pending.await.unwrap();
        assert_ne!(other, known);
        assert_eq!(index.inner.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_has_documents() {
        let doc = IndexedDocument::for_source_file("1706.03762", "model.py", "class Model: pass");
        let index = Arc::new(
            FakeSearchIndex::new()
                .with_corpus("1706.03762", vec![doc])
                .with_corpus("empty", Vec::new()),
        );
        let manager = CorpusManager::new(index.clone());

        assert!(manager.has_documents("1").await.unwrap());
        assert!(!manager.has_documents("2").await.unwrap());
    }

    #[tokio::test]
    async fn test_has_documents_propagates_service_errors() {
        let index = Arc::new(FakeSearchIndex::new());
        index.fail_queries_with(|| AgentError::Unavailable {
            service: "Vectara",
            detail: "down".into(),
        });
        let manager = CorpusManager::new(index);
        assert!(manager.has_documents("1").await.is_err());
    }
}
