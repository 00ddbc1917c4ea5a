//! C6: per-client memory service — binds C2 (crypto), C3 (namespace store),
//! C4 (vector index), and C5 (categorizer) behind one façade.

mod compartments;
mod digest;
mod private;

pub use digest::Digest;

use crate::categorize;
use crate::config::Config;
use crate::crypto::CryptoBox;
use crate::embedding::Embedder;
use crate::error::{EngramError, Result};
use crate::index::VectorIndex;
use crate::latent::LatentSpaceStore;
use crate::store::NamespaceStore;
use crate::types::{
    Category, Compartment, ConversationTurn, Metadata, MetadataValue, Record, SearchHit, SearchMode, SearchResults, SortBy,
    StructuredId, ThoughtView,
};
use chrono::Utc;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Per-client memory engine. One instance is constructed (lazily, via C8) for
/// each client id that touches the system.
pub struct MemoryService {
    client_id: String,
    store: NamespaceStore,
    indices: DashMap<String, Arc<Mutex<VectorIndex>>>,
    index_dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    crypto: Arc<CryptoBox>,
    pub(crate) compartments: tokio::sync::RwLock<Vec<Compartment>>,
    compartments_path: PathBuf,
    pub(crate) session: crate::session::SessionLog,
    latent: LatentSpaceStore,
    last_active: parking_lot::Mutex<Instant>,
}

const LONGTERM_NAMESPACE: &str = "longterm";

impl MemoryService {
    pub async fn open(config: &Config, client_id: &str, embedder: Arc<dyn Embedder>, crypto: Arc<CryptoBox>) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let store = NamespaceStore::open(&config.data_dir, client_id).await?;
        let index_dir = config.vector_dir();
        let session = crate::session::SessionLog::open(&config.data_dir, client_id, config.session_capacity).await?;
        let latent = LatentSpaceStore::open(&config.latent_dir()).await?;

        let compartments_path = config.compartments_path(client_id);
        let compartments = if compartments_path.exists() {
            let raw = tokio::fs::read_to_string(&compartments_path).await?;
            serde_json::from_str(&raw)?
        } else {
            Vec::new()
        };

        Ok(Self {
            client_id: client_id.to_string(),
            store,
            indices: DashMap::new(),
            index_dir,
            embedder,
            crypto,
            compartments: tokio::sync::RwLock::new(compartments),
            compartments_path,
            session,
            latent,
            last_active: parking_lot::Mutex::new(Instant::now()),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_active.lock().elapsed()
    }

    /// Return the index for `namespace`, opening (and caching) it first if
    /// this is the first time it's been touched this process.
    fn index_handle(&self, namespace: &str) -> Result<Arc<Mutex<VectorIndex>>> {
        if let Some(existing) = self.indices.get(namespace) {
            return Ok(existing.clone());
        }
        let idx = VectorIndex::open(&self.index_dir, &self.client_id, namespace, self.embedder.dimensions())?;
        let handle = Arc::new(Mutex::new(idx));
        self.indices.insert(namespace.to_string(), handle.clone());
        Ok(handle)
    }

    fn timestamped_metadata(&self, mut metadata: Metadata) -> Metadata {
        metadata
            .entry("timestamp".to_string())
            .or_insert_with(|| MetadataValue::String(Utc::now().to_rfc3339()));
        metadata
            .entry("client_id".to_string())
            .or_insert_with(|| MetadataValue::String(self.client_id.clone()));
        metadata
    }

    /// Write a record with an explicit id into `namespace`. Embeds the
    /// content outside any store lock (per the concurrency model) and
    /// degrades to lexical-only storage if the embedder fails rather than
    /// aborting the write.
    async fn put(&self, namespace: &str, id: &str, content: &str, metadata: Metadata) -> Result<()> {
        self.touch();
        let metadata = self.timestamped_metadata(metadata);
        let vector = match self.embedder.embed(content) {
            Ok(v) => Some(v),
            Err(err) => {
                tracing::warn!(%err, namespace, "embedding failed, storing without a vector");
                None
            }
        };

        let record = Record {
            id: id.to_string(),
            content: content.to_string(),
            metadata,
            vector: vector.clone(),
        };
        self.store.add(namespace, record).await?;

        if let Some(vector) = vector {
            let handle = self.index_handle(namespace)?;
            let mut idx = handle.lock().await;
            if let Err(err) = idx.add(&id.to_string(), &vector) {
                tracing::warn!(%err, namespace, "vector index add failed");
            } else {
                idx.persist()?;
            }
        }
        Ok(())
    }

    /// Add a record to `namespace`, generating and returning its id.
    pub async fn add(&self, content: &str, namespace: &str, metadata: Option<Metadata>) -> Result<String> {
        let id = generate_memory_id();
        self.put(namespace, &id, content, metadata.unwrap_or_default()).await?;
        Ok(id)
    }

    /// Join `turns` into a single `role: content` transcript (one per line)
    /// and add it to `namespace`.
    pub async fn add_conversation(&self, turns: Vec<ConversationTurn>, namespace: &str) -> Result<String> {
        let content = turns.iter().map(|t| format!("{}: {}", t.role, t.content)).collect::<Vec<_>>().join("\n");
        self.add(&content, namespace, None).await
    }

    pub async fn get(&self, namespace: &str, id: &str) -> Result<Record> {
        self.touch();
        self.store.get(namespace, id).await
    }

    pub async fn get_namespaces(&self) -> Vec<String> {
        self.store.namespaces()
    }

    /// Remove every record in `namespace`, returning how many were removed.
    pub async fn clear_namespace(&self, namespace: &str) -> Result<usize> {
        self.touch();
        let removed = self.store.clear(namespace).await?;
        if let Some(existing) = self.indices.get(namespace) {
            let handle = existing.clone();
            drop(existing);
            let mut idx = handle.lock().await;
            idx.rebuild_from(&[])?;
        }
        Ok(removed)
    }

    /// Search `namespace`: vector search when the embedder is available and
    /// produced a query vector, lexical otherwise. Never errors purely
    /// because embedding is unavailable — it downgrades (spec §7).
    pub async fn search(&self, namespace: &str, query: &str, limit: usize) -> Result<SearchResults> {
        self.touch();
        if limit == 0 {
            return Ok(SearchResults { count: 0, results: Vec::new(), partial: false });
        }

        match self.embedder.embed(query) {
            Ok(query_vector) => {
                let handle = self.index_handle(namespace)?;
                let hits = {
                    let idx = handle.lock().await;
                    if idx.is_empty() {
                        None
                    } else {
                        Some(idx.search(&query_vector, limit)?)
                    }
                };
                if let Some(hits) = hits {
                    let mut results = Vec::with_capacity(hits.len());
                    for hit in hits {
                        if let Ok(record) = self.store.get(namespace, &hit.id).await {
                            results.push(SearchHit {
                                id: record.id,
                                content: record.content,
                                metadata: record.metadata,
                                relevance: hit.relevance,
                                mode: SearchMode::Vector,
                            });
                        }
                    }
                    return Ok(SearchResults { count: results.len(), results, partial: false });
                }
            }
            Err(err) => {
                tracing::warn!(%err, namespace, "embedding unavailable, falling back to lexical search");
            }
        }

        let hits = self.store.lexical_search(namespace, query, limit).await?;
        let results: Vec<SearchHit> = hits
            .into_iter()
            .map(|h| SearchHit {
                id: h.record.id,
                content: h.record.content,
                metadata: h.record.metadata,
                relevance: h.score,
                mode: SearchMode::Lexical,
            })
            .collect();
        Ok(SearchResults { count: results.len(), results, partial: false })
    }

    /// Aggregate the best-matching context across the default long-lived
    /// namespaces, useful for assembling a prompt prelude.
    pub async fn get_relevant_context(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let mut combined = Vec::new();
        for namespace in ["longterm", "projects", "conversations"] {
            if let Ok(results) = self.search(namespace, query, limit).await {
                combined.extend(results.results);
            }
        }
        combined.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal));
        combined.truncate(limit);
        Ok(combined)
    }

    /// Add a structured memory with an explicit category, returning its
    /// parseable `<category>-<epoch>-<rand>` id.
    pub async fn add_memory(&self, content: &str, category: Category, importance: Option<u8>, tags: Vec<String>) -> Result<String> {
        let now = Utc::now();
        let rand = format!("{:06x}", rand_u32());
        let id = StructuredId::new(category, now.timestamp(), rand).format();

        let mut metadata = Metadata::new();
        metadata.insert("category".into(), MetadataValue::String(category.to_string()));
        metadata.insert(
            "importance".into(),
            MetadataValue::Number(importance.unwrap_or_else(|| category.default_importance()) as f64),
        );
        metadata.insert(
            "tags".into(),
            MetadataValue::List(tags.into_iter().map(MetadataValue::String).collect()),
        );

        self.put(LONGTERM_NAMESPACE, &id, content, metadata).await?;
        Ok(id)
    }

    /// Add a structured memory whose category and importance are assigned by
    /// the deterministic classifier (C5).
    pub async fn add_auto_categorized(&self, content: &str, tags: Vec<String>) -> Result<String> {
        let (category, importance) = categorize::classify(content);
        self.add_memory(content, category, Some(importance), tags).await
    }

    pub async fn get_memory(&self, id: &str) -> Result<Record> {
        if StructuredId::parse(id).is_none() {
            return Err(EngramError::InvalidArgument(format!("not a structured memory id: {id}")));
        }
        self.get(LONGTERM_NAMESPACE, id).await
    }

    /// Search structured memories, optionally filtered by category, sorted
    /// by the requested field.
    pub async fn search_memories(&self, query: &str, limit: usize, category: Option<Category>, sort_by: SortBy) -> Result<Vec<SearchHit>> {
        let mut results = self.search(LONGTERM_NAMESPACE, query, limit.max(1) * 4).await?.results;
        if let Some(category) = category {
            results.retain(|hit| hit.metadata.get("category").and_then(MetadataValue::as_str) == Some(category.as_str()));
        }
        match sort_by {
            SortBy::Relevance => results.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal)),
            SortBy::Importance => results.sort_by(|a, b| {
                let ia = a.metadata.get("importance").and_then(MetadataValue::as_f64).unwrap_or(0.0);
                let ib = b.metadata.get("importance").and_then(MetadataValue::as_f64).unwrap_or(0.0);
                ib.partial_cmp(&ia).unwrap_or(std::cmp::Ordering::Equal)
            }),
            SortBy::Recency => results.sort_by(|a, b| {
                let ta = a.metadata.get("timestamp").and_then(MetadataValue::as_str).unwrap_or_default();
                let tb = b.metadata.get("timestamp").and_then(MetadataValue::as_str).unwrap_or_default();
                tb.cmp(ta)
            }),
        }
        results.truncate(limit);
        Ok(results)
    }

    /// Append an entry to this client's session log (C10).
    pub async fn write_session(&self, content: impl Into<String>) -> Result<()> {
        self.session.write(content).await
    }

    /// Load this client's session log, newest-first (C10).
    pub async fn load_session(&self, limit: usize) -> Vec<crate::session::SessionEntry> {
        self.session.load(limit).await
    }

    /// Start a new latent-space thought chain (C9).
    pub async fn initialize_thought(&self, thought_id: &str, namespace: &str, content: &str) -> Result<()> {
        self.latent.initialize(thought_id, namespace, content).await
    }

    /// Append a revision to a thought chain (C9).
    pub async fn refine_thought(&self, thought_id: &str, content: &str, threshold: f32) -> Result<(f32, bool)> {
        self.latent.refine(thought_id, content, threshold).await
    }

    /// Mark a thought chain finalized (C9).
    pub async fn finalize_thought(&self, thought_id: &str) -> Result<()> {
        self.latent.finalize(thought_id).await
    }

    /// Trace a thought chain, trimmed to first+final unless requested (C9).
    pub async fn trace_thought(&self, thought_id: &str, include_iterations: bool) -> Result<ThoughtView> {
        self.latent.trace(thought_id, include_iterations).await
    }

    /// Delete a thought chain (C9).
    pub async fn delete_thought(&self, thought_id: &str) -> Result<()> {
        self.latent.delete(thought_id).await
    }

    /// Delete every thought chain in `namespace` (C9).
    pub async fn clear_thoughts(&self, namespace: &str) -> Result<()> {
        self.latent.clear(namespace).await
    }

    pub(crate) fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub(crate) fn store(&self) -> &NamespaceStore {
        &self.store
    }

    pub(crate) fn crypto(&self) -> &Arc<CryptoBox> {
        &self.crypto
    }

    pub(crate) fn compartments_path(&self) -> &PathBuf {
        &self.compartments_path
    }
}

fn rand_u32() -> u32 {
    use rand::RngCore;
    rand::thread_rng().next_u32()
}

fn generate_memory_id() -> String {
    format!("mem-{}-{:06x}", Utc::now().timestamp_millis(), rand_u32())
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::MemoryService;
    use crate::config::Config;
    use crate::crypto::CryptoBox;
    use crate::embedding::{Embedder, TfIdfEmbedder};
    use std::sync::Arc;

    pub(crate) async fn make_service(dir: &std::path::Path, client_id: &str) -> MemoryService {
        let config = Config {
            data_dir: dir.to_path_buf(),
            ..Config::default()
        };
        let embedder: Arc<dyn Embedder> = Arc::new(TfIdfEmbedder::new(32));
        let crypto = Arc::new(CryptoBox::open(&dir.join("keys"), client_id).unwrap());
        MemoryService::open(&config, client_id, embedder, crypto).await.unwrap()
    }
}
