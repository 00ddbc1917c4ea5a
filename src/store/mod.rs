//! C3: per-(client, namespace) record store.
//!
//! Atomic persistence is grounded on the `ShortTermMemory::save` idiom found
//! in the corpus (`other_examples/.../aagt-core-src-agent-memory.rs`):
//! serialize to JSON, write to a `.tmp` sibling, then `fs::rename` over the
//! real path so a reader never observes a half-written file.

use crate::error::{EngramError, Result};
use crate::types::{is_known_namespace, Record};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory contents of one namespace, plus the path it round-trips to.
#[derive(Default)]
struct Namespace {
    records: Vec<Record>,
}

/// One client's collection of namespaces, persisted to
/// `<data_dir>/<client_id>-memories.json`.
pub struct NamespaceStore {
    client_id: String,
    path: PathBuf,
    namespaces: DashMap<String, Arc<RwLock<Namespace>>>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Default)]
struct OnDisk {
    namespaces: std::collections::HashMap<String, Vec<Record>>,
}

/// A single lexical search hit with its deterministic score.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub record: Record,
    pub score: f32,
}

impl NamespaceStore {
    pub async fn open(data_dir: &Path, client_id: &str) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(format!("{client_id}-memories.json"));
        let namespaces = DashMap::new();

        if path.exists() {
            let raw = tokio::fs::read_to_string(&path).await?;
            let on_disk: OnDisk = serde_json::from_str(&raw)?;
            for (ns, records) in on_disk.namespaces {
                namespaces.insert(ns, Arc::new(RwLock::new(Namespace { records })));
            }
        }

        Ok(Self {
            client_id: client_id.to_string(),
            path,
            namespaces,
        })
    }

    fn namespace_handle(&self, namespace: &str) -> Arc<RwLock<Namespace>> {
        self.namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Namespace::default())))
            .clone()
    }

    fn check_namespace(&self, namespace: &str) -> Result<()> {
        if is_known_namespace(namespace) || self.namespaces.contains_key(namespace) {
            Ok(())
        } else {
            Err(EngramError::UnknownNamespace(namespace.to_string()))
        }
    }

    pub async fn add(&self, namespace: &str, record: Record) -> Result<()> {
        self.check_namespace(namespace)?;
        if record.content.is_empty() {
            return Err(EngramError::InvalidArgument("content must not be empty".into()));
        }
        let handle = self.namespace_handle(namespace);
        let mut guard = handle.write().await;
        guard.records.retain(|r| r.id != record.id);
        guard.records.push(record);
        drop(guard);
        self.flush().await
    }

    pub async fn get(&self, namespace: &str, id: &str) -> Result<Record> {
        self.check_namespace(namespace)?;
        let handle = self.namespace_handle(namespace);
        let guard = handle.read().await;
        guard
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| EngramError::NotFound(id.to_string()))
    }

    pub async fn delete(&self, namespace: &str, id: &str) -> Result<()> {
        self.check_namespace(namespace)?;
        let handle = self.namespace_handle(namespace);
        let mut guard = handle.write().await;
        let before = guard.records.len();
        guard.records.retain(|r| r.id != id);
        if guard.records.len() == before {
            return Err(EngramError::NotFound(id.to_string()));
        }
        drop(guard);
        self.flush().await
    }

    /// Return up to `limit` records starting at `offset`, in storage order.
    pub async fn list(&self, namespace: &str, offset: usize, limit: usize) -> Result<Vec<Record>> {
        self.check_namespace(namespace)?;
        let handle = self.namespace_handle(namespace);
        let guard = handle.read().await;
        Ok(guard.records.iter().skip(offset).take(limit).cloned().collect())
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.iter().map(|e| e.key().clone()).collect()
    }

    /// Remove every record in `namespace`, returning how many were removed.
    pub async fn clear(&self, namespace: &str) -> Result<usize> {
        self.check_namespace(namespace)?;
        let handle = self.namespace_handle(namespace);
        let removed = {
            let mut guard = handle.write().await;
            let removed = guard.records.len();
            guard.records.clear();
            removed
        };
        self.flush().await?;
        Ok(removed)
    }

    /// Deterministic token-overlap lexical search: score is the fraction of
    /// query tokens present in the record's content, normalized by content
    /// length; ties break by timestamp descending, then id ascending.
    pub async fn lexical_search(&self, namespace: &str, query: &str, limit: usize) -> Result<Vec<LexicalHit>> {
        self.check_namespace(namespace)?;
        let handle = self.namespace_handle(namespace);
        let guard = handle.read().await;

        let query_tokens: Vec<String> = tokenize(query);
        if query_tokens.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<LexicalHit> = guard
            .records
            .iter()
            .filter_map(|record| {
                let content_tokens = tokenize(&record.content);
                if content_tokens.is_empty() {
                    return None;
                }
                let overlap = query_tokens.iter().filter(|qt| content_tokens.contains(qt)).count();
                if overlap == 0 {
                    return None;
                }
                let score = overlap as f32 / content_tokens.len() as f32;
                Some(LexicalHit {
                    record: record.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.record.timestamp().cmp(&a.record.timestamp()))
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    pub async fn flush(&self) -> Result<()> {
        let mut on_disk = OnDisk::default();
        let handles: Vec<(String, Arc<RwLock<Namespace>>)> = self.namespaces.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        for (name, handle) in handles {
            let guard = handle.read().await;
            on_disk.namespaces.insert(name, guard.records.clone());
        }
        let json = serde_json::to_string_pretty(&on_disk)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Metadata;
    use tempfile::tempdir;

    fn record(id: &str, content: &str) -> Record {
        Record {
            id: id.to_string(),
            content: content.to_string(),
            metadata: Metadata::new(),
            vector: None,
        }
    }

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = NamespaceStore::open(dir.path(), "alice").await.unwrap();
        store.add("conversations", record("m1", "hello there")).await.unwrap();
        let got = store.get("conversations", "m1").await.unwrap();
        assert_eq!(got.content, "hello there");
    }

    #[tokio::test]
    async fn unknown_namespace_is_rejected() {
        let dir = tempdir().unwrap();
        let store = NamespaceStore::open(dir.path(), "alice").await.unwrap();
        let err = store.add("bogus", record("m1", "x")).await.unwrap_err();
        assert!(matches!(err, EngramError::UnknownNamespace(_)));
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let dir = tempdir().unwrap();
        let store = NamespaceStore::open(dir.path(), "alice").await.unwrap();
        let err = store.add("conversations", record("m1", "")).await.unwrap_err();
        assert!(matches!(err, EngramError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn lexical_search_ranks_by_overlap() {
        let dir = tempdir().unwrap();
        let store = NamespaceStore::open(dir.path(), "alice").await.unwrap();
        store.add("longterm", record("m1", "cats and dogs are pets")).await.unwrap();
        store.add("longterm", record("m2", "cats")).await.unwrap();
        let hits = store.lexical_search("longterm", "cats", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.id, "m2");
    }

    #[tokio::test]
    async fn lexical_search_zero_limit_is_empty() {
        let dir = tempdir().unwrap();
        let store = NamespaceStore::open(dir.path(), "alice").await.unwrap();
        store.add("longterm", record("m1", "cats")).await.unwrap();
        let hits = store.lexical_search("longterm", "cats", 0).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn persist_then_reload_preserves_records() {
        let dir = tempdir().unwrap();
        {
            let store = NamespaceStore::open(dir.path(), "alice").await.unwrap();
            store.add("projects", record("m1", "engram design notes")).await.unwrap();
        }
        let reopened = NamespaceStore::open(dir.path(), "alice").await.unwrap();
        let got = reopened.get("projects", "m1").await.unwrap();
        assert_eq!(got.content, "engram design notes");
    }

    #[tokio::test]
    async fn delete_missing_id_is_not_found() {
        let dir = tempdir().unwrap();
        let store = NamespaceStore::open(dir.path(), "alice").await.unwrap();
        let err = store.delete("conversations", "nope").await.unwrap_err();
        assert!(matches!(err, EngramError::NotFound(_)));
    }
}
