//! C9: latent-space store — append-only iterative thought chains with a
//! Jaccard-similarity convergence check.
//!
//! Threshold (0.85) and the `trace(include_iterations=false)` first+final-
//! only behavior are pinned from `tests/test_latent_space.py` /
//! `examples/latent_space_example.py` in the original Python project.

use crate::error::{EngramError, Result};
use crate::types::{Iteration, Thought, ThoughtView};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

pub const DEFAULT_CONVERGENCE_THRESHOLD: f32 = 0.85;

/// Per-client store of thought chains, one JSON file per thought under
/// `latent/<namespace>/<thought_id>.json`.
pub struct LatentSpaceStore {
    root: PathBuf,
    thoughts: DashMap<String, std::sync::Arc<RwLock<Thought>>>,
}

fn jaccard_similarity(a: &str, b: &str) -> f32 {
    let tokens_a: HashSet<String> = tokenize(a);
    let tokens_b: HashSet<String> = tokenize(b);
    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 1.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

impl LatentSpaceStore {
    pub async fn open(root: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(root).await?;
        let thoughts = DashMap::new();

        let mut entries = tokio::fs::read_dir(root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().is_dir() {
                let namespace_dir = entry.path();
                let mut files = tokio::fs::read_dir(&namespace_dir).await?;
                while let Some(file) = files.next_entry().await? {
                    if file.path().extension().and_then(|e| e.to_str()) == Some("json") {
                        let raw = tokio::fs::read_to_string(file.path()).await?;
                        let thought: Thought = serde_json::from_str(&raw)?;
                        thoughts.insert(thought.thought_id.clone(), std::sync::Arc::new(RwLock::new(thought)));
                    }
                }
            }
        }

        Ok(Self { root: root.to_path_buf(), thoughts })
    }

    fn path_for(&self, namespace: &str, thought_id: &str) -> PathBuf {
        self.root.join(namespace).join(format!("{thought_id}.json"))
    }

    async fn persist(&self, thought: &Thought) -> Result<()> {
        let dir = self.root.join(&thought.namespace);
        tokio::fs::create_dir_all(&dir).await?;
        let path = self.path_for(&thought.namespace, &thought.thought_id);
        let json = serde_json::to_string_pretty(thought)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Start a new thought chain with its first iteration.
    pub async fn initialize(&self, thought_id: &str, namespace: &str, content: &str) -> Result<()> {
        if self.thoughts.contains_key(thought_id) {
            return Err(EngramError::InvalidArgument(format!("thought {thought_id} already exists")));
        }
        let thought = Thought {
            thought_id: thought_id.to_string(),
            namespace: namespace.to_string(),
            iterations: vec![Iteration {
                content: content.to_string(),
                timestamp: Utc::now(),
                confidence: None,
                is_final: false,
            }],
            finalized: false,
        };
        self.persist(&thought).await?;
        self.thoughts.insert(thought_id.to_string(), std::sync::Arc::new(RwLock::new(thought)));
        Ok(())
    }

    fn handle(&self, thought_id: &str) -> Result<std::sync::Arc<RwLock<Thought>>> {
        self.thoughts
            .get(thought_id)
            .map(|e| e.clone())
            .ok_or_else(|| EngramError::NotFound(thought_id.to_string()))
    }

    /// Append a revision, returning the Jaccard similarity against the prior
    /// iteration and whether it meets the convergence threshold.
    pub async fn refine(&self, thought_id: &str, content: &str, threshold: f32) -> Result<(f32, bool)> {
        let handle = self.handle(thought_id)?;
        let mut guard = handle.write().await;
        if guard.finalized {
            return Err(EngramError::InvalidArgument(format!("thought {thought_id} is already finalized")));
        }
        let similarity = guard
            .iterations
            .last()
            .map(|prev| jaccard_similarity(&prev.content, content))
            .unwrap_or(0.0);
        guard.iterations.push(Iteration {
            content: content.to_string(),
            timestamp: Utc::now(),
            confidence: Some(similarity),
            is_final: false,
        });
        let thought_snapshot = guard.clone_for_persist();
        drop(guard);
        self.persist(&thought_snapshot).await?;
        Ok((similarity, similarity >= threshold))
    }

    /// Mark the chain finalized, tagging the last iteration.
    pub async fn finalize(&self, thought_id: &str) -> Result<()> {
        let handle = self.handle(thought_id)?;
        let mut guard = handle.write().await;
        if let Some(last) = guard.iterations.last_mut() {
            last.is_final = true;
        }
        guard.finalized = true;
        let thought_snapshot = guard.clone_for_persist();
        drop(guard);
        self.persist(&thought_snapshot).await
    }

    /// Return the chain, trimmed to first+final iterations unless
    /// `include_iterations` is set.
    pub async fn trace(&self, thought_id: &str, include_iterations: bool) -> Result<ThoughtView> {
        let handle = self.handle(thought_id)?;
        let guard = handle.read().await;
        if include_iterations {
            return Ok(ThoughtView::Full(guard.clone_for_persist()));
        }
        let first = guard.iterations.first().cloned();
        let last = guard
            .iterations
            .last()
            .cloned()
            .ok_or_else(|| EngramError::internal(format!("thought {thought_id} has no iterations")))?;
        Ok(ThoughtView::Trimmed {
            thought_id: guard.thought_id.clone(),
            namespace: guard.namespace.clone(),
            first: if guard.iterations.len() > 1 { first } else { None },
            last,
            finalized: guard.finalized,
        })
    }

    pub async fn delete(&self, thought_id: &str) -> Result<()> {
        let thought = self.handle(thought_id)?;
        let namespace = thought.read().await.namespace.clone();
        self.thoughts.remove(thought_id);
        let path = self.path_for(&namespace, thought_id);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    pub async fn clear(&self, namespace: &str) -> Result<()> {
        let ids: Vec<String> = self
            .thoughts
            .iter()
            .filter(|e| e.value().try_read().map(|t| t.namespace == namespace).unwrap_or(false))
            .map(|e| e.key().clone())
            .collect();
        for id in ids {
            self.delete(&id).await?;
        }
        Ok(())
    }
}

impl Thought {
    fn clone_for_persist(&self) -> Thought {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn refine_detects_convergence() {
        let dir = tempdir().unwrap();
        let store = LatentSpaceStore::open(dir.path()).await.unwrap();
        store.initialize("t1", "thinking", "the cat sat on the mat").await.unwrap();
        let (sim, converged) = store
            .refine("t1", "the cat sat on the mat today", DEFAULT_CONVERGENCE_THRESHOLD)
            .await
            .unwrap();
        assert!(sim > 0.5);
        assert!(!converged || sim >= DEFAULT_CONVERGENCE_THRESHOLD);
    }

    #[tokio::test]
    async fn refine_on_identical_content_fully_converges() {
        let dir = tempdir().unwrap();
        let store = LatentSpaceStore::open(dir.path()).await.unwrap();
        store.initialize("t1", "thinking", "same content here").await.unwrap();
        let (sim, converged) = store.refine("t1", "same content here", DEFAULT_CONVERGENCE_THRESHOLD).await.unwrap();
        assert_eq!(sim, 1.0);
        assert!(converged);
    }

    #[tokio::test]
    async fn trace_without_iterations_returns_first_and_final_only() {
        let dir = tempdir().unwrap();
        let store = LatentSpaceStore::open(dir.path()).await.unwrap();
        store.initialize("t1", "thinking", "v1").await.unwrap();
        store.refine("t1", "v2", DEFAULT_CONVERGENCE_THRESHOLD).await.unwrap();
        store.refine("t1", "v3", DEFAULT_CONVERGENCE_THRESHOLD).await.unwrap();
        store.finalize("t1").await.unwrap();

        match store.trace("t1", false).await.unwrap() {
            ThoughtView::Trimmed { first, last, finalized, .. } => {
                assert!(first.is_some());
                assert_eq!(last.content, "v3");
                assert!(finalized);
            }
            _ => panic!("expected trimmed view"),
        }
    }

    #[tokio::test]
    async fn trace_with_iterations_returns_full_chain() {
        let dir = tempdir().unwrap();
        let store = LatentSpaceStore::open(dir.path()).await.unwrap();
        store.initialize("t1", "thinking", "v1").await.unwrap();
        store.refine("t1", "v2", DEFAULT_CONVERGENCE_THRESHOLD).await.unwrap();

        match store.trace("t1", true).await.unwrap() {
            ThoughtView::Full(t) => assert_eq!(t.iterations.len(), 2),
            _ => panic!("expected full view"),
        }
    }

    #[tokio::test]
    async fn refine_after_finalize_is_rejected() {
        let dir = tempdir().unwrap();
        let store = LatentSpaceStore::open(dir.path()).await.unwrap();
        store.initialize("t1", "thinking", "v1").await.unwrap();
        store.finalize("t1").await.unwrap();
        let err = store.refine("t1", "v2", DEFAULT_CONVERGENCE_THRESHOLD).await.unwrap_err();
        assert!(matches!(err, EngramError::InvalidArgument(_)));
    }
}
