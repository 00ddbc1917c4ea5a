//! C4: flat L2 vector index, one per (client, namespace).
//!
//! Per the §9 "collapse to arena-with-index" redesign guidance this holds
//! only `slot <-> id` maps, never back-pointers into C3's records — C3 stays
//! the sole owner of record content and this index can always be thrown away
//! and rebuilt from it.

use crate::error::{EngramError, Result};
use crate::types::MemoryId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexMeta {
    dimensions: usize,
    /// `slots[i]` is the id stored in vector slot `i`.
    slots: Vec<MemoryId>,
}

/// A single vector search hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: MemoryId,
    /// `1 / (1 + l2_distance)`, in `(0, 1]`.
    pub relevance: f32,
}

/// Flat L2 index for one (client, namespace) pair.
pub struct VectorIndex {
    idx_path: PathBuf,
    meta_path: PathBuf,
    dimensions: usize,
    vectors: Vec<f32>, // row-major, len == slots.len() * dimensions
    slots: Vec<MemoryId>,
}

impl VectorIndex {
    /// Open (or create empty) the index at `<dir>/<client>-<namespace>.{idx,meta.json}`.
    pub fn open(dir: &Path, client_id: &str, namespace: &str, dimensions: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let stem = format!("{client_id}-{namespace}");
        let idx_path = dir.join(format!("{stem}.idx"));
        let meta_path = dir.join(format!("{stem}.meta.json"));

        if idx_path.exists() && meta_path.exists() {
            let meta_raw = std::fs::read_to_string(&meta_path)?;
            let meta: IndexMeta = serde_json::from_str(&meta_raw)?;
            if meta.dimensions == dimensions {
                let raw = std::fs::read(&idx_path)?;
                let vectors = bytes_to_f32(&raw);
                if vectors.len() == meta.slots.len() * dimensions {
                    return Ok(Self {
                        idx_path,
                        meta_path,
                        dimensions,
                        vectors,
                        slots: meta.slots,
                    });
                }
            }
            // Dimension mismatch or corrupt file: fall through to an empty
            // index; the caller is expected to rebuild_from(C3) afterwards.
        }

        Ok(Self {
            idx_path,
            meta_path,
            dimensions,
            vectors: Vec::new(),
            slots: Vec::new(),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Insert or replace the vector for `id`.
    pub fn add(&mut self, id: &MemoryId, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(EngramError::InvalidArgument(format!(
                "expected {}-dim vector, got {}",
                self.dimensions,
                vector.len()
            )));
        }
        if let Some(slot) = self.slots.iter().position(|s| s == id) {
            let start = slot * self.dimensions;
            self.vectors[start..start + self.dimensions].copy_from_slice(vector);
        } else {
            self.slots.push(id.clone());
            self.vectors.extend_from_slice(vector);
        }
        Ok(())
    }

    pub fn remove(&mut self, id: &MemoryId) -> bool {
        if let Some(slot) = self.slots.iter().position(|s| s == id) {
            let start = slot * self.dimensions;
            self.vectors.drain(start..start + self.dimensions);
            self.slots.remove(slot);
            true
        } else {
            false
        }
    }

    /// Brute-force nearest-neighbor search by L2 distance, returning the top
    /// `limit` hits scored as `1 / (1 + distance)` (spec §4.4).
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<VectorHit>> {
        if query.len() != self.dimensions {
            return Err(EngramError::InvalidArgument(format!(
                "expected {}-dim query, got {}",
                self.dimensions,
                query.len()
            )));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<VectorHit> = self
            .slots
            .iter()
            .enumerate()
            .map(|(slot, id)| {
                let start = slot * self.dimensions;
                let row = &self.vectors[start..start + self.dimensions];
                let distance = l2_distance(row, query);
                VectorHit {
                    id: id.clone(),
                    relevance: 1.0 / (1.0 + distance),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    pub fn persist(&self) -> Result<()> {
        let meta = IndexMeta {
            dimensions: self.dimensions,
            slots: self.slots.clone(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)?;
        let meta_tmp = self.meta_path.with_extension("meta.json.tmp");
        std::fs::write(&meta_tmp, meta_json)?;
        std::fs::rename(&meta_tmp, &self.meta_path)?;

        let bytes = f32_to_bytes(&self.vectors);
        let idx_tmp = self.idx_path.with_extension("idx.tmp");
        std::fs::write(&idx_tmp, bytes)?;
        std::fs::rename(&idx_tmp, &self.idx_path)?;
        Ok(())
    }

    /// Rebuild the index from scratch out of C3's current records, discarding
    /// whatever was previously on disk. Used on dimension mismatch or when
    /// the on-disk index is missing/corrupt.
    pub fn rebuild_from(&mut self, records: &[(MemoryId, Vec<f32>)]) -> Result<()> {
        self.slots.clear();
        self.vectors.clear();
        for (id, vector) in records {
            self.add(id, vector)?;
        }
        self.persist()
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

fn f32_to_bytes(vectors: &[f32]) -> Vec<u8> {
    vectors.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn add_then_search_finds_nearest() {
        let dir = tempdir().unwrap();
        let mut idx = VectorIndex::open(dir.path(), "alice", "longterm", 3).unwrap();
        idx.add(&"a".to_string(), &[1.0, 0.0, 0.0]).unwrap();
        idx.add(&"b".to_string(), &[0.0, 1.0, 0.0]).unwrap();

        let hits = idx.search(&[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].relevance > 0.9);
    }

    #[test]
    fn search_limit_zero_is_empty() {
        let dir = tempdir().unwrap();
        let mut idx = VectorIndex::open(dir.path(), "alice", "longterm", 2).unwrap();
        idx.add(&"a".to_string(), &[1.0, 0.0]).unwrap();
        assert!(idx.search(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn wrong_dimension_vector_is_rejected() {
        let dir = tempdir().unwrap();
        let mut idx = VectorIndex::open(dir.path(), "alice", "longterm", 3).unwrap();
        let err = idx.add(&"a".to_string(), &[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, EngramError::InvalidArgument(_)));
    }

    #[test]
    fn persist_then_reload_preserves_vectors() {
        let dir = tempdir().unwrap();
        {
            let mut idx = VectorIndex::open(dir.path(), "bob", "projects", 2).unwrap();
            idx.add(&"x".to_string(), &[3.0, 4.0]).unwrap();
            idx.persist().unwrap();
        }
        let reopened = VectorIndex::open(dir.path(), "bob", "projects", 2).unwrap();
        assert_eq!(reopened.len(), 1);
        let hits = reopened.search(&[3.0, 4.0], 1).unwrap();
        assert_eq!(hits[0].id, "x");
    }

    #[test]
    fn dimension_mismatch_on_reload_yields_empty_index() {
        let dir = tempdir().unwrap();
        {
            let mut idx = VectorIndex::open(dir.path(), "carol", "projects", 2).unwrap();
            idx.add(&"x".to_string(), &[1.0, 2.0]).unwrap();
            idx.persist().unwrap();
        }
        let reopened = VectorIndex::open(dir.path(), "carol", "projects", 5).unwrap();
        assert!(reopened.is_empty());
        assert_eq!(reopened.dimensions(), 5);
    }

    #[test]
    fn remove_then_search_excludes_removed_id() {
        let dir = tempdir().unwrap();
        let mut idx = VectorIndex::open(dir.path(), "dave", "longterm", 2).unwrap();
        idx.add(&"a".to_string(), &[1.0, 0.0]).unwrap();
        idx.add(&"b".to_string(), &[0.0, 1.0]).unwrap();
        assert!(idx.remove(&"a".to_string()));
        let hits = idx.search(&[1.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }
}
