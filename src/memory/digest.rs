//! Markdown digest of a client's structured memories (spec §4.6).

use super::MemoryService;
use crate::error::Result;
use crate::types::{Category, MetadataValue, Record};
use std::fmt::Write as _;

/// A rendered digest: deterministic markdown grouping memories by category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub markdown: String,
}

/// Private memories carry no `category` metadata; they're grouped under
/// `Category::Private` by their `private` flag instead.
fn record_category(record: &Record) -> Option<Category> {
    if record.metadata.get("private").and_then(MetadataValue::as_bool).unwrap_or(false) {
        Some(Category::Private)
    } else {
        record.category()
    }
}

fn importance_of(record: &Record) -> f64 {
    record
        .metadata
        .get("importance")
        .and_then(MetadataValue::as_f64)
        .unwrap_or_else(|| record_category(record).map(|c| c.default_importance() as f64).unwrap_or(0.0))
}

impl MemoryService {
    /// Render the `max_memories` highest-importance (ties broken by
    /// recency, then id) structured memories, grouped by category and
    /// prefixed with `★` repeated `importance` times. When `include_private`
    /// is set, decrypted private memories are folded in under the `Private`
    /// category. Deterministic given the same underlying records.
    pub async fn get_memory_digest(&self, max_memories: usize, include_private: bool) -> Result<Digest> {
        let mut records = self.store().list("longterm", 0, usize::MAX).await.unwrap_or_default();

        if include_private {
            for (id, metadata) in self.list_private().await.unwrap_or_default() {
                if let Ok(content) = self.get_private(&id).await {
                    records.push(Record { id, content, metadata, vector: None });
                }
            }
        }

        records.sort_by(|a, b| {
            importance_of(b)
                .partial_cmp(&importance_of(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.timestamp().cmp(&a.timestamp()))
                .then_with(|| a.id.cmp(&b.id))
        });
        records.truncate(max_memories);

        let mut markdown = String::from("# Memory Digest\n");
        for category in Category::all() {
            let in_category: Vec<&Record> = records.iter().filter(|r| record_category(r) == Some(*category)).collect();
            if in_category.is_empty() {
                continue;
            }

            let _ = writeln!(markdown, "\n## {}", titlecase(category.as_str()));
            for record in in_category {
                let stars = "★".repeat(importance_of(record) as usize);
                let _ = writeln!(markdown, "- {stars} {}", record.content);
            }
        }

        Ok(Digest { markdown })
    }
}

fn titlecase(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
