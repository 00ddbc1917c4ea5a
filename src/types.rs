//! Core data types for Engram's memory engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque client identifier.
pub type ClientId = String;

/// Opaque, per-(client, namespace) unique memory identifier.
pub type MemoryId = String;

/// A tagged-union value for free-form metadata (spec §9: "Dynamically-typed
/// content blobs"). Persisted form is plain JSON; in-memory form is this enum
/// so callers never have to match on `serde_json::Value` directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<MetadataValue>),
    Map(HashMap<String, MetadataValue>),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MetadataValue]> {
        match self {
            MetadataValue::List(l) => Some(l),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

impl From<f64> for MetadataValue {
    fn from(n: f64) -> Self {
        MetadataValue::Number(n)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// Metadata map attached to every memory record.
pub type Metadata = HashMap<String, MetadataValue>;

/// A memory record as owned by the namespace store (C3).
///
/// `id` is immutable once assigned; mutation either writes a new record or
/// updates `metadata` in place (spec §3 global invariant). `vector` is only
/// present when the vector index (C4) is active for this (client, namespace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: MemoryId,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

impl Record {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .get("timestamp")
            .and_then(MetadataValue::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn client_id(&self) -> Option<&str> {
        self.metadata.get("client_id").and_then(MetadataValue::as_str)
    }

    pub fn category(&self) -> Option<Category> {
        self.metadata
            .get("category")
            .and_then(MetadataValue::as_str)
            .and_then(|s| s.parse().ok())
    }

    pub fn importance(&self) -> Option<u8> {
        self.metadata
            .get("importance")
            .and_then(MetadataValue::as_f64)
            .map(|n| n as u8)
    }

    pub fn tags(&self) -> Vec<String> {
        self.metadata
            .get("tags")
            .and_then(MetadataValue::as_list)
            .map(|l| l.iter().filter_map(MetadataValue::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// One turn of a conversation, as passed to `MemoryService::add_conversation`
/// before it is joined into a single `role: content` transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

/// The default, always-present namespace set (spec §3). Dynamic
/// `compartment-<id>` namespaces are created one per compartment.
pub const DEFAULT_NAMESPACES: &[&str] = &[
    "conversations",
    "thinking",
    "longterm",
    "projects",
    "session",
    "compartments",
];

/// Capacity bound (ring size) for the `session` namespace.
pub const SESSION_NAMESPACE_CAPACITY: usize = 200;

pub fn is_compartment_namespace(namespace: &str) -> bool {
    namespace.starts_with("compartment-")
}

pub fn is_known_namespace(namespace: &str) -> bool {
    DEFAULT_NAMESPACES.contains(&namespace) || is_compartment_namespace(namespace)
}

/// Structured-memory category (C5), each with a default importance (1-5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Personal,
    Projects,
    Facts,
    Preferences,
    Session,
    Private,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Personal => "personal",
            Category::Projects => "projects",
            Category::Facts => "facts",
            Category::Preferences => "preferences",
            Category::Session => "session",
            Category::Private => "private",
        }
    }

    /// Default importance assigned by the categorizer (C5) for this category.
    pub fn default_importance(&self) -> u8 {
        match self {
            Category::Personal => 5,
            Category::Preferences => 4,
            Category::Projects => 4,
            Category::Facts => 3,
            Category::Session => 2,
            Category::Private => 5,
        }
    }

    pub fn all() -> &'static [Category] {
        &[
            Category::Personal,
            Category::Projects,
            Category::Facts,
            Category::Preferences,
            Category::Session,
            Category::Private,
        ]
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "personal" => Ok(Category::Personal),
            "projects" => Ok(Category::Projects),
            "facts" => Ok(Category::Facts),
            "preferences" => Ok(Category::Preferences),
            "session" => Ok(Category::Session),
            "private" => Ok(Category::Private),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A structured-memory id of the shape `<category>-<epoch>-<rand>`, pinned by
/// the original Python test suite (`tests/test_structured_memory.py`) and
/// required as a first-class parseable operation (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredId {
    pub category: Category,
    pub epoch_seconds: i64,
    pub rand: String,
}

impl StructuredId {
    pub fn new(category: Category, epoch_seconds: i64, rand: String) -> Self {
        Self {
            category,
            epoch_seconds,
            rand,
        }
    }

    pub fn format(&self) -> String {
        format!("{}-{}-{}", self.category.as_str(), self.epoch_seconds, self.rand)
    }

    pub fn parse(id: &str) -> Option<Self> {
        let mut parts = id.rsplitn(3, '-');
        let rand = parts.next()?.to_string();
        let epoch_seconds: i64 = parts.next()?.parse().ok()?;
        let category_str = parts.next()?;
        if parts.next().is_some() {
            return None; // category itself must not contain '-'
        }
        let category: Category = category_str.parse().ok()?;
        Some(Self {
            category,
            epoch_seconds,
            rand,
        })
    }
}

/// Search mode reported on every search result (spec §3 glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Lexical,
}

/// A single search hit, as returned from `MemoryService::search` (C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: MemoryId,
    pub content: String,
    pub metadata: Metadata,
    pub relevance: f32,
    pub mode: SearchMode,
}

/// Result envelope for `MemoryService::search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    pub count: usize,
    pub results: Vec<SearchHit>,
    /// True when fewer results were returned than requested due to a
    /// recoverable degradation rather than an empty match set (spec §7).
    #[serde(default)]
    pub partial: bool,
}

/// Fields by which `search_memories` may sort (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    Importance,
    Recency,
    Relevance,
}

/// A compartment: a named, lifecycle-managed logical bucket (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compartment {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Compartment {
    pub fn namespace(&self) -> String {
        format!("compartment-{}", self.id)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

/// Summary view of a compartment (spec §4.6 `list()`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompartmentSummary {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Message type enum (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Reply,
    Info,
    Broadcast,
}

/// Message delivery status (spec §4.7 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Delivered,
    Processed,
    Expired,
}

/// Inter-client message (C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub sender_id: ClientId,
    pub recipient_id: ClientId,
    pub thread_id: Option<String>,
    pub parent_id: Option<String>,
    pub message_type: MessageType,
    pub priority: u8,
    pub content: serde_json::Value,
    #[serde(default)]
    pub metadata: Metadata,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

/// Broadcast recipient marker (spec §3).
pub const BROADCAST_RECIPIENT: &str = "*";

/// Aggregate queue statistics (spec §4.7 `stats()`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub delivered: usize,
    pub processed: usize,
    pub expired: usize,
    pub priority_distribution: HashMap<u8, usize>,
}

/// A single revision within a latent-space thought chain (C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub is_final: bool,
}

/// An append-only chain of iterative thought revisions (C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thought {
    pub thought_id: String,
    pub namespace: String,
    pub iterations: Vec<Iteration>,
    pub finalized: bool,
}

/// `trace()` can return either the full chain or a trimmed first+final view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThoughtView {
    Full(Thought),
    Trimmed {
        thought_id: String,
        namespace: String,
        first: Option<Iteration>,
        last: Iteration,
        finalized: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_str() {
        for c in Category::all() {
            let parsed: Category = c.as_str().parse().unwrap();
            assert_eq!(parsed, *c);
        }
    }

    #[test]
    fn category_default_importance_is_1_to_5() {
        for c in Category::all() {
            let imp = c.default_importance();
            assert!((1..=5).contains(&imp));
        }
    }

    #[test]
    fn compartment_namespace_naming() {
        assert!(is_compartment_namespace("compartment-abc123"));
        assert!(!is_compartment_namespace("projects"));
    }

    #[test]
    fn known_namespaces_cover_defaults_and_compartments() {
        assert!(is_known_namespace("conversations"));
        assert!(is_known_namespace("compartment-xyz"));
        assert!(!is_known_namespace("bogus"));
    }

    #[test]
    fn structured_id_round_trips() {
        let id = StructuredId::new(Category::Facts, 1_700_000_000, "a1b2".to_string());
        let formatted = id.format();
        assert_eq!(formatted, "facts-1700000000-a1b2");
        assert_eq!(StructuredId::parse(&formatted), Some(id));
    }

    #[test]
    fn structured_id_rejects_malformed_input() {
        assert_eq!(StructuredId::parse("not-an-id"), None);
        assert_eq!(StructuredId::parse("bogus-123-xyz"), None);
    }
}
