//! Typed runtime configuration, built once at startup from env/CLI and
//! handed to [`crate::registry::ClientRegistry::new`].

use std::path::PathBuf;
use std::time::Duration;

/// Embedding backend selection and parameters.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// When true, C1 always falls back to the deterministic TF-IDF embedder
    /// even if a network-backed embedder (e.g. `openai`) is compiled in.
    pub use_fallback: bool,
    /// Fixed output dimensionality all vectors in a given deployment share.
    pub dimensions: usize,
    /// API base URL for the optional `openai`-feature embedder.
    pub api_base: Option<String>,
    /// API key for the optional `openai`-feature embedder.
    pub api_key: Option<String>,
    /// Model name passed to the network-backed embedder.
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            use_fallback: true,
            dimensions: 256,
            api_base: None,
            api_key: None,
            model: "text-embedding-3-small".to_string(),
        }
    }
}

/// Top-level configuration for an Engram deployment.
///
/// Grounded on the teacher's `StorageConfig`/`EmbeddingConfig` pattern in
/// `src/types.rs`: a plain struct built once, then threaded explicitly
/// through construction rather than read from ambient globals.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory under which every client's data is partitioned.
    pub data_dir: PathBuf,
    /// Client id used by the CLI/server harnesses when none is given per call.
    pub default_client_id: Option<String>,
    pub embedding: EmbeddingConfig,
    /// How long a client's `MemoryService` may sit idle before C8's reaper
    /// evicts it from the registry.
    pub idle_ttl: Duration,
    /// How often C8's reaper task sweeps for idle clients.
    pub reaper_period: Duration,
    /// How often C7's sweeper task sweeps for expired messages.
    pub sweeper_period: Duration,
    /// Ring-buffer capacity for C10's session log.
    pub session_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_client_id: None,
            embedding: EmbeddingConfig::default(),
            idle_ttl: Duration::from_secs(3600),
            reaper_period: Duration::from_secs(300),
            sweeper_period: Duration::from_secs(60),
            session_capacity: crate::types::SESSION_NAMESPACE_CAPACITY,
        }
    }
}

/// `~/.engram`, tilde-expanded the way the teacher's CLI expands DB paths.
pub fn default_data_dir() -> PathBuf {
    let expanded = shellexpand::tilde("~/.engram");
    PathBuf::from(expanded.into_owned())
}

impl Config {
    /// `<data_dir>/<client_id>-memories.json` (spec §6: flat, not nested).
    pub fn memories_path(&self, client_id: &str) -> PathBuf {
        self.data_dir.join(format!("{client_id}-memories.json"))
    }

    /// `<data_dir>/<client_id>-compartments.json`.
    pub fn compartments_path(&self, client_id: &str) -> PathBuf {
        self.data_dir.join(format!("{client_id}-compartments.json"))
    }

    /// `<data_dir>/vector`, holding one `.idx`/`.meta.json` pair per
    /// (client, namespace).
    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vector")
    }

    /// `<data_dir>/latent`, holding one `<namespace>/<thought_id>.json` per
    /// thought chain.
    pub fn latent_dir(&self) -> PathBuf {
        self.data_dir.join("latent")
    }

    /// `<data_dir>/sessions`, holding one `<client_id>.session.json` per
    /// client.
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }
}
