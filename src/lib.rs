//! Engram: a per-client semantic memory engine for conversational AI agents.
//!
//! This crate implements the memory core only (C1-C10); HTTP/RPC surfaces,
//! process supervision, and LLM-bridge logic are out of scope and live, if
//! at all, in separate crates that embed this one.

pub mod categorize;
pub mod config;
pub mod crypto;
pub mod embedding;
pub mod error;
pub mod index;
pub mod latent;
pub mod memory;
pub mod queue;
pub mod registry;
pub mod session;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{EngramError, Result};
pub use memory::MemoryService;
pub use registry::ClientRegistry;

/// Crate version, re-exported for diagnostics/CLI `--version` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
