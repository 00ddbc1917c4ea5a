//! C8: client registry — lazy, single-flight construction of per-client
//! [`MemoryService`] instances, plus an idle reaper.
//!
//! The `DashMap<ClientId, Arc<OnceCell<...>>>` shape is idiomatic in this
//! corpus for "construct once, read often": concurrent callers racing to
//! build the same client's service all await the same `OnceCell`, so the
//! expensive open-on-disk path runs exactly once per client (spec §5).
//!
//! Also owns the link to C7: the first `get()` for a client registers that
//! client id with the shared `MessageQueue`, since C7 has no other way to
//! know which recipient ids are real.

use crate::config::Config;
use crate::crypto::CryptoBoxRegistry;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{EngramError, Result};
use crate::memory::MemoryService;
use crate::queue::MessageQueue;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub struct ClientRegistry {
    config: Config,
    embedder: Arc<dyn Embedder>,
    crypto: CryptoBoxRegistry,
    queue: Arc<MessageQueue>,
    clients: DashMap<String, Arc<OnceCell<Arc<MemoryService>>>>,
}

impl ClientRegistry {
    /// `queue` is C7's process-wide message queue; every client constructed
    /// here is registered with it so it can receive messages (spec §4.7).
    pub fn new(config: Config, queue: Arc<MessageQueue>) -> Self {
        let embedder = create_embedder(&config.embedding);
        let crypto = CryptoBoxRegistry::new(config.data_dir.join("keys"));
        Self {
            config,
            embedder,
            crypto,
            queue,
            clients: DashMap::new(),
        }
    }

    /// Get (or lazily construct) the `MemoryService` for `client_id`.
    /// Concurrent callers for the same unconstructed client id block on the
    /// same `OnceCell`, so the service is built exactly once.
    pub async fn get(&self, client_id: &str) -> Result<Arc<MemoryService>> {
        if client_id.is_empty() {
            return Err(EngramError::InvalidArgument("client_id must not be empty".into()));
        }

        let cell = self
            .clients
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let service = cell
            .get_or_try_init(|| async {
                let crypto = self.crypto.get(client_id)?;
                let service = MemoryService::open(&self.config, client_id, self.embedder.clone(), crypto).await?;
                self.queue.register(client_id);
                Ok::<_, EngramError>(Arc::new(service))
            })
            .await?;

        service.touch();
        Ok(service.clone())
    }

    pub fn list(&self) -> Vec<String> {
        self.clients
            .iter()
            .filter(|e| e.value().get().is_some())
            .map(|e| e.key().clone())
            .collect()
    }

    /// Evict any constructed client idle for longer than `idle_ttl`.
    pub fn reap_idle(&self, idle_ttl: std::time::Duration) -> usize {
        let to_remove: Vec<String> = self
            .clients
            .iter()
            .filter_map(|e| {
                e.value().get().and_then(|svc| {
                    if svc.idle_for() >= idle_ttl {
                        Some(e.key().clone())
                    } else {
                        None
                    }
                })
            })
            .collect();

        for id in &to_remove {
            self.clients.remove(id);
        }
        to_remove.len()
    }

    pub async fn run_reaper(self: Arc<Self>, period: std::time::Duration, idle_ttl: std::time::Duration) {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let reaped = self.reap_idle(idle_ttl);
            if reaped > 0 {
                tracing::info!(reaped, "idle client reaper cycle");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn test_queue(dir: &std::path::Path) -> Arc<MessageQueue> {
        Arc::new(MessageQueue::open(&dir.join("messages")).await.unwrap())
    }

    #[tokio::test]
    async fn get_lazily_constructs_and_caches() {
        let dir = tempdir().unwrap();
        let queue = test_queue(dir.path()).await;
        let registry = ClientRegistry::new(Config { data_dir: dir.path().to_path_buf(), ..Config::default() }, queue);
        let a = registry.get("alice").await.unwrap();
        let b = registry.get("alice").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn get_registers_client_with_the_message_queue() {
        let dir = tempdir().unwrap();
        let queue = test_queue(dir.path()).await;
        let registry = ClientRegistry::new(Config { data_dir: dir.path().to_path_buf(), ..Config::default() }, queue.clone());
        registry.get("alice").await.unwrap();
        assert!(queue.receive("alice", 10).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_get_single_flights_construction() {
        let dir = tempdir().unwrap();
        let queue = test_queue(dir.path()).await;
        let registry = Arc::new(ClientRegistry::new(Config { data_dir: dir.path().to_path_buf(), ..Config::default() }, queue));
        let r1 = registry.clone();
        let r2 = registry.clone();
        let (a, b) = tokio::join!(tokio::spawn(async move { r1.get("bob").await.unwrap() }), tokio::spawn(async move { r2.get("bob").await.unwrap() }));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    }

    #[tokio::test]
    async fn empty_client_id_is_rejected() {
        let dir = tempdir().unwrap();
        let queue = test_queue(dir.path()).await;
        let registry = ClientRegistry::new(Config { data_dir: dir.path().to_path_buf(), ..Config::default() }, queue);
        let err = registry.get("").await.unwrap_err();
        assert!(matches!(err, EngramError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn reap_idle_evicts_clients_past_ttl() {
        let dir = tempdir().unwrap();
        let queue = test_queue(dir.path()).await;
        let registry = ClientRegistry::new(Config { data_dir: dir.path().to_path_buf(), ..Config::default() }, queue);
        registry.get("alice").await.unwrap();
        let reaped = registry.reap_idle(std::time::Duration::from_secs(0));
        assert_eq!(reaped, 1);
        assert!(registry.list().is_empty());
    }
}
