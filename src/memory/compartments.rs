//! Compartment lifecycle operations (spec §4.6): named, expirable logical
//! buckets, each backed by its own `compartment-<id>` namespace in C3.

use super::MemoryService;
use crate::error::{EngramError, Result};
use crate::types::{Compartment, CompartmentSummary};
use chrono::{DateTime, Utc};

impl MemoryService {
    async fn persist_compartments(&self) -> Result<()> {
        let guard = self.compartments.read().await;
        let json = serde_json::to_string_pretty(&*guard)?;
        let path = self.compartments_path();
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub async fn create_compartment(&self, name: &str, description: Option<String>, expires_at: Option<DateTime<Utc>>) -> Result<Compartment> {
        if name.is_empty() {
            return Err(EngramError::InvalidArgument("compartment name must not be empty".into()));
        }
        let id = format!("{:x}", rand_u64());
        let compartment = Compartment {
            id: id.clone(),
            name: name.to_string(),
            description,
            created_at: Utc::now(),
            active: true,
            expires_at,
        };
        self.compartments.write().await.push(compartment.clone());
        self.persist_compartments().await?;
        Ok(compartment)
    }

    pub async fn list_compartments(&self) -> Vec<CompartmentSummary> {
        let now = Utc::now();
        self.compartments
            .read()
            .await
            .iter()
            .filter(|c| !c.is_expired(now))
            .map(|c| CompartmentSummary {
                id: c.id.clone(),
                name: c.name.clone(),
                active: c.active,
                expires_at: c.expires_at,
            })
            .collect()
    }

    pub async fn set_compartment_active(&self, id: &str, active: bool) -> Result<()> {
        let mut guard = self.compartments.write().await;
        let compartment = guard.iter_mut().find(|c| c.id == id).ok_or_else(|| EngramError::NotFound(id.to_string()))?;
        compartment.active = active;
        drop(guard);
        self.persist_compartments().await
    }

    /// Set (or refresh) a compartment's expiration to `ttl_seconds` from now.
    pub async fn set_expiration(&self, id: &str, ttl_seconds: i64) -> Result<()> {
        let mut guard = self.compartments.write().await;
        let compartment = guard.iter_mut().find(|c| c.id == id).ok_or_else(|| EngramError::NotFound(id.to_string()))?;
        compartment.expires_at = Some(Utc::now() + chrono::Duration::seconds(ttl_seconds));
        drop(guard);
        self.persist_compartments().await
    }

    /// Write `content` into the compartment's namespace, returning the
    /// stored memory's id. When `key` is given it addresses a stable slot
    /// within the compartment (a second `store` with the same key overwrites
    /// it); otherwise a fresh id is generated.
    pub async fn store(&self, compartment_id: &str, content: &str, key: Option<&str>) -> Result<String> {
        let namespace = self.compartment_namespace(compartment_id).await?;
        match key {
            Some(key) => {
                self.put(&namespace, key, content, crate::types::Metadata::new()).await?;
                Ok(key.to_string())
            }
            None => self.add(content, &namespace, None).await,
        }
    }

    pub async fn compartment_namespace(&self, id: &str) -> Result<String> {
        let now = Utc::now();
        let guard = self.compartments.read().await;
        let compartment = guard.iter().find(|c| c.id == id).ok_or_else(|| EngramError::NotFound(id.to_string()))?;
        if compartment.is_expired(now) {
            return Err(EngramError::NotFound(format!("compartment {id} has expired")));
        }
        if !compartment.active {
            return Err(EngramError::PermissionDenied(format!("compartment {id} is inactive")));
        }
        Ok(compartment.namespace())
    }
}

fn rand_u64() -> u64 {
    use rand::RngCore;
    rand::thread_rng().next_u64()
}

#[cfg(test)]
mod tests {
    use super::super::tests_support::make_service;
    use crate::error::EngramError;
    use tempfile::tempdir;

    #[tokio::test]
    async fn create_then_list_compartment() {
        let dir = tempdir().unwrap();
        let svc = make_service(dir.path(), "alice").await;
        svc.create_compartment("roadmap", None, None).await.unwrap();
        let list = svc.list_compartments().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "roadmap");
    }

    #[tokio::test]
    async fn expired_compartment_is_excluded_from_listing() {
        let dir = tempdir().unwrap();
        let svc = make_service(dir.path(), "alice").await;
        let expires = chrono::Utc::now() - chrono::Duration::seconds(1);
        svc.create_compartment("old", None, Some(expires)).await.unwrap();
        assert!(svc.list_compartments().await.is_empty());
    }

    #[tokio::test]
    async fn inactive_compartment_namespace_is_denied() {
        let dir = tempdir().unwrap();
        let svc = make_service(dir.path(), "alice").await;
        let compartment = svc.create_compartment("secret-project", None, None).await.unwrap();
        svc.set_compartment_active(&compartment.id, false).await.unwrap();
        let err = svc.compartment_namespace(&compartment.id).await.unwrap_err();
        assert!(matches!(err, EngramError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let dir = tempdir().unwrap();
        let svc = make_service(dir.path(), "alice").await;
        let err = svc.create_compartment("", None, None).await.unwrap_err();
        assert!(matches!(err, EngramError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn set_expiration_makes_compartment_expire() {
        let dir = tempdir().unwrap();
        let svc = make_service(dir.path(), "alice").await;
        let compartment = svc.create_compartment("roadmap", None, None).await.unwrap();
        svc.set_expiration(&compartment.id, -1).await.unwrap();
        assert!(svc.list_compartments().await.is_empty());
    }

    #[tokio::test]
    async fn store_writes_into_compartment_namespace() {
        let dir = tempdir().unwrap();
        let svc = make_service(dir.path(), "alice").await;
        let compartment = svc.create_compartment("roadmap", None, None).await.unwrap();
        let id = svc.store(&compartment.id, "q3 goals", None).await.unwrap();
        let record = svc.get(&compartment.namespace(), &id).await.unwrap();
        assert_eq!(record.content, "q3 goals");
    }

    #[tokio::test]
    async fn store_with_key_overwrites_the_same_slot() {
        let dir = tempdir().unwrap();
        let svc = make_service(dir.path(), "alice").await;
        let compartment = svc.create_compartment("roadmap", None, None).await.unwrap();
        svc.store(&compartment.id, "first draft", Some("summary")).await.unwrap();
        svc.store(&compartment.id, "second draft", Some("summary")).await.unwrap();
        let record = svc.get(&compartment.namespace(), "summary").await.unwrap();
        assert_eq!(record.content, "second draft");
    }
}
