//! C10: bounded, newest-first session log.
//!
//! Persistence follows the same write-temp-then-rename idiom as C3/C7/C9.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OnDisk {
    entries: VecDeque<SessionEntry>,
}

/// A ring buffer of the last `capacity` session entries for one client.
pub struct SessionLog {
    path: PathBuf,
    capacity: usize,
    entries: RwLock<VecDeque<SessionEntry>>,
}

impl SessionLog {
    /// Opens `<data_dir>/sessions/<client_id>.session.json` (spec §6).
    pub async fn open(data_dir: &Path, client_id: &str, capacity: usize) -> Result<Self> {
        let sessions_dir = data_dir.join("sessions");
        tokio::fs::create_dir_all(&sessions_dir).await?;
        let path = sessions_dir.join(format!("{client_id}.session.json"));

        let entries = if path.exists() {
            let raw = tokio::fs::read_to_string(&path).await?;
            let on_disk: OnDisk = serde_json::from_str(&raw)?;
            on_disk.entries
        } else {
            VecDeque::new()
        };

        Ok(Self {
            path,
            capacity: capacity.max(1),
            entries: RwLock::new(entries),
        })
    }

    /// Append an entry, evicting the oldest if over capacity, then persist.
    pub async fn write(&self, content: impl Into<String>) -> Result<()> {
        {
            let mut guard = self.entries.write().await;
            guard.push_back(SessionEntry {
                content: content.into(),
                timestamp: Utc::now(),
            });
            while guard.len() > self.capacity {
                guard.pop_front();
            }
        }
        self.flush().await
    }

    /// Newest-first entries, capped at `limit` (0 means unlimited).
    pub async fn load(&self, limit: usize) -> Vec<SessionEntry> {
        let guard = self.entries.read().await;
        let mut items: Vec<SessionEntry> = guard.iter().cloned().collect();
        items.reverse();
        if limit > 0 {
            items.truncate(limit);
        }
        items
    }

    async fn flush(&self) -> Result<()> {
        let guard = self.entries.read().await;
        let on_disk = OnDisk {
            entries: guard.clone(),
        };
        let json = serde_json::to_string_pretty(&on_disk)?;
        let tmp = self.path.with_extension("session.json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
