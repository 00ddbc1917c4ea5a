//! C7: per-recipient persistent priority message queue.
//!
//! The background expiry sweeper is grounded on the teacher's
//! `EmbeddingWorker::run` (`src/embedding/queue.rs`): a `tokio::select!`
//! between real work and an `interval` tick. Persistence reuses C3's
//! write-temp-then-rename idiom, one JSON file per recipient.

use crate::error::{EngramError, Result};
use crate::types::{Message, MessageStatus, MessageType, Metadata, QueueStats};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct OnDisk {
    messages: Vec<Message>,
}

struct Inbox {
    messages: Vec<Message>,
}

/// Per-client message queue, one `Inbox` per recipient id, persisted at
/// `messages/<recipient_id>.json`.
pub struct MessageQueue {
    root: PathBuf,
    inboxes: DashMap<String, Arc<RwLock<Inbox>>>,
}

fn random_suffix() -> String {
    use rand::RngCore;
    let mut buf = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

impl MessageQueue {
    pub async fn open(root: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(root).await?;
        let inboxes = DashMap::new();

        let mut entries = tokio::fs::read_dir(root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let recipient = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
                let raw = tokio::fs::read_to_string(&path).await?;
                let on_disk: OnDisk = serde_json::from_str(&raw)?;
                inboxes.insert(recipient, Arc::new(RwLock::new(Inbox { messages: on_disk.messages })));
            }
        }

        Ok(Self { root: root.to_path_buf(), inboxes })
    }

    fn inbox_path(&self, recipient_id: &str) -> PathBuf {
        self.root.join(format!("{recipient_id}.json"))
    }

    fn inbox_handle(&self, recipient_id: &str) -> Arc<RwLock<Inbox>> {
        self.inboxes
            .entry(recipient_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Inbox { messages: Vec::new() })))
            .clone()
    }

    /// Register `recipient_id` as reachable, creating its (empty) inbox if
    /// it doesn't already have one. `ClientRegistry` calls this whenever it
    /// constructs a client's `MemoryService`, so `send` only ever accepts
    /// messages for a client that actually exists.
    pub fn register(&self, recipient_id: &str) {
        self.inbox_handle(recipient_id);
    }

    async fn persist(&self, recipient_id: &str) -> Result<()> {
        let handle = self.inbox_handle(recipient_id);
        let guard = handle.read().await;
        let on_disk = OnDisk { messages: guard.messages.clone() };
        let json = serde_json::to_string_pretty(&on_disk)?;
        let path = self.inbox_path(recipient_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Enqueue a message for `recipient_id`. `priority` must be in `1..=5`.
    #[allow(clippy::too_many_arguments)]
    pub async fn send(
        &self,
        sender_id: &str,
        recipient_id: &str,
        message_type: MessageType,
        content: serde_json::Value,
        priority: u8,
        ttl: ChronoDuration,
        metadata: Metadata,
        thread_id: Option<String>,
    ) -> Result<Message> {
        if !(1..=5).contains(&priority) {
            return Err(EngramError::InvalidArgument(format!("priority must be 1-5, got {priority}")));
        }
        if !self.inboxes.contains_key(recipient_id) {
            return Err(EngramError::UnknownRecipient(recipient_id.to_string()));
        }
        let now = Utc::now();
        let message = Message {
            message_id: format!("msg-{}-{}", now.timestamp(), random_suffix()),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            thread_id,
            parent_id: None,
            message_type,
            priority,
            content,
            metadata,
            status: MessageStatus::Pending,
            created_at: now,
            expires_at: now + ttl,
            delivered_at: None,
            processed_at: None,
        };

        let handle = self.inbox_handle(recipient_id);
        handle.write().await.messages.push(message.clone());
        self.persist(recipient_id).await?;
        Ok(message)
    }

    /// Reply to `parent_id`: copies its thread id, or synthesizes one from
    /// the parent message id if it had none (original-source precedent).
    pub async fn reply(
        &self,
        sender_id: &str,
        parent_id: &str,
        content: serde_json::Value,
        priority: u8,
        ttl: ChronoDuration,
        metadata: Metadata,
    ) -> Result<Message> {
        let parent = self.find_message(parent_id).await.ok_or_else(|| EngramError::NoSuchParent(parent_id.to_string()))?;
        let thread_id = parent.thread_id.clone().unwrap_or_else(|| format!("thread-{}", parent.message_id));

        let mut message = self
            .send(
                sender_id,
                &parent.sender_id,
                MessageType::Reply,
                content,
                priority,
                ttl,
                metadata,
                Some(thread_id),
            )
            .await?;
        message.parent_id = Some(parent_id.to_string());

        let handle = self.inbox_handle(&parent.sender_id);
        {
            let mut guard = handle.write().await;
            if let Some(stored) = guard.messages.iter_mut().find(|m| m.message_id == message.message_id) {
                stored.parent_id = Some(parent_id.to_string());
            }
        }
        self.persist(&parent.sender_id).await?;
        Ok(message)
    }

    /// Fan a message out to every known recipient.
    pub async fn broadcast(
        &self,
        sender_id: &str,
        content: serde_json::Value,
        priority: u8,
        ttl: ChronoDuration,
        metadata: Metadata,
    ) -> Result<Vec<Message>> {
        let recipients: Vec<String> = self.inboxes.iter().map(|e| e.key().clone()).filter(|r| r != sender_id).collect();
        let mut sent = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let message = self
                .send(
                    sender_id,
                    &recipient,
                    MessageType::Broadcast,
                    content.clone(),
                    priority,
                    ttl,
                    metadata.clone(),
                    None,
                )
                .await?;
            sent.push(message);
        }
        Ok(sent)
    }

    async fn find_message(&self, message_id: &str) -> Option<Message> {
        let handles: Vec<Arc<RwLock<Inbox>>> = self.inboxes.iter().map(|e| e.value().clone()).collect();
        for handle in handles {
            let guard = handle.read().await;
            if let Some(found) = guard.messages.iter().find(|m| m.message_id == message_id) {
                return Some(found.clone());
            }
        }
        None
    }

    /// Pull up to `limit` pending messages for `recipient_id`, highest
    /// priority first, then oldest first; marks them delivered.
    pub async fn receive(&self, recipient_id: &str, limit: usize) -> Result<Vec<Message>> {
        if !self.inboxes.contains_key(recipient_id) {
            return Err(EngramError::UnknownRecipient(recipient_id.to_string()));
        }
        let handle = self.inbox_handle(recipient_id);
        let now = Utc::now();
        let mut guard = handle.write().await;

        let mut eligible: Vec<usize> = guard
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.status == MessageStatus::Pending && m.expires_at > now)
            .map(|(i, _)| i)
            .collect();

        eligible.sort_by(|&a, &b| {
            let ma = &guard.messages[a];
            let mb = &guard.messages[b];
            mb.priority.cmp(&ma.priority).then_with(|| ma.created_at.cmp(&mb.created_at))
        });
        eligible.truncate(limit.max(0));

        let mut out = Vec::with_capacity(eligible.len());
        for idx in eligible {
            guard.messages[idx].status = MessageStatus::Delivered;
            guard.messages[idx].delivered_at = Some(now);
            out.push(guard.messages[idx].clone());
        }
        drop(guard);
        if !out.is_empty() {
            self.persist(recipient_id).await?;
        }
        Ok(out)
    }

    /// Acknowledge that `message_id` was processed.
    pub async fn ack(&self, recipient_id: &str, message_id: &str) -> Result<()> {
        let handle = self.inbox_handle(recipient_id);
        {
            let mut guard = handle.write().await;
            let message = guard
                .messages
                .iter_mut()
                .find(|m| m.message_id == message_id)
                .ok_or_else(|| EngramError::NotFound(message_id.to_string()))?;
            message.status = MessageStatus::Processed;
            message.processed_at = Some(Utc::now());
        }
        self.persist(recipient_id).await
    }

    /// Sweep every inbox, marking expired pending messages. Returns the
    /// number of messages transitioned to `Expired`.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut total = 0usize;
        let recipients: Vec<String> = self.inboxes.iter().map(|e| e.key().clone()).collect();
        for recipient in recipients {
            let handle = self.inbox_handle(&recipient);
            let changed = {
                let mut guard = handle.write().await;
                let mut count = 0;
                for message in guard.messages.iter_mut() {
                    if message.status == MessageStatus::Pending && message.expires_at <= now {
                        message.status = MessageStatus::Expired;
                        count += 1;
                    }
                }
                count
            };
            if changed > 0 {
                self.persist(&recipient).await?;
                total += changed;
            }
        }
        Ok(total)
    }

    pub async fn stats(&self, recipient_id: &str) -> Result<QueueStats> {
        let handle = self.inbox_handle(recipient_id);
        let guard = handle.read().await;
        let mut stats = QueueStats::default();
        stats.total = guard.messages.len();
        for message in &guard.messages {
            match message.status {
                MessageStatus::Pending => stats.pending += 1,
                MessageStatus::Delivered => stats.delivered += 1,
                MessageStatus::Processed => stats.processed += 1,
                MessageStatus::Expired => stats.expired += 1,
            }
            *stats.priority_distribution.entry(message.priority).or_insert(0) += 1;
        }
        Ok(stats)
    }

    pub async fn run_sweeper(self: Arc<Self>, period: std::time::Duration) {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(err) = self.sweep_expired().await {
                tracing::warn!(error = %err, "message sweeper cycle failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn send_then_receive_marks_delivered() {
        let dir = tempdir().unwrap();
        let queue = MessageQueue::open(dir.path()).await.unwrap();
        queue.register("bob");
        queue
            .send("alice", "bob", MessageType::Info, serde_json::json!({"hi": 1}), 3, ChronoDuration::seconds(60), Metadata::new(), None)
            .await
            .unwrap();
        let received = queue.receive("bob", 10).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].status, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn higher_priority_delivered_first() {
        let dir = tempdir().unwrap();
        let queue = MessageQueue::open(dir.path()).await.unwrap();
        queue.register("bob");
        queue.send("alice", "bob", MessageType::Info, serde_json::json!(1), 1, ChronoDuration::seconds(60), Metadata::new(), None).await.unwrap();
        queue.send("alice", "bob", MessageType::Info, serde_json::json!(2), 5, ChronoDuration::seconds(60), Metadata::new(), None).await.unwrap();
        let received = queue.receive("bob", 10).await.unwrap();
        assert_eq!(received[0].priority, 5);
    }

    #[tokio::test]
    async fn invalid_priority_is_rejected() {
        let dir = tempdir().unwrap();
        let queue = MessageQueue::open(dir.path()).await.unwrap();
        let err = queue
            .send("alice", "bob", MessageType::Info, serde_json::json!(1), 9, ChronoDuration::seconds(60), Metadata::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngramError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn reply_inherits_thread_from_parent() {
        let dir = tempdir().unwrap();
        let queue = MessageQueue::open(dir.path()).await.unwrap();
        queue.register("alice");
        queue.register("bob");
        let parent = queue
            .send("alice", "bob", MessageType::Request, serde_json::json!("ask"), 3, ChronoDuration::seconds(60), Metadata::new(), Some("thread-1".into()))
            .await
            .unwrap();
        let reply = queue
            .reply("bob", &parent.message_id, serde_json::json!("answer"), 3, ChronoDuration::seconds(60), Metadata::new())
            .await
            .unwrap();
        assert_eq!(reply.thread_id.as_deref(), Some("thread-1"));
        assert_eq!(reply.parent_id.as_deref(), Some(parent.message_id.as_str()));
    }

    #[tokio::test]
    async fn reply_to_missing_parent_errors() {
        let dir = tempdir().unwrap();
        let queue = MessageQueue::open(dir.path()).await.unwrap();
        let err = queue
            .reply("bob", "msg-does-not-exist", serde_json::json!("x"), 3, ChronoDuration::seconds(60), Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngramError::NoSuchParent(_)));
    }

    #[tokio::test]
    async fn sweep_expires_overdue_pending_messages() {
        let dir = tempdir().unwrap();
        let queue = MessageQueue::open(dir.path()).await.unwrap();
        queue.register("bob");
        queue
            .send("alice", "bob", MessageType::Info, serde_json::json!(1), 3, ChronoDuration::seconds(-1), Metadata::new(), None)
            .await
            .unwrap();
        let expired = queue.sweep_expired().await.unwrap();
        assert_eq!(expired, 1);
        let stats = queue.stats("bob").await.unwrap();
        assert_eq!(stats.expired, 1);
    }

    #[tokio::test]
    async fn broadcast_to_zero_recipients_is_empty() {
        let dir = tempdir().unwrap();
        let queue = MessageQueue::open(dir.path()).await.unwrap();
        let sent = queue.broadcast("alice", serde_json::json!("hi"), 3, ChronoDuration::seconds(60), Metadata::new()).await.unwrap();
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn send_to_unknown_recipient_is_rejected() {
        let dir = tempdir().unwrap();
        let queue = MessageQueue::open(dir.path()).await.unwrap();
        let err = queue
            .send("alice", "nobody", MessageType::Info, serde_json::json!(1), 3, ChronoDuration::seconds(60), Metadata::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngramError::UnknownRecipient(_)));
    }

    #[tokio::test]
    async fn receive_from_known_empty_recipient_succeeds() {
        let dir = tempdir().unwrap();
        let queue = MessageQueue::open(dir.path()).await.unwrap();
        queue.register("bob");
        let received = queue.receive("bob", 10).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn receive_from_unregistered_recipient_errors() {
        let dir = tempdir().unwrap();
        let queue = MessageQueue::open(dir.path()).await.unwrap();
        let err = queue.receive("nobody", 10).await.unwrap_err();
        assert!(matches!(err, EngramError::UnknownRecipient(_)));
    }
}
