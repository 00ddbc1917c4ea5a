//! Private memories (spec §4.6): content encrypted at rest via C2, plaintext
//! never touches the namespace store or disk.

use super::MemoryService;
use crate::error::{EngramError, Result};
use crate::types::{Metadata, MetadataValue, Record};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;

const PRIVATE_NAMESPACE: &str = "compartments";

impl MemoryService {
    /// Encrypt `content` and store only its ciphertext, key id, and metadata.
    pub async fn add_private(&self, id: &str, content: &str, metadata: Metadata) -> Result<()> {
        let (key_id, ciphertext) = self.crypto().encrypt(content.as_bytes())?;

        let mut stored_metadata = metadata;
        stored_metadata.insert("private".into(), MetadataValue::Bool(true));
        stored_metadata.insert("key_id".into(), MetadataValue::String(key_id));
        stored_metadata.insert("timestamp".into(), MetadataValue::String(Utc::now().to_rfc3339()));

        let record = Record {
            id: id.to_string(),
            content: BASE64.encode(ciphertext),
            metadata: stored_metadata,
            vector: None,
        };
        self.store().add(PRIVATE_NAMESPACE, record).await
    }

    /// Decrypt and return the plaintext for a private memory by id.
    pub async fn get_private(&self, id: &str) -> Result<String> {
        let record = self.store().get(PRIVATE_NAMESPACE, id).await?;
        self.decrypt_private(&record)
    }

    /// List every private memory's id and metadata, without decrypting its
    /// content. Use `get_private` to decrypt a specific entry.
    pub async fn list_private(&self) -> Result<Vec<(String, Metadata)>> {
        let records = self.store().list(PRIVATE_NAMESPACE, 0, usize::MAX).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.metadata.get("private").and_then(MetadataValue::as_bool).unwrap_or(false))
            .map(|r| (r.id, r.metadata))
            .collect())
    }

    fn decrypt_private(&self, record: &Record) -> Result<String> {
        let key_id = record
            .metadata
            .get("key_id")
            .and_then(MetadataValue::as_str)
            .ok_or_else(|| EngramError::internal(format!("private memory {} missing key_id", record.id)))?;
        let ciphertext = BASE64
            .decode(&record.content)
            .map_err(|e| EngramError::internal(format!("private memory {} has malformed ciphertext: {e}", record.id)))?;
        let plain = self.crypto().decrypt(key_id, &ciphertext, false)?;
        String::from_utf8(plain).map_err(|e| EngramError::internal(format!("private memory {} decrypted to invalid utf8: {e}", record.id)))
    }
}
