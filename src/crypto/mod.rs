//! C2: per-client symmetric crypto box for private memories.
//!
//! Grounded on the teacher's `CloudStorage::encrypt_data`/`decrypt_data`
//! (`src/sync/cloud.rs`): AES-256-GCM via `aes-gcm`, a random 12-byte nonce
//! generated per call and prepended to the ciphertext. Key material is
//! generated with `rand` and stored base64-encoded, matching the teacher's
//! `generate_encryption_key`.

use crate::error::{EngramError, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyRecord {
    id: String,
    material: String, // base64
    #[serde(default)]
    emergency: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct KeyStore {
    primary_id: Option<String>,
    keys: Vec<KeyRecord>,
}

/// Per-client AES-256-GCM box: holds a primary key plus any number of
/// emergency (recovery) keys, persisted as `keys/<client_id>.keys`.
pub struct CryptoBox {
    client_id: String,
    path: PathBuf,
    store: parking_lot::RwLock<KeyStore>,
}

fn random_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

fn random_id() -> String {
    let mut buf = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

impl CryptoBox {
    /// Load (or lazily initialize) the keystore for `client_id` rooted at
    /// `keys_dir`, generating a primary key on first use.
    pub fn open(keys_dir: &Path, client_id: &str) -> Result<Self> {
        std::fs::create_dir_all(keys_dir)?;
        let path = keys_dir.join(format!("{client_id}.keys"));

        let mut store = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str::<KeyStore>(&raw)?
        } else {
            KeyStore::default()
        };

        if store.primary_id.is_none() {
            let id = random_id();
            store.keys.push(KeyRecord {
                id: id.clone(),
                material: BASE64.encode(random_key()),
                emergency: false,
            });
            store.primary_id = Some(id);
        }

        let this = Self {
            client_id: client_id.to_string(),
            path,
            store: parking_lot::RwLock::new(store),
        };
        this.persist()?;
        Ok(this)
    }

    fn persist(&self) -> Result<()> {
        let store = self.store.read();
        let json = serde_json::to_string_pretty(&*store)?;
        let tmp = self.path.with_extension("keys.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(meta) = std::fs::metadata(&self.path) {
                let mut perm = meta.permissions();
                perm.set_mode(0o600);
                let _ = std::fs::set_permissions(&self.path, perm);
            }
        }
        Ok(())
    }

    fn find_key(&self, id: &str) -> Option<[u8; KEY_LEN]> {
        let store = self.store.read();
        store.keys.iter().find(|k| k.id == id).and_then(|k| {
            let bytes = BASE64.decode(&k.material).ok()?;
            bytes.try_into().ok()
        })
    }

    fn primary_id(&self) -> String {
        self.store.read().primary_id.clone().expect("primary key always present after open()")
    }

    /// Encrypt `plaintext` under the current primary key. Returns
    /// `(key_id, ciphertext)` where `ciphertext` is `nonce || aes_gcm(data)`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(String, Vec<u8>)> {
        let key_id = self.primary_id();
        let key_bytes = self
            .find_key(&key_id)
            .ok_or_else(|| EngramError::internal(format!("primary key {key_id} missing from store")))?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| EngramError::internal(format!("encryption failed for client {}: {e}", self.client_id)))?;

        let mut out = nonce_bytes.to_vec();
        out.append(&mut ciphertext);
        Ok((key_id, out))
    }

    /// Decrypt `blob` (`nonce || ciphertext`) under `key_id`. If the primary
    /// key does not match and `allow_emergency` is set, any emergency key on
    /// file is tried as well (spec §4.2: emergency-key recovery path).
    pub fn decrypt(&self, key_id: &str, blob: &[u8], allow_emergency: bool) -> Result<Vec<u8>> {
        if blob.len() < NONCE_LEN {
            return Err(EngramError::InvalidArgument("ciphertext too short".into()));
        }

        let is_emergency = {
            let store = self.store.read();
            store
                .keys
                .iter()
                .find(|k| k.id == key_id)
                .map(|k| k.emergency)
                .ok_or_else(|| EngramError::NotFound(format!("key {key_id}")))?
        };

        if is_emergency && !allow_emergency {
            return Err(EngramError::PermissionDenied(
                "emergency key use requires explicit opt-in".into(),
            ));
        }

        let key_bytes = self
            .find_key(key_id)
            .ok_or_else(|| EngramError::NotFound(format!("key {key_id}")))?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| EngramError::internal(format!("cipher integrity check failed for client {}", self.client_id)))
    }

    /// Generate a new emergency (recovery) key; does not replace the primary.
    pub fn generate_emergency(&self) -> Result<String> {
        let id = random_id();
        {
            let mut store = self.store.write();
            store.keys.push(KeyRecord {
                id: id.clone(),
                material: BASE64.encode(random_key()),
                emergency: true,
            });
        }
        self.persist()?;
        Ok(id)
    }

    /// Generate a fresh primary key and make it current; the old primary
    /// remains on file (as a non-primary key) so already-encrypted content
    /// stays decryptable.
    pub fn rotate_primary(&self) -> Result<String> {
        let id = random_id();
        {
            let mut store = self.store.write();
            store.keys.push(KeyRecord {
                id: id.clone(),
                material: BASE64.encode(random_key()),
                emergency: false,
            });
            store.primary_id = Some(id.clone());
        }
        self.persist()?;
        Ok(id)
    }

    pub fn list_keys(&self) -> Vec<(String, bool)> {
        self.store.read().keys.iter().map(|k| (k.id.clone(), k.emergency)).collect()
    }

    /// Remove a key that is neither the primary nor needed for decryption of
    /// content the caller still cares about; callers are responsible for
    /// ensuring no live ciphertext references `key_id`.
    pub fn delete_key(&self, key_id: &str) -> Result<()> {
        let primary = self.primary_id();
        if key_id == primary {
            return Err(EngramError::InvalidArgument("cannot delete the primary key".into()));
        }
        {
            let mut store = self.store.write();
            let before = store.keys.len();
            store.keys.retain(|k| k.id != key_id);
            if store.keys.len() == before {
                return Err(EngramError::NotFound(format!("key {key_id}")));
            }
        }
        self.persist()
    }
}

/// Keystores for every client opened so far, keyed by client id.
#[derive(Default)]
pub struct CryptoBoxRegistry {
    keys_dir: PathBuf,
    boxes: parking_lot::RwLock<HashMap<String, std::sync::Arc<CryptoBox>>>,
}

impl CryptoBoxRegistry {
    pub fn new(keys_dir: PathBuf) -> Self {
        Self {
            keys_dir,
            boxes: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, client_id: &str) -> Result<std::sync::Arc<CryptoBox>> {
        if let Some(existing) = self.boxes.read().get(client_id) {
            return Ok(existing.clone());
        }
        let mut boxes = self.boxes.write();
        if let Some(existing) = boxes.get(client_id) {
            return Ok(existing.clone());
        }
        let created = std::sync::Arc::new(CryptoBox::open(&self.keys_dir, client_id)?);
        boxes.insert(client_id.to_string(), created.clone());
        Ok(created)
    }
}
