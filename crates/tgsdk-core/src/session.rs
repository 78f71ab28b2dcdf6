use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{errors::Error, update::Update, Result};

/// External key/value collaborator backing the session store.
///
/// A `ttl` of zero means the entry never expires. Implementations decide
/// durability; [`FileStore`] persists a single JSON document.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn has(&self, key: &str) -> Result<bool>;
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;
}

#[derive(Debug, Deserialize, Serialize)]
struct StoredEntry {
    value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

/// Durable JSON-document store, one entry per key.
///
/// Expired entries read as absent and are compacted away on the next write.
/// A missing file reads as an empty store.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<HashMap<String, StoredEntry>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::Session(format!("corrupt store {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, map: &HashMap<String, StoredEntry>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(map)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

fn entry_expired(entry: &StoredEntry, now: DateTime<Utc>) -> bool {
    matches!(entry.expires_at, Some(at) if at <= now)
}

fn expiry_from(now: DateTime<Utc>, ttl: Duration) -> Result<Option<DateTime<Utc>>> {
    if ttl.is_zero() {
        return Ok(None);
    }
    let delta = chrono::Duration::from_std(ttl)
        .map_err(|_| Error::Session(format!("ttl out of range: {ttl:?}")))?;
    Ok(Some(now + delta))
}

#[async_trait]
impl SessionBackend for FileStore {
    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.lock.lock().await;
        let map = self.load().await?;
        let now = Utc::now();
        Ok(map
            .get(key)
            .filter(|e| !entry_expired(e, now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.load().await?;
        let now = Utc::now();
        map.retain(|_, e| !entry_expired(e, now));
        let expires_at = expiry_from(now, ttl)?;
        map.insert(key.to_string(), StoredEntry { value, expires_at });
        self.save(&map).await
    }
}

/// Record stored per sender: the sender profile plus one slot per chat.
#[derive(Debug, Deserialize, Serialize)]
struct SessionRecord {
    profile: Value,
    #[serde(default)]
    slots: HashMap<String, SessionSlot>,
}

#[derive(Debug, Deserialize, Serialize)]
struct SessionSlot {
    value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

/// Per-(sender, chat) conversational state over a [`SessionBackend`].
///
/// Records are keyed by the string form of the sender id and seeded from the
/// sender profile on first write; each chat gets one slot with its own
/// optional expiry. The read-modify-write in [`Sessions::set`] is serialized
/// per sender, so concurrent workers cannot silently lose a write.
pub struct Sessions {
    backend: Arc<dyn SessionBackend>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Sessions {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_sender(&self, sender_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().await;
            map.entry(sender_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Write the session slot for the update's (sender, chat) pair.
    ///
    /// `ttl` of zero means the slot never expires.
    pub async fn set(&self, update: &Update, value: Value, ttl: Duration) -> Result<()> {
        let (sender_id, chat_id, profile) = keys_of(update)?;
        let _guard = self.lock_sender(&sender_id).await;

        let mut record = if self.backend.has(&sender_id).await? {
            match self.backend.get(&sender_id).await? {
                Some(v) => serde_json::from_value(v).map_err(|e| {
                    Error::Session(format!("corrupt record for sender {sender_id}: {e}"))
                })?,
                None => seed_record(profile),
            }
        } else {
            seed_record(profile)
        };

        let expires_at = expiry_from(Utc::now(), ttl)?;
        record.slots.insert(chat_id, SessionSlot { value, expires_at });
        self.backend
            .set(&sender_id, serde_json::to_value(&record)?, Duration::ZERO)
            .await
    }

    /// Read the session slot for the update's (sender, chat) pair.
    ///
    /// Absent or expired slots read as `None`, never as an error.
    pub async fn get(&self, update: &Update) -> Result<Option<Value>> {
        self.get_at(update, Utc::now()).await
    }

    // Expiry decided against an explicit instant; seam for tests.
    async fn get_at(&self, update: &Update, now: DateTime<Utc>) -> Result<Option<Value>> {
        let (sender_id, chat_id, _) = keys_of(update)?;
        let Some(v) = self.backend.get(&sender_id).await? else {
            return Ok(None);
        };
        let record: SessionRecord = serde_json::from_value(v).map_err(|e| {
            Error::Session(format!("corrupt record for sender {sender_id}: {e}"))
        })?;
        Ok(record
            .slots
            .get(&chat_id)
            .filter(|slot| !matches!(slot.expires_at, Some(at) if at <= now))
            .map(|slot| slot.value.clone()))
    }
}

fn seed_record(profile: Value) -> SessionRecord {
    SessionRecord {
        profile,
        slots: HashMap::new(),
    }
}

fn keys_of(update: &Update) -> Result<(String, String, Value)> {
    let msg = update.message.as_ref().ok_or_else(|| {
        Error::MalformedUpdate("session access requires a message-bearing update".to_string())
    })?;
    let sender = msg
        .sender
        .as_ref()
        .ok_or_else(|| Error::MalformedUpdate("message has no sender".to_string()))?;
    Ok((
        sender.id.to_string(),
        msg.chat.id.to_string(),
        serde_json::to_value(sender)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tmp_store(prefix: &str) -> FileStore {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let pid = std::process::id();
        FileStore::new(format!("/tmp/{prefix}-{pid}-{ts}.json"))
    }

    fn update_from(sender_id: i64, chat_id: i64) -> Update {
        Update::normalize(json!({
            "update_id": 1,
            "message": {
                "message_id": 1,
                "chat": { "id": chat_id },
                "from": { "id": sender_id, "first_name": "Ada" },
                "text": "hi"
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn file_store_roundtrip_and_has() {
        let store = tmp_store("tgsdk-store");
        assert!(!store.has("42").await.unwrap());

        store
            .set("42", json!({"name": "ada"}), Duration::ZERO)
            .await
            .unwrap();
        assert!(store.has("42").await.unwrap());
        assert_eq!(store.get("42").await.unwrap().unwrap()["name"], "ada");
    }

    #[tokio::test]
    async fn file_store_expired_entry_reads_absent_and_is_compacted() {
        let store = tmp_store("tgsdk-store-ttl");
        store
            .set("short", json!(1), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(store.has("short").await.unwrap());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!store.has("short").await.unwrap());

        // The next write drops the expired entry from the document.
        store.set("other", json!(2), Duration::ZERO).await.unwrap();
        let doc = std::fs::read_to_string(&store.path).unwrap();
        assert!(!doc.contains("short"));
        assert!(doc.contains("other"));
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let sessions = Sessions::new(Arc::new(tmp_store("tgsdk-sessions")));
        let u = update_from(42, 9);

        sessions
            .set(&u, json!({"step": "asked_name"}), Duration::ZERO)
            .await
            .unwrap();
        let got = sessions.get(&u).await.unwrap().unwrap();
        assert_eq!(got["step"], "asked_name");
    }

    #[tokio::test]
    async fn slots_are_namespaced_by_chat() {
        let sessions = Sessions::new(Arc::new(tmp_store("tgsdk-sessions-ns")));
        let in_chat_a = update_from(42, 1);
        let in_chat_b = update_from(42, 2);

        sessions
            .set(&in_chat_a, json!("a"), Duration::ZERO)
            .await
            .unwrap();
        sessions
            .set(&in_chat_b, json!("b"), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(sessions.get(&in_chat_a).await.unwrap(), Some(json!("a")));
        assert_eq!(sessions.get(&in_chat_b).await.unwrap(), Some(json!("b")));
    }

    #[tokio::test]
    async fn slot_expires_after_ttl() {
        let sessions = Sessions::new(Arc::new(tmp_store("tgsdk-sessions-ttl")));
        let u = update_from(42, 9);

        sessions
            .set(&u, json!("soon gone"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(sessions.get(&u).await.unwrap(), Some(json!("soon gone")));

        let later = Utc::now() + chrono::Duration::seconds(2);
        assert_eq!(sessions.get_at(&u, later).await.unwrap(), None);
    }

    #[tokio::test]
    async fn slot_expires_in_real_time_too() {
        let sessions = Sessions::new(Arc::new(tmp_store("tgsdk-sessions-sleep")));
        let u = update_from(42, 9);

        sessions
            .set(&u, json!(1), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(sessions.get(&u).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(sessions.get(&u).await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_for_unknown_sender_is_none_not_error() {
        let sessions = Sessions::new(Arc::new(tmp_store("tgsdk-sessions-miss")));
        let u = update_from(7, 7);
        assert_eq!(sessions.get(&u).await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_writes_for_one_sender_keep_both_slots() {
        let sessions = Arc::new(Sessions::new(Arc::new(tmp_store("tgsdk-sessions-race"))));
        let in_chat_a = update_from(42, 1);
        let in_chat_b = update_from(42, 2);

        let (ra, rb) = tokio::join!(
            sessions.set(&in_chat_a, json!("a"), Duration::ZERO),
            sessions.set(&in_chat_b, json!("b"), Duration::ZERO),
        );
        ra.unwrap();
        rb.unwrap();

        assert_eq!(sessions.get(&in_chat_a).await.unwrap(), Some(json!("a")));
        assert_eq!(sessions.get(&in_chat_b).await.unwrap(), Some(json!("b")));
    }

    #[tokio::test]
    async fn session_access_requires_sender() {
        let sessions = Sessions::new(Arc::new(tmp_store("tgsdk-sessions-bad")));
        let u = Update::normalize(json!({
            "update_id": 1,
            "message": { "message_id": 1, "chat": { "id": 1 }, "text": "hi" }
        }))
        .unwrap();

        let err = sessions.get(&u).await.unwrap_err();
        assert!(matches!(err, Error::MalformedUpdate(_)));
    }
}
