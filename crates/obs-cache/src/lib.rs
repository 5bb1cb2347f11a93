//! Write-through encrypted session cache (§4.7).
//!
//! [`ByteCache`] is the generic byte-oriented port any backend (Redis,
//! in-memory, ...) implements. [`SessionCache`] layers session
//! (de)serialisation and authenticated encryption on top of it: a decrypt or
//! decode failure is treated as a cache miss rather than an error, so a key
//! rotation or corrupted entry never surfaces as a hard failure to callers.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cipher;
pub mod memory;

use std::time::Duration;

use obs_core::{ChatHistoryEntry, SessionData};
use obs_error::ObsError;
use tracing::warn;

pub use cipher::{ChaChaCipher, Cipher, NoopCipher};
pub use memory::InMemoryByteCache;

/// Generic byte-oriented cache port. Implementations own TTL and eviction;
/// callers never see backend-specific types.
#[async_trait::async_trait]
pub trait ByteCache: Send + Sync {
    /// Fetches the raw bytes stored under `key`, or `None` if absent/expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ObsError>;
    /// Stores `value` under `key` with the given time-to-live.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), ObsError>;
    /// Removes the entry stored under `key`, if any.
    async fn delete(&self, key: &str) -> Result<(), ObsError>;
    /// Removes every entry whose key matches `pattern`.
    async fn delete_pattern(&self, pattern: &str) -> Result<(), ObsError>;
    /// Checks backend connectivity.
    async fn ping(&self) -> Result<(), ObsError>;
    /// Releases any resources held by the backend (connection pools, etc.).
    async fn close(&self) -> Result<(), ObsError>;
}

#[async_trait::async_trait]
impl<T: ByteCache + ?Sized> ByteCache for &T {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ObsError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), ObsError> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), ObsError> {
        (**self).delete(key).await
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<(), ObsError> {
        (**self).delete_pattern(pattern).await
    }

    async fn ping(&self) -> Result<(), ObsError> {
        (**self).ping().await
    }

    async fn close(&self) -> Result<(), ObsError> {
        (**self).close().await
    }
}

/// Encrypted, JSON-encoded [`SessionData`] cache over a [`ByteCache`] backend.
pub struct SessionCache<B, C> {
    backend: B,
    cipher: C,
}

impl<B: ByteCache, C: Cipher> SessionCache<B, C> {
    /// Builds a session cache over `backend`, encrypting entries with `cipher`.
    pub fn new(backend: B, cipher: C) -> Self {
        Self { backend, cipher }
    }

    /// Fetches the session for the given identity triple.
    ///
    /// Returns `Ok(None)` both when no entry exists and when an entry exists
    /// but fails to decrypt or decode — in the latter case the unusable entry
    /// is removed so it doesn't keep failing on every subsequent read.
    pub async fn get(&self, tenant_id: &str, user_id: &str, conversation_id: &str) -> Result<Option<SessionData>, ObsError> {
        let key = SessionData::cache_key(tenant_id, user_id, conversation_id);
        let Some(raw) = self.backend.get(&key).await? else {
            return Ok(None);
        };

        let Some(plaintext) = self.cipher.decrypt(&raw) else {
            warn!(target: "obs.cache", %key, "session cache entry failed to decrypt, treating as miss");
            self.backend.delete(&key).await?;
            return Ok(None);
        };

        match serde_json::from_slice::<SessionData>(&plaintext) {
            Ok(session) => Ok(Some(session)),
            Err(_) => {
                warn!(target: "obs.cache", %key, "session cache entry failed to decode, treating as miss");
                self.backend.delete(&key).await?;
                Ok(None)
            }
        }
    }

    /// Encrypts and stores `session` with the given time-to-live.
    pub async fn set(&self, session: &SessionData, ttl: Duration) -> Result<(), ObsError> {
        let plaintext =
            serde_json::to_vec(session).map_err(|e| ObsError::new(obs_error::ErrorKind::Internal, "failed to encode session").with_source(e))?;
        let ciphertext = self.cipher.encrypt(&plaintext)?;
        self.backend.set(&session.key(), ciphertext, ttl).await
    }

    /// Removes the session for the given identity triple.
    pub async fn delete(&self, tenant_id: &str, user_id: &str, conversation_id: &str) -> Result<(), ObsError> {
        self.backend.delete(&SessionData::cache_key(tenant_id, user_id, conversation_id)).await
    }

    /// Appends `new_entries` to the cached session's chat history and writes
    /// it back with a fresh `ttl`. Fails with [`obs_error::ErrorKind::NotFound`]
    /// if no session is currently cached.
    pub async fn update_chat_history(
        &self,
        tenant_id: &str,
        user_id: &str,
        conversation_id: &str,
        new_entries: Vec<ChatHistoryEntry>,
        ttl: Duration,
    ) -> Result<(), ObsError> {
        let mut session = self
            .get(tenant_id, user_id, conversation_id)
            .await?
            .ok_or_else(|| ObsError::not_found("no cached session for this conversation"))?;

        session.push_chat_history(new_entries);
        session.updated_at = chrono::Utc::now();
        self.set(&session, ttl).await
    }
}
