//! TTL cache over the shared store.
//!
//! Values are read back as JSON when the stored text parses as JSON and as
//! a plain string otherwise, so `"42"` reads as a number and `"hello"` as a
//! string. Every write sets a fresh TTL. Keys sit under the keyspace
//! namespace, if one is configured.

use crate::keys::Keyspace;
use crate::store::{SharedStore, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// String form a value is stored under.
fn encode(value: &Value) -> StoreResult<String> {
    Ok(match value {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => serde_json::to_string(value)?,
        Value::Null | Value::Bool(_) | Value::Number(_) => value.to_string(),
    })
}

fn decode(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

/// Read-through TTL cache.
#[derive(Clone)]
pub struct Cache {
    store: SharedStore,
    keys: Keyspace,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl Cache {
    /// Create a cache. Keys are used as given under `keys`' namespace.
    #[must_use]
    pub const fn new(store: SharedStore, keys: Keyspace) -> Self {
        Self { store, keys }
    }

    fn key(&self, key: &str) -> String {
        self.keys.key([key])
    }

    /// Fetch `key`; `None` when absent or expired.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.store.get(&self.key(key)).await?.map(decode))
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    pub async fn set(&self, key: &str, value: &Value, ttl: Duration) -> StoreResult<()> {
        self.store.set_ex(&self.key(key), &encode(value)?, ttl).await
    }

    /// Remove `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns a store error if the delete fails.
    pub async fn invalidate(&self, key: &str) -> StoreResult<()> {
        self.store.del(&self.key(key)).await?;
        Ok(())
    }

    /// Fetch `key` and deserialize it into `T`.
    ///
    /// A value that does not fit `T` is treated as a miss.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        Ok(self
            .get(key)
            .await?
            .and_then(|value| match serde_json::from_value(value) {
                Ok(typed) => Some(typed),
                Err(err) => {
                    debug!(key, error = %err, "Cached value has unexpected shape");
                    None
                }
            }))
    }

    /// Serialize `value` and store it under `key` for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> StoreResult<()> {
        self.set(key, &serde_json::to_value(value)?, ttl).await
    }

    /// Return the cached `T`, or compute it with `produce`, cache it and
    /// return it.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read or write fails, or the error
    /// `produce` returned.
    pub async fn get_or_insert_with<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        produce: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Sync,
        E: From<crate::store::StoreError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get_as::<T>(key).await? {
            debug!(key, "Cache hit");
            return Ok(hit);
        }
        let value = produce().await?;
        self.set_json(key, &value, ttl).await?;
        Ok(value)
    }
}
