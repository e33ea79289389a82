//! In-memory key store for testing.
//!
//! This backend keeps all records in a `BTreeMap` behind a `RwLock`. It is
//! not persistent — all data is lost when the process exits. Use it for unit
//! tests, integration tests and local CLI runs where you need a real
//! [`KeyStore`] without a database.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::listing::collect_names;
use crate::{CallContext, KeyListing, KeyStore, KeyStoreState, Record, StoreError, validate_name};

/// An in-memory key store backed by a `BTreeMap`.
///
/// Thread-safe and async-compatible. Records are sorted by name, so prefix
/// listing walks a single `BTreeMap::range`. Clones share the same data.
///
/// # Examples
///
/// ```
/// # use keystore_backend::{CallContext, KeyStore, MemoryKeyStore};
/// # #[tokio::main]
/// # async fn main() {
/// let store = MemoryKeyStore::new();
/// let ctx = CallContext::new();
/// store.create(&ctx, "tenant/a/key", b"secret").await.unwrap();
/// let val = store.get(&ctx, "tenant/a/key").await.unwrap();
/// assert_eq!(val, b"secret".to_vec());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStore {
    records: Arc<RwLock<BTreeMap<String, Record>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryKeyStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the full record stored under `name`, if any.
    pub async fn record(&self, name: &str) -> Option<Record> {
        self.records.read().await.get(name).cloned()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::closed());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl KeyStore for MemoryKeyStore {
    async fn status(&self, ctx: &CallContext) -> Result<KeyStoreState, StoreError> {
        self.ensure_open()?;
        let start = Instant::now();
        ctx.run(async {
            drop(self.records.read().await);
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Unavailable {
            reason: e.to_string(),
        })?;
        Ok(KeyStoreState {
            latency: start.elapsed(),
        })
    }

    async fn create(&self, ctx: &CallContext, name: &str, value: &[u8]) -> Result<(), StoreError> {
        validate_name(name)?;
        self.ensure_open()?;
        ctx.run(async {
            let mut records = self.records.write().await;
            match records.entry(name.to_owned()) {
                Entry::Occupied(_) => Err(StoreError::KeyExists {
                    name: name.to_owned(),
                }),
                Entry::Vacant(slot) => {
                    slot.insert(Record::new(name, value));
                    Ok(())
                }
            }
        })
        .await?;
        debug!(name, "key created");
        Ok(())
    }

    async fn get(&self, ctx: &CallContext, name: &str) -> Result<Vec<u8>, StoreError> {
        validate_name(name)?;
        self.ensure_open()?;
        ctx.run(async {
            let records = self.records.read().await;
            records
                .get(name)
                .map(|r| r.value.clone())
                .ok_or_else(|| StoreError::KeyNotFound {
                    name: name.to_owned(),
                })
        })
        .await
    }

    async fn delete(&self, ctx: &CallContext, name: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        self.ensure_open()?;
        ctx.run(async {
            let mut records = self.records.write().await;
            match records.remove(name) {
                Some(_) => Ok(()),
                None => Err(StoreError::KeyNotFound {
                    name: name.to_owned(),
                }),
            }
        })
        .await?;
        debug!(name, "key deleted");
        Ok(())
    }

    async fn list(
        &self,
        ctx: &CallContext,
        prefix: &str,
        limit: usize,
    ) -> Result<KeyListing, StoreError> {
        self.ensure_open()?;
        let names: Vec<String> = {
            let records = self.records.read().await;
            let take = if limit == 0 { usize::MAX } else { limit };
            records
                .range(prefix.to_owned()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .take(take)
                .map(|(k, _)| k.clone())
                .collect()
        };
        collect_names(ctx, stream::iter(names.into_iter().map(Ok)), limit).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::Connection {
                target: "memory".to_owned(),
                reason: "key store already closed".to_owned(),
            });
        }
        debug!("in-memory key store closed");
        Ok(())
    }
}
