//! Pluggable secret/key store.
//!
//! This crate defines the [`KeyStore`] trait — a name-addressed store for
//! opaque secret bytes with exclusive creation, prefix listing and a liveness
//! probe. It knows nothing about key derivation or encryption; values are
//! stored and returned verbatim.
//!
//! Two implementations are provided:
//!
//! - [`MongoKeyStore`] — one document per key in a MongoDB collection (feature `mongodb-backend`)
//! - [`MemoryKeyStore`] — in-memory, for testing and local runs
//!
//! Use [`connect`] to build whichever backend a [`StoreConfig`] selects.

mod config;
mod context;
mod error;
mod listing;
mod memory;
#[cfg(feature = "mongodb-backend")]
mod mongodb_backend;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

pub use config::{MongoConfig, StoreBackendType, StoreConfig};
pub use context::CallContext;
pub use error::{ErrorKind, StoreError};
pub use listing::KeyListing;
pub use memory::MemoryKeyStore;
#[cfg(feature = "mongodb-backend")]
pub use mongodb_backend::MongoKeyStore;

/// A single stored secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Unique name, the primary key.
    pub name: String,
    /// Opaque secret payload.
    pub value: Vec<u8>,
    /// Insertion time (UTC). Never changes after creation.
    pub created: DateTime<Utc>,
}

impl Record {
    /// Build a record stamped with the current UTC time.
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            created: Utc::now(),
        }
    }
}

/// Health report returned by [`KeyStore::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStoreState {
    /// Round-trip time of the liveness probe.
    pub latency: Duration,
}

/// A pluggable secret store.
///
/// Names are arbitrary non-empty UTF-8 strings and may contain `/`. Values
/// are opaque byte arrays, possibly empty. There is no update: a name is
/// created once and deleted once.
///
/// Every data operation takes a [`CallContext`]; when its deadline passes or
/// its token is cancelled, the in-flight backend call is dropped and the
/// operation fails with [`StoreError::Cancelled`].
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait KeyStore: Send + Sync + 'static {
    /// Probe the backend and report its round-trip latency.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the probe fails or does not
    /// finish before the context fires.
    async fn status(&self, ctx: &CallContext) -> Result<KeyStoreState, StoreError>;

    /// Store `value` under `name`, failing if `name` is taken.
    ///
    /// Exclusive per name: of two concurrent creates for one name exactly
    /// one succeeds. A failed create leaves nothing behind.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::KeyExists`] if `name` is already stored,
    /// [`StoreError::InvalidKey`] for an empty name, and
    /// [`StoreError::Io`] for any other backend failure.
    async fn create(&self, ctx: &CallContext, name: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Return the value stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::KeyNotFound`] if `name` is not stored and
    /// [`StoreError::Io`] if the lookup or decoding fails.
    async fn get(&self, ctx: &CallContext, name: &str) -> Result<Vec<u8>, StoreError>;

    /// Remove `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::KeyNotFound`] if nothing was removed and
    /// [`StoreError::Io`] if the backend fails.
    async fn delete(&self, ctx: &CallContext, name: &str) -> Result<(), StoreError>;

    /// List names starting with `prefix`, at most `limit` of them.
    ///
    /// An empty prefix matches every name and a `limit` of `0` returns all
    /// matches. Order is whatever the backend yields.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the scan fails.
    async fn list(
        &self,
        ctx: &CallContext,
        prefix: &str,
        limit: usize,
    ) -> Result<KeyListing, StoreError>;

    /// Release the backend connection.
    ///
    /// Call once, after all in-flight operations have completed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the store was already closed.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Build the backend selected by `config`.
///
/// # Errors
///
/// Returns [`StoreError::Connection`] if the configuration is malformed, the
/// client cannot be built, or the selected backend is not compiled in.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn KeyStore>, StoreError> {
    match &config.backend {
        StoreBackendType::Memory => {
            info!("using in-memory key store (data will not persist)");
            Ok(Arc::new(MemoryKeyStore::new()))
        }
        #[cfg(feature = "mongodb-backend")]
        StoreBackendType::MongoDb(mongo) => {
            info!(
                database = %mongo.database,
                collection = %mongo.collection,
                "using MongoDB key store"
            );
            Ok(Arc::new(MongoKeyStore::connect(mongo).await?))
        }
        #[cfg(not(feature = "mongodb-backend"))]
        StoreBackendType::MongoDb(mongo) => Err(StoreError::Connection {
            target: format!("{}/{}", mongo.database, mongo.collection),
            reason: "MongoDB backend requested but feature 'mongodb-backend' is not enabled"
                .to_owned(),
        }),
    }
}

/// Reject names the contract does not allow.
pub(crate) fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::InvalidKey {
            reason: "name must not be empty".to_owned(),
        });
    }
    Ok(())
}
