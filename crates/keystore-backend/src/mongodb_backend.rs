//! MongoDB key store backend.
//!
//! Stores one document per key in a single collection:
//!
//! ```text
//! { "_id": <name>, "value": <BinData>, "created": <UTC datetime> }
//! ```
//!
//! The name is the document `_id`, so the collection's built-in unique index
//! on `_id` is what makes creation exclusive. Every operation is a single
//! driver primitive (insert-one, find-one, delete-one, find) and no
//! transactions are used.
//!
//! Feature-gated behind `mongodb-backend`. The driver is fully async and its
//! client is an internally pooled, cheaply clonable handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{self, Binary, Document, doc};
use mongodb::error::{Error as MongoError, ErrorKind as MongoErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, ReadPreference, SelectionCriteria};
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::listing::collect_names;
use crate::{
    CallContext, KeyListing, KeyStore, KeyStoreState, MongoConfig, Record, StoreError,
    validate_name,
};

/// Server error code for a unique index violation.
const DUPLICATE_KEY_CODE: i32 = 11000;

/// On-disk shape of a key record.
#[derive(Debug, Serialize, Deserialize)]
struct KeyDocument {
    #[serde(rename = "_id")]
    name: String,
    value: Binary,
    created: bson::DateTime,
}

/// Projection used by prefix scans.
#[derive(Debug, Deserialize)]
struct KeyName {
    #[serde(rename = "_id")]
    name: String,
}

impl From<Record> for KeyDocument {
    fn from(record: Record) -> Self {
        Self {
            name: record.name,
            value: Binary {
                subtype: BinarySubtype::Generic,
                bytes: record.value,
            },
            created: bson::DateTime::from_millis(record.created.timestamp_millis()),
        }
    }
}

impl TryFrom<KeyDocument> for Record {
    type Error = StoreError;

    fn try_from(document: KeyDocument) -> Result<Self, Self::Error> {
        let millis = document.created.timestamp_millis();
        let created =
            DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| StoreError::Io {
                operation: "decode",
                key: document.name.clone(),
                reason: format!("creation time {millis}ms is out of range"),
            })?;
        Ok(Self {
            name: document.name,
            value: document.value.bytes,
            created,
        })
    }
}

/// A key store backed by a MongoDB collection.
///
/// Safe to share across tasks; clones share the same client and connection
/// pool. The driver connects lazily, so [`connect`](Self::connect) succeeds
/// against an unreachable server and [`status`](KeyStore::status) is what
/// reports reachability.
///
/// # Examples
///
/// ```no_run
/// # use keystore_backend::{MongoConfig, MongoKeyStore};
/// # #[tokio::main]
/// # async fn main() {
/// let store = MongoKeyStore::connect(&MongoConfig {
///     connection_string: "mongodb://localhost:27017".to_owned(),
///     database: "kes".to_owned(),
///     collection: "keys".to_owned(),
///     ..MongoConfig::default()
/// })
/// .await
/// .unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct MongoKeyStore {
    client: Client,
    keys: Collection<KeyDocument>,
    names: Collection<KeyName>,
    target: String,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for MongoKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoKeyStore")
            .field("target", &self.target)
            .field("client", &"[Client]")
            .finish_non_exhaustive()
    }
}

impl MongoKeyStore {
    /// Build a client for `config` and bind the key collection.
    ///
    /// Does not contact the server and does not check that the collection
    /// exists; MongoDB creates it on first insert.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the database or collection name
    /// is empty, the connection string cannot be parsed, or the driver
    /// rejects the resulting options.
    pub async fn connect(config: &MongoConfig) -> Result<Self, StoreError> {
        let target = format!("{}/{}", config.database, config.collection);
        if config.database.is_empty() || config.collection.is_empty() {
            return Err(StoreError::Connection {
                target,
                reason: "database and collection names must not be empty".to_owned(),
            });
        }

        let mut options = ClientOptions::parse(&config.connection_string)
            .await
            .map_err(|e| StoreError::Connection {
                target: target.clone(),
                reason: format!("invalid connection string: {e}"),
            })?;
        if let Some(app_name) = &config.app_name {
            options.app_name = Some(app_name.clone());
        }
        if let Some(timeout) = config.connect_timeout() {
            options.connect_timeout = Some(timeout);
        }
        if let Some(timeout) = config.server_selection_timeout() {
            options.server_selection_timeout = Some(timeout);
        }

        let client = Client::with_options(options).map_err(|e| StoreError::Connection {
            target: target.clone(),
            reason: e.to_string(),
        })?;
        let keys = client
            .database(&config.database)
            .collection::<KeyDocument>(&config.collection);
        let names = keys.clone_with_type::<KeyName>();

        debug!(store = %target, "MongoDB client created");
        Ok(Self {
            client,
            keys,
            names,
            target,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Return the full record stored under `name`.
    ///
    /// # Errors
    ///
    /// Same as [`KeyStore::get`].
    pub async fn record(&self, ctx: &CallContext, name: &str) -> Result<Record, StoreError> {
        validate_name(name)?;
        self.ensure_open()?;
        let found = ctx
            .run(async {
                self.keys
                    .find_one(doc! { "_id": name })
                    .await
                    .map_err(|e| translate_error("read", name, &e))
            })
            .await?;

        let Some(document) = found else {
            return Err(StoreError::KeyNotFound {
                name: name.to_owned(),
            });
        };
        Record::try_from(document)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::closed());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl KeyStore for MongoKeyStore {
    async fn status(&self, ctx: &CallContext) -> Result<KeyStoreState, StoreError> {
        self.ensure_open()?;
        let start = Instant::now();
        let admin = self.client.database("admin");
        let probe = async {
            admin
                .run_command(doc! { "ping": 1 })
                .selection_criteria(SelectionCriteria::ReadPreference(ReadPreference::Primary))
                .await
                .map(drop)
                .map_err(|e| StoreError::Unavailable {
                    reason: e.to_string(),
                })
        };

        match ctx.run(probe).await {
            Ok(()) => Ok(KeyStoreState {
                latency: start.elapsed(),
            }),
            Err(StoreError::Cancelled { reason }) => Err(StoreError::Unavailable {
                reason: format!("liveness probe did not complete: {reason}"),
            }),
            Err(e) => {
                warn!(store = %self.target, error = %e, "MongoDB liveness probe failed");
                Err(e)
            }
        }
    }

    async fn create(&self, ctx: &CallContext, name: &str, value: &[u8]) -> Result<(), StoreError> {
        validate_name(name)?;
        self.ensure_open()?;
        let document = KeyDocument::from(Record::new(name, value));
        ctx.run(async {
            self.keys
                .insert_one(&document)
                .await
                .map(drop)
                .map_err(|e| translate_error("create", name, &e))
        })
        .await?;
        debug!(name, "key created");
        Ok(())
    }

    async fn get(&self, ctx: &CallContext, name: &str) -> Result<Vec<u8>, StoreError> {
        self.record(ctx, name).await.map(|record| record.value)
    }

    async fn delete(&self, ctx: &CallContext, name: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        self.ensure_open()?;
        let result = ctx
            .run(async {
                self.keys
                    .delete_one(doc! { "_id": name })
                    .await
                    .map_err(|e| translate_error("delete", name, &e))
            })
            .await?;

        if result.deleted_count == 0 {
            return Err(StoreError::KeyNotFound {
                name: name.to_owned(),
            });
        }
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
        let mut find = self
            .names
            .find(prefix_filter(prefix))
            .projection(doc! { "_id": 1 });
        if limit > 0 {
            find = find.limit(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let cursor = ctx
            .run(async {
                find.await
                    .map_err(|e| translate_error("list keys with prefix", prefix, &e))
            })
            .await?;

        let scan_prefix = prefix.to_owned();
        let names = cursor
            .map_ok(|key| key.name)
            .map_err(move |e| translate_error("list keys with prefix", &scan_prefix, &e));
        collect_names(ctx, names, limit).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::Connection {
                target: self.target.clone(),
                reason: "key store already closed".to_owned(),
            });
        }
        self.client.clone().shutdown().await;
        info!(store = %self.target, "MongoDB key store closed");
        Ok(())
    }
}

/// Anchored, literal prefix filter on `_id`. An empty prefix matches all.
fn prefix_filter(prefix: &str) -> Document {
    if prefix.is_empty() {
        return Document::new();
    }
    doc! { "_id": { "$regex": format!("^{}", regex::escape(prefix)) } }
}

/// Map a driver error onto the store taxonomy.
///
/// This is the only place the backend inspects driver error values.
fn translate_error(operation: &'static str, key: &str, err: &MongoError) -> StoreError {
    if is_duplicate_key(err) {
        return StoreError::KeyExists {
            name: key.to_owned(),
        };
    }
    StoreError::Io {
        operation,
        key: key.to_owned(),
        reason: err.to_string(),
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        MongoErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY_CODE,
        MongoErrorKind::Command(e) => e.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use mongodb::error::{CommandError, WriteError};

    use super::*;

    const UNREACHABLE_URI: &str =
        "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=300&connectTimeoutMS=300";

    fn unreachable_config() -> MongoConfig {
        MongoConfig {
            connection_string: UNREACHABLE_URI.to_owned(),
            ..MongoConfig::default()
        }
    }

    fn write_error(code: i32, message: &str) -> MongoError {
        let error: WriteError =
            bson::from_document(doc! { "code": code, "errmsg": message }).unwrap();
        MongoError::from(MongoErrorKind::Write(WriteFailure::WriteError(error)))
    }

    #[test]
    fn duplicate_key_write_error_is_key_exists() {
        let err = write_error(11000, "E11000 duplicate key error collection: kes.keys");
        let translated = translate_error("create", "tenant/a", &err);
        assert!(
            matches!(translated, StoreError::KeyExists { ref name } if name == "tenant/a"),
            "got {translated:?}"
        );
    }

    #[test]
    fn duplicate_key_command_error_is_key_exists() {
        let error: CommandError = bson::from_document(doc! {
            "code": 11000,
            "codeName": "DuplicateKey",
            "errmsg": "E11000 duplicate key error",
        })
        .unwrap();
        let err = MongoError::from(MongoErrorKind::Command(error));
        assert!(translate_error("create", "k", &err).is_key_exists());
    }

    #[test]
    fn other_driver_errors_are_io() {
        let err = write_error(2, "BadValue");
        let translated = translate_error("create", "k", &err);
        assert!(
            matches!(translated, StoreError::Io { operation: "create", ref key, .. } if key == "k"),
            "got {translated:?}"
        );

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
        let err = MongoError::from(reset);
        assert!(matches!(translate_error("delete", "k", &err), StoreError::Io { .. }));
    }

    #[test]
    fn undecodable_document_is_io() {
        let malformed = doc! {
            "_id": "k",
            "value": "not binary",
            "created": bson::DateTime::now(),
        };
        let decode = bson::from_document::<KeyDocument>(malformed).unwrap_err();
        let translated = translate_error("read", "k", &MongoError::from(decode));
        assert!(
            matches!(translated, StoreError::Io { operation: "read", .. }),
            "got {translated:?}"
        );
    }

    #[test]
    fn empty_prefix_matches_everything() {
        assert!(prefix_filter("").is_empty());
    }

    #[test]
    fn prefix_is_anchored_and_escaped() {
        let filter = prefix_filter("tenant.a/(v1)");
        let pattern = filter
            .get_document("_id")
            .unwrap()
            .get_str("$regex")
            .unwrap();
        assert_eq!(pattern, r"^tenant\.a/\(v1\)");
    }

    #[test]
    fn record_converts_to_binary_document() {
        let record = Record::new("k", vec![0_u8, 1, 2]);
        let created = record.created.timestamp_millis();
        let document = KeyDocument::from(record);
        assert_eq!(document.name, "k");
        assert_eq!(document.value.subtype, BinarySubtype::Generic);
        assert_eq!(document.value.bytes, vec![0, 1, 2]);
        assert_eq!(document.created.timestamp_millis(), created);

        let back = Record::try_from(document).unwrap();
        assert_eq!(back.created.timestamp_millis(), created);
    }

    #[tokio::test]
    async fn connect_rejects_malformed_connection_string() {
        let err = MongoKeyStore::connect(&MongoConfig {
            connection_string: "not-a-mongodb-uri".to_owned(),
            ..MongoConfig::default()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::Connection { .. }));
    }

    #[tokio::test]
    async fn connect_rejects_empty_collection() {
        let err = MongoKeyStore::connect(&MongoConfig {
            collection: String::new(),
            ..MongoConfig::default()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::Connection { .. }));
    }

    #[tokio::test]
    async fn status_against_unreachable_server_is_unavailable() {
        let store = MongoKeyStore::connect(&unreachable_config()).await.unwrap();
        let ctx = CallContext::with_timeout(Duration::from_secs(2));
        let result = tokio::time::timeout(Duration::from_secs(10), store.status(&ctx))
            .await
            .expect("status must return before the external timeout");
        assert!(matches!(result, Err(StoreError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits_without_server() {
        let store = MongoKeyStore::connect(&unreachable_config()).await.unwrap();
        let ctx = CallContext::new();
        ctx.cancel();
        let err = store.get(&ctx, "k").await.unwrap_err();
        assert!(matches!(err, StoreError::Cancelled { .. }));
        let err = store.create(&ctx, "k", b"v").await.unwrap_err();
        assert!(matches!(err, StoreError::Cancelled { .. }));
    }
}
