//! Collection façade.
//!
//! [`CollectionStore`] is the single entry point consumers use: reads go
//! through the cache, mutations are validated, staged in the cache
//! immediately and handed to the write queue. Mutating operations return a
//! [`StagedWrite`], which exposes the locally visible result right away and
//! the durable confirmation on demand.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use carehub_persistence::remote::memory::InMemoryDocumentStore;
//! use carehub_persistence::schema::catalog::platform_schemas;
//! use carehub_persistence::{CollectionStore, StoreConfig};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), carehub_persistence::StorageError> {
//! let store = CollectionStore::new(
//!     StoreConfig::new("carehub", "platform-data"),
//!     platform_schemas(),
//!     Arc::new(InMemoryDocumentStore::new()),
//! )?;
//!
//! let doctor = store
//!     .insert("doctors", json!({"name": "Dr. Okafor", "specialty": "cardiology"}))
//!     .await?
//!     .durable()
//!     .await?;
//! assert_eq!(doctor["id"], "1");
//!
//! let found = store.find_by_id("doctors", "1").await?;
//! assert_eq!(found.unwrap()["specialty"], "cardiology");
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::audit::{AuditAction, AuditEntry, AuditLog};
use crate::cache::CollectionCache;
use crate::config::StoreConfig;
use crate::document::{
    self, CREATED_AT_FIELD, Document, ID_FIELD, UID_FIELD, UPDATED_AT_FIELD,
};
use crate::error::{ConcurrencyError, ResourceError, StorageResult, ValidationError};
use crate::queue::{PendingWrite, WriteQueue, WriteReceipt};
use crate::remote::DocumentStoreApi;
use crate::schema::SchemaRegistry;
use crate::subscribe::{SubscriberRegistry, SubscriptionId};

/// Selection criteria for [`CollectionStore::find`].
pub enum Filter {
    /// Every document.
    All,
    /// Documents whose fields equal every listed value.
    Equals(Document),
    /// Documents accepted by the predicate.
    Matching(Box<dyn Fn(&Document) -> bool + Send + Sync>),
}

impl Filter {
    pub fn matching<F>(predicate: F) -> Self
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        Filter::Matching(Box::new(predicate))
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Equals(fields) => document::matches_all(doc, fields),
            Filter::Matching(predicate) => predicate(doc),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => write!(f, "All"),
            Filter::Equals(fields) => f.debug_tuple("Equals").field(fields).finish(),
            Filter::Matching(_) => write!(f, "Matching(<predicate>)"),
        }
    }
}

/// Result of a mutation that is visible locally but may not be durable yet.
#[derive(Debug)]
#[must_use = "a staged write reports failures only through durable() or into_parts()"]
pub struct StagedWrite<T> {
    value: T,
    pending: PendingWrite,
}

impl<T> StagedWrite<T> {
    fn new(value: T, pending: PendingWrite) -> Self {
        Self { value, pending }
    }

    /// The mutation's result as already visible to readers of this store.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Waits until the write is durable and returns the value.
    ///
    /// Each queued write carries the whole collection as staged at the time.
    /// If this write fails while a later write to the same collection is
    /// already queued, the later write still persists this mutation: an error
    /// here means "not confirmed", not "rolled back". Re-read before retrying.
    pub async fn durable(self) -> StorageResult<T> {
        self.pending.wait().await?;
        Ok(self.value)
    }

    pub fn into_parts(self) -> (T, PendingWrite) {
        (self.value, self.pending)
    }

    /// Waits until the write is durable and returns the value with its receipt.
    pub async fn confirm(self) -> StorageResult<(T, WriteReceipt)> {
        let receipt = self.pending.wait().await?;
        Ok((self.value, receipt))
    }
}

struct StoreInner {
    config: StoreConfig,
    schemas: SchemaRegistry,
    cache: Arc<CollectionCache>,
    queue: WriteQueue,
    subscribers: Arc<SubscriberRegistry>,
    audit: AuditLog,
    staging_locks: parking_lot::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Collection-oriented CRUD over a remote document store.
#[derive(Clone)]
pub struct CollectionStore {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for CollectionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionStore")
            .field("owner", &self.inner.config.owner)
            .field("repo", &self.inner.config.repo)
            .field("branch", &self.inner.config.branch)
            .field("cache", &self.inner.cache)
            .finish()
    }
}

impl CollectionStore {
    /// Creates a store over `remote`. Must be called within a tokio runtime;
    /// the write queue worker is spawned on it.
    pub fn new(
        config: StoreConfig,
        schemas: SchemaRegistry,
        remote: Arc<dyn DocumentStoreApi>,
    ) -> StorageResult<Self> {
        config.validate()?;

        let subscribers = Arc::new(SubscriberRegistry::new());
        let cache = Arc::new(CollectionCache::new(
            Arc::clone(&remote),
            Arc::clone(&subscribers),
        ));
        let queue = WriteQueue::spawn(remote, Arc::clone(&cache), &config)?;
        let audit = AuditLog::new(config.audit_capacity);

        Ok(Self {
            inner: Arc::new(StoreInner {
                config,
                schemas,
                cache,
                queue,
                subscribers,
                audit,
                staging_locks: parking_lot::Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Creates a store backed by the repository contents API.
    #[cfg(feature = "github")]
    pub fn github(config: StoreConfig, schemas: SchemaRegistry) -> StorageResult<Self> {
        config.validate()?;
        let client = crate::remote::github::ContentsApiClient::new(&config)?;
        Self::new(config, schemas, Arc::new(client))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.inner.schemas
    }

    /// All documents of `collection`. `force` bypasses the cache unless
    /// local writes are still pending.
    pub async fn get(&self, collection: &str, force: bool) -> StorageResult<Vec<Document>> {
        let path = self.inner.config.collection_path(collection)?;
        self.inner.cache.read(collection, &path, force).await
    }

    pub async fn find(&self, collection: &str, filter: Filter) -> StorageResult<Vec<Document>> {
        let documents = self.get(collection, false).await?;
        Ok(documents
            .into_iter()
            .filter(|doc| filter.matches(doc))
            .collect())
    }

    /// Documents whose fields equal every entry of `fields`.
    pub async fn find_where_equal(
        &self,
        collection: &str,
        fields: Document,
    ) -> StorageResult<Vec<Document>> {
        self.find(collection, Filter::Equals(fields)).await
    }

    pub async fn find_where_matching<F>(
        &self,
        collection: &str,
        predicate: F,
    ) -> StorageResult<Vec<Document>>
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        self.find(collection, Filter::matching(predicate)).await
    }

    /// The document whose `id` or `uid` equals `key`.
    pub async fn find_by_id(&self, collection: &str, key: &str) -> StorageResult<Option<Document>> {
        let documents = self.get(collection, false).await?;
        Ok(documents
            .into_iter()
            .find(|doc| document::matches_key(doc, key)))
    }

    /// Appends a document.
    ///
    /// Schema defaults are merged under `data` and required fields checked
    /// before the remote is contacted. `id`, `uid` and missing timestamps are
    /// assigned by the store.
    pub async fn insert(&self, collection: &str, data: Value) -> StorageResult<StagedWrite<Document>> {
        let path = self.inner.config.collection_path(collection)?;
        let fields = into_document(collection, data)?;
        let mut doc = self.inner.schemas.apply_defaults(collection, &fields);
        self.inner.schemas.validate(collection, &doc)?;

        let lock = self.staging_lock(collection);
        let _staging = lock.lock().await;

        let mut documents = self.inner.cache.read(collection, &path, false).await?;
        let id = document::next_id(&documents).ok_or_else(|| ValidationError::IdSpaceExhausted {
            collection: collection.to_string(),
        })?;
        doc.insert(ID_FIELD.to_string(), Value::String(id));
        doc.insert(UID_FIELD.to_string(), Value::String(document::new_uid()));
        let now = document::timestamp_now();
        doc.entry(CREATED_AT_FIELD)
            .or_insert_with(|| Value::String(now.clone()));
        doc.entry(UPDATED_AT_FIELD).or_insert(Value::String(now));
        documents.push(doc.clone());

        let pending = self.commit(collection, &path, documents)?;
        self.inner
            .audit
            .record(collection, AuditAction::Insert, Value::Object(doc.clone()));
        debug!(collection, id = ?doc.get(ID_FIELD), "document inserted");
        Ok(StagedWrite::new(doc, pending))
    }

    /// Shallow-merges `changes` into the document addressed by `key`.
    pub async fn update(
        &self,
        collection: &str,
        key: &str,
        changes: Value,
    ) -> StorageResult<StagedWrite<Document>> {
        self.modify(collection, key, changes, |_| true).await
    }

    /// Like [`update`](Self::update), but only if `precondition` accepts the
    /// current document. Fails with [`ConcurrencyError::PreconditionFailed`]
    /// otherwise. The check and the staged change are atomic with respect to
    /// other mutations of this store.
    pub async fn update_if<P>(
        &self,
        collection: &str,
        key: &str,
        precondition: P,
        changes: Value,
    ) -> StorageResult<StagedWrite<Document>>
    where
        P: FnOnce(&Document) -> bool,
    {
        self.modify(collection, key, changes, precondition).await
    }

    /// Removes every document addressed by `key` and returns them.
    ///
    /// Nothing is written when no document matches.
    pub async fn delete(
        &self,
        collection: &str,
        key: &str,
    ) -> StorageResult<StagedWrite<Vec<Document>>> {
        let path = self.inner.config.collection_path(collection)?;

        let lock = self.staging_lock(collection);
        let _staging = lock.lock().await;

        let documents = self.inner.cache.read(collection, &path, true).await?;
        let (removed, kept): (Vec<Document>, Vec<Document>) = documents
            .into_iter()
            .partition(|doc| document::matches_key(doc, key));

        if removed.is_empty() {
            debug!(collection, key, "delete matched nothing");
            return Ok(StagedWrite::new(
                removed,
                PendingWrite::skipped(collection, kept.len()),
            ));
        }

        let pending = self.commit(collection, &path, kept)?;
        for doc in &removed {
            self.inner
                .audit
                .record(collection, AuditAction::Delete, Value::Object(doc.clone()));
        }
        debug!(collection, key, removed = removed.len(), "documents deleted");
        Ok(StagedWrite::new(removed, pending))
    }

    /// Registers `callback` for changes to `collection`.
    pub fn subscribe<F>(&self, collection: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&[Document]) + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(collection, Arc::new(callback))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.unsubscribe(id)
    }

    /// Recent mutations of `collection`, oldest first.
    pub fn audit_trail(&self, collection: &str) -> Vec<AuditEntry> {
        self.inner.audit.entries(collection)
    }

    async fn modify<P>(
        &self,
        collection: &str,
        key: &str,
        changes: Value,
        precondition: P,
    ) -> StorageResult<StagedWrite<Document>>
    where
        P: FnOnce(&Document) -> bool,
    {
        let path = self.inner.config.collection_path(collection)?;
        let changes = into_document(collection, changes)?;

        let lock = self.staging_lock(collection);
        let _staging = lock.lock().await;

        let mut documents = self.inner.cache.read(collection, &path, true).await?;
        let Some(index) = documents
            .iter()
            .position(|doc| document::matches_key(doc, key))
        else {
            return Err(ResourceError::NotFound {
                collection: collection.to_string(),
                key: key.to_string(),
            }
            .into());
        };

        if !precondition(&documents[index]) {
            return Err(ConcurrencyError::PreconditionFailed {
                collection: collection.to_string(),
                key: key.to_string(),
            }
            .into());
        }

        let mut merged = document::shallow_merge(&documents[index], &changes);
        merged.insert(
            UPDATED_AT_FIELD.to_string(),
            Value::String(document::timestamp_now()),
        );
        self.inner.schemas.validate(collection, &merged)?;
        documents[index] = merged.clone();

        let pending = self.commit(collection, &path, documents)?;
        self.inner
            .audit
            .record(collection, AuditAction::Update, Value::Object(merged.clone()));
        debug!(collection, key, "document updated");
        Ok(StagedWrite::new(merged, pending))
    }

    /// Stages `documents` and queues them for writing, in that order.
    fn commit(
        &self,
        collection: &str,
        path: &str,
        documents: Vec<Document>,
    ) -> StorageResult<PendingWrite> {
        self.inner.cache.stage(collection, documents.clone());
        match self.inner.queue.enqueue(collection, path, documents) {
            Ok(pending) => Ok(pending),
            Err(err) => {
                self.inner.cache.write_failed(collection);
                Err(err)
            }
        }
    }

    fn staging_lock(&self, collection: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.inner.staging_locks.lock();
        Arc::clone(locks.entry(collection.to_string()).or_default())
    }
}

fn into_document(collection: &str, value: Value) -> Result<Document, ValidationError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ValidationError::NotAnObject {
            collection: collection.to_string(),
        }),
    }
}
