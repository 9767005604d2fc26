//! Serialized write queue.
//!
//! Every collection write goes through a single worker task, so at most one
//! remote write is in flight and jobs complete in submission order. Each job
//! carries the complete array to store. An attempt fetches the freshest token
//! for the file and writes with it; a conflicting attempt is retried after the
//! drain delay until the attempt budget is spent.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::cache::CollectionCache;
use crate::config::StoreConfig;
use crate::document::Document;
use crate::error::{BackendError, ConcurrencyError, StorageError, StorageResult};
use crate::remote::{DocumentStoreApi, RemoteStoreError, VersionToken};

/// Confirmation of a durable write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    pub collection: String,
    /// Number of documents in the stored array.
    pub documents: usize,
    /// Token of the written file. `None` when no write was needed.
    pub token: Option<VersionToken>,
    /// Write attempts made, including conflicting ones.
    pub attempts: u32,
}

/// A queued collection write.
#[derive(Debug)]
pub struct WriteJob {
    pub collection: String,
    pub path: String,
    pub documents: Vec<Document>,
    pub attempts: u32,
    responder: oneshot::Sender<StorageResult<WriteReceipt>>,
}

/// Terminal state of a job.
#[derive(Debug)]
enum JobOutcome {
    Written(VersionToken),
    RetriesExhausted,
    Rejected(StorageError),
}

/// Handle resolving once a staged write is durable or has failed.
#[derive(Debug)]
pub struct PendingWrite {
    state: PendingState,
}

#[derive(Debug)]
enum PendingState {
    Queued {
        collection: String,
        rx: oneshot::Receiver<StorageResult<WriteReceipt>>,
    },
    Ready(StorageResult<WriteReceipt>),
}

impl PendingWrite {
    /// A write that was never needed; resolves immediately.
    pub fn skipped(collection: &str, documents: usize) -> Self {
        Self {
            state: PendingState::Ready(Ok(WriteReceipt {
                collection: collection.to_string(),
                documents,
                token: None,
                attempts: 0,
            })),
        }
    }

    /// Waits for the write queue to settle this write.
    pub async fn wait(self) -> StorageResult<WriteReceipt> {
        match self.state {
            PendingState::Ready(result) => result,
            PendingState::Queued { collection, rx } => match rx.await {
                Ok(result) => result,
                Err(_) => Err(StorageError::Backend(BackendError::QueueClosed { collection })),
            },
        }
    }
}

/// Submission side of the write queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<WriteJob>,
}

impl WriteQueue {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn(
        remote: Arc<dyn DocumentStoreApi>,
        cache: Arc<CollectionCache>,
        config: &StoreConfig,
    ) -> StorageResult<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            StorageError::Backend(BackendError::Internal {
                message: format!("write queue requires a tokio runtime: {e}"),
            })
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = WriteWorker {
            remote,
            cache,
            rx,
            max_attempts: config.max_write_attempts.max(1),
            drain_delay: config.drain_delay(),
        };
        handle.spawn(worker.run());
        Ok(Self { tx })
    }

    /// Queues a write of `documents` to `path`.
    ///
    /// The caller must have staged the same array in the cache first.
    pub fn enqueue(
        &self,
        collection: &str,
        path: &str,
        documents: Vec<Document>,
    ) -> StorageResult<PendingWrite> {
        let (responder, rx) = oneshot::channel();
        let job = WriteJob {
            collection: collection.to_string(),
            path: path.to_string(),
            documents,
            attempts: 0,
            responder,
        };
        self.tx.send(job).map_err(|_| {
            StorageError::Backend(BackendError::QueueClosed {
                collection: collection.to_string(),
            })
        })?;
        Ok(PendingWrite {
            state: PendingState::Queued {
                collection: collection.to_string(),
                rx,
            },
        })
    }
}

struct WriteWorker {
    remote: Arc<dyn DocumentStoreApi>,
    cache: Arc<CollectionCache>,
    rx: mpsc::UnboundedReceiver<WriteJob>,
    max_attempts: u32,
    drain_delay: Duration,
}

impl WriteWorker {
    async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            self.process(job).await;
            if !self.rx.is_empty() {
                self.pause().await;
            }
        }
        debug!("write queue closed");
    }

    async fn process(&self, mut job: WriteJob) {
        let outcome = self.attempt_write(&mut job).await;

        let result = match outcome {
            JobOutcome::Written(token) => {
                info!(
                    collection = %job.collection,
                    path = %job.path,
                    attempts = job.attempts,
                    sha = %token.sha,
                    "collection written"
                );
                self.cache
                    .write_succeeded(&job.collection, &job.path, token.clone())
                    .await;
                Ok(WriteReceipt {
                    collection: job.collection.clone(),
                    documents: job.documents.len(),
                    token: Some(token),
                    attempts: job.attempts,
                })
            }
            JobOutcome::RetriesExhausted => {
                error!(
                    collection = %job.collection,
                    attempts = job.attempts,
                    "write abandoned after repeated conflicts"
                );
                self.cache.write_failed(&job.collection);
                Err(ConcurrencyError::RetriesExhausted {
                    collection: job.collection.clone(),
                    attempts: job.attempts,
                }
                .into())
            }
            JobOutcome::Rejected(err) => {
                error!(collection = %job.collection, error = %err, "write rejected");
                self.cache.write_failed(&job.collection);
                Err(err)
            }
        };

        // The caller may have dropped its handle.
        let _ = job.responder.send(result);
    }

    async fn attempt_write(&self, job: &mut WriteJob) -> JobOutcome {
        let content = match serde_json::to_string_pretty(&job.documents) {
            Ok(content) => content,
            Err(err) => return JobOutcome::Rejected(err.into()),
        };

        loop {
            job.attempts += 1;
            match self.write_once(&job.path, &content).await {
                Ok(token) => return JobOutcome::Written(token),
                Err(RemoteStoreError::Conflict) if job.attempts < self.max_attempts => {
                    warn!(
                        collection = %job.collection,
                        attempt = job.attempts,
                        max_attempts = self.max_attempts,
                        "write conflict, retrying"
                    );
                    self.pause().await;
                }
                Err(RemoteStoreError::Conflict) => return JobOutcome::RetriesExhausted,
                Err(err) => {
                    return JobOutcome::Rejected(StorageError::transport(
                        self.remote.backend_name(),
                        err,
                    ));
                }
            }
        }
    }

    async fn write_once(&self, path: &str, content: &str) -> Result<VersionToken, RemoteStoreError> {
        let current = self.remote.head_object(path).await?;
        self.remote
            .write_object(path, content, current.as_ref())
            .await
    }

    async fn pause(&self) {
        if !self.drain_delay.is_zero() {
            sleep(self.drain_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::InMemoryDocumentStore;
    use crate::subscribe::SubscriberRegistry;
    use serde_json::json;

    const PATH: &str = "data/orders.json";

    fn setup(store: &InMemoryDocumentStore) -> (Arc<CollectionCache>, WriteQueue) {
        let mut config = StoreConfig::new("carehub", "data");
        config.drain_delay_ms = 0;
        let remote: Arc<dyn DocumentStoreApi> = Arc::new(store.clone());
        let cache = Arc::new(CollectionCache::new(
            Arc::clone(&remote),
            Arc::new(SubscriberRegistry::new()),
        ));
        let queue = WriteQueue::spawn(remote, Arc::clone(&cache), &config).unwrap();
        (cache, queue)
    }

    fn orders(n: usize) -> Vec<Document> {
        (1..=n)
            .map(|i| json!({"id": i.to_string()}).as_object().cloned().unwrap())
            .collect()
    }

    fn submit(
        cache: &CollectionCache,
        queue: &WriteQueue,
        documents: Vec<Document>,
    ) -> PendingWrite {
        cache.stage("orders", documents.clone());
        queue.enqueue("orders", PATH, documents).unwrap()
    }

    #[tokio::test]
    async fn writes_land_in_submission_order() {
        let store = InMemoryDocumentStore::new();
        let (cache, queue) = setup(&store);

        let first = submit(&cache, &queue, orders(1));
        let second = submit(&cache, &queue, orders(2));

        let second = second.wait().await.unwrap();
        let first = first.wait().await.unwrap();
        assert_eq!(first.documents, 1);
        assert_eq!(second.documents, 2);

        let stored: Vec<Document> = serde_json::from_str(&store.content(PATH).unwrap()).unwrap();
        assert_eq!(stored, orders(2));
        assert_eq!(cache.pending_writes("orders"), 0);
    }

    #[tokio::test]
    async fn transient_conflicts_are_retried() {
        let store = InMemoryDocumentStore::new();
        let (cache, queue) = setup(&store);
        store.fail_next_conflicts(2);

        let receipt = submit(&cache, &queue, orders(1)).wait().await.unwrap();
        assert_eq!(receipt.attempts, 3);
        assert!(receipt.token.is_some());
    }

    #[tokio::test]
    async fn non_conflict_errors_are_not_retried() {
        let store = InMemoryDocumentStore::new();
        let (cache, queue) = setup(&store);
        store.fail_writes_with(Some(RemoteStoreError::Unavailable("down".into())));

        let err = submit(&cache, &queue, orders(1)).wait().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.write_count(), 1);
        assert!(cache.snapshot("orders").is_none());
    }

    #[tokio::test]
    async fn skipped_write_resolves_immediately() {
        let receipt = PendingWrite::skipped("orders", 4).wait().await.unwrap();
        assert_eq!(receipt.attempts, 0);
        assert_eq!(receipt.documents, 4);
        assert!(receipt.token.is_none());
    }
}
