//! Asynchronous population of the metadata hierarchy.
//!
//! [`MetaManager`] owns a [`MetaReader`] and a [`MetaStore`], and turns
//! "call me back when this field is populated" requests into
//! deduplicated background fetch jobs. It is built for a
//! single-threaded consumer such as a UI event loop:
//!
//! - the `on_*` operations, [`pump`](MetaManager::pump) and
//!   [`settle`](MetaManager::settle) are called from that one
//!   *foreground* context and never block;
//! - reader I/O runs on one serial background worker task per manager
//!   (a job queue, not a pool);
//! - every store mutation and every callback runs on the foreground,
//!   inside `pump`/`settle`, so observers never see a field flip to
//!   populated from anywhere else.
//!
//! At most one reader call per `(node, field)` pair is ever in flight:
//! requests arriving while a fetch is pending join its waiter list and
//! are satisfied by the same result.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::task::JoinHandle;

use crate::error::{ReadError, ReadResult};
use crate::meta::{ColumnMeta, ForeignMeta, MetaStore, SchemaId, SchemaMeta, TableId, TableMeta};
use crate::reader::MetaReader;

/// Default bound on the background job queue.
const DEFAULT_QUEUE_LIMIT: usize = 32;

/// Callback run on the foreground once the requested field is
/// populated.
pub type Callback = Box<dyn FnOnce(&MetaStore) + 'static>;

/// Identity of one fetchable field of one node. Column and foreign-key
/// fetches of the same table use distinct keys since the fields are
/// independently fetchable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FetchKey {
    Schemas,
    Tables(SchemaId),
    Columns(TableId),
    ForeignKeys(TableId),
}

/// Read-only key data handed to the background worker. Cloned out of
/// the store so the reader never touches shared hierarchy objects.
enum FetchRequest {
    Schemas,
    Tables(SchemaMeta),
    Columns(TableMeta),
    ForeignKeys(TableMeta),
}

enum FetchPayload {
    Schemas(Vec<SchemaMeta>),
    Tables(Vec<TableMeta>),
    Columns(Vec<ColumnMeta>),
    ForeignKeys(Vec<ForeignMeta>),
}

impl FetchPayload {
    fn empty_for(key: FetchKey) -> Self {
        match key {
            FetchKey::Schemas => Self::Schemas(Vec::new()),
            FetchKey::Tables(_) => Self::Tables(Vec::new()),
            FetchKey::Columns(_) => Self::Columns(Vec::new()),
            FetchKey::ForeignKeys(_) => Self::ForeignKeys(Vec::new()),
        }
    }
}

struct Job {
    key: FetchKey,
    request: FetchRequest,
}

struct Completion {
    key: FetchKey,
    result: ReadResult<FetchPayload>,
}

struct Worker {
    jobs: mpsc::Sender<Job>,
    completions: mpsc::UnboundedReceiver<Completion>,
    task: JoinHandle<()>,
}

/// Receiver for an asynchronously acquired value, messaged on the
/// foreground context.
pub trait ResultHandler<T> {
    /// Queried before delivery; an inactive handler is skipped.
    fn is_active(&self) -> bool {
        true
    }

    /// Called when the request could not be satisfied synchronously.
    fn waiting(&mut self) {}

    /// Successful delivery.
    fn result(&mut self, store: &MetaStore, value: T);

    /// Failed delivery. Root acquisition failures are reported here
    /// rather than downgraded.
    fn error(&mut self, error: &ReadError);
}

/// Asynchronous, request-coalescing populator of a [`MetaStore`].
pub struct MetaManager {
    reader: Arc<dyn MetaReader>,
    store: MetaStore,
    queue_limit: usize,
    pending: HashMap<FetchKey, Vec<Callback>>,
    root_handlers: Vec<Box<dyn ResultHandler<Vec<SchemaId>>>>,
    worker: Option<Worker>,
}

impl MetaManager {
    /// Manager populating a fresh store through the given reader.
    ///
    /// Must be created and driven inside a tokio runtime; the worker
    /// task is spawned lazily on first use.
    pub fn new(reader: Arc<dyn MetaReader>) -> Self {
        Self::with_queue_limit(reader, DEFAULT_QUEUE_LIMIT)
    }

    /// Manager with an explicit bound on queued background jobs.
    /// Submissions beyond the bound are dropped with a logged notice.
    pub fn with_queue_limit(reader: Arc<dyn MetaReader>, queue_limit: usize) -> Self {
        Self {
            reader,
            store: MetaStore::new(),
            queue_limit: queue_limit.max(1),
            pending: HashMap::new(),
            root_handlers: Vec::new(),
            worker: None,
        }
    }

    /// Manager over the policy-selected reader and queue bound from
    /// configuration.
    pub fn from_settings(
        settings: &crate::config::Settings,
        diag: Arc<dyn crate::diag::DiagSink>,
    ) -> ReadResult<Self> {
        let reader = settings.metadata.policy.create_reader(settings, diag)?;
        Ok(Self::with_queue_limit(reader, settings.metadata.queue_limit))
    }

    /// The populated hierarchy.
    pub fn store(&self) -> &MetaStore {
        &self.store
    }

    /// The reader strategy in use.
    pub fn reader(&self) -> &Arc<dyn MetaReader> {
        &self.reader
    }

    /// True when no fetch is in flight or awaiting application.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Acquire the root schema list, invoking the handler on the
    /// foreground when it is installed. Reader failure is delivered to
    /// the handler's error path, not downgraded. Concurrent
    /// acquisitions coalesce onto one reader call.
    pub fn acquire_schemas(&mut self, mut handler: Box<dyn ResultHandler<Vec<SchemaId>>>) {
        if !handler.is_active() {
            return;
        }
        if self.store.has_schemas() {
            handler.result(&self.store, self.store.schema_ids());
            return;
        }
        handler.waiting();
        let already_running = self.pending.contains_key(&FetchKey::Schemas);
        self.root_handlers.push(handler);
        if !already_running {
            self.submit(FetchKey::Schemas, FetchRequest::Schemas, Vec::new());
            if !self.pending.contains_key(&FetchKey::Schemas) {
                // submission was refused; fail the handlers rather than
                // leaving them waiting forever
                let error = ReadError::structure("schema list request dropped");
                for mut handler in std::mem::take(&mut self.root_handlers) {
                    if handler.is_active() {
                        handler.error(&error);
                    }
                }
            }
        }
    }

    /// Invoke `callback` once the schema's table list is populated.
    /// Returns true iff the list was already known and the callback ran
    /// synchronously.
    pub fn on_tables(
        &mut self,
        schema: SchemaId,
        callback: impl FnOnce(&MetaStore) + 'static,
    ) -> bool {
        let smeta = self.store.schema(schema).expect("stale schema handle");
        if smeta.tables.is_known() {
            callback(&self.store);
            return true;
        }
        let key = FetchKey::Tables(schema);
        if let Some(waiters) = self.pending.get_mut(&key) {
            waiters.push(Box::new(callback));
            return false;
        }
        let request = FetchRequest::Tables(smeta.clone());
        self.submit(key, request, vec![Box::new(callback)]);
        false
    }

    /// Invoke `callback` once the table's column list is populated.
    /// Returns true iff the list was already known and the callback ran
    /// synchronously.
    pub fn on_columns(
        &mut self,
        table: TableId,
        callback: impl FnOnce(&MetaStore) + 'static,
    ) -> bool {
        let tmeta = self.store.table(table).expect("stale table handle");
        if tmeta.columns.is_known() {
            callback(&self.store);
            return true;
        }
        let key = FetchKey::Columns(table);
        if let Some(waiters) = self.pending.get_mut(&key) {
            waiters.push(Box::new(callback));
            return false;
        }
        let request = FetchRequest::Columns(tmeta.clone());
        self.submit(key, request, vec![Box::new(callback)]);
        false
    }

    /// Invoke `callback` once the table's foreign-key list is
    /// populated. Returns true iff the list was already known and the
    /// callback ran synchronously.
    pub fn on_foreign_keys(
        &mut self,
        table: TableId,
        callback: impl FnOnce(&MetaStore) + 'static,
    ) -> bool {
        let tmeta = self.store.table(table).expect("stale table handle");
        if tmeta.foreign_keys.is_known() {
            callback(&self.store);
            return true;
        }
        let key = FetchKey::ForeignKeys(table);
        if let Some(waiters) = self.pending.get_mut(&key) {
            waiters.push(Box::new(callback));
            return false;
        }
        let request = FetchRequest::ForeignKeys(tmeta.clone());
        self.submit(key, request, vec![Box::new(callback)]);
        false
    }

    /// Apply every completion that has already arrived, mutating the
    /// store and running waiters. Non-blocking; returns the number of
    /// completions applied. Call from the foreground context.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let completion = match self.worker.as_mut() {
                Some(worker) => worker.completions.try_recv(),
                None => break,
            };
            match completion {
                Ok(completion) => {
                    self.apply(completion);
                    applied += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        applied
    }

    /// Await and apply completions until nothing is pending. Intended
    /// for batch consumers and tests; interactive consumers call
    /// [`pump`](Self::pump) from their event loop instead.
    pub async fn settle(&mut self) {
        while !self.pending.is_empty() {
            let completion = {
                let Some(worker) = self.worker.as_mut() else { break };
                worker.completions.recv().await
            };
            match completion {
                Some(completion) => self.apply(completion),
                None => break,
            }
        }
    }

    /// Cancel outstanding background work and drop pending waiters.
    /// The manager stays usable: the next request lazily creates a
    /// fresh worker.
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.task.abort();
        }
        self.pending.clear();
        self.root_handlers.clear();
    }

    /// Enter the waiter list and hand the job to the worker. On queue
    /// overflow the request is dropped and the waiters are discarded
    /// with a logged notice; a later identical request will retry.
    fn submit(&mut self, key: FetchKey, request: FetchRequest, waiters: Vec<Callback>) {
        self.pending.insert(key, waiters);
        let mut job = Job { key, request };
        // one respawn attempt covers a worker that died since last use
        for attempt in 0..2 {
            let worker = self.worker.get_or_insert_with(|| {
                spawn_worker(self.reader.clone(), self.queue_limit)
            });
            match worker.jobs.try_send(job) {
                Ok(()) => return,
                Err(TrySendError::Full(_)) => {
                    tracing::info!(?key, "metadata request queue full; dropping request");
                    self.pending.remove(&key);
                    return;
                }
                Err(TrySendError::Closed(rejected)) => {
                    job = rejected;
                    self.worker = None;
                    if attempt == 1 {
                        tracing::warn!(?key, "metadata worker unavailable; dropping request");
                        self.pending.remove(&key);
                        return;
                    }
                }
            }
        }
    }

    /// Apply one completion on the foreground: mutate the store,
    /// then run every waiter registered for the key, in registration
    /// order.
    fn apply(&mut self, completion: Completion) {
        let key = completion.key;
        if key == FetchKey::Schemas {
            self.apply_root(completion);
            return;
        }
        // A failed per-field fetch populates as empty rather than
        // leaving the node looking forever unloaded; the failure is
        // logged, never rethrown to the waiters.
        let payload = match completion.result {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(?key, %error, "failed to read metadata; substituting empty list");
                FetchPayload::empty_for(key)
            }
        };
        match (key, payload) {
            (FetchKey::Tables(id), FetchPayload::Tables(tables)) => {
                self.store.set_tables(id, tables);
            }
            (FetchKey::Columns(id), FetchPayload::Columns(columns)) => {
                self.store.set_columns(id, columns);
            }
            (FetchKey::ForeignKeys(id), FetchPayload::ForeignKeys(keys)) => {
                self.store.set_foreign_keys(id, keys);
            }
            _ => {
                tracing::warn!(?key, "mismatched completion payload; ignoring");
            }
        }
        for callback in self.pending.remove(&key).unwrap_or_default() {
            callback(&self.store);
        }
    }

    fn apply_root(&mut self, completion: Completion) {
        self.pending.remove(&FetchKey::Schemas);
        let handlers = std::mem::take(&mut self.root_handlers);
        match completion.result {
            Ok(FetchPayload::Schemas(schemas)) => {
                let ids = self.store.install_schemas(schemas);
                for mut handler in handlers {
                    if handler.is_active() {
                        handler.result(&self.store, ids.clone());
                    }
                }
            }
            Ok(_) => {
                tracing::warn!("mismatched root completion payload; ignoring");
            }
            Err(error) => {
                tracing::warn!(source = %self.reader.source(), %error, "failed to read schema list");
                for mut handler in handlers {
                    if handler.is_active() {
                        handler.error(&error);
                    }
                }
            }
        }
    }
}

impl Drop for MetaManager {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.task.abort();
        }
    }
}

/// Spawn the serial background worker: one job at a time, each a
/// single reader call, results sent back for foreground application.
fn spawn_worker(reader: Arc<dyn MetaReader>, queue_limit: usize) -> Worker {
    let (jobs_tx, mut jobs_rx) = mpsc::channel::<Job>(queue_limit);
    let (completions_tx, completions_rx) = mpsc::unbounded_channel::<Completion>();
    let task = tokio::spawn(async move {
        while let Some(job) = jobs_rx.recv().await {
            let result = match &job.request {
                FetchRequest::Schemas => reader.read_schemas().await.map(FetchPayload::Schemas),
                FetchRequest::Tables(schema) => {
                    reader.read_tables(schema).await.map(FetchPayload::Tables)
                }
                FetchRequest::Columns(table) => {
                    reader.read_columns(table).await.map(FetchPayload::Columns)
                }
                FetchRequest::ForeignKeys(table) => reader
                    .read_foreign_keys(table)
                    .await
                    .map(FetchPayload::ForeignKeys),
            };
            if completions_tx
                .send(Completion {
                    key: job.key,
                    result,
                })
                .is_err()
            {
                break;
            }
        }
    });
    Worker {
        jobs: jobs_tx,
        completions: completions_rx,
        task,
    }
}
