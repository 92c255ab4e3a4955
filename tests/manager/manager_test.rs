use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use tabmeta::error::{ReadError, ReadResult};
use tabmeta::manager::{MetaManager, ResultHandler};
use tabmeta::meta::{ColumnMeta, ForeignMeta, Link, MetaStore, SchemaId, SchemaMeta, TableMeta};
use tabmeta::reader::MetaReader;

/// Reader with canned answers and per-method invocation counters.
struct MockReader {
    schemas_calls: AtomicUsize,
    tables_calls: AtomicUsize,
    columns_calls: AtomicUsize,
    /// Incremented on entry to read_columns, before any gating.
    columns_entered: AtomicUsize,
    keys_calls: AtomicUsize,
    fail_schemas: bool,
    fail_columns: bool,
    /// When set, read_columns waits here before answering.
    columns_gate: Option<Arc<Notify>>,
}

impl MockReader {
    fn new() -> Self {
        Self {
            schemas_calls: AtomicUsize::new(0),
            tables_calls: AtomicUsize::new(0),
            columns_calls: AtomicUsize::new(0),
            columns_entered: AtomicUsize::new(0),
            keys_calls: AtomicUsize::new(0),
            fail_schemas: false,
            fail_columns: false,
            columns_gate: None,
        }
    }
}

#[async_trait]
impl MetaReader for MockReader {
    async fn read_schemas(&self) -> ReadResult<Vec<SchemaMeta>> {
        self.schemas_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_schemas {
            return Err(ReadError::structure("schema listing went missing"));
        }
        Ok(vec![SchemaMeta::named("cat"), SchemaMeta::named("aux")])
    }

    async fn read_tables(&self, schema: &SchemaMeta) -> ReadResult<Vec<TableMeta>> {
        self.tables_calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(schema.name, "cat", "unexpected schema key");
        Ok(vec![TableMeta::named("obs"), TableMeta::named("src")])
    }

    async fn read_columns(&self, table: &TableMeta) -> ReadResult<Vec<ColumnMeta>> {
        self.columns_entered.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.columns_gate {
            gate.notified().await;
        }
        self.columns_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_columns {
            return Err(ReadError::structure("column fetch went missing"));
        }
        Ok(vec![
            ColumnMeta::named(format!("{}_id", table.name)),
            ColumnMeta::named("ra"),
        ])
    }

    async fn read_foreign_keys(&self, _table: &TableMeta) -> ReadResult<Vec<ForeignMeta>> {
        self.keys_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![ForeignMeta {
            target_table: "src".into(),
            key_id: Some("k1".into()),
            links: vec![Link {
                from: "src_id".into(),
                target: "id".into(),
            }],
            ..ForeignMeta::default()
        }])
    }

    fn source(&self) -> String {
        "mock://service".into()
    }

    fn means(&self) -> String {
        "canned responses".into()
    }
}

/// Handler recording what it was messaged with.
#[derive(Default)]
struct CollectHandler {
    waits: Rc<RefCell<usize>>,
    ids: Rc<RefCell<Option<Vec<SchemaId>>>>,
    errors: Rc<RefCell<Vec<String>>>,
}

impl ResultHandler<Vec<SchemaId>> for CollectHandler {
    fn waiting(&mut self) {
        *self.waits.borrow_mut() += 1;
    }

    fn result(&mut self, _store: &MetaStore, value: Vec<SchemaId>) {
        *self.ids.borrow_mut() = Some(value);
    }

    fn error(&mut self, error: &ReadError) {
        self.errors.borrow_mut().push(error.to_string());
    }
}

/// Install the mock schema list and return the manager plus the handle
/// of schema "cat".
async fn manager_with_schemas(reader: Arc<MockReader>) -> (MetaManager, SchemaId) {
    let mut manager = MetaManager::new(reader);
    let handler = CollectHandler::default();
    let ids = handler.ids.clone();
    manager.acquire_schemas(Box::new(handler));
    manager.settle().await;
    let ids = ids.borrow().clone().expect("schemas installed");
    let cat = *ids
        .iter()
        .find(|id| manager.store().schema(**id).unwrap().name == "cat")
        .expect("cat schema");
    (manager, cat)
}

#[tokio::test]
async fn test_acquire_schemas_delivers_handles() {
    let reader = Arc::new(MockReader::new());
    let (manager, cat) = manager_with_schemas(reader.clone()).await;
    assert_eq!(reader.schemas_calls.load(Ordering::SeqCst), 1);
    assert_eq!(manager.store().schema_ids().len(), 2);
    assert_eq!(manager.store().schema(cat).unwrap().name, "cat");
    assert!(manager.is_idle());
}

#[tokio::test]
async fn test_acquire_schemas_failure_reaches_handler() {
    let mut mock = MockReader::new();
    mock.fail_schemas = true;
    let mut manager = MetaManager::new(Arc::new(mock));
    let handler = CollectHandler::default();
    let waits = handler.waits.clone();
    let errors = handler.errors.clone();
    manager.acquire_schemas(Box::new(handler));
    manager.settle().await;
    assert_eq!(*waits.borrow(), 1);
    let errors = errors.borrow();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("schema listing went missing"));
    assert!(!manager.store().has_schemas());
}

#[tokio::test]
async fn test_coalesced_column_requests_fetch_once() {
    let reader = Arc::new(MockReader::new());
    let (mut manager, cat) = manager_with_schemas(reader.clone()).await;
    manager.on_tables(cat, |_| {});
    manager.settle().await;
    let obs = manager.store().table_ids(cat).unwrap()[0];

    let fired = Rc::new(RefCell::new(Vec::new()));
    for i in 0..3 {
        let fired = fired.clone();
        let synchronous = manager.on_columns(obs, move |store| {
            assert!(store.table(obs).unwrap().columns.is_known());
            fired.borrow_mut().push(i);
        });
        assert!(!synchronous);
    }
    manager.settle().await;

    assert_eq!(reader.columns_calls.load(Ordering::SeqCst), 1);
    // all waiters fire after the single fetch, in registration order
    assert_eq!(*fired.borrow(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_foreign_keys_fetch_once_and_independently() {
    let reader = Arc::new(MockReader::new());
    let (mut manager, cat) = manager_with_schemas(reader.clone()).await;
    manager.on_tables(cat, |_| {});
    manager.settle().await;
    let obs = manager.store().table_ids(cat).unwrap()[0];

    assert!(!manager.on_foreign_keys(obs, |_| {}));
    assert!(!manager.on_foreign_keys(obs, |_| {}));
    manager.settle().await;

    assert_eq!(reader.keys_calls.load(Ordering::SeqCst), 1);
    let table = manager.store().table(obs).unwrap();
    assert!(table.foreign_keys.is_known());
    // columns were never requested and stay unknown
    assert!(!table.columns.is_known());
    assert_eq!(reader.columns_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_synchronous_short_circuit() {
    let reader = Arc::new(MockReader::new());
    let (mut manager, cat) = manager_with_schemas(reader.clone()).await;
    manager.on_tables(cat, |_| {});
    manager.settle().await;
    assert_eq!(reader.tables_calls.load(Ordering::SeqCst), 1);

    let fired = Rc::new(RefCell::new(false));
    let fired2 = fired.clone();
    let synchronous = manager.on_tables(cat, move |_| {
        *fired2.borrow_mut() = true;
    });
    assert!(synchronous);
    // callback ran before on_tables returned, with no new fetch
    assert!(*fired.borrow());
    assert_eq!(reader.tables_calls.load(Ordering::SeqCst), 1);
    assert!(manager.is_idle());
}

#[tokio::test]
async fn test_failed_fetch_populates_empty() {
    let mut mock = MockReader::new();
    mock.fail_columns = true;
    let reader = Arc::new(mock);
    let (mut manager, cat) = manager_with_schemas(reader.clone()).await;
    manager.on_tables(cat, |_| {});
    manager.settle().await;
    let obs = manager.store().table_ids(cat).unwrap()[0];

    let fired = Rc::new(RefCell::new(false));
    let fired2 = fired.clone();
    manager.on_columns(obs, move |store| {
        // population failure is downgraded: the field is known and
        // empty rather than forever unloaded
        assert_eq!(store.table(obs).unwrap().columns.known().map(Vec::len), Some(0));
        *fired2.borrow_mut() = true;
    });
    manager.settle().await;
    assert!(*fired.borrow());

    // the result is cached like any other: no refetch afterwards
    assert!(manager.on_columns(obs, |_| {}));
    assert_eq!(reader.columns_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_cancels_and_manager_remains_usable() {
    let mut mock = MockReader::new();
    let gate = Arc::new(Notify::new());
    mock.columns_gate = Some(gate.clone());
    let reader = Arc::new(mock);
    let (mut manager, cat) = manager_with_schemas(reader.clone()).await;
    manager.on_tables(cat, |_| {});
    manager.settle().await;
    let obs = manager.store().table_ids(cat).unwrap()[0];

    // the fetch parks on the gate; shut down while it is in flight
    manager.on_columns(obs, |_| panic!("waiter must not fire after shutdown"));
    tokio::task::yield_now().await;
    manager.shutdown();
    assert!(manager.is_idle());
    gate.notify_waiters();

    // a fresh worker is created lazily and the next request completes
    let fired = Rc::new(RefCell::new(false));
    let fired2 = fired.clone();
    manager.on_columns(obs, move |store| {
        assert!(store.table(obs).unwrap().columns.is_known());
        *fired2.borrow_mut() = true;
    });
    gate.notify_one();
    manager.settle().await;
    assert!(*fired.borrow());
}

#[tokio::test]
async fn test_pump_is_nonblocking_and_applies_arrivals() {
    let reader = Arc::new(MockReader::new());
    let (mut manager, cat) = manager_with_schemas(reader.clone()).await;

    let fired = Rc::new(RefCell::new(false));
    let fired2 = fired.clone();
    manager.on_tables(cat, move |store| {
        assert!(store.schema(cat).unwrap().tables.is_known());
        *fired2.borrow_mut() = true;
    });
    // nothing has completed yet; pump must return without waiting
    assert_eq!(manager.pump(), 0);
    assert!(!*fired.borrow());

    // let the worker run, then drain from the foreground
    while manager.pump() == 0 {
        tokio::task::yield_now().await;
    }
    assert!(*fired.borrow());
    assert!(manager.is_idle());
}

#[tokio::test]
async fn test_full_queue_drops_newest_request() {
    let mut mock = MockReader::new();
    let gate = Arc::new(Notify::new());
    mock.columns_gate = Some(gate.clone());
    let reader = Arc::new(mock);

    let mut manager = MetaManager::with_queue_limit(reader.clone(), 1);
    let handler = CollectHandler::default();
    let ids = handler.ids.clone();
    manager.acquire_schemas(Box::new(handler));
    manager.settle().await;
    let cat = ids.borrow().clone().unwrap()[0];
    manager.on_tables(cat, |_| {});
    manager.settle().await;
    let tids = manager.store().table_ids(cat).unwrap();
    let (obs, src) = (tids[0], tids[1]);

    // first fetch occupies the worker (parked on the gate)...
    manager.on_columns(obs, |_| {});
    while reader.columns_entered.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    // ...second fills the one-slot queue, third is refused
    manager.on_columns(src, |_| {});
    manager.on_foreign_keys(obs, |_| panic!("refused request must not call back"));

    gate.notify_one();
    gate.notify_one();
    manager.settle().await;

    assert_eq!(reader.columns_calls.load(Ordering::SeqCst), 2);
    assert_eq!(reader.keys_calls.load(Ordering::SeqCst), 0);
    assert!(manager.store().table(src).unwrap().columns.is_known());
    // the dropped fetch left no pending state; a retry succeeds
    assert!(!manager.store().table(obs).unwrap().foreign_keys.is_known());
    manager.on_foreign_keys(obs, |_| {});
    manager.settle().await;
    assert!(manager.store().table(obs).unwrap().foreign_keys.is_known());
}

#[tokio::test]
async fn test_from_settings_builds_a_manager() {
    use tabmeta::config::Settings;
    use tabmeta::diag::default_sink;

    let settings = Settings::for_base_url("https://example.invalid/svc");
    let manager = MetaManager::from_settings(&settings, default_sink()).unwrap();
    assert!(manager.is_idle());
    assert!(!manager.store().has_schemas());
    assert_eq!(manager.reader().source(), "https://example.invalid/svc/tables");
}

#[tokio::test]
async fn test_concurrent_acquires_coalesce() {
    let reader = Arc::new(MockReader::new());
    let mut manager = MetaManager::new(reader.clone());
    let first = CollectHandler::default();
    let second = CollectHandler::default();
    let first_ids = first.ids.clone();
    let second_ids = second.ids.clone();
    manager.acquire_schemas(Box::new(first));
    manager.acquire_schemas(Box::new(second));
    manager.settle().await;
    assert_eq!(reader.schemas_calls.load(Ordering::SeqCst), 1);
    assert!(first_ids.borrow().is_some());
    assert!(second_ids.borrow().is_some());
}
