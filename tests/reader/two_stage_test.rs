use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tabmeta::diag::default_sink;
use tabmeta::error::{ReadError, ReadResult};
use tabmeta::meta::{SchemaMeta, TableMeta};
use tabmeta::names::QuotingFixer;
use tabmeta::reader::{Detail, DocumentFetcher, MetaReader, TwoStageReader};

/// Fetcher serving canned documents keyed by subpath, recording what
/// was asked for.
struct PathFetcher {
    bodies: HashMap<&'static str, &'static str>,
    log: Arc<Mutex<Vec<(String, Detail)>>>,
}

#[async_trait]
impl DocumentFetcher for PathFetcher {
    async fn fetch(&self, subpath: &str, detail: Detail) -> ReadResult<String> {
        self.log.lock().unwrap().push((subpath.to_string(), detail));
        match self.bodies.get(subpath) {
            Some(body) => Ok(body.to_string()),
            None => Err(ReadError::Status {
                url: format!("mock://service/tables/{subpath}"),
                status: 404,
            }),
        }
    }

    fn endpoint(&self) -> String {
        "mock://service/tables".into()
    }
}

/// Top-level listing at table granularity: tables named, no columns.
const TOP_DOC: &str = r#"{
    "schemas": [
        {"name": "cat", "tables": [{"name": "obs"}, {"name": "2mass"}]},
        {"name": "aux", "tables": []}
    ]
}"#;

/// Per-schema listing for cat.
const CAT_DOC: &str = r#"{
    "schemas": [
        {"name": "cat", "tables": [{"name": "obs"}, {"name": "2mass"}]}
    ]
}"#;

/// Single-table document for cat/obs.
const OBS_DOC: &str = r#"{
    "schemas": [
        {"name": "cat", "tables": [
            {
                "name": "obs",
                "columns": [{"name": "ra"}, {"name": "select"}],
                "foreignKeys": [{"targetTable": "src", "keyId": "k1",
                                 "links": [{"from": "sid", "target": "id"}]}]
            }
        ]}
    ]
}"#;

/// Single-table document for cat/2mass (note the original name in the
/// path even though the display name is quoted).
const TWOMASS_DOC: &str = r#"{
    "schemas": [
        {"name": "cat", "tables": [
            {"name": "2mass", "columns": [{"name": "j_mag"}], "foreignKeys": []}
        ]}
    ]
}"#;

/// A document with no matching table element.
const EMPTY_DOC: &str = r#"{"schemas": [{"name": "cat", "tables": []}]}"#;

fn fetcher(bodies: &[(&'static str, &'static str)]) -> PathFetcher {
    PathFetcher {
        bodies: bodies.iter().cloned().collect(),
        log: Arc::new(Mutex::new(Vec::new())),
    }
}

fn reader(fetcher: PathFetcher, detail: Detail) -> TwoStageReader {
    let diag = default_sink();
    TwoStageReader::new(
        Box::new(fetcher),
        detail,
        Box::new(QuotingFixer::new(diag.clone())),
        diag,
    )
}

#[tokio::test]
async fn test_schema_listing_carries_tables_at_table_detail() {
    let fetcher = fetcher(&[("", TOP_DOC)]);
    let log = fetcher.log.clone();
    let reader = reader(fetcher, Detail::Table);
    let schemas = reader.read_schemas().await.unwrap();
    assert_eq!(schemas.len(), 2);
    // tables are named but their columns are still unknown
    let cat = schemas.iter().find(|s| s.name == "cat").unwrap();
    let tables = cat.tables.known().unwrap();
    assert_eq!(tables.len(), 2);
    assert!(tables.iter().all(|t| !t.columns.is_known()));
    assert_eq!(log.lock().unwrap()[0], ("".to_string(), Detail::Table));
}

#[tokio::test]
async fn test_single_table_lookup_uses_learned_schema_path() {
    let fetcher = fetcher(&[("", TOP_DOC), ("cat/obs", OBS_DOC)]);
    let log = fetcher.log.clone();
    let reader = reader(fetcher, Detail::Table);
    let schemas = reader.read_schemas().await.unwrap();
    let cat = schemas.iter().find(|s| s.name == "cat").unwrap();
    let obs = cat
        .tables
        .known()
        .unwrap()
        .iter()
        .find(|t| t.name == "obs")
        .cloned()
        .unwrap();

    let columns = reader.read_columns(&obs).await.unwrap();
    let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["ra", "\"select\""]);

    let log = log.lock().unwrap();
    assert_eq!(log.last().unwrap().0, "cat/obs");
    assert_eq!(log.last().unwrap().1, Detail::Full);
}

#[tokio::test]
async fn test_fixed_names_unfix_for_the_request_path() {
    let fetcher = fetcher(&[("", TOP_DOC), ("cat/2mass", TWOMASS_DOC)]);
    let log = fetcher.log.clone();
    let reader = reader(fetcher, Detail::Table);
    let schemas = reader.read_schemas().await.unwrap();
    let cat = schemas.iter().find(|s| s.name == "cat").unwrap();
    let twomass = cat
        .tables
        .known()
        .unwrap()
        .iter()
        .find(|t| t.name == "\"2mass\"")
        .cloned()
        .expect("fixed display name");

    let columns = reader.read_columns(&twomass).await.unwrap();
    assert_eq!(columns[0].name, "j_mag");
    // the path segment carries the name the service reported
    assert_eq!(log.lock().unwrap().last().unwrap().0, "cat/2mass");
}

#[tokio::test]
async fn test_read_tables_expects_exactly_one_schema() {
    let fetcher = fetcher(&[("cat", CAT_DOC)]);
    let reader = reader(fetcher, Detail::Table);
    let tables = reader.read_tables(&SchemaMeta::named("cat")).await.unwrap();
    assert_eq!(tables.len(), 2);
    // document order is the declared order and wins over names
    let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["obs", "\"2mass\""]);
}

#[tokio::test]
async fn test_missing_schema_is_structural_error() {
    let fetcher = fetcher(&[("aux", EMPTY_DOC)]);
    let reader = reader(fetcher, Detail::Table);
    let err = reader
        .read_tables(&SchemaMeta::named("aux"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::Structure(_)));
    assert!(err.to_string().contains("0 matching schema elements"));
    assert!(err.to_string().contains("aux"));
}

#[tokio::test]
async fn test_zero_matching_tables_names_qualified_path() {
    let fetcher = fetcher(&[("", TOP_DOC), ("cat/obs", EMPTY_DOC)]);
    let reader = reader(fetcher, Detail::Table);
    reader.read_schemas().await.unwrap();

    let err = reader
        .read_columns(&TableMeta::named("obs"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::Structure(_)));
    let message = err.to_string();
    assert!(message.contains("0 matching table elements"));
    assert!(message.contains("cat.obs"));
}

#[tokio::test]
async fn test_unlearned_table_is_structural_error() {
    let fetcher = fetcher(&[("", TOP_DOC)]);
    let reader = reader(fetcher, Detail::Table);
    reader.read_schemas().await.unwrap();

    let err = reader
        .read_columns(&TableMeta::named("never_listed"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::Structure(_)));
    assert!(err.to_string().contains("no known schema"));
}

#[tokio::test]
async fn test_schema_detail_listing_leaves_tables_unknown() {
    let body = r#"{"schemas": [{"name": "cat"}, {"name": "aux"}]}"#;
    let fetcher = fetcher(&[("", body)]);
    let reader = reader(fetcher, Detail::Schema);
    let schemas = reader.read_schemas().await.unwrap();
    assert!(schemas.iter().all(|s| !s.tables.is_known()));
}
