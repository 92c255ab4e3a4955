use async_trait::async_trait;

use tabmeta::diag::default_sink;
use tabmeta::error::ReadResult;
use tabmeta::meta::{SchemaMeta, TableMeta};
use tabmeta::names::QuotingFixer;
use tabmeta::reader::{Detail, DocumentFetcher, DocumentReader, MetaReader};

/// Fetcher serving one canned document body.
struct CannedFetcher {
    body: &'static str,
}

#[async_trait]
impl DocumentFetcher for CannedFetcher {
    async fn fetch(&self, subpath: &str, detail: Detail) -> ReadResult<String> {
        assert_eq!(subpath, "", "eager reader must fetch the base document");
        assert_eq!(detail, Detail::Full);
        Ok(self.body.to_string())
    }

    fn endpoint(&self) -> String {
        "mock://service/tables".into()
    }
}

fn reader(body: &'static str) -> DocumentReader {
    let diag = default_sink();
    DocumentReader::new(
        Box::new(CannedFetcher { body }),
        Box::new(QuotingFixer::new(diag.clone())),
        diag,
    )
}

const FULL_DOC: &str = r#"{
    "schemas": [
        {
            "name": "zoo",
            "tables": [
                {"name": "b", "columns": [], "foreignKeys": []},
                {"name": "a", "columns": [], "foreignKeys": []}
            ]
        },
        {
            "name": "cat",
            "tables": [
                {
                    "name": "cat.obs",
                    "columns": [
                        {"name": "select", "dataType": "VARCHAR"},
                        {"name": "ra", "unit": "deg"}
                    ],
                    "foreignKeys": [
                        {
                            "targetTable": "cat.src",
                            "keyId": "k1",
                            "links": [{"from": "src_id", "target": "id"}]
                        }
                    ]
                }
            ]
        }
    ]
}"#;

#[tokio::test]
async fn test_whole_tree_in_one_read() {
    let schemas = reader(FULL_DOC).read_schemas().await.unwrap();
    assert_eq!(schemas.len(), 2);
    // document order is preserved through the assigned indexes
    assert_eq!(schemas[0].name, "zoo");
    assert_eq!(schemas[1].name, "cat");

    // tables keep their document order too (declared indexes)
    let zoo_tables = schemas[0].tables.known().unwrap();
    let names: Vec<_> = zoo_tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["b", "a"]);

    let obs = &schemas[1].tables.known().unwrap()[0];
    assert!(obs.columns.is_known());
    assert!(obs.foreign_keys.is_known());
    assert_eq!(obs.foreign_keys.known().unwrap()[0].links.len(), 1);
}

#[tokio::test]
async fn test_reserved_column_name_is_fixed() {
    let schemas = reader(FULL_DOC).read_schemas().await.unwrap();
    let obs = &schemas[1].tables.known().unwrap()[0];
    let columns = obs.columns.known().unwrap();
    let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
    assert!(names.contains(&"\"select\""));
    assert!(names.contains(&"ra"));
}

#[tokio::test]
async fn test_naked_tables_get_placeholder_schema() {
    let body = r#"{
        "schemas": [{"name": "cat", "tables": []}],
        "tables": [{"name": "stray", "columns": [], "foreignKeys": []}]
    }"#;
    let schemas = reader(body).read_schemas().await.unwrap();
    assert_eq!(schemas.len(), 2);
    let last = schemas.last().unwrap();
    assert_eq!(last.name, "<no_schema>");
    let tables = last.tables.known().unwrap();
    assert_eq!(tables[0].name, "stray");
}

#[tokio::test]
async fn test_per_level_calls_are_unsupported() {
    let reader = reader(FULL_DOC);
    let schema = SchemaMeta::named("cat");
    let table = TableMeta::named("cat.obs");

    let err = reader.read_tables(&schema).await.unwrap_err();
    assert!(err.is_unsupported());
    let err = reader.read_columns(&table).await.unwrap_err();
    assert!(err.is_unsupported());
    let err = reader.read_foreign_keys(&table).await.unwrap_err();
    assert!(err.is_unsupported());
}

#[tokio::test]
async fn test_source_and_means_are_descriptive() {
    let reader = reader(FULL_DOC);
    assert_eq!(reader.source(), "mock://service/tables");
    assert!(!reader.means().is_empty());
}
