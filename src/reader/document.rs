//! Eager whole-tree reader for the hierarchical metadata document.
//!
//! The service publishes one JSON document describing every schema with
//! its tables, columns and foreign keys. This reader fetches and
//! decodes the whole thing in `read_schemas`; the per-level methods are
//! unsupported since there is nothing left to fetch.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::diag::DiagSink;
use crate::error::{ReadError, ReadResult};
use crate::meta::{
    sort_schemas, sort_tables, ColumnMeta, ForeignMeta, Link, Population, SchemaMeta, TableMeta,
};
use crate::names::NameFixer;

use super::MetaReader;

/// Granularity hint for document fetches, carried in the `detail=`
/// query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Detail {
    /// Full detail down to columns and keys (empty parameter value).
    Full,
    /// Include tables but not their columns or keys.
    #[default]
    Table,
    /// Schema elements only.
    Schema,
}

impl Detail {
    /// Value sent on the wire.
    pub fn wire_value(self) -> &'static str {
        match self {
            Self::Full => "",
            Self::Table => "table",
            Self::Schema => "schema",
        }
    }
}

/// Fetches metadata document bodies, addressed relative to a base
/// endpoint. Abstracted so readers can be exercised offline.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Fetch the document at `subpath` (empty for the base document)
    /// with the given detail hint, returning the raw body.
    async fn fetch(&self, subpath: &str, detail: Detail) -> ReadResult<String>;

    /// Identifying string of the base endpoint.
    fn endpoint(&self) -> String;
}

/// [`DocumentFetcher`] over HTTP.
pub struct HttpDocumentFetcher {
    http: reqwest::Client,
    base: String,
}

impl HttpDocumentFetcher {
    /// Fetcher for the given base endpoint.
    pub fn new(base: impl Into<String>, timeout: Duration) -> ReadResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ReadError::Http)?;
        Ok(Self {
            http,
            base: base.into(),
        })
    }
}

#[async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn fetch(&self, subpath: &str, detail: Detail) -> ReadResult<String> {
        let url = if subpath.is_empty() {
            self.base.clone()
        } else {
            format!("{}/{}", self.base.trim_end_matches('/'), subpath)
        };
        tracing::debug!(%url, detail = detail.wire_value(), "fetching metadata document");
        let response = self
            .http
            .get(&url)
            .query(&[("detail", detail.wire_value())])
            .send()
            .await
            .map_err(ReadError::Http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReadError::Status {
                url,
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(ReadError::Http)
    }

    fn endpoint(&self) -> String {
        self.base.clone()
    }
}

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TableSetDoc {
    #[serde(default)]
    schemas: Vec<SchemaDoc>,
    /// Tables declared outside any schema.
    #[serde(default)]
    tables: Vec<TableDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaDoc {
    #[serde(default)]
    name: String,
    title: Option<String>,
    description: Option<String>,
    utype: Option<String>,
    /// Absent when the detail hint excluded tables; present and empty
    /// for a schema known to have none.
    tables: Option<Vec<TableDoc>>,
    #[serde(flatten)]
    extras: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableDoc {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    title: Option<String>,
    description: Option<String>,
    utype: Option<String>,
    nrows: Option<Value>,
    columns: Option<Vec<ColumnDoc>>,
    foreign_keys: Option<Vec<ForeignDoc>>,
    #[serde(flatten)]
    extras: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColumnDoc {
    #[serde(default)]
    name: String,
    description: Option<String>,
    unit: Option<String>,
    ucd: Option<String>,
    utype: Option<String>,
    data_type: Option<String>,
    arraysize: Option<String>,
    xtype: Option<String>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(flatten)]
    extras: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForeignDoc {
    #[serde(default)]
    target_table: String,
    description: Option<String>,
    utype: Option<String>,
    key_id: Option<String>,
    #[serde(default)]
    links: Vec<LinkDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkDoc {
    from: Option<String>,
    target: Option<String>,
}

pub(crate) fn decode_document(body: &str) -> ReadResult<TableSetDoc> {
    serde_json::from_str(body).map_err(ReadError::Decode)
}

/// Convert a decoded document into schema metadata, assigning
/// document-order indexes and folding tables declared outside any
/// schema into a placeholder schema.
pub(crate) fn into_schemas(doc: TableSetDoc, diag: &dyn DiagSink) -> Vec<SchemaMeta> {
    let mut itable = 0;
    let mut schemas: Vec<SchemaMeta> = doc
        .schemas
        .into_iter()
        .enumerate()
        .map(|(is, s)| schema_meta(s, (is + 1) as i64, &mut itable, diag))
        .collect();
    if !doc.tables.is_empty() {
        diag.warning(&format!(
            "using {} tables declared outside of any schema",
            doc.tables.len()
        ));
        let mut placeholder = SchemaMeta::placeholder("<no_schema>");
        placeholder.description = Some("tables declared outside any schema".into());
        placeholder.tables = Population::Known(
            doc.tables
                .into_iter()
                .map(|t| table_meta(t, &mut itable, diag))
                .collect(),
        );
        schemas.push(placeholder);
    }
    schemas
}

/// Flatten every table in a document, both inside and outside schemas.
pub(crate) fn flatten_tables(doc: TableSetDoc, diag: &dyn DiagSink) -> Vec<TableMeta> {
    let mut itable = 0;
    let mut tables = Vec::new();
    for schema in doc.schemas {
        if let Some(docs) = schema.tables {
            tables.extend(docs.into_iter().map(|t| table_meta(t, &mut itable, diag)));
        }
    }
    tables.extend(
        doc.tables
            .into_iter()
            .map(|t| table_meta(t, &mut itable, diag)),
    );
    tables
}

fn schema_meta(doc: SchemaDoc, index: i64, itable: &mut i64, diag: &dyn DiagSink) -> SchemaMeta {
    SchemaMeta {
        name: doc.name,
        title: doc.title,
        description: doc.description,
        utype: doc.utype,
        index: Some(index),
        extras: doc.extras,
        tables: match doc.tables {
            Some(docs) => Population::Known(
                docs.into_iter()
                    .map(|t| table_meta(t, itable, diag))
                    .collect(),
            ),
            None => Population::Unknown,
        },
    }
}

fn table_meta(doc: TableDoc, itable: &mut i64, diag: &dyn DiagSink) -> TableMeta {
    *itable += 1;
    TableMeta {
        kind: doc.kind,
        name: doc.name,
        title: doc.title,
        description: doc.description,
        utype: doc.utype,
        nrows: doc.nrows.and_then(|v| match v {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }),
        index: Some(*itable),
        extras: doc.extras,
        columns: match doc.columns {
            Some(docs) => Population::Known(docs.into_iter().map(column_meta).collect()),
            None => Population::Unknown,
        },
        foreign_keys: match doc.foreign_keys {
            Some(docs) => {
                Population::Known(docs.into_iter().map(|f| foreign_meta(f, diag)).collect())
            }
            None => Population::Unknown,
        },
    }
}

fn column_meta(doc: ColumnDoc) -> ColumnMeta {
    ColumnMeta {
        name: doc.name,
        description: doc.description,
        unit: doc.unit,
        ucd: doc.ucd,
        utype: doc.utype,
        data_type: doc.data_type,
        arraysize: doc.arraysize,
        xtype: doc.xtype,
        flags: doc.flags,
        extras: doc.extras,
    }
}

fn foreign_meta(doc: ForeignDoc, diag: &dyn DiagSink) -> ForeignMeta {
    let links = doc
        .links
        .into_iter()
        .filter_map(|l| match (l.from, l.target) {
            (Some(from), Some(target)) => Some(Link { from, target }),
            _ => {
                diag.info("key link lacks from and/or target column - ignored");
                None
            }
        })
        .collect();
    ForeignMeta {
        target_table: doc.target_table,
        description: doc.description,
        utype: doc.utype,
        key_id: doc.key_id,
        links,
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Reader that acquires the whole hierarchy in one document fetch.
pub struct DocumentReader {
    fetcher: Box<dyn DocumentFetcher>,
    fixer: Mutex<Box<dyn NameFixer>>,
    diag: Arc<dyn DiagSink>,
}

impl DocumentReader {
    /// Reader over the given fetcher.
    pub fn new(
        fetcher: Box<dyn DocumentFetcher>,
        fixer: Box<dyn NameFixer>,
        diag: Arc<dyn DiagSink>,
    ) -> Self {
        Self {
            fetcher,
            fixer: Mutex::new(fixer),
            diag,
        }
    }

    fn fixer(&self) -> MutexGuard<'_, Box<dyn NameFixer>> {
        self.fixer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MetaReader for DocumentReader {
    async fn read_schemas(&self) -> ReadResult<Vec<SchemaMeta>> {
        let body = self.fetcher.fetch("", Detail::Full).await?;
        let doc = decode_document(&body)?;
        let mut schemas = into_schemas(doc, self.diag.as_ref());
        self.fixer().fix_schemas(&mut schemas);
        for schema in &mut schemas {
            if let Some(tables) = schema.tables.known_mut() {
                sort_tables(tables);
            }
        }
        sort_schemas(&mut schemas);
        Ok(schemas)
    }

    async fn read_tables(&self, _schema: &SchemaMeta) -> ReadResult<Vec<TableMeta>> {
        Err(ReadError::unsupported("document", "read_tables"))
    }

    async fn read_columns(&self, _table: &TableMeta) -> ReadResult<Vec<ColumnMeta>> {
        Err(ReadError::unsupported("document", "read_columns"))
    }

    async fn read_foreign_keys(&self, _table: &TableMeta) -> ReadResult<Vec<ForeignMeta>> {
        Err(ReadError::unsupported("document", "read_foreign_keys"))
    }

    fn source(&self) -> String {
        self.fetcher.endpoint()
    }

    fn means(&self) -> String {
        "whole hierarchy in one document (full detail)".into()
    }
}
