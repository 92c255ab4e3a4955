//! Two-stage reader for path-addressed listing endpoints.
//!
//! The listing endpoint serves the whole hierarchy at `{base}`, one
//! schema at `{base}/{schema}` and one table at
//! `{base}/{schema}/{table}`, with a `detail=` parameter hinting how
//! deep the returned elements go. Depending on the configured detail a
//! schema-level call may already carry tables.
//!
//! Single-table lookups need the owning schema for the request path,
//! so the reader remembers a table → schema map learned from earlier
//! listings. The map has no invalidation: if the remote metadata
//! changes between the listing and a later single-table fetch, the
//! lookup surfaces as a zero-or-multiple-match error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::diag::DiagSink;
use crate::error::{ReadError, ReadResult};
use crate::meta::{sort_schemas, sort_tables, ColumnMeta, ForeignMeta, Population, SchemaMeta, TableMeta};
use crate::names::NameFixer;

use super::document::{decode_document, flatten_tables, into_schemas, Detail, DocumentFetcher};
use super::MetaReader;

/// Reader over a two-tier listing endpoint.
pub struct TwoStageReader {
    fetcher: Box<dyn DocumentFetcher>,
    /// Granularity requested for schema-level listings.
    detail: Detail,
    fixer: Mutex<Box<dyn NameFixer>>,
    /// Fixed table name → schema name, learned from listings.
    schema_of: Mutex<HashMap<String, String>>,
    diag: Arc<dyn DiagSink>,
}

impl TwoStageReader {
    /// Reader over the given fetcher, requesting `detail` for
    /// schema-level listings.
    pub fn new(
        fetcher: Box<dyn DocumentFetcher>,
        detail: Detail,
        fixer: Box<dyn NameFixer>,
        diag: Arc<dyn DiagSink>,
    ) -> Self {
        Self {
            fetcher,
            detail,
            fixer: Mutex::new(fixer),
            schema_of: Mutex::new(HashMap::new()),
            diag,
        }
    }

    fn fixer(&self) -> MutexGuard<'_, Box<dyn NameFixer>> {
        self.fixer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schema_map(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.schema_of.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remember which schema each (already fixed) table belongs to.
    fn learn(&self, schema_name: &str, tables: &[TableMeta]) {
        let mut map = self.schema_map();
        for table in tables {
            map.insert(table.name.clone(), schema_name.to_string());
        }
    }

    /// Fetch one table's element via the per-table path, expecting
    /// exactly one match.
    async fn fetch_single_table(&self, table: &TableMeta) -> ReadResult<TableMeta> {
        let (orig, schema_name) = {
            let fixer = self.fixer();
            let orig = fixer.original_table_name(&table.name).to_string();
            let schema_name = self.schema_map().get(&table.name).cloned();
            (orig, schema_name)
        };
        let schema_name = schema_name.ok_or_else(|| {
            ReadError::structure(format!(
                "no known schema for table {orig} at {}",
                self.fetcher.endpoint()
            ))
        })?;
        let subpath = format!("{schema_name}/{orig}");
        let body = self.fetcher.fetch(&subpath, Detail::Full).await?;
        let doc = decode_document(&body)?;
        let mut found: Vec<TableMeta> = flatten_tables(doc, self.diag.as_ref())
            .into_iter()
            .filter(|t| t.name == orig)
            .collect();
        if found.len() != 1 {
            return Err(ReadError::structure(format!(
                "{} matching table elements for {schema_name}.{orig} at {}/{subpath}",
                found.len(),
                self.fetcher.endpoint()
            )));
        }
        Ok(found.remove(0))
    }
}

#[async_trait]
impl MetaReader for TwoStageReader {
    async fn read_schemas(&self) -> ReadResult<Vec<SchemaMeta>> {
        let body = self.fetcher.fetch("", self.detail).await?;
        let doc = decode_document(&body)?;
        let mut schemas = into_schemas(doc, self.diag.as_ref());
        self.fixer().fix_schemas(&mut schemas);
        for schema in &mut schemas {
            if let Some(tables) = schema.tables.known_mut() {
                sort_tables(tables);
            }
            if let Some(tables) = schema.tables.known() {
                self.learn(&schema.name, tables);
            }
        }
        sort_schemas(&mut schemas);
        Ok(schemas)
    }

    async fn read_tables(&self, schema: &SchemaMeta) -> ReadResult<Vec<TableMeta>> {
        let body = self.fetcher.fetch(&schema.name, self.detail).await?;
        let doc = decode_document(&body)?;
        let mut matches: Vec<SchemaMeta> = into_schemas(doc, self.diag.as_ref())
            .into_iter()
            .filter(|s| s.name == schema.name)
            .collect();
        if matches.len() != 1 {
            return Err(ReadError::structure(format!(
                "{} matching schema elements for {} at {}/{}",
                matches.len(),
                schema.name,
                self.fetcher.endpoint(),
                schema.name
            )));
        }
        let mut tables = match matches.remove(0).tables {
            Population::Known(tables) => tables,
            Population::Unknown => {
                return Err(ReadError::structure(format!(
                    "no table list for schema {} at {}/{}",
                    schema.name,
                    self.fetcher.endpoint(),
                    schema.name
                )))
            }
        };
        self.fixer().fix_tables(Some(&schema.name), &mut tables);
        sort_tables(&mut tables);
        self.learn(&schema.name, &tables);
        Ok(tables)
    }

    async fn read_columns(&self, table: &TableMeta) -> ReadResult<Vec<ColumnMeta>> {
        let found = self.fetch_single_table(table).await?;
        let mut columns = match found.columns {
            Population::Known(columns) => columns,
            Population::Unknown => {
                return Err(ReadError::structure(format!(
                    "no column info for table {} at {}",
                    table.name,
                    self.fetcher.endpoint()
                )))
            }
        };
        self.fixer().fix_columns(&mut columns);
        Ok(columns)
    }

    async fn read_foreign_keys(&self, table: &TableMeta) -> ReadResult<Vec<ForeignMeta>> {
        let found = self.fetch_single_table(table).await?;
        match found.foreign_keys {
            Population::Known(keys) => Ok(keys),
            Population::Unknown => Err(ReadError::structure(format!(
                "no foreign key info for table {} at {}",
                table.name,
                self.fetcher.endpoint()
            ))),
        }
    }

    fn source(&self) -> String {
        self.fetcher.endpoint()
    }

    fn means(&self) -> String {
        format!(
            "two-stage listing (detail={})",
            match self.detail {
                Detail::Full => "full",
                Detail::Table => "table",
                Detail::Schema => "schema",
            }
        )
    }
}
