//! Reader that interrogates the service's relational catalog tables.
//!
//! The service exposes its own metadata as queryable tables
//! (`catalog.schemas`, `catalog.tables`, `catalog.columns`,
//! `catalog.keys`, `catalog.key_columns`). This reader lists schema
//! names up front and fetches deeper levels with filtered `SELECT`
//! statements: one round of queries per schema for fully populated
//! tables, or narrower single-table queries for columns and keys.
//!
//! Filters are phrased with the *original* names the service reported,
//! not the fixed display names, via the reader's name fixer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::diag::DiagSink;
use crate::error::{ReadError, ReadResult};
use crate::meta::{
    sort_schemas, ColumnMeta, ForeignMeta, Link, Population, SchemaMeta, TableMeta,
};
use crate::names::{syntax, NameFixer};
use crate::query::{QueryEngine, RowSet};

use super::MetaReader;

const SCHEMAS_TABLE: &str = "catalog.schemas";
const TABLES_TABLE: &str = "catalog.tables";
const COLUMNS_TABLE: &str = "catalog.columns";
const KEYS_TABLE: &str = "catalog.keys";
const KEY_COLUMNS_TABLE: &str = "catalog.key_columns";

// ============================================================================
// Queriers
// ============================================================================

/// Describes how one kind of metadata item is read from one catalog
/// table: which columns carry its standard attributes, which column
/// names its parent, and which columns order it for display.
struct MetaQuerier<T> {
    /// Catalog table holding one item per row.
    table: &'static str,
    /// Columns with known semantics; anything else lands in extras.
    att_cols: &'static [&'static str],
    /// If true only the standard columns are queried (they had better
    /// be mandatory); otherwise every available column is queried so
    /// non-standard attributes can be captured.
    std_only: bool,
    /// Column naming the parent item, used as the map key.
    parent_col: Option<&'static str>,
    /// Numeric column giving a preferred display ordering.
    rank_col: Option<&'static str>,
    /// String column giving an alphabetic ordering when rank is absent.
    alpha_col: Option<&'static str>,
    /// Constructs one item from one response row.
    build: fn(&RowSet, usize) -> T,
}

/// Item plus its ordering keys, as read from one row.
struct Ranked<T> {
    meta: T,
    rank: Option<f64>,
    alpha: Option<String>,
}

fn comparable(rank: Option<f64>) -> f64 {
    // absent ranks sort after any plausible declared rank
    rank.unwrap_or(f64::MAX / 4.0)
}

impl<T> MetaQuerier<T> {
    fn ranked(&self, rows: &RowSet, ir: usize) -> Ranked<T> {
        Ranked {
            meta: (self.build)(rows, ir),
            rank: self.rank_col.and_then(|c| rows.f64_cell(ir, c)),
            alpha: self.alpha_col.and_then(|c| rows.str_cell(ir, c)),
        }
    }

    /// Sort as far as the declared ordering columns allow; ties keep
    /// response order.
    fn extract(&self, mut ranked: Vec<Ranked<T>>) -> Vec<T> {
        if self.rank_col.is_some() || self.alpha_col.is_some() {
            ranked.sort_by(|a, b| {
                comparable(a.rank)
                    .total_cmp(&comparable(b.rank))
                    .then_with(|| match (&a.alpha, &b.alpha) {
                        (None, None) => std::cmp::Ordering::Equal,
                        (None, Some(_)) => std::cmp::Ordering::Greater,
                        (Some(_), None) => std::cmp::Ordering::Less,
                        (Some(x), Some(y)) => x.cmp(y),
                    })
            });
        }
        ranked.into_iter().map(|r| r.meta).collect()
    }
}

fn schema_querier() -> MetaQuerier<SchemaMeta> {
    MetaQuerier {
        table: SCHEMAS_TABLE,
        att_cols: &["schema_name", "description", "utype"],
        std_only: true,
        parent_col: None,
        rank_col: None,
        alpha_col: Some("schema_name"),
        build: |rows, ir| SchemaMeta {
            name: rows.str_cell(ir, "schema_name").unwrap_or_default(),
            description: rows.str_cell(ir, "description"),
            utype: rows.str_cell(ir, "utype"),
            ..SchemaMeta::default()
        },
    }
}

fn table_querier() -> MetaQuerier<TableMeta> {
    // table_index exists as an optional display ordering, but
    // alphabetic order is what the other read policies produce, so
    // stick with that for consistency.
    MetaQuerier {
        table: TABLES_TABLE,
        att_cols: &["table_name", "table_type", "description", "utype"],
        std_only: false,
        parent_col: Some("schema_name"),
        rank_col: None,
        alpha_col: Some("table_name"),
        build: |rows, ir| {
            let mut extras = rows.extras(
                ir,
                &["table_name", "table_type", "description", "utype", "schema_name"],
            );
            let nrows = extras.remove("nrows").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
            extras.retain(|k, _| !k.eq_ignore_ascii_case("table_index"));
            TableMeta {
                name: rows.str_cell(ir, "table_name").unwrap_or_default(),
                kind: rows.str_cell(ir, "table_type"),
                description: rows.str_cell(ir, "description"),
                utype: rows.str_cell(ir, "utype"),
                nrows,
                extras,
                ..TableMeta::default()
            }
        },
    }
}

fn column_querier() -> MetaQuerier<ColumnMeta> {
    const FLAG_COLS: [&str; 3] = ["indexed", "principal", "std"];
    MetaQuerier {
        table: COLUMNS_TABLE,
        att_cols: &[
            "column_name",
            "description",
            "unit",
            "ucd",
            "utype",
            "datatype",
            "indexed",
            "principal",
            "std",
        ],
        std_only: false,
        parent_col: Some("table_name"),
        rank_col: Some("column_index"),
        alpha_col: None,
        build: |rows, ir| {
            let flags = FLAG_COLS
                .iter()
                .filter(|f| rows.bool_cell(ir, f))
                .map(|f| f.to_string())
                .collect();
            let mut extras = rows.extras(
                ir,
                &[
                    "column_name",
                    "description",
                    "unit",
                    "ucd",
                    "utype",
                    "datatype",
                    "indexed",
                    "principal",
                    "std",
                    "table_name",
                ],
            );
            extras.retain(|k, _| !k.eq_ignore_ascii_case("column_index"));
            // arraysize and xtype are optional catalog columns; promote
            // them out of the extras bag when present
            let arraysize = extras.remove("arraysize").and_then(value_string);
            let xtype = extras.remove("xtype").and_then(value_string);
            ColumnMeta {
                name: rows.str_cell(ir, "column_name").unwrap_or_default(),
                description: rows.str_cell(ir, "description"),
                unit: rows.str_cell(ir, "unit"),
                ucd: rows.str_cell(ir, "ucd"),
                utype: rows.str_cell(ir, "utype"),
                data_type: rows.str_cell(ir, "datatype"),
                arraysize,
                xtype,
                flags,
                extras,
            }
        },
    }
}

fn key_querier() -> MetaQuerier<ForeignMeta> {
    MetaQuerier {
        table: KEYS_TABLE,
        att_cols: &["key_id", "target_table", "description", "utype"],
        std_only: true,
        parent_col: Some("from_table"),
        rank_col: None,
        alpha_col: None,
        build: |rows, ir| ForeignMeta {
            key_id: rows.str_cell(ir, "key_id"),
            target_table: rows.str_cell(ir, "target_table").unwrap_or_default(),
            description: rows.str_cell(ir, "description"),
            utype: rows.str_cell(ir, "utype"),
            links: Vec::new(),
        },
    }
}

fn link_querier() -> MetaQuerier<Link> {
    MetaQuerier {
        table: KEY_COLUMNS_TABLE,
        att_cols: &["from_column", "target_column"],
        std_only: true,
        parent_col: Some("key_id"),
        rank_col: None,
        alpha_col: None,
        build: |rows, ir| Link {
            from: rows.str_cell(ir, "from_column").unwrap_or_default(),
            target: rows.str_cell(ir, "target_column").unwrap_or_default(),
        },
    }
}

fn value_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s),
        _ => None,
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Reader over the service's own catalog tables.
pub struct SchemaQueryReader {
    engine: Box<dyn QueryEngine>,
    fixer: Mutex<Box<dyn NameFixer>>,
    /// Available-column probe results, cached per catalog table.
    cols_cache: Mutex<HashMap<&'static str, Arc<Vec<String>>>>,
    diag: Arc<dyn DiagSink>,
}

impl SchemaQueryReader {
    /// Reader executing queries through the given engine.
    pub fn new(
        engine: Box<dyn QueryEngine>,
        fixer: Box<dyn NameFixer>,
        diag: Arc<dyn DiagSink>,
    ) -> Self {
        Self {
            engine,
            fixer: Mutex::new(fixer),
            cols_cache: Mutex::new(HashMap::new()),
            diag,
        }
    }

    fn fixer(&self) -> MutexGuard<'_, Box<dyn NameFixer>> {
        self.fixer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Columns available in a catalog table, probed once and cached.
    async fn available_columns(&self, table: &'static str) -> ReadResult<Arc<Vec<String>>> {
        if let Some(cols) = self
            .cols_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
        {
            return Ok(cols.clone());
        }
        let probe = format!("SELECT TOP 1 * FROM {table}");
        let rows = self.engine.execute(&probe).await?;
        let cols: Vec<String> = rows
            .columns()
            .iter()
            // The historical "size" column is a reserved word and
            // services disagree about delimiting it; it is superseded
            // by arraysize anyway, so never echo it back into a SELECT.
            .filter(|name| !syntax::unquote(name).eq_ignore_ascii_case("size"))
            .cloned()
            .collect();
        let cols = Arc::new(cols);
        self.cols_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table, cols.clone());
        Ok(cols)
    }

    /// Execute the querier's SELECT, optionally with the parent column
    /// and an extra clause, checking the response shape.
    async fn query<T>(
        &self,
        querier: &MetaQuerier<T>,
        with_parent: bool,
        more: Option<&str>,
    ) -> ReadResult<RowSet> {
        let mut cols: Vec<String> = if querier.std_only {
            querier.att_cols.iter().map(|c| c.to_string()).collect()
        } else {
            self.available_columns(querier.table).await?.as_ref().clone()
        };
        if querier.std_only && with_parent {
            if let Some(parent) = querier.parent_col {
                cols.push(parent.to_string());
            }
        }
        let mut sql = format!("SELECT {} FROM {}", cols.join(", "), querier.table);
        if let Some(more) = more {
            sql.push(' ');
            sql.push_str(more);
        }
        let rows = self.engine.execute(&sql).await?;
        if rows.columns().len() != cols.len() {
            return Err(ReadError::structure(format!(
                "catalog query column count mismatch ({} != {})",
                rows.columns().len(),
                cols.len()
            )));
        }
        Ok(rows)
    }

    /// Read a flat list of items.
    async fn read_list<T>(
        &self,
        querier: &MetaQuerier<T>,
        more: Option<&str>,
    ) -> ReadResult<Vec<T>> {
        let rows = self.query(querier, false, more).await?;
        let ranked = (0..rows.len()).map(|ir| querier.ranked(&rows, ir)).collect();
        Ok(querier.extract(ranked))
    }

    /// Read items grouped by their parent's name.
    async fn read_map<T>(
        &self,
        querier: &MetaQuerier<T>,
        more: Option<&str>,
    ) -> ReadResult<HashMap<String, Vec<T>>> {
        let parent = querier
            .parent_col
            .ok_or_else(|| ReadError::structure("querier has no parent column"))?;
        let rows = self.query(querier, true, more).await?;
        let mut grouped: HashMap<String, Vec<Ranked<T>>> = HashMap::new();
        for ir in 0..rows.len() {
            let key = rows.str_cell(ir, parent).unwrap_or_default();
            grouped.entry(key).or_default().push(querier.ranked(&rows, ir));
        }
        Ok(grouped
            .into_iter()
            .map(|(key, ranked)| (key, querier.extract(ranked)))
            .collect())
    }

    /// Warn about entries left over after population, which indicate
    /// catalog rows pointing at undeclared parents.
    fn check_empty<T>(&self, map: &HashMap<String, Vec<T>>, kind: &str) {
        if !map.is_empty() {
            self.diag
                .warning(&format!("{} orphaned {kind} entries", map.len()));
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            self.diag.info(&format!("orphaned {kind} parents: {keys:?}"));
        }
    }

    /// Read the whole hierarchy in one round of unfiltered queries.
    ///
    /// Tables whose schema is not declared in the schema listing are
    /// attached to placeholder schemas when `add_orphans` is set.
    pub async fn read_schemas_full(&self, add_orphans: bool) -> ReadResult<Vec<SchemaMeta>> {
        let mut schemas = self.read_list(&schema_querier(), None).await?;
        let mut tmap = self.read_map(&table_querier(), None).await?;
        let column_q = column_querier();
        let key_q = key_querier();
        let (mut cmap, mut fmap) = futures::try_join!(
            self.read_map(&column_q, None),
            self.read_map(&key_q, None)
        )?;
        let mut lmap = self.read_map(&link_querier(), None).await?;
        for keys in fmap.values_mut() {
            for key in keys.iter_mut() {
                populate_foreign_key(key, &mut lmap);
            }
        }
        self.check_empty(&lmap, "link");
        for tables in tmap.values_mut() {
            for table in tables.iter_mut() {
                populate_table(table, &mut fmap, &mut cmap);
            }
        }
        self.check_empty(&fmap, "foreign key");
        self.check_empty(&cmap, "column");
        for schema in &mut schemas {
            populate_schema(schema, &mut tmap);
        }
        if !tmap.is_empty() && add_orphans {
            let mut names: Vec<_> = tmap.keys().cloned().collect();
            names.sort();
            self.diag
                .warning(&format!("adding entries from undeclared schemas: {names:?}"));
            for name in names {
                let mut schema = SchemaMeta::placeholder(&name);
                schema.tables = Population::Known(tmap.remove(&name).unwrap_or_default());
                schemas.push(schema);
            }
        }
        self.check_empty(&tmap, "table");
        self.fixer().fix_schemas(&mut schemas);
        sort_schemas(&mut schemas);
        Ok(schemas)
    }
}

/// Move this key's links out of the map; no entries means no links.
fn populate_foreign_key(key: &mut ForeignMeta, lmap: &mut HashMap<String, Vec<Link>>) {
    key.links = key
        .key_id
        .as_deref()
        .and_then(|id| lmap.remove(id))
        .unwrap_or_default();
}

/// Move this table's columns and keys out of the maps; missing entries
/// populate as empty.
fn populate_table(
    table: &mut TableMeta,
    fmap: &mut HashMap<String, Vec<ForeignMeta>>,
    cmap: &mut HashMap<String, Vec<ColumnMeta>>,
) {
    table.foreign_keys = Population::Known(fmap.remove(&table.name).unwrap_or_default());
    table.columns = Population::Known(cmap.remove(&table.name).unwrap_or_default());
}

/// Move this schema's tables out of the map; a missing entry populates
/// as empty.
fn populate_schema(schema: &mut SchemaMeta, tmap: &mut HashMap<String, Vec<TableMeta>>) {
    schema.tables = Population::Known(tmap.remove(&schema.name).unwrap_or_default());
}

fn in_clause(column: &str, names: &[String]) -> String {
    let literals: Vec<String> = names.iter().map(|n| syntax::quote_literal(n)).collect();
    format!("WHERE {column} IN ({})", literals.join(", "))
}

#[async_trait]
impl MetaReader for SchemaQueryReader {
    /// Schema names and descriptions only; tables stay unknown.
    async fn read_schemas(&self) -> ReadResult<Vec<SchemaMeta>> {
        self.read_list(&schema_querier(), None).await
    }

    /// One round of filtered queries yielding the schema's tables fully
    /// populated with columns and keys.
    async fn read_tables(&self, schema: &SchemaMeta) -> ReadResult<Vec<TableMeta>> {
        let schema_name = schema.name.clone();
        let where_schema = format!(
            "WHERE schema_name = {}",
            syntax::quote_literal(&schema_name)
        );
        let mut tables = self.read_list(&table_querier(), Some(&where_schema)).await?;
        if tables.is_empty() {
            return Ok(tables);
        }
        let names: Vec<String> = tables.iter().map(|t| t.name.clone()).collect();
        let column_q = column_querier();
        let key_q = key_querier();
        let column_where = in_clause("table_name", &names);
        let key_where = in_clause("from_table", &names);
        let (mut cmap, mut fmap) = futures::try_join!(
            self.read_map(&column_q, Some(&column_where)),
            self.read_map(&key_q, Some(&key_where))
        )?;
        let key_ids: Vec<String> = fmap
            .values()
            .flatten()
            .filter_map(|k| k.key_id.clone())
            .collect();
        let mut lmap = if key_ids.is_empty() {
            HashMap::new()
        } else {
            self.read_map(&link_querier(), Some(&in_clause("key_id", &key_ids)))
                .await?
        };
        for keys in fmap.values_mut() {
            for key in keys.iter_mut() {
                populate_foreign_key(key, &mut lmap);
            }
        }
        self.check_empty(&lmap, "link");
        for table in tables.iter_mut() {
            populate_table(table, &mut fmap, &mut cmap);
        }
        self.check_empty(&fmap, "foreign key");
        self.check_empty(&cmap, "column");
        self.fixer().fix_tables(Some(&schema_name), &mut tables);
        Ok(tables)
    }

    async fn read_columns(&self, table: &TableMeta) -> ReadResult<Vec<ColumnMeta>> {
        let orig = self.fixer().original_table_name(&table.name).to_string();
        let more = format!("WHERE table_name = {}", syntax::quote_literal(&orig));
        let mut columns = self.read_list(&column_querier(), Some(&more)).await?;
        self.fixer().fix_columns(&mut columns);
        Ok(columns)
    }

    async fn read_foreign_keys(&self, table: &TableMeta) -> ReadResult<Vec<ForeignMeta>> {
        let orig = self.fixer().original_table_name(&table.name).to_string();
        let more = format!("WHERE from_table = {}", syntax::quote_literal(&orig));
        let mut keys = self.read_list(&key_querier(), Some(&more)).await?;
        let key_ids: Vec<String> = keys.iter().filter_map(|k| k.key_id.clone()).collect();
        if !key_ids.is_empty() {
            let mut lmap = self
                .read_map(&link_querier(), Some(&in_clause("key_id", &key_ids)))
                .await?;
            for key in keys.iter_mut() {
                populate_foreign_key(key, &mut lmap);
            }
            self.check_empty(&lmap, "link");
        }
        Ok(keys)
    }

    fn source(&self) -> String {
        self.engine.endpoint()
    }

    fn means(&self) -> String {
        "relational catalog queries (one round per schema)".into()
    }
}
