//! Repair of non-conformant identifiers reported by a service.

use std::collections::HashMap;
use std::sync::Arc;

use crate::diag::DiagSink;
use crate::meta::{ColumnMeta, Population, SchemaMeta, TableMeta};

use super::syntax;

/// Rewrites syntactically illegal table and column names into legal
/// ones, remembering the original ↔ fixed mapping so that outgoing
/// requests can be phrased with the name the service actually reported.
///
/// Fixing is idempotent: fixing an already-fixed name is a no-op.
pub trait NameFixer: Send {
    /// Return a legal form of a (possibly qualified) table name,
    /// recording the mapping if a rewrite was needed. The `schema`
    /// argument is used only for diagnostics.
    fn fixed_table_name(&mut self, name: &str, schema: Option<&str>) -> String;

    /// Return a legal form of a column name, recording the mapping if a
    /// rewrite was needed.
    fn fixed_column_name(&mut self, name: &str) -> String;

    /// The name the service reported for a fixed table name; names that
    /// never needed fixing are returned unchanged.
    fn original_table_name<'a>(&'a self, fixed: &'a str) -> &'a str;

    /// The name the service reported for a fixed column name.
    fn original_column_name<'a>(&'a self, fixed: &'a str) -> &'a str;

    /// Repair the names of every table in a list, and of any columns
    /// the tables already carry.
    fn fix_tables(&mut self, schema_name: Option<&str>, tables: &mut [TableMeta]) {
        for table in tables.iter_mut() {
            table.name = self.fixed_table_name(&table.name, schema_name);
            if let Population::Known(columns) = &mut table.columns {
                for column in columns.iter_mut() {
                    column.name = self.fixed_column_name(&column.name);
                }
            }
        }
    }

    /// Repair a column list in place.
    fn fix_columns(&mut self, columns: &mut [ColumnMeta]) {
        for column in columns.iter_mut() {
            column.name = self.fixed_column_name(&column.name);
        }
    }

    /// Repair a whole schema list in place.
    fn fix_schemas(&mut self, schemas: &mut [SchemaMeta]) {
        for schema in schemas.iter_mut() {
            let name = schema.name.clone();
            if let Population::Known(tables) = &mut schema.tables {
                self.fix_tables(Some(&name), tables);
            }
        }
    }
}

/// Default fixer: quotes whatever the grammar rejects.
///
/// The first table fix and the first column fix are reported at warning
/// level through the diagnostics sink, since fixing should be rare;
/// subsequent fixes are reported as plain information.
pub struct QuotingFixer {
    /// fixed name → name reported by the service
    tables: HashMap<String, String>,
    columns: HashMap<String, String>,
    diag: Arc<dyn DiagSink>,
    warned_tables: bool,
    warned_columns: bool,
}

impl QuotingFixer {
    /// Fixer reporting through the given sink.
    pub fn new(diag: Arc<dyn DiagSink>) -> Self {
        Self {
            tables: HashMap::new(),
            columns: HashMap::new(),
            diag,
            warned_tables: false,
            warned_columns: false,
        }
    }
}

impl NameFixer for QuotingFixer {
    fn fixed_table_name(&mut self, name: &str, schema: Option<&str>) -> String {
        let fixed = syntax::split_qualified(name)
            .iter()
            .map(|part| syntax::quote_if_necessary(part))
            .collect::<Vec<_>>()
            .join(".");
        if fixed != name {
            let context = match schema {
                Some(s) => format!(" in schema {s}"),
                None => String::new(),
            };
            let message = format!("fixed illegal table name {name:?} -> {fixed:?}{context}");
            if self.warned_tables {
                self.diag.info(&message);
            } else {
                self.warned_tables = true;
                self.diag.warning(&message);
            }
            self.tables.insert(fixed.clone(), name.to_string());
        }
        fixed
    }

    fn fixed_column_name(&mut self, name: &str) -> String {
        let fixed = syntax::quote_if_necessary(name);
        if fixed != name {
            let message = format!("fixed illegal column name {name:?} -> {fixed:?}");
            if self.warned_columns {
                self.diag.info(&message);
            } else {
                self.warned_columns = true;
                self.diag.warning(&message);
            }
            self.columns.insert(fixed.clone(), name.to_string());
        }
        fixed
    }

    fn original_table_name<'a>(&'a self, fixed: &'a str) -> &'a str {
        self.tables.get(fixed).map(String::as_str).unwrap_or(fixed)
    }

    fn original_column_name<'a>(&'a self, fixed: &'a str) -> &'a str {
        self.columns.get(fixed).map(String::as_str).unwrap_or(fixed)
    }
}

/// Fixer that trusts the service: every name passes through unchanged
/// and the batch traversals do no work at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityFixer;

impl NameFixer for IdentityFixer {
    fn fixed_table_name(&mut self, name: &str, _schema: Option<&str>) -> String {
        name.to_string()
    }

    fn fixed_column_name(&mut self, name: &str) -> String {
        name.to_string()
    }

    fn original_table_name<'a>(&'a self, fixed: &'a str) -> &'a str {
        fixed
    }

    fn original_column_name<'a>(&'a self, fixed: &'a str) -> &'a str {
        fixed
    }

    fn fix_tables(&mut self, _schema_name: Option<&str>, _tables: &mut [TableMeta]) {}

    fn fix_columns(&mut self, _columns: &mut [ColumnMeta]) {}

    fn fix_schemas(&mut self, _schemas: &mut [SchemaMeta]) {}
}
