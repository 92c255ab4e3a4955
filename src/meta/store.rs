//! Arena ownership of the metadata hierarchy.
//!
//! The store owns the schema list and hands out small copyable handles
//! instead of references, so that the asynchronous manager can key its
//! pending-fetch map on `(handle, field)` rather than on object
//! identity. Handles stay valid for the lifetime of the store because
//! population is monotonic: a populated list is never replaced, so the
//! positions handles encode never move.

use super::{ColumnMeta, ForeignMeta, Population, SchemaMeta, TableMeta};

/// Handle to one schema in a [`MetaStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaId(usize);

/// Handle to one table in a [`MetaStore`].
///
/// Encodes the owning schema and the table's position in the schema's
/// (total, immutable once populated) table list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId {
    schema: SchemaId,
    index: usize,
}

impl TableId {
    /// Handle of the schema this table belongs to.
    pub fn schema(&self) -> SchemaId {
        self.schema
    }
}

/// In-memory owner of one service's metadata hierarchy.
///
/// The hierarchy exists only for the lifetime of the owning session;
/// there is no persisted state.
#[derive(Debug, Default)]
pub struct MetaStore {
    schemas: Population<Vec<SchemaMeta>>,
}

impl MetaStore {
    /// Empty store with the root schema list not yet fetched.
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the root schema list has been installed.
    pub fn has_schemas(&self) -> bool {
        self.schemas.is_known()
    }

    /// Install the root schema list, created once per session.
    ///
    /// A second installation is refused: the root array is never
    /// refreshed for the lifetime of the store.
    pub fn install_schemas(&mut self, schemas: Vec<SchemaMeta>) -> Vec<SchemaId> {
        if self.schemas.is_known() {
            tracing::warn!("schema list already installed; ignoring replacement");
        } else {
            self.schemas = Population::Known(schemas);
        }
        self.schema_ids()
    }

    /// Handles of all installed schemas, in display order.
    pub fn schema_ids(&self) -> Vec<SchemaId> {
        match self.schemas.known() {
            Some(list) => (0..list.len()).map(SchemaId).collect(),
            None => Vec::new(),
        }
    }

    /// The schema behind a handle.
    pub fn schema(&self, id: SchemaId) -> Option<&SchemaMeta> {
        self.schemas.known()?.get(id.0)
    }

    /// Handles of a schema's tables, or `None` while the table list is
    /// still unknown.
    pub fn table_ids(&self, id: SchemaId) -> Option<Vec<TableId>> {
        let tables = self.schema(id)?.tables.known()?;
        Some(
            (0..tables.len())
                .map(|index| TableId { schema: id, index })
                .collect(),
        )
    }

    /// The table behind a handle.
    pub fn table(&self, id: TableId) -> Option<&TableMeta> {
        self.schema(id.schema)?.tables.known()?.get(id.index)
    }

    /// Populate a schema's table list. No-op if already populated.
    pub fn set_tables(&mut self, id: SchemaId, tables: Vec<TableMeta>) {
        if let Some(schema) = self.schema_mut(id) {
            if schema.tables.is_known() {
                tracing::warn!(schema = %schema.name, "table list already populated; keeping it");
                return;
            }
            schema.tables = Population::Known(tables);
        }
    }

    /// Populate a table's column list. No-op if already populated.
    pub fn set_columns(&mut self, id: TableId, columns: Vec<ColumnMeta>) {
        if let Some(table) = self.table_mut(id) {
            if table.columns.is_known() {
                tracing::warn!(table = %table.name, "column list already populated; keeping it");
                return;
            }
            table.columns = Population::Known(columns);
        }
    }

    /// Populate a table's foreign-key list. No-op if already populated.
    pub fn set_foreign_keys(&mut self, id: TableId, keys: Vec<ForeignMeta>) {
        if let Some(table) = self.table_mut(id) {
            if table.foreign_keys.is_known() {
                tracing::warn!(table = %table.name, "foreign keys already populated; keeping them");
                return;
            }
            table.foreign_keys = Population::Known(keys);
        }
    }

    fn schema_mut(&mut self, id: SchemaId) -> Option<&mut SchemaMeta> {
        self.schemas.known_mut()?.get_mut(id.0)
    }

    fn table_mut(&mut self, id: TableId) -> Option<&mut TableMeta> {
        self.schema_mut(id.schema)?.tables.known_mut()?.get_mut(id.index)
    }
}
