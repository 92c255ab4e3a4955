//! Metadata value types.

use std::collections::BTreeMap;

use serde_json::Value;

/// Load state of a lazily fetched metadata list.
///
/// `Unknown` means the value has never been fetched; `Known` means the
/// last fetch produced this (possibly empty) value. Population is
/// one-way: once `Known`, a field is never reset.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Population<T> {
    /// Not yet fetched.
    #[default]
    Unknown,
    /// Fetched; complete as of the last fetch.
    Known(T),
}

impl<T> Population<T> {
    /// True once the value has been fetched.
    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    /// The fetched value, if any.
    pub fn known(&self) -> Option<&T> {
        match self {
            Self::Known(value) => Some(value),
            Self::Unknown => None,
        }
    }

    /// Mutable access to the fetched value, if any.
    pub fn known_mut(&mut self) -> Option<&mut T> {
        match self {
            Self::Known(value) => Some(value),
            Self::Unknown => None,
        }
    }
}

/// Extra attributes reported by the service beyond the standard set.
pub type Extras = BTreeMap<String, Value>;

/// Metadata for one schema of a remote tabular service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaMeta {
    /// Schema name, already repaired for safe unescaped use in queries.
    pub name: String,
    /// Human-readable title.
    pub title: Option<String>,
    /// Free-text description.
    pub description: Option<String>,
    /// Usage type identifier.
    pub utype: Option<String>,
    /// Declared display ordering; absent sorts after any present index.
    pub index: Option<i64>,
    /// Non-standard attributes.
    pub extras: Extras,
    /// Tables of this schema. When known, the list is total, not a page.
    pub tables: Population<Vec<TableMeta>>,
}

impl SchemaMeta {
    /// Bare schema with only a name, as produced by name-only listings.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Placeholder schema for tables whose schema the service did not
    /// declare.
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self::named(name)
    }
}

/// Metadata for one table.
///
/// Columns and foreign keys are independently fetchable: a table may
/// have known columns while its keys are still unknown, or vice versa.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableMeta {
    /// Table type tag, e.g. `"table"` or `"view"`.
    pub kind: Option<String>,
    /// Table name, already repaired for safe unescaped use in queries.
    pub name: String,
    /// Human-readable title.
    pub title: Option<String>,
    /// Free-text description.
    pub description: Option<String>,
    /// Usage type identifier.
    pub utype: Option<String>,
    /// Approximate row count as reported by the service.
    pub nrows: Option<String>,
    /// Declared display ordering; absent sorts after any present index.
    pub index: Option<i64>,
    /// Non-standard attributes.
    pub extras: Extras,
    /// Columns of this table.
    pub columns: Population<Vec<ColumnMeta>>,
    /// Foreign keys of this table.
    pub foreign_keys: Population<Vec<ForeignMeta>>,
}

impl TableMeta {
    /// Bare table with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Metadata for one column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMeta {
    /// Column name, already repaired for safe unescaped use in queries.
    pub name: String,
    /// Free-text description.
    pub description: Option<String>,
    /// Unit string.
    pub unit: Option<String>,
    /// Content descriptor.
    pub ucd: Option<String>,
    /// Usage type identifier.
    pub utype: Option<String>,
    /// Declared data type.
    pub data_type: Option<String>,
    /// Array size descriptor.
    pub arraysize: Option<String>,
    /// Extended type annotation.
    pub xtype: Option<String>,
    /// Free-form flags such as `"indexed"`, `"primary"`, `"std"`.
    pub flags: Vec<String>,
    /// Non-standard attributes.
    pub extras: Extras,
}

impl ColumnMeta {
    /// Bare column with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// True if the given flag string is set on this column.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

/// Metadata for one foreign key.
///
/// Links are set in one shot by the reader that constructs the key;
/// there is no partial link population.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForeignMeta {
    /// Name of the table the key points at.
    pub target_table: String,
    /// Free-text description.
    pub description: Option<String>,
    /// Usage type identifier.
    pub utype: Option<String>,
    /// Service-assigned key identifier.
    pub key_id: Option<String>,
    /// Column pairings making up the key.
    pub links: Vec<Link>,
}

/// One from-column → target-column pairing of a foreign key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Link {
    /// Column in the owning table.
    pub from: String,
    /// Column in the target table.
    pub target: String,
}
