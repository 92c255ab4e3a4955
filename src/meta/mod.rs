//! Hierarchical metadata data model.
//!
//! A remote tabular service publishes a schema → table → column /
//! foreign-key hierarchy. The types here hold that hierarchy in memory
//! with explicit partial-population state: each list that can be fetched
//! lazily is a [`Population`], distinguishing "not fetched yet" from
//! "fetched and possibly empty".
//!
//! Value types are plain records created by reader strategies; after
//! construction they are mutated only by the owning [`MetaStore`]
//! (population) or a name fixer (identifier repair).

mod order;
mod store;
mod types;

pub use order::{sort_schemas, sort_tables};
pub use store::{MetaStore, SchemaId, TableId};
pub use types::{ColumnMeta, Extras, ForeignMeta, Link, Population, SchemaMeta, TableMeta};
