//! Deterministic ordering of schema and table lists.
//!
//! Lists are sorted primarily by the declared numeric index when
//! present, falling back to name, so that repeated fetches of the same
//! service render in a stable order regardless of server-side ordering.
//! The sorts are stable: entries tied on both keys keep their acquired
//! relative order.

use super::{SchemaMeta, TableMeta};

/// Maps an optional declared index to a comparable rank.
/// Absent indexes sort after every present index.
fn rank(index: Option<i64>) -> (bool, i64) {
    match index {
        Some(ix) => (false, ix),
        None => (true, 0),
    }
}

/// Sort a schema list by declared index, then name.
pub fn sort_schemas(schemas: &mut [SchemaMeta]) {
    schemas.sort_by(|a, b| {
        rank(a.index)
            .cmp(&rank(b.index))
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Sort a table list by declared index, then name.
pub fn sort_tables(tables: &mut [TableMeta]) {
    tables.sort_by(|a, b| {
        rank(a.index)
            .cmp(&rank(b.index))
            .then_with(|| a.name.cmp(&b.name))
    });
}
