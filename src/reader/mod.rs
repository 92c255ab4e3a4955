//! Reader strategies for acquiring service metadata.
//!
//! A [`MetaReader`] is a pure I/O adapter that knows how to pull some
//! or all of the schema hierarchy from one concrete wire protocol. The
//! strategies differ in population granularity:
//!
//! - [`DocumentReader`] fetches one document that already contains
//!   schemas, tables, columns and keys; per-level calls are
//!   unsupported.
//! - [`SchemaQueryReader`] lists schema names up front and runs
//!   relational queries against the service's catalog tables for
//!   deeper levels.
//! - [`TwoStageReader`] addresses a two-tier listing endpoint by path
//!   segment, with a tunable detail level.
//!
//! Readers never mutate the metadata objects handed to them (those are
//! read-only lookup keys) and never cache; caching and coalescing is
//! the manager's job.

mod document;
mod schema_query;
mod two_stage;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ServiceSettings, Settings};
use crate::diag::DiagSink;
use crate::error::ReadResult;
use crate::meta::{ColumnMeta, ForeignMeta, SchemaMeta, TableMeta};
use crate::names::{IdentityFixer, NameFixer, QuotingFixer};
use crate::query::QueryClient;

pub use document::{Detail, DocumentFetcher, DocumentReader, HttpDocumentFetcher};
pub use schema_query::SchemaQueryReader;
pub use two_stage::TwoStageReader;

/// Strategy interface for reading the metadata hierarchy.
///
/// `read_schemas` must always yield a complete, at least name-populated
/// schema list or fail with an I/O error. The per-level methods are
/// optional: a strategy whose `read_schemas` already fully populates
/// the tree answers them with
/// [`ReadError::Unsupported`](crate::error::ReadError::Unsupported),
/// and callers are expected never to need them in that case.
///
/// All methods perform blocking network I/O and are meant to be driven
/// off the foreground context, normally by the
/// [`MetaManager`](crate::manager::MetaManager).
#[async_trait]
pub trait MetaReader: Send + Sync {
    /// Read the complete schema list, freshly constructed.
    async fn read_schemas(&self) -> ReadResult<Vec<SchemaMeta>>;

    /// Read the total table list of one schema.
    async fn read_tables(&self, schema: &SchemaMeta) -> ReadResult<Vec<TableMeta>>;

    /// Read the column list of one table.
    async fn read_columns(&self, table: &TableMeta) -> ReadResult<Vec<ColumnMeta>>;

    /// Read the foreign-key list of one table.
    async fn read_foreign_keys(&self, table: &TableMeta) -> ReadResult<Vec<ForeignMeta>>;

    /// Stable identifying string, typically the base address.
    /// For diagnostic display only; never used for equality or caching.
    fn source(&self) -> String;

    /// Short human-readable description of the acquisition method.
    fn means(&self) -> String;
}

/// Selects which reader strategy a service is read with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetaPolicy {
    /// Pick a strategy from the configured endpoints.
    #[default]
    Auto,
    /// Whole hierarchy in one document fetch.
    Document,
    /// Relational queries against the service's catalog tables.
    SchemaQuery,
    /// Two-tier listing endpoint addressed by path segment.
    TwoStage,
}

impl MetaPolicy {
    /// Resolve `Auto` to a concrete strategy: the two-stage listing
    /// when an explicit tables endpoint is configured, the one-shot
    /// document otherwise.
    pub fn resolve(self, service: &ServiceSettings) -> Self {
        match self {
            Self::Auto if service.tables_url.is_some() => Self::TwoStage,
            Self::Auto => Self::Document,
            other => other,
        }
    }

    /// Construct the reader this policy selects for a configured
    /// service.
    pub fn create_reader(
        self,
        settings: &Settings,
        diag: Arc<dyn DiagSink>,
    ) -> ReadResult<Arc<dyn MetaReader>> {
        let endpoints = settings.service.endpoints();
        let meta = &settings.metadata;
        let fixer = make_fixer(meta.fix_names, diag.clone());
        Ok(match self.resolve(&settings.service) {
            MetaPolicy::Auto | MetaPolicy::Document => Arc::new(DocumentReader::new(
                Box::new(HttpDocumentFetcher::new(endpoints.tables, meta.timeout())?),
                fixer,
                diag,
            )),
            MetaPolicy::SchemaQuery => {
                let engine =
                    QueryClient::with_timeout(endpoints.sync, meta.maxrec, meta.timeout())?;
                Arc::new(SchemaQueryReader::new(Box::new(engine), fixer, diag))
            }
            MetaPolicy::TwoStage => Arc::new(TwoStageReader::new(
                Box::new(HttpDocumentFetcher::new(endpoints.tables, meta.timeout())?),
                meta.detail,
                fixer,
                diag,
            )),
        })
    }
}

fn make_fixer(fix_names: bool, diag: Arc<dyn DiagSink>) -> Box<dyn NameFixer> {
    if fix_names {
        Box::new(QuotingFixer::new(diag))
    } else {
        Box::new(IdentityFixer)
    }
}
