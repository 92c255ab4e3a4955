//! Diagnostics sink for non-fatal conditions.
//!
//! Components that repair or skip bad service metadata (the name fixer,
//! the reader strategies) report through an explicit sink instead of
//! logging ambiently, so embedders can route or silence diagnostics per
//! component instance.

use std::sync::Arc;

/// Receiver for non-fatal diagnostics emitted while reading metadata.
pub trait DiagSink: Send + Sync {
    /// Routine information, e.g. which endpoint is being read.
    fn info(&self, message: &str);

    /// Suspicious but recoverable conditions, e.g. a repaired identifier
    /// or a table reported outside any schema.
    fn warning(&self, message: &str);
}

/// Sink that forwards diagnostics to the `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagSink for TracingSink {
    fn info(&self, message: &str) {
        tracing::info!(target: "tabmeta", "{message}");
    }

    fn warning(&self, message: &str) {
        tracing::warn!(target: "tabmeta", "{message}");
    }
}

/// The sink used when the embedder does not supply one.
pub fn default_sink() -> Arc<dyn DiagSink> {
    Arc::new(TracingSink)
}
