//! Query logging sink.
//!
//! Every facade operation renders its query with the arguments inlined and
//! hands it to a [`QuerySink`] before execution. Sink failures (errors or
//! panics) are swallowed; they never reach the caller.

use std::panic::AssertUnwindSafe;

use tokio::time::Instant;

use crate::error::BoxError;
use crate::query::{Query, Value};
use crate::render::{render, Placeholder};
use crate::scope::Scope;

/// One rendered query, as seen by a sink.
#[derive(Debug, Clone, Copy)]
pub struct QueryLog<'a> {
    /// Query name.
    pub name: &'a str,
    /// Query text with arguments substituted.
    pub rendered: &'a str,
    /// Id of the transaction the query runs in, if any.
    pub tx_id: Option<u64>,
    /// Deadline of the calling scope, if any.
    pub deadline: Option<Instant>,
}

pub trait QuerySink: Send + Sync + 'static {
    fn emit(&self, log: &QueryLog<'_>) -> Result<(), BoxError>;

    /// Whether rendering is worth doing at all.
    fn enabled(&self) -> bool {
        true
    }
}

/// Emits queries as `DEBUG` events on target `dbscope::sql`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl QuerySink for TracingSink {
    fn emit(&self, log: &QueryLog<'_>) -> Result<(), BoxError> {
        tracing::debug!(
            target: "dbscope::sql",
            sql = log.name,
            query = log.rendered,
            tx = ?log.tx_id,
        );
        Ok(())
    }

    fn enabled(&self) -> bool {
        tracing::enabled!(target: "dbscope::sql", tracing::Level::DEBUG)
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl QuerySink for NoopSink {
    fn emit(&self, _log: &QueryLog<'_>) -> Result<(), BoxError> {
        Ok(())
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// Render `query` and hand it to `sink`, discarding any failure.
pub fn emit_query<T>(
    sink: &dyn QuerySink,
    scope: &Scope<T>,
    query: &Query,
    placeholder: Placeholder,
    args: &[Value],
) {
    if !sink.enabled() {
        return;
    }
    let rendered = render(query.raw(), placeholder, args);
    let log = QueryLog {
        name: query.name(),
        rendered: &rendered,
        tx_id: scope.transaction().map(|h| h.id()),
        deadline: scope.deadline(),
    };
    match std::panic::catch_unwind(AssertUnwindSafe(|| sink.emit(&log))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::trace!(sql = query.name(), error = %err, "query sink failed"),
        Err(_) => tracing::trace!(sql = query.name(), "query sink panicked"),
    }
}
