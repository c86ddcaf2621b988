//! Lazy multi-row results and deferred single-row results.

use std::pin::Pin;
use std::task::{Context, Poll};

use dbscope_data::{DataError, Query, Value};
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use sqlx::any::AnyRow;
use sqlx::FromRow;

use crate::database::{bind, next_row, Target};
use crate::error::SqlxErrorExt;
use crate::tx::DbScope;

/// Forward-only, non-restartable stream of rows.
///
/// The stream owns the pooled connection, or the claim on the scope's
/// transaction, for as long as it lives. Draining, dropping or
/// [closing](Self::close) it releases that claim at once.
pub struct Rows {
    inner: BoxStream<'static, Result<AnyRow, DataError>>,
}

impl Rows {
    pub(crate) fn new(
        scope: DbScope,
        query: Query,
        args: Vec<Value>,
        target: Result<Target, DataError>,
    ) -> Self {
        let inner = async_stream::stream! {
            match target {
                Err(err) => yield Err(err.context("fetch_rows", query.name())),
                Ok(mut target) => {
                    let mut rows = bind(query.raw(), &args).fetch(target.conn());
                    loop {
                        match next_row(&scope, &mut rows).await {
                            Ok(Some(row)) => yield Ok(row),
                            Ok(None) => break,
                            Err(err) => {
                                yield Err(err.context("fetch_rows", query.name()));
                                break;
                            }
                        }
                    }
                }
            }
        };
        Self {
            inner: Box::pin(inner),
        }
    }

    /// Next row decoded as `T`; `None` once the rows are exhausted.
    pub async fn scan_next<T>(&mut self) -> Option<Result<T, DataError>>
    where
        T: for<'r> FromRow<'r, AnyRow>,
    {
        let row = self.inner.next().await?;
        Some(row.and_then(|row| T::from_row(&row).map_err(SqlxErrorExt::into_data_error)))
    }

    /// Stop reading and release the underlying connection or transaction.
    pub fn close(self) {
        drop(self);
    }
}

impl Stream for Rows {
    type Item = Result<AnyRow, DataError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for Rows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows").finish_non_exhaustive()
    }
}

/// Result of [`Database::fetch_row`]. The query's error, if any, surfaces
/// when the row is accessed.
pub struct SingleRow {
    query: String,
    result: Result<AnyRow, DataError>,
}

impl SingleRow {
    pub(crate) fn new(query: &Query, result: Result<AnyRow, DataError>) -> Self {
        Self {
            query: query.name().to_string(),
            result,
        }
    }

    pub fn scan<T>(self) -> Result<T, DataError>
    where
        T: for<'r> FromRow<'r, AnyRow>,
    {
        let row = self.result?;
        T::from_row(&row).map_err(|e| e.into_data_error().context("fetch_row", &self.query))
    }

    pub fn into_row(self) -> Result<AnyRow, DataError> {
        self.result
    }

    /// The deferred error, without consuming the row.
    pub fn err(&self) -> Option<&DataError> {
        self.result.as_ref().err()
    }
}

impl std::fmt::Debug for SingleRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleRow")
            .field("query", &self.query)
            .field("error", &self.err())
            .finish_non_exhaustive()
    }
}
