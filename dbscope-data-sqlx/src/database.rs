//! The database facade.

use std::sync::Arc;

use dbscope_core::{PoolConfig, PostgresConfig};
use dbscope_data::{
    emit_query, ConnectionProvider, DataError, Placeholder, Query, QuerySink, TracingSink,
    TxManager, Value,
};
use futures_util::TryStreamExt;
use sqlx::any::{Any, AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::pool::PoolConnection;
use sqlx::{AnyConnection, AnyPool, Connection, FromRow};
use tokio::sync::OwnedMappedMutexGuard;

use crate::error::SqlxErrorExt;
use crate::rows::{Rows, SingleRow};
use crate::tx::{AnyTx, DbScope};

/// Store a [`Database`] talks to, detected from the connection URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    pub fn from_url(url: &str) -> Result<Self, DataError> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Backend::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(Backend::Sqlite)
        } else {
            let scheme = url.split(':').next().unwrap_or_default();
            Err(DataError::Configuration(format!(
                "unsupported database url scheme '{scheme}'"
            )))
        }
    }

    /// Placeholder style used by query text for this backend.
    pub fn placeholder(&self) -> Placeholder {
        match self {
            Backend::Postgres | Backend::Sqlite => Placeholder::Dollar,
        }
    }
}

/// Outcome of a command with no result set.
///
/// Generated keys are not reported here; use `RETURNING` with
/// [`Database::scan_one`] to read them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecSummary {
    pub rows_affected: u64,
}

/// Executes queries against the pool, or against the transaction the scope
/// carries.
///
/// Routing is decided on every call: a scope with an active transaction
/// sends the statement to that transaction, otherwise a pooled connection
/// is acquired for the duration of the call only. The same code therefore
/// runs unchanged inside and outside [`TxManager::run_in_transaction`].
///
/// Every error returned is wrapped with the operation and the query name
/// (see [`DataError::query_context`]).
#[derive(Clone)]
pub struct Database {
    pool: AnyPool,
    backend: Backend,
    sink: Arc<dyn QuerySink>,
}

impl Database {
    /// Open a pool for `url` (`postgres://...` or `sqlite:...`).
    pub async fn connect(url: &str, pool: &PoolConfig) -> Result<Self, DataError> {
        sqlx::any::install_default_drivers();
        let backend = Backend::from_url(url)?;
        let any_pool = AnyPoolOptions::new()
            .max_connections(pool.max_connections)
            .acquire_timeout(pool.acquire_timeout)
            .idle_timeout(pool.idle_timeout)
            .connect(url)
            .await
            .map_err(SqlxErrorExt::into_data_error)?;
        tracing::info!(?backend, max_connections = pool.max_connections, "database pool ready");
        Ok(Self::from_pool(any_pool, backend))
    }

    /// Open a Postgres pool from the `pg.*` configuration sections.
    pub async fn from_config(pg: &PostgresConfig, pool: &PoolConfig) -> Result<Self, DataError> {
        Self::connect(&pg.url()?, pool).await
    }

    pub fn from_pool(pool: AnyPool, backend: Backend) -> Self {
        Self {
            pool,
            backend,
            sink: Arc::new(TracingSink),
        }
    }

    /// Replace the query logging sink.
    pub fn with_sink(mut self, sink: impl QuerySink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// A transaction manager beginning transactions on this database.
    pub fn tx_manager(&self) -> TxManager<Database> {
        TxManager::new(self.clone())
    }

    /// Execute a statement that returns no rows.
    pub async fn exec(
        &self,
        scope: &DbScope,
        query: &Query,
        args: &[Value],
    ) -> Result<ExecSummary, DataError> {
        self.log(scope, query, args);
        async {
            let mut target = self.route(scope).await?;
            let result = scope
                .guard(bind(query.raw(), args).execute(target.conn()))
                .await?
                .map_err(SqlxErrorExt::into_data_error)?;
            Ok::<_, DataError>(ExecSummary {
                rows_affected: result.rows_affected(),
            })
        }
        .await
        .map_err(|e| e.context("exec", query.name()))
    }

    /// Start a query and return its rows lazily.
    ///
    /// The connection (or the scope's transaction) is claimed before this
    /// returns, so the rows are ordered before any later statement on the
    /// same scope. Nothing is reported until the first poll: connection,
    /// execution and decoding errors all arrive as items of the stream.
    ///
    /// Drain, drop or [`close`](Rows::close) the stream to release what it
    /// holds. Inside a transaction, other statements on that transaction
    /// fail with [`DataError::TransactionBusy`] until then.
    pub async fn fetch_rows(&self, scope: &DbScope, query: &Query, args: &[Value]) -> Rows {
        self.log(scope, query, args);
        let target = self.route(scope).await;
        Rows::new(scope.clone(), query.clone(), args.to_vec(), target)
    }

    /// Fetch the first row of a query; any error is deferred to
    /// [`SingleRow::scan`] or [`SingleRow::into_row`].
    pub async fn fetch_row(&self, scope: &DbScope, query: &Query, args: &[Value]) -> SingleRow {
        self.log(scope, query, args);
        let result = async {
            let mut target = self.route(scope).await?;
            scope
                .guard(bind(query.raw(), args).fetch_optional(target.conn()))
                .await?
                .map_err(SqlxErrorExt::into_data_error)?
                .ok_or_else(|| DataError::NotFound("no rows in result set".into()))
        }
        .await
        .map_err(|e| e.context("fetch_row", query.name()));
        SingleRow::new(query, result)
    }

    /// Decode exactly one row.
    ///
    /// Zero rows is [`DataError::NotFound`], more than one is
    /// [`DataError::AmbiguousResult`].
    pub async fn scan_one<T>(&self, scope: &DbScope, query: &Query, args: &[Value]) -> Result<T, DataError>
    where
        T: for<'r> FromRow<'r, AnyRow>,
    {
        self.log(scope, query, args);
        async {
            let mut target = self.route(scope).await?;
            let mut stream = bind(query.raw(), args).fetch(target.conn());
            let first = next_row(scope, &mut stream).await?;
            let second = if first.is_some() {
                next_row(scope, &mut stream).await?
            } else {
                None
            };
            match (first, second) {
                (None, _) => Err(DataError::NotFound("query returned no rows".into())),
                (Some(row), None) => T::from_row(&row).map_err(SqlxErrorExt::into_data_error),
                (Some(_), Some(_)) => Err(DataError::AmbiguousResult(
                    "query returned more than one row".into(),
                )),
            }
        }
        .await
        .map_err(|e| e.context("scan_one", query.name()))
    }

    /// Decode every row into a `Vec`.
    pub async fn scan_all<T>(&self, scope: &DbScope, query: &Query, args: &[Value]) -> Result<Vec<T>, DataError>
    where
        T: for<'r> FromRow<'r, AnyRow>,
    {
        let mut out = Vec::new();
        self.scan_all_into(scope, query, args, &mut out).await?;
        Ok(out)
    }

    /// Decode every row and append it to `dest`. Returns the number of rows.
    pub async fn scan_all_into<T, C>(
        &self,
        scope: &DbScope,
        query: &Query,
        args: &[Value],
        dest: &mut C,
    ) -> Result<usize, DataError>
    where
        T: for<'r> FromRow<'r, AnyRow>,
        C: Extend<T>,
    {
        self.log(scope, query, args);
        async {
            let mut target = self.route(scope).await?;
            let mut stream = bind(query.raw(), args).fetch(target.conn());
            let mut count = 0;
            while let Some(row) = next_row(scope, &mut stream).await? {
                dest.extend(Some(T::from_row(&row).map_err(SqlxErrorExt::into_data_error)?));
                count += 1;
            }
            Ok::<_, DataError>(count)
        }
        .await
        .map_err(|e| e.context("scan_all", query.name()))
    }

    /// Check the store is reachable, on the scope's transaction if it has one.
    pub async fn ping(&self, scope: &DbScope) -> Result<(), DataError> {
        async {
            let mut target = self.route(scope).await?;
            scope
                .guard(target.conn().ping())
                .await?
                .map_err(SqlxErrorExt::into_data_error)
        }
        .await
        .map_err(|e| e.context("ping", "ping"))
    }

    /// Close the pool, waiting for checked-out connections to come back.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!(backend = ?self.backend, "database pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Pick where this call runs: the scope's transaction, or a pooled
    /// connection held for this call only.
    ///
    /// A transaction is claimed without waiting; one still held by an open
    /// [`Rows`] is [`DataError::TransactionBusy`].
    pub(crate) async fn route(&self, scope: &DbScope) -> Result<Target, DataError> {
        match scope.transaction() {
            Some(handle) => {
                scope.check()?;
                handle.try_lock_owned().map(Target::Tx)
            }
            None => self.acquire(scope).await.map(Target::Pool),
        }
    }

    fn log(&self, scope: &DbScope, query: &Query, args: &[Value]) {
        emit_query(self.sink.as_ref(), scope, query, self.backend.placeholder(), args);
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("backend", &self.backend)
            .field("closed", &self.pool.is_closed())
            .finish()
    }
}

/// Where one facade call executes.
pub(crate) enum Target {
    Tx(OwnedMappedMutexGuard<Option<AnyTx>, AnyTx>),
    Pool(PoolConnection<Any>),
}

impl Target {
    pub(crate) fn conn(&mut self) -> &mut AnyConnection {
        match self {
            Target::Tx(tx) => &mut ***tx,
            Target::Pool(conn) => &mut **conn,
        }
    }
}

pub(crate) fn bind<'q>(
    sql: &'q str,
    args: &[Value],
) -> sqlx::query::Query<'q, Any, AnyArguments<'q>> {
    args.iter().fold(sqlx::query(sql), |query, arg| match arg {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
        Value::Bytes(b) => query.bind(b.clone()),
    })
}

pub(crate) async fn next_row<S>(scope: &DbScope, stream: &mut S) -> Result<Option<AnyRow>, DataError>
where
    S: futures_util::Stream<Item = Result<AnyRow, sqlx::Error>> + Unpin,
{
    scope
        .guard(stream.try_next())
        .await?
        .map_err(SqlxErrorExt::into_data_error)
}
