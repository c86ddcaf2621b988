//! Contracts a storage backend implements for the transaction manager and facade.

use std::future::Future;

use crate::error::DataError;
use crate::scope::Scope;

/// Consistency contract requested when a transaction begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
}

impl IsolationLevel {
    /// The level as it appears in `SET TRANSACTION ISOLATION LEVEL ...`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Begins, commits and rolls back transactions of type `Tx`.
///
/// Uses RPITIT so implementations are plain `async fn`s.
/// The [`TxManager`](crate::TxManager) bounds every call by the caller's
/// scope; implementations may additionally consult the scope themselves.
pub trait Transactor: Send + Sync + 'static {
    type Tx: Send + 'static;

    fn begin(
        &self,
        scope: &Scope<Self::Tx>,
        isolation: IsolationLevel,
    ) -> impl Future<Output = Result<Self::Tx, DataError>> + Send;

    fn commit(&self, tx: Self::Tx) -> impl Future<Output = Result<(), DataError>> + Send;

    fn rollback(&self, tx: Self::Tx) -> impl Future<Output = Result<(), DataError>> + Send;
}

/// Pooled source of live connections, bounded by the caller's scope.
///
/// Release is by ownership: dropping a connection returns it to the pool,
/// so it happens exactly once on every exit path.
pub trait ConnectionProvider: Transactor {
    type Connection: Send + 'static;

    fn acquire(
        &self,
        scope: &Scope<Self::Tx>,
    ) -> impl Future<Output = Result<Self::Connection, DataError>> + Send;

    fn release(&self, connection: Self::Connection) {
        drop(connection);
    }
}
