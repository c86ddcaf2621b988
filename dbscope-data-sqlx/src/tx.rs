//! Transaction lifecycle for the sqlx backend.
//!
//! [`Database`] is both the [`Transactor`] the [`TxManager`](dbscope_data::TxManager)
//! drives and the [`ConnectionProvider`] the facade draws pooled connections
//! from. A transaction dropped without commit or rollback is rolled back by
//! sqlx when its connection returns to the pool.

use dbscope_data::{ConnectionProvider, DataError, IsolationLevel, Scope, Transactor};
use sqlx::any::Any;
use sqlx::pool::PoolConnection;
use sqlx::Transaction;

use crate::database::{Backend, Database};
use crate::error::SqlxErrorExt;

/// An open sqlx transaction over the `Any` driver.
pub type AnyTx = Transaction<'static, Any>;

/// Scope carrying an optional [`AnyTx`].
pub type DbScope = Scope<AnyTx>;

impl Transactor for Database {
    type Tx = AnyTx;

    async fn begin(&self, _scope: &DbScope, isolation: IsolationLevel) -> Result<AnyTx, DataError> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| DataError::TransactionBegin(Box::new(e.into_data_error())))?;

        // SQLite transactions are serializable, which already satisfies every
        // level we expose.
        if self.backend() == Backend::Postgres {
            let statement = format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.as_sql());
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| DataError::TransactionBegin(Box::new(e.into_data_error())))?;
        }
        Ok(tx)
    }

    async fn commit(&self, tx: AnyTx) -> Result<(), DataError> {
        tx.commit()
            .await
            .map_err(|e| DataError::Commit(Box::new(e.into_data_error())))
    }

    async fn rollback(&self, tx: AnyTx) -> Result<(), DataError> {
        tx.rollback()
            .await
            .map_err(|e| DataError::Rollback(Box::new(e.into_data_error())))
    }
}

impl ConnectionProvider for Database {
    type Connection = PoolConnection<Any>;

    async fn acquire(&self, scope: &DbScope) -> Result<PoolConnection<Any>, DataError> {
        scope
            .guard(self.pool().acquire())
            .await?
            .map_err(SqlxErrorExt::into_data_error)
    }
}
