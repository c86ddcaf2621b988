//! # dbscope-data-sqlx — SQLx backend for the dbscope data layer
//!
//! This crate provides the [SQLx](https://github.com/launchbadge/sqlx)-specific
//! pieces of dbscope. It depends on [`dbscope-data`] for the scope, the
//! transaction manager and the error taxonomy, and adds the database facade,
//! the transaction lifecycle and error bridging needed to talk to a real
//! database through an `sqlx::AnyPool`.
//!
//! # What's in this crate
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Database`] | Facade: `exec`, `fetch_rows`, `fetch_row`, `scan_one`, `scan_all`, routed per call |
//! | [`Rows`] | Lazy row stream; errors surface on first poll |
//! | [`SingleRow`] | First row of a query with its error deferred to access |
//! | [`AnyTx`], [`DbScope`] | The transaction type and the scope carrying it |
//! | [`SqlxErrorExt`] | Extension trait to convert `sqlx::Error` → `DataError` (`.into_data_error()`) |
//! | [`SqlxResult<T>`] | Type alias for `Result<T, DataError>` |
//!
//! # Feature flags
//!
//! | Feature    | Driver |
//! |------------|--------|
//! | `postgres` | PostgreSQL via `sqlx/postgres` (default) |
//! | `sqlite`   | SQLite via `sqlx/sqlite` |
//!
//! # Quick start
//!
//! ```ignore
//! use dbscope_data::{args, Query, Scope};
//! use dbscope_data_sqlx::Database;
//!
//! const INSERT_ORDER: Query = Query::new("order.insert", "INSERT INTO orders (item, qty) VALUES ($1, $2)");
//! const RESERVE: Query = Query::new("stock.reserve", "UPDATE stock SET qty = qty - $2 WHERE item = $1");
//!
//! let db = Database::from_config(&config.section()?, &config.section()?).await?;
//! let tm = db.tx_manager();
//!
//! tm.read_committed(&Scope::new(), |scope| async move {
//!     db.exec(&scope, &INSERT_ORDER, &args!["widget", 3]).await?;
//!     db.exec(&scope, &RESERVE, &args!["widget", 3]).await?;
//!     Ok::<_, DataError>(())
//! })
//! .await?;
//! ```
//!
//! # Error bridging
//!
//! Due to Rust's orphan rules, `From<sqlx::Error> for DataError` can't be
//! implemented here. Use the [`SqlxErrorExt`] trait instead:
//!
//! ```ignore
//! use dbscope_data_sqlx::SqlxErrorExt;
//!
//! let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
//!     .fetch_one(db.pool())
//!     .await
//!     .map_err(|e| e.into_data_error())?;
//! ```

pub mod database;
pub mod error;
pub mod rows;
pub mod tx;

pub use database::{Backend, Database, ExecSummary};
pub use error::{SqlxErrorExt, SqlxResult};
pub use rows::{Rows, SingleRow};
pub use tx::{AnyTx, DbScope};

/// Re-exports of the most commonly used types from both `dbscope-data` and this crate.
pub mod prelude {
    pub use crate::{Database, DbScope, Rows, SqlxErrorExt};
    pub use dbscope_data::prelude::*;
}
