//! # dbscope-data — backend-agnostic transactional data access
//!
//! The pieces every backend shares: the request [`Scope`], the
//! [`TxManager`] and the contracts a backend implements for it, query values,
//! rendering for logs, and the [`DataError`] taxonomy.
//!
//! | Item | Description |
//! |------|-------------|
//! | [`Scope`] | Immutable carrier of cancellation, deadline and the active transaction |
//! | [`TxHandle`] | Shared reference to one open transaction |
//! | [`TxManager`] | Begins, joins, commits and rolls back units of work |
//! | [`Transactor`], [`ConnectionProvider`] | What a storage backend implements |
//! | [`Query`], [`Value`], [`args!`] | Named statements and positional arguments |
//! | [`QuerySink`] | Receives each rendered query before execution |
//! | [`DataError`], [`CompositeError`] | Error taxonomy |

pub mod error;
pub mod provider;
pub mod query;
pub mod render;
pub mod scope;
pub mod sink;
pub mod tx;

pub use error::{BoxError, CancelCause, CompositeError, DataError, ErrorKind};
pub use provider::{ConnectionProvider, IsolationLevel, Transactor};
pub use query::{Query, Value};
pub use render::{render, Placeholder};
pub use scope::{Scope, TxHandle};
pub use sink::{emit_query, NoopSink, QueryLog, QuerySink, TracingSink};
pub use tx::{TxManager, DEFAULT_ROLLBACK_TIMEOUT};

pub mod prelude {
    //! Re-exports of the most commonly used data types.
    pub use crate::args;
    pub use crate::{DataError, IsolationLevel, Query, Scope, TxManager, Value};
}
