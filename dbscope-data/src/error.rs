use std::error::Error as StdError;

/// Boxed error used for driver and application causes.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Why a scope stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// The scope's cancellation token fired.
    Cancelled,
    /// The scope's deadline elapsed.
    DeadlineExceeded,
}

impl std::fmt::Display for CancelCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelCause::Cancelled => f.write_str("operation cancelled"),
            CancelCause::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Errors that can occur in the data layer.
#[derive(Debug)]
pub enum DataError {
    /// A connection could not be acquired or dialed.
    Connection(BoxError),
    /// The scope was cancelled or its deadline elapsed.
    Canceled(CancelCause),
    /// The store refused to open a transaction.
    TransactionBegin(BoxError),
    /// Commit failed; effects must not be treated as durable.
    Commit(BoxError),
    /// Rollback failed.
    Rollback(BoxError),
    /// A unit of work failed and so did the rollback that followed.
    Composite(Box<CompositeError>),
    /// A unit of work panicked; the panic was contained and the transaction rolled back.
    Transaction(String),
    /// A transaction handle was used after commit or rollback.
    TransactionClosed,
    /// The transaction is held by an open row stream.
    TransactionBusy,
    /// A single-row read matched no rows.
    NotFound(String),
    /// A single-row read matched more than one row.
    AmbiguousResult(String),
    /// Any other driver or protocol failure.
    DataAccess(BoxError),
    /// A collaborator is misconfigured.
    Configuration(String),
    /// Operation and query name attached to an underlying error.
    Query {
        operation: &'static str,
        query: String,
        source: Box<DataError>,
    },
}

/// Flat classification of a [`DataError`], ignoring context wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Canceled,
    TransactionBegin,
    Commit,
    Rollback,
    Composite,
    Transaction,
    TransactionClosed,
    TransactionBusy,
    NotFound,
    AmbiguousResult,
    DataAccess,
    Configuration,
}

impl DataError {
    pub fn connection(err: impl Into<BoxError>) -> Self {
        DataError::Connection(err.into())
    }

    /// Construct a `DataAccess` variant from any error type.
    ///
    /// Used by backend crates (e.g. `dbscope-data-sqlx`) to wrap
    /// driver-specific errors.
    pub fn data_access(err: impl Into<BoxError>) -> Self {
        DataError::DataAccess(err.into())
    }

    /// Combine a unit-of-work failure with the rollback failure that followed it.
    pub fn composite(cause: impl Into<BoxError>, rollback: DataError) -> Self {
        DataError::Composite(Box::new(CompositeError {
            cause: cause.into(),
            rollback,
        }))
    }

    /// Attach the operation and query name, unless already attached.
    pub fn context(self, operation: &'static str, query: &str) -> Self {
        match self {
            already @ DataError::Query { .. } => already,
            other => DataError::Query {
                operation,
                query: query.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with every `Query` context peeled off.
    pub fn root(&self) -> &DataError {
        let mut current = self;
        while let DataError::Query { source, .. } = current {
            current = source;
        }
        current
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DataError::Connection(_) => ErrorKind::Connection,
            DataError::Canceled(_) => ErrorKind::Canceled,
            DataError::TransactionBegin(_) => ErrorKind::TransactionBegin,
            DataError::Commit(_) => ErrorKind::Commit,
            DataError::Rollback(_) => ErrorKind::Rollback,
            DataError::Composite(_) => ErrorKind::Composite,
            DataError::Transaction(_) => ErrorKind::Transaction,
            DataError::TransactionClosed => ErrorKind::TransactionClosed,
            DataError::TransactionBusy => ErrorKind::TransactionBusy,
            DataError::NotFound(_) => ErrorKind::NotFound,
            DataError::AmbiguousResult(_) => ErrorKind::AmbiguousResult,
            DataError::DataAccess(_) => ErrorKind::DataAccess,
            DataError::Configuration(_) => ErrorKind::Configuration,
            DataError::Query { source, .. } => source.kind(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_canceled(&self) -> bool {
        self.kind() == ErrorKind::Canceled
    }

    /// The composite error, if this is (or wraps) one.
    pub fn as_composite(&self) -> Option<&CompositeError> {
        match self.root() {
            DataError::Composite(c) => Some(c),
            _ => None,
        }
    }

    /// Operation and query name recorded on the outermost context, if any.
    pub fn query_context(&self) -> Option<(&'static str, &str)> {
        match self {
            DataError::Query {
                operation, query, ..
            } => Some((operation, query.as_str())),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataError::Connection(err) => write!(f, "Connection error: {err}"),
            DataError::Canceled(cause) => write!(f, "Canceled: {cause}"),
            DataError::TransactionBegin(err) => write!(f, "Can't begin transaction: {err}"),
            DataError::Commit(err) => write!(f, "Transaction commit failed: {err}"),
            DataError::Rollback(err) => write!(f, "Transaction rollback failed: {err}"),
            DataError::Composite(err) => write!(f, "{err}"),
            DataError::Transaction(msg) => write!(f, "Transaction aborted: {msg}"),
            DataError::TransactionClosed => write!(f, "Transaction already committed or rolled back"),
            DataError::TransactionBusy => write!(f, "Transaction busy: a row stream is still open"),
            DataError::NotFound(msg) => write!(f, "Not found: {msg}"),
            DataError::AmbiguousResult(msg) => write!(f, "Ambiguous result: {msg}"),
            DataError::DataAccess(err) => write!(f, "Database error: {err}"),
            DataError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            DataError::Query {
                operation,
                query,
                source,
            } => write!(f, "{operation} '{query}': {source}"),
        }
    }
}

impl StdError for DataError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            DataError::Connection(err)
            | DataError::TransactionBegin(err)
            | DataError::Commit(err)
            | DataError::Rollback(err)
            | DataError::DataAccess(err) => Some(err.as_ref()),
            DataError::Composite(err) => Some(err.as_ref()),
            DataError::Query { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<dbscope_core::ConfigError> for DataError {
    fn from(err: dbscope_core::ConfigError) -> Self {
        DataError::Configuration(err.to_string())
    }
}

/// A unit-of-work failure together with the rollback failure that followed it.
///
/// Both errors stay reachable: [`cause`](Self::cause) is the original failure,
/// [`rollback_error`](Self::rollback_error) the rollback one.
#[derive(Debug)]
pub struct CompositeError {
    cause: BoxError,
    rollback: DataError,
}

impl CompositeError {
    /// The error the unit of work returned (or the contained panic).
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    /// The original cause as a concrete type, if it is one.
    pub fn cause_as<E: StdError + 'static>(&self) -> Option<&E> {
        self.cause.downcast_ref::<E>()
    }

    pub fn rollback_error(&self) -> &DataError {
        &self.rollback
    }

    pub fn into_parts(self) -> (BoxError, DataError) {
        (self.cause, self.rollback)
    }
}

impl std::fmt::Display for CompositeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}; additionally, {}", self.cause, self.rollback)
    }
}

impl StdError for CompositeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.cause.as_ref())
    }
}
