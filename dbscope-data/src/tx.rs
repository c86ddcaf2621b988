//! Nestable units of work with exactly one terminal outcome.

use std::any::Any;
use std::error::Error as StdError;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tracing::{debug, warn};

use crate::error::{CancelCause, DataError, ErrorKind};
use crate::provider::{IsolationLevel, Transactor};
use crate::scope::{Scope, TxHandle};

/// Runs units of work inside transactions begun through a [`Transactor`].
///
/// The outermost [`run_in_transaction`](Self::run_in_transaction) call in a
/// scope chain owns the transaction: it begins it, hands the unit of work a
/// child scope carrying the handle, then commits on `Ok` or rolls back on
/// `Err` or panic. Nested calls receiving that scope join the transaction
/// and never begin, commit or roll back anything themselves.
///
/// ```ignore
/// let tm = db.tx_manager();
/// tm.read_committed(&scope, |scope| async move {
///     db.exec(&scope, &INSERT_ORDER, &args![order_id]).await?;
///     tm.read_committed(&scope, |scope| async move {
///         db.exec(&scope, &RESERVE_STOCK, &args![order_id]).await
///     })
///     .await
/// })
/// .await?;
/// ```
pub struct TxManager<P> {
    provider: Arc<P>,
    rollback_timeout: Duration,
}

/// Upper bound on a rollback, independent of the scope's deadline.
pub const DEFAULT_ROLLBACK_TIMEOUT: Duration = Duration::from_secs(5);

impl<P> Clone for TxManager<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            rollback_timeout: self.rollback_timeout,
        }
    }
}

impl<P: Transactor> TxManager<P> {
    pub fn new(provider: P) -> Self {
        Self::from_arc(Arc::new(provider))
    }

    pub fn from_arc(provider: Arc<P>) -> Self {
        Self {
            provider,
            rollback_timeout: DEFAULT_ROLLBACK_TIMEOUT,
        }
    }

    /// Bound every rollback by `timeout` instead of [`DEFAULT_ROLLBACK_TIMEOUT`].
    pub fn with_rollback_timeout(mut self, timeout: Duration) -> Self {
        self.rollback_timeout = timeout;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// [`run_in_transaction`](Self::run_in_transaction) at Read Committed.
    pub async fn read_committed<F, Fut, R, E>(&self, scope: &Scope<P::Tx>, f: F) -> Result<R, E>
    where
        F: FnOnce(Scope<P::Tx>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<DataError> + StdError + Send + Sync + 'static,
    {
        self.run_in_transaction(scope, IsolationLevel::ReadCommitted, f)
            .await
    }

    /// Run `f` in a transaction, joining the one `scope` already carries.
    ///
    /// For the outermost call:
    /// - begin failure returns [`DataError::TransactionBegin`] (or
    ///   [`DataError::Canceled`]) and `f` is never invoked;
    /// - `Ok` commits, and a failed commit returns [`DataError::Commit`];
    ///   a scope already cancelled by then rolls back and reports the
    ///   cancellation as the commit failure;
    /// - `Err(e)` rolls back and returns `e` unchanged, or a
    ///   [`DataError::Composite`] holding `e` and the rollback failure;
    ///   the rollback runs even when the scope is cancelled, bounded by
    ///   [`with_rollback_timeout`](Self::with_rollback_timeout);
    /// - a panic in `f` becomes [`DataError::Transaction`] and rolls back.
    pub async fn run_in_transaction<F, Fut, R, E>(
        &self,
        scope: &Scope<P::Tx>,
        isolation: IsolationLevel,
        f: F,
    ) -> Result<R, E>
    where
        F: FnOnce(Scope<P::Tx>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<DataError> + StdError + Send + Sync + 'static,
    {
        if let Some(active) = scope.transaction() {
            debug!(tx = active.id(), "joining active transaction");
            return f(scope.clone()).await;
        }

        let tx = match scope.guard(self.provider.begin(scope, isolation)).await {
            Ok(Ok(tx)) => tx,
            Ok(Err(err)) | Err(err) => {
                warn!(error = %err, "failed to begin transaction");
                return Err(E::from(begin_error(err)));
            }
        };

        let handle = TxHandle::new(tx);
        debug!(tx = handle.id(), %isolation, "transaction started");

        match run_contained(f, scope.with_transaction(handle.clone())).await {
            Ok(Ok(value)) => {
                self.commit(scope, &handle).await?;
                Ok(value)
            }
            Ok(Err(err)) => match self.rollback(&handle).await {
                Ok(()) => Err(err),
                Err(rollback) => Err(E::from(DataError::composite(err, rollback))),
            },
            Err(fault) => match self.rollback(&handle).await {
                Ok(()) => Err(E::from(fault)),
                Err(rollback) => Err(E::from(DataError::composite(fault, rollback))),
            },
        }
    }

    async fn commit(&self, scope: &Scope<P::Tx>, handle: &TxHandle<P::Tx>) -> Result<(), DataError> {
        // Cancelled, or still held by an open row stream: roll back instead.
        let taken = match scope.check() {
            Ok(()) => handle.try_take(),
            Err(cancel) => Err(cancel),
        };
        let tx = match taken {
            Ok(Some(tx)) => tx,
            Ok(None) => return Err(commit_error(handle, DataError::TransactionClosed)),
            Err(err) => {
                if let Err(rollback) = self.rollback(handle).await {
                    warn!(tx = handle.id(), error = %rollback, "rollback after aborted commit failed");
                }
                return Err(commit_error(handle, err));
            }
        };
        match scope.guard(self.provider.commit(tx)).await {
            Ok(Ok(())) => {
                debug!(tx = handle.id(), "transaction committed");
                Ok(())
            }
            Ok(Err(err)) | Err(err) => Err(commit_error(handle, err)),
        }
    }

    /// Roll back under the manager's own time bound rather than the scope's,
    /// so a cancelled or expired scope still gets its rollback.
    async fn rollback(&self, handle: &TxHandle<P::Tx>) -> Result<(), DataError> {
        let attempt = async {
            let tx = handle.take().await.ok_or(DataError::TransactionClosed)?;
            self.provider.rollback(tx).await
        };
        match tokio::time::timeout(self.rollback_timeout, attempt).await {
            Ok(Ok(())) => {
                debug!(tx = handle.id(), "transaction rolled back");
                Ok(())
            }
            Ok(Err(err)) => Err(rollback_error(handle, err)),
            Err(_) => Err(rollback_error(
                handle,
                DataError::Canceled(CancelCause::DeadlineExceeded),
            )),
        }
    }
}

/// Invoke `f` and drive its future, turning a panic in either into
/// [`DataError::Transaction`].
async fn run_contained<T, F, Fut, R, E>(f: F, scope: Scope<T>) -> Result<Result<R, E>, DataError>
where
    F: FnOnce(Scope<T>) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let fut = std::panic::catch_unwind(AssertUnwindSafe(|| f(scope))).map_err(panic_error)?;
    AssertUnwindSafe(fut).catch_unwind().await.map_err(panic_error)
}

fn panic_error(payload: Box<dyn Any + Send>) -> DataError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unit of work panicked".to_string()
    };
    warn!(panic = %message, "unit of work panicked");
    DataError::Transaction(message)
}

fn begin_error(err: DataError) -> DataError {
    match err.kind() {
        ErrorKind::TransactionBegin | ErrorKind::Canceled => err,
        _ => DataError::TransactionBegin(Box::new(err)),
    }
}

fn commit_error<T>(handle: &TxHandle<T>, err: DataError) -> DataError {
    warn!(tx = handle.id(), error = %err, "transaction commit failed");
    match err.kind() {
        ErrorKind::Commit => err,
        _ => DataError::Commit(Box::new(err)),
    }
}

fn rollback_error<T>(handle: &TxHandle<T>, err: DataError) -> DataError {
    warn!(tx = handle.id(), error = %err, "transaction rollback failed");
    match err.kind() {
        ErrorKind::Rollback => err,
        _ => DataError::Rollback(Box::new(err)),
    }
}
