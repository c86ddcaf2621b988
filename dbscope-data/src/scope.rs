//! Request-scoped carrier of cancellation, deadline and the active transaction.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard, OwnedMappedMutexGuard, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CancelCause, DataError};

/// Immutable, cheaply cloneable scope for one logical operation.
///
/// `T` is the backend's transaction type. A scope either carries no
/// transaction (operations go to the pool) or exactly one [`TxHandle`]
/// (operations go to that transaction). Deriving a scope never mutates the
/// one it was derived from.
pub struct Scope<T> {
    token: CancellationToken,
    deadline: Option<Instant>,
    tx: Option<TxHandle<T>>,
}

impl<T> Scope<T> {
    /// A root scope with a fresh cancellation token and no deadline.
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// A root scope driven by an existing cancellation token
    /// (e.g. the server's shutdown token or a per-request token).
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
            tx: None,
        }
    }

    /// Derive a scope whose cancellation can be triggered without
    /// affecting this one. Cancelling this scope still cancels the child.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            tx: self.tx.clone(),
        }
    }

    /// Derive a scope that expires after `timeout`, or earlier if this
    /// scope's own deadline comes first.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a scope that expires at `deadline`, or earlier if this
    /// scope's own deadline comes first.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        Self {
            token: self.token.clone(),
            deadline: Some(deadline),
            tx: self.tx.clone(),
        }
    }

    /// Derive a scope carrying `handle` as its active transaction.
    pub fn with_transaction(&self, handle: TxHandle<T>) -> Self {
        Self {
            token: self.token.clone(),
            deadline: self.deadline,
            tx: Some(handle),
        }
    }

    pub fn transaction(&self) -> Option<&TxHandle<T>> {
        self.tx.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel this scope and every scope derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the token fired or the deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        self.check().is_err()
    }

    /// `Err(Canceled)` once the token fired or the deadline has passed.
    pub fn check(&self) -> Result<(), DataError> {
        if self.token.is_cancelled() {
            Err(DataError::Canceled(CancelCause::Cancelled))
        } else if self.deadline.is_some_and(|d| d <= Instant::now()) {
            Err(DataError::Canceled(CancelCause::DeadlineExceeded))
        } else {
            Ok(())
        }
    }

    /// Run `fut` unless the scope is cancelled or its deadline elapses first.
    ///
    /// An already-cancelled scope fails without polling `fut`.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, DataError> {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(DataError::Canceled(CancelCause::Cancelled)),
            _ = deadline => Err(DataError::Canceled(CancelCause::DeadlineExceeded)),
            out = fut => Ok(out),
        }
    }
}

impl<T> Default for Scope<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Scope<T> {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            deadline: self.deadline,
            tx: self.tx.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Scope<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .field("tx", &self.tx.as_ref().map(TxHandle::id))
            .finish()
    }
}

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// Shared reference to one open transaction.
///
/// Owned by the outermost [`TxManager`](crate::TxManager) call that began
/// it; everything else sharing the scope only borrows it through
/// [`lock`](Self::lock). Terminal once [`take`](Self::take) has moved the
/// transaction out for commit or rollback.
pub struct TxHandle<T> {
    id: u64,
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> TxHandle<T> {
    pub fn new(tx: T) -> Self {
        Self {
            id: NEXT_TX_ID.fetch_add(1, Ordering::Relaxed),
            slot: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Process-unique id, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Exclusive access to the open transaction.
    ///
    /// Waits while another statement holds it; fails with
    /// [`DataError::TransactionClosed`] once the transaction is terminal.
    pub async fn lock(&self) -> Result<MappedMutexGuard<'_, T>, DataError> {
        let guard = self.slot.lock().await;
        MutexGuard::try_map(guard, Option::as_mut).map_err(|_| DataError::TransactionClosed)
    }

    /// Exclusive, owned access to the open transaction, without waiting.
    ///
    /// Fails with [`DataError::TransactionBusy`] while another statement or
    /// an open row stream holds it, and with [`DataError::TransactionClosed`]
    /// once the transaction is terminal.
    pub fn try_lock_owned(&self) -> Result<OwnedMappedMutexGuard<Option<T>, T>, DataError> {
        let guard = self
            .slot
            .clone()
            .try_lock_owned()
            .map_err(|_| DataError::TransactionBusy)?;
        OwnedMutexGuard::try_map(guard, Option::as_mut).map_err(|_| DataError::TransactionClosed)
    }

    /// Move the transaction out, leaving the handle terminal.
    pub async fn take(&self) -> Option<T> {
        self.slot.lock().await.take()
    }

    /// [`take`](Self::take) without waiting; `Err` while the transaction is held.
    pub fn try_take(&self) -> Result<Option<T>, DataError> {
        self.slot
            .try_lock()
            .map(|mut slot| slot.take())
            .map_err(|_| DataError::TransactionBusy)
    }

    pub async fn is_closed(&self) -> bool {
        self.slot.lock().await.is_none()
    }

    /// Whether `other` refers to the same transaction.
    pub fn same_as(&self, other: &TxHandle<T>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<T> Clone for TxHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            slot: self.slot.clone(),
        }
    }
}

impl<T> std::fmt::Debug for TxHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxHandle").field("id", &self.id).finish()
    }
}
