use std::future::{ready, Ready};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dbscope_data::{DataError, ErrorKind, IsolationLevel, Scope, Transactor, TxManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Begin(u32),
    Commit(u32),
    Rollback(u32),
}

#[derive(Debug)]
struct MockTx(u32);

/// Records every begin/commit/rollback; each can be scripted to fail.
#[derive(Default)]
struct RecordingTransactor {
    events: Mutex<Vec<Event>>,
    next_id: AtomicU32,
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
    stall_rollback: AtomicBool,
}

impl RecordingTransactor {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Transactor for RecordingTransactor {
    type Tx = MockTx;

    async fn begin(&self, _scope: &Scope<MockTx>, _isolation: IsolationLevel) -> Result<MockTx, DataError> {
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(DataError::connection("pool exhausted"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(Event::Begin(id));
        Ok(MockTx(id))
    }

    async fn commit(&self, tx: MockTx) -> Result<(), DataError> {
        self.record(Event::Commit(tx.0));
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(DataError::data_access("connection reset during commit"));
        }
        Ok(())
    }

    async fn rollback(&self, tx: MockTx) -> Result<(), DataError> {
        self.record(Event::Rollback(tx.0));
        if self.stall_rollback.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_rollback.load(Ordering::SeqCst) {
            return Err(DataError::data_access("connection reset during rollback"));
        }
        Ok(())
    }
}

#[derive(Debug)]
enum AppError {
    Data(DataError),
    Rejected(&'static str),
}

impl From<DataError> for AppError {
    fn from(err: DataError) -> Self {
        AppError::Data(err)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Data(err) => write!(f, "{err}"),
            AppError::Rejected(why) => write!(f, "rejected: {why}"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    fn data(self) -> DataError {
        match self {
            AppError::Data(err) => err,
            other => panic!("expected a data error, got {other}"),
        }
    }
}

fn manager() -> (TxManager<RecordingTransactor>, Arc<RecordingTransactor>) {
    let provider = Arc::new(RecordingTransactor::default());
    (TxManager::from_arc(provider.clone()), provider)
}

#[tokio::test]
async fn nested_calls_begin_and_commit_once() {
    let (tm, provider) = manager();
    let tm = &tm;

    let result = tm
        .read_committed(&Scope::new(), |outer| async move {
            let outer_id = outer.transaction().unwrap().id();
            tm.read_committed(&outer, |middle| async move {
                tm.read_committed(&middle, |inner| async move {
                    assert_eq!(inner.transaction().unwrap().id(), outer_id);
                    Ok::<_, AppError>("done")
                })
                .await
            })
            .await
        })
        .await
        .unwrap();

    assert_eq!(result, "done");
    assert_eq!(provider.events(), [Event::Begin(1), Event::Commit(1)]);
}

#[tokio::test]
async fn inner_failure_rolls_back_outer_and_is_returned_unchanged() {
    let (tm, provider) = manager();
    let tm = &tm;

    let err = tm
        .read_committed(&Scope::new(), |scope| async move {
            tm.read_committed(&scope, |_scope| async move {
                Err::<(), _>(AppError::Rejected("insufficient stock"))
            })
            .await?;
            Ok::<_, AppError>(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Rejected("insufficient stock")));
    assert_eq!(provider.events(), [Event::Begin(1), Event::Rollback(1)]);
}

#[tokio::test]
async fn commit_failure_is_reported() {
    let (tm, provider) = manager();
    provider.fail_commit.store(true, Ordering::SeqCst);

    let err = tm
        .read_committed(&Scope::new(), |_scope| async { Ok::<_, AppError>(()) })
        .await
        .unwrap_err()
        .data();

    assert_eq!(err.kind(), ErrorKind::Commit);
    assert_eq!(provider.events(), [Event::Begin(1), Event::Commit(1)]);
}

#[tokio::test]
async fn rollback_failure_keeps_both_errors() {
    let (tm, provider) = manager();
    provider.fail_rollback.store(true, Ordering::SeqCst);

    let err = tm
        .read_committed(&Scope::new(), |_scope| async {
            Err::<(), _>(AppError::Rejected("duplicate order"))
        })
        .await
        .unwrap_err()
        .data();

    let composite = err.as_composite().expect("composite error");
    assert!(matches!(
        composite.cause_as::<AppError>(),
        Some(AppError::Rejected("duplicate order"))
    ));
    assert_eq!(composite.rollback_error().kind(), ErrorKind::Rollback);
    assert!(err.to_string().contains("duplicate order"));
    assert!(err.to_string().contains("connection reset during rollback"));
}

#[tokio::test]
async fn panic_while_running_rolls_back() {
    let (tm, provider) = manager();

    let err = tm
        .read_committed(&Scope::new(), |_scope| async {
            if provider.events().len() == 1 {
                panic!("boom");
            }
            Ok::<(), AppError>(())
        })
        .await
        .unwrap_err()
        .data();

    assert!(matches!(&err, DataError::Transaction(msg) if msg == "boom"));
    assert_eq!(provider.events(), [Event::Begin(1), Event::Rollback(1)]);
}

#[tokio::test]
async fn panic_while_building_the_future_rolls_back() {
    let (tm, provider) = manager();

    let err = tm
        .read_committed(&Scope::new(), |_scope| -> Ready<Result<(), AppError>> {
            panic!("eager {}", "boom")
        })
        .await
        .unwrap_err()
        .data();

    assert!(matches!(&err, DataError::Transaction(msg) if msg == "eager boom"));
    assert_eq!(provider.events(), [Event::Begin(1), Event::Rollback(1)]);
}

#[tokio::test]
async fn begin_failure_skips_the_unit_of_work() {
    let (tm, provider) = manager();
    provider.fail_begin.store(true, Ordering::SeqCst);
    let invoked = AtomicBool::new(false);

    let err = tm
        .read_committed(&Scope::new(), |_scope| {
            invoked.store(true, Ordering::SeqCst);
            ready(Ok::<_, AppError>(()))
        })
        .await
        .unwrap_err()
        .data();

    assert_eq!(err.kind(), ErrorKind::TransactionBegin);
    assert!(!invoked.load(Ordering::SeqCst));
    assert!(provider.events().is_empty());
}

#[tokio::test]
async fn cancelled_scope_never_begins() {
    let (tm, provider) = manager();
    let scope = Scope::new();
    scope.cancel();

    let err = tm
        .read_committed(&scope, |_scope| ready(Ok::<_, AppError>(())))
        .await
        .unwrap_err()
        .data();

    assert!(err.is_canceled());
    assert!(provider.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn expired_scope_rolls_back_instead_of_committing() {
    let (tm, provider) = manager();
    let scope = Scope::new().with_timeout(Duration::from_millis(50));

    let err = tm
        .read_committed(&scope, |_scope| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, AppError>(())
        })
        .await
        .unwrap_err()
        .data();

    assert_eq!(err.kind(), ErrorKind::Commit);
    assert_eq!(provider.events(), [Event::Begin(1), Event::Rollback(1)]);
}

#[tokio::test(start_paused = true)]
async fn failure_after_the_deadline_still_rolls_back() {
    let (tm, provider) = manager();
    let scope = Scope::new().with_timeout(Duration::from_millis(50));

    let err = tm
        .read_committed(&scope, |_scope| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Err::<(), _>(AppError::Rejected("query timed out"))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Rejected("query timed out")));
    assert_eq!(provider.events(), [Event::Begin(1), Event::Rollback(1)]);
}

#[tokio::test]
async fn failure_in_a_cancelled_scope_still_rolls_back() {
    let (tm, provider) = manager();
    let scope = Scope::new();

    let err = tm
        .read_committed(&scope, |inner| async move {
            inner.cancel();
            Err::<(), _>(AppError::Rejected("client went away"))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Rejected("client went away")));
    assert_eq!(provider.events(), [Event::Begin(1), Event::Rollback(1)]);
}

#[tokio::test(start_paused = true)]
async fn stalled_rollback_is_bounded() {
    let (tm, provider) = manager();
    let tm = tm.with_rollback_timeout(Duration::from_millis(100));
    provider.stall_rollback.store(true, Ordering::SeqCst);

    let err = tm
        .read_committed(&Scope::new(), |_scope| async {
            Err::<(), _>(AppError::Rejected("duplicate order"))
        })
        .await
        .unwrap_err()
        .data();

    let composite = err.as_composite().expect("composite error");
    assert_eq!(composite.rollback_error().kind(), ErrorKind::Rollback);
    assert_eq!(provider.events(), [Event::Begin(1), Event::Rollback(1)]);
}

#[tokio::test]
async fn transaction_still_held_at_commit_is_rolled_back() {
    let (tm, provider) = manager();

    let err = tm
        .read_committed(&Scope::new(), |scope| async move {
            let held = scope.transaction().unwrap().try_lock_owned()?;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                drop(held);
            });
            Ok::<_, AppError>(())
        })
        .await
        .unwrap_err()
        .data();

    assert_eq!(err.kind(), ErrorKind::Commit);
    assert!(err.to_string().contains("busy"));
    assert_eq!(provider.events(), [Event::Begin(1), Event::Rollback(1)]);
}

#[tokio::test]
async fn handle_leaked_from_unit_of_work_is_closed() {
    let (tm, _provider) = manager();
    let leaked = Mutex::new(None);

    tm.read_committed(&Scope::new(), |scope| {
        *leaked.lock().unwrap() = Some(scope);
        ready(Ok::<_, AppError>(()))
    })
    .await
    .unwrap();

    let scope = leaked.into_inner().unwrap().unwrap();
    let handle = scope.transaction().unwrap();
    assert!(handle.is_closed().await);
    assert!(matches!(handle.lock().await, Err(DataError::TransactionClosed)));
}

#[tokio::test]
async fn independent_scopes_get_independent_transactions() {
    let (tm, provider) = manager();

    let work = |scope: Scope<MockTx>| async move {
        tokio::task::yield_now().await;
        Ok::<_, AppError>(scope.transaction().unwrap().id())
    };
    let (first, second) = (Scope::new(), Scope::new());
    let (a, b) = tokio::join!(
        tm.read_committed(&first, work),
        tm.read_committed(&second, work),
    );

    assert_ne!(a.unwrap(), b.unwrap());
    let events = provider.events();
    assert_eq!(events.iter().filter(|e| matches!(e, Event::Begin(_))).count(), 2);
    assert_eq!(events.iter().filter(|e| matches!(e, Event::Commit(_))).count(), 2);
}
