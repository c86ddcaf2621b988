use std::sync::{Arc, Mutex};
use std::time::Duration;

use dbscope_core::PoolConfig;
use dbscope_data::{args, BoxError, ConnectionProvider, DataError, ErrorKind, Query, QueryLog, QuerySink};
use dbscope_data_sqlx::{Database, DbScope};
use tempfile::TempDir;
use tokio::sync::oneshot;

#[derive(Debug, PartialEq, sqlx::FromRow)]
struct Order {
    id: i64,
    item: String,
    qty: i64,
}

const CREATE: Query = Query::new(
    "orders.create",
    "CREATE TABLE orders (
        id INTEGER PRIMARY KEY,
        item TEXT NOT NULL,
        qty INTEGER NOT NULL CHECK (qty > 0)
    )",
);
const INSERT: Query = Query::new("order.insert", "INSERT INTO orders (item, qty) VALUES ($1, $2)");
const BY_ITEM: Query = Query::new(
    "order.by_item",
    "SELECT id, item, qty FROM orders WHERE item = $1 ORDER BY id",
);
const ALL: Query = Query::new("order.all", "SELECT id, item, qty FROM orders ORDER BY id");
const COUNT: Query = Query::new("order.count", "SELECT COUNT(*) FROM orders");

struct Fixture {
    db: Database,
    _dir: TempDir,
}

async fn fixture(max_connections: u32) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("orders.db").display());
    let pool = PoolConfig {
        max_connections,
        acquire_timeout: Duration::from_secs(5),
        idle_timeout: None,
    };
    let db = Database::connect(&url, &pool).await.unwrap();

    let scope = DbScope::new();
    db.exec(&scope, &Query::new("setup.wal", "PRAGMA journal_mode=WAL"), &args![])
        .await
        .unwrap();
    db.exec(&scope, &CREATE, &args![]).await.unwrap();
    Fixture { db, _dir: dir }
}

async fn count(db: &Database) -> i64 {
    let (n,) = db
        .scan_one::<(i64,)>(&DbScope::new(), &COUNT, &args![])
        .await
        .unwrap();
    n
}

#[tokio::test]
async fn exec_reports_affected_rows() {
    let fx = fixture(4).await;
    let scope = DbScope::new();

    let summary = fx.db.exec(&scope, &INSERT, &args!["widget", 3]).await.unwrap();
    assert_eq!(summary.rows_affected, 1);

    fx.db.exec(&scope, &INSERT, &args!["widget", 5]).await.unwrap();
    let update = Query::new("order.restock", "UPDATE orders SET qty = qty + $1 WHERE item = $2");
    let summary = fx.db.exec(&scope, &update, &args![10, "widget"]).await.unwrap();
    assert_eq!(summary.rows_affected, 2);
}

#[tokio::test]
async fn scan_one_requires_exactly_one_row() {
    let fx = fixture(4).await;
    let scope = DbScope::new();

    let err = fx
        .db
        .scan_one::<Order>(&scope, &BY_ITEM, &args!["widget"])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.query_context(), Some(("scan_one", "order.by_item")));

    fx.db.exec(&scope, &INSERT, &args!["widget", 3]).await.unwrap();
    let order: Order = fx.db.scan_one(&scope, &BY_ITEM, &args!["widget"]).await.unwrap();
    assert_eq!(
        order,
        Order {
            id: 1,
            item: "widget".into(),
            qty: 3
        }
    );

    fx.db.exec(&scope, &INSERT, &args!["widget", 4]).await.unwrap();
    let err = fx
        .db
        .scan_one::<Order>(&scope, &BY_ITEM, &args!["widget"])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AmbiguousResult);
}

#[tokio::test]
async fn scan_all_collects_and_appends() {
    let fx = fixture(4).await;
    let scope = DbScope::new();
    for (item, qty) in [("bolt", 10), ("nut", 20), ("washer", 30)] {
        fx.db.exec(&scope, &INSERT, &args![item, qty]).await.unwrap();
    }

    let orders: Vec<Order> = fx.db.scan_all(&scope, &ALL, &args![]).await.unwrap();
    let items: Vec<_> = orders.iter().map(|o| o.item.as_str()).collect();
    assert_eq!(items, ["bolt", "nut", "washer"]);

    let names = Query::new("order.items", "SELECT item FROM orders WHERE qty > $1 ORDER BY id");
    let mut dest = vec![(String::from("existing"),)];
    let added = fx
        .db
        .scan_all_into::<(String,), _>(&scope, &names, &args![15], &mut dest)
        .await
        .unwrap();
    assert_eq!(added, 2);
    assert_eq!(
        dest,
        [
            ("existing".to_string(),),
            ("nut".to_string(),),
            ("washer".to_string(),)
        ]
    );

    let empty: Vec<Order> = fx.db.scan_all(&scope, &BY_ITEM, &args!["gear"]).await.unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn fetch_rows_streams_rows_in_order() {
    let fx = fixture(4).await;
    let scope = DbScope::new();
    for qty in 1..=5 {
        fx.db.exec(&scope, &INSERT, &args!["bolt", qty]).await.unwrap();
    }

    let mut rows = fx.db.fetch_rows(&scope, &ALL, &args![]).await;
    let mut quantities = Vec::new();
    while let Some(order) = rows.scan_next::<Order>().await {
        quantities.push(order.unwrap().qty);
    }
    assert_eq!(quantities, [1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn fetch_rows_reports_errors_on_first_access() {
    let fx = fixture(4).await;
    let missing = Query::new("invoice.all", "SELECT * FROM invoices");

    let mut rows = fx.db.fetch_rows(&DbScope::new(), &missing, &args![]).await;
    let err = rows.scan_next::<Order>().await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataAccess);
    assert_eq!(err.query_context(), Some(("fetch_rows", "invoice.all")));
    assert!(rows.scan_next::<Order>().await.is_none());
}

#[tokio::test]
async fn closing_rows_releases_the_connection() {
    let fx = fixture(1).await;
    let scope = DbScope::new();
    for qty in 1..=100 {
        fx.db.exec(&scope, &INSERT, &args!["bolt", qty]).await.unwrap();
    }

    let mut rows = fx.db.fetch_rows(&scope, &ALL, &args![]).await;
    assert!(rows.scan_next::<Order>().await.unwrap().is_ok());
    rows.close();

    let scope = DbScope::new().with_timeout(Duration::from_secs(2));
    fx.db.exec(&scope, &INSERT, &args!["nut", 1]).await.unwrap();
}

#[tokio::test]
async fn fetch_row_defers_not_found() {
    let fx = fixture(4).await;
    let scope = DbScope::new();
    fx.db.exec(&scope, &INSERT, &args!["widget", 3]).await.unwrap();

    let row = fx.db.fetch_row(&scope, &BY_ITEM, &args!["gear"]).await;
    assert!(row.err().is_some());
    let err = row.scan::<Order>().unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.query_context(), Some(("fetch_row", "order.by_item")));

    let order: Order = fx
        .db
        .fetch_row(&scope, &BY_ITEM, &args!["widget"])
        .await
        .scan()
        .unwrap();
    assert_eq!(order.qty, 3);
}

#[tokio::test]
async fn statements_in_a_transaction_are_routed_to_it() {
    let fx = fixture(4).await;
    let db = &fx.db;

    db.tx_manager()
        .read_committed(&DbScope::new(), |scope| async move {
            db.exec(&scope, &INSERT, &args!["widget", 3]).await?;

            let (inside,) = db.scan_one::<(i64,)>(&scope, &COUNT, &args![]).await?;
            assert_eq!(inside, 1);
            assert_eq!(count(db).await, 0);
            Ok::<_, DataError>(())
        })
        .await
        .unwrap();

    assert_eq!(count(db).await, 1);
}

#[tokio::test]
async fn rows_in_a_transaction_hold_it_until_drained() {
    let fx = fixture(4).await;
    let db = &fx.db;

    db.tx_manager()
        .read_committed(&DbScope::new(), |scope| async move {
            db.exec(&scope, &INSERT, &args!["widget", 3]).await?;

            let mut rows = db.fetch_rows(&scope, &ALL, &args![]).await;
            let busy = db.exec(&scope, &INSERT, &args!["gear", 1]).await.unwrap_err();
            assert_eq!(busy.kind(), ErrorKind::TransactionBusy);
            assert_eq!(busy.query_context(), Some(("exec", "order.insert")));

            let mut seen = Vec::new();
            while let Some(order) = rows.scan_next::<Order>().await {
                seen.push(order?.item);
            }
            assert_eq!(seen, ["widget"]);

            db.exec(&scope, &INSERT, &args!["gear", 1]).await?;
            let (inside,) = db.scan_one::<(i64,)>(&scope, &COUNT, &args![]).await?;
            assert_eq!(inside, 2);
            Ok::<_, DataError>(())
        })
        .await
        .unwrap();

    assert_eq!(count(db).await, 2);
}

#[tokio::test]
async fn dropping_undrained_rows_frees_the_transaction() {
    let fx = fixture(4).await;
    let db = &fx.db;
    for qty in 1..=100 {
        db.exec(&DbScope::new(), &INSERT, &args!["bolt", qty]).await.unwrap();
    }

    db.tx_manager()
        .read_committed(&DbScope::new(), |scope| async move {
            let mut rows = db.fetch_rows(&scope, &ALL, &args![]).await;
            assert_eq!(rows.scan_next::<Order>().await.unwrap()?.qty, 1);
            drop(rows);

            db.exec(&scope, &INSERT, &args!["nut", 1]).await?;
            Ok::<_, DataError>(())
        })
        .await
        .unwrap();

    assert_eq!(count(db).await, 101);
}

#[tokio::test]
async fn fetch_row_in_a_transaction_sees_its_writes() {
    let fx = fixture(4).await;
    let db = &fx.db;

    db.tx_manager()
        .read_committed(&DbScope::new(), |scope| async move {
            db.exec(&scope, &INSERT, &args!["widget", 3]).await?;
            let order: Order = db.fetch_row(&scope, &BY_ITEM, &args!["widget"]).await.scan()?;
            assert_eq!(order.qty, 3);

            let outside = db.fetch_row(&DbScope::new(), &BY_ITEM, &args!["widget"]).await;
            assert!(outside.err().is_some_and(DataError::is_not_found));
            Ok::<_, DataError>(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn scope_outliving_its_transaction_is_refused() {
    let fx = fixture(4).await;
    let db = &fx.db;
    let leaked = Mutex::new(None);

    db.tx_manager()
        .read_committed(&DbScope::new(), |scope| {
            *leaked.lock().unwrap() = Some(scope);
            async { Ok::<_, DataError>(()) }
        })
        .await
        .unwrap();

    let scope = leaked.into_inner().unwrap().unwrap();
    let err = db.exec(&scope, &INSERT, &args!["widget", 3]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransactionClosed);

    let mut rows = db.fetch_rows(&scope, &ALL, &args![]).await;
    let err = rows.scan_next::<Order>().await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransactionClosed);
    assert_eq!(count(db).await, 0);
}

#[tokio::test]
async fn nested_failure_rolls_back_the_outer_transaction() {
    let fx = fixture(4).await;
    let db = &fx.db;
    let tm = &db.tx_manager();

    let err = tm
        .read_committed(&DbScope::new(), |scope| async move {
            db.exec(&scope, &INSERT, &args!["widget", 3]).await?;
            tm.read_committed(&scope, |scope| async move {
                db.exec(&scope, &INSERT, &args!["widget", 0]).await
            })
            .await?;
            Ok::<_, DataError>(())
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DataAccess);
    assert_eq!(err.query_context(), Some(("exec", "order.insert")));
    assert_eq!(count(db).await, 0);
}

#[tokio::test]
async fn panic_in_unit_of_work_rolls_back() {
    let fx = fixture(4).await;
    let db = &fx.db;

    let err = db
        .tx_manager()
        .read_committed(&DbScope::new(), |scope| async move {
            db.exec(&scope, &INSERT, &args!["widget", 3]).await?;
            if scope.in_transaction() {
                panic!("reservation service unreachable");
            }
            Ok::<_, DataError>(())
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transaction);
    assert_eq!(count(db).await, 0);
}

#[tokio::test]
async fn concurrent_transactions_do_not_see_uncommitted_writes() {
    let fx = fixture(4).await;
    let db = &fx.db;
    let tm = &db.tx_manager();
    let (inserted_tx, inserted_rx) = oneshot::channel::<()>();
    let (checked_tx, checked_rx) = oneshot::channel::<()>();

    let (writer_scope, reader_scope) = (DbScope::new(), DbScope::new());

    let writer = tm.read_committed(&writer_scope, |scope| async move {
        db.exec(&scope, &INSERT, &args!["widget", 3]).await?;
        let _ = inserted_tx.send(());
        let _ = checked_rx.await;
        Ok::<_, DataError>(())
    });
    let reader = async {
        inserted_rx.await.unwrap();
        let seen = tm
            .read_committed(&reader_scope, |scope| async move {
                let (n,) = db.scan_one::<(i64,)>(&scope, &COUNT, &args![]).await?;
                Ok::<_, DataError>(n)
            })
            .await;
        let _ = checked_tx.send(());
        seen
    };

    let (written, seen) = tokio::join!(writer, reader);
    written.unwrap();
    assert_eq!(seen.unwrap(), 0);
    assert_eq!(count(db).await, 1);
}

#[tokio::test]
async fn deadline_elapsing_before_acquire_cancels() {
    let fx = fixture(1).await;
    let held = fx.db.acquire(&DbScope::new()).await.unwrap();

    let scope = DbScope::new().with_timeout(Duration::from_millis(100));
    let result = tokio::time::timeout(
        Duration::from_secs(2),
        fx.db.exec(&scope, &INSERT, &args!["widget", 3]),
    )
    .await
    .expect("exec must give up at the scope deadline");
    let err = result.unwrap_err();
    assert!(err.is_canceled());
    assert_eq!(err.query_context(), Some(("exec", "order.insert")));

    fx.db.release(held);
    fx.db.exec(&DbScope::new(), &INSERT, &args!["widget", 3]).await.unwrap();
}

#[derive(Clone, Default)]
struct RecordingSink(Arc<Mutex<Vec<String>>>);

impl QuerySink for RecordingSink {
    fn emit(&self, log: &QueryLog<'_>) -> Result<(), BoxError> {
        self.0.lock().unwrap().push(format!("{}: {}", log.name, log.rendered));
        Ok(())
    }
}

#[tokio::test]
async fn rendered_queries_reach_the_sink() {
    let fx = fixture(4).await;
    let sink = RecordingSink::default();
    let db = fx.db.clone().with_sink(sink.clone());

    db.exec(&DbScope::new(), &INSERT, &args!["o'brien", 2]).await.unwrap();

    assert_eq!(
        sink.0.lock().unwrap().as_slice(),
        ["order.insert: INSERT INTO orders (item, qty) VALUES ('o''brien', 2)"]
    );
}

#[tokio::test]
async fn closed_database_refuses_work() {
    let fx = fixture(4).await;
    fx.db.ping(&DbScope::new()).await.unwrap();

    fx.db.close().await;
    assert!(fx.db.is_closed());

    let err = fx
        .db
        .exec(&DbScope::new(), &INSERT, &args!["widget", 3])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}
