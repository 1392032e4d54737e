//! Tests for the query layer.
//!
//! Every test declares its own `Database`, so each one gets a private
//! connection (and, for `:memory:`, a private database) on its thread.

use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use once_cell::sync::Lazy;
use uuid::Uuid;

static CREATE_AB: Query = Query::new("create table t (a integer, b text)");
static INSERT_AB: Query = Query::new("insert into t (a, b) values (?1, ?2)");
static SELECT_AB: Query = Query::new("select a, b from t where a = ?1");
static SELECT_ALL_AB: Query = Query::new("select a, b from t order by a");
static COUNT_AB: Query = Query::new("select count(*) from t");

fn create_ab(db: &'static Database) {
    assert_eq!(db.execute(&CREATE_AB, &()).unwrap(), ffi::SQLITE_DONE);
}

fn count_ab(db: &'static Database) -> i64 {
    let mut cursor = db.query(&COUNT_AB, &()).unwrap();
    cursor.fetch::<(i64,)>().unwrap().unwrap().0
}

#[test]
fn test_end_to_end() {
    static DB: Database = Database::new(":memory:");
    create_ab(&DB);
    DB.execute(&INSERT_AB, &(1, "hello")).unwrap();

    let mut a = 0i64;
    let mut b = String::new();
    let mut cursor = DB.query(&SELECT_AB, &(1,)).unwrap();
    assert!(cursor.next((&mut a, &mut b)).unwrap());
    assert_eq!(a, 1);
    assert_eq!(b, "hello");
    assert!(!cursor.next((&mut a, &mut b)).unwrap());
    assert_eq!(cursor.result_code(), ffi::SQLITE_DONE);
}

#[test]
fn test_round_trip() {
    static DB: Database = Database::new(":memory:");
    static ECHO: Query = Query::new("select ?1, ?2, ?3, ?4, ?5, ?6");

    let bytes = vec![0u8, 1, 2, 255];
    let params = (-42i64, "text", None::<i64>, Some(7i32), bytes.as_slice(), 3.5f64);
    let mut cursor = DB.query(&ECHO, &params).unwrap();
    let row = cursor
        .fetch::<(i64, String, Option<i64>, Option<i32>, Vec<u8>, f64)>()
        .unwrap()
        .unwrap();
    assert_eq!(row, (-42, "text".to_string(), None, Some(7), bytes.clone(), 3.5));
}

#[test]
fn test_round_trip_borrowed() {
    static DB: Database = Database::new(":memory:");
    static ECHO: Query = Query::new("select ?1, ?2");

    let text = String::from("borrowed");
    let blob = Blob::from("raw");
    let params = (&text, &blob);
    let mut cursor = DB.query(&ECHO, &params).unwrap();
    let (s, b) = cursor.fetch::<(&str, BlobView<'_>)>().unwrap().unwrap();
    assert_eq!(s, "borrowed");
    assert_eq!(&*b, b"raw");
}

#[test]
fn test_optional_composition() {
    static DB: Database = Database::new(":memory:");
    static ECHO: Query = Query::new("select ?1, ?2, ?2");

    let params = (None::<String>, Some("x"));
    let mut cursor = DB.query(&ECHO, &params).unwrap();
    let mut absent = Some(String::from("stale"));
    let mut present: Option<String> = None;
    let mut direct = String::new();
    assert!(cursor.next((&mut absent, &mut present, &mut direct)).unwrap());
    assert_eq!(absent, None);
    assert_eq!(present.as_deref(), Some(direct.as_str()));
    assert_eq!(direct, "x");
}

#[test]
fn test_null_marker() {
    static DB: Database = Database::new(":memory:");
    static ECHO: Query = Query::new("select ?1, ?2 is null, ?3");

    let mut cursor = DB.query(&ECHO, &(1, Null, 3)).unwrap();
    let mut third = 0i64;
    assert!(cursor.next((Null, Null, &mut third)).unwrap());
    assert_eq!(third, 3);

    let mut cursor = DB.query(&ECHO, &(1, Null, 3)).unwrap();
    let row = cursor.fetch::<(Null, bool, i64)>().unwrap().unwrap();
    assert_eq!(row, (Null, true, 3));
}

#[test]
fn test_cache_reuse() {
    static DB: Database = Database::new(":memory:");
    static ECHO: Query = Query::new("select ?1");

    for i in 0..50i64 {
        let params = (i,);
        let mut cursor = DB.query(&ECHO, &params).unwrap();
        assert_eq!(cursor.fetch::<(i64,)>().unwrap(), Some((i,)));
    }
    assert_eq!(DB.statements_prepared(), 1);
    assert_eq!(DB.idle_statements(&ECHO), 1);
}

#[test]
fn test_cache_grows_with_open_cursors() {
    static DB: Database = Database::new(":memory:");
    static ECHO: Query = Query::new("select ?1");

    let first = DB.query(&ECHO, &(1,)).unwrap();
    let second = DB.query(&ECHO, &(2,)).unwrap();
    let third = DB.query(&ECHO, &(3,)).unwrap();
    assert_eq!(DB.statements_prepared(), 3);
    assert_eq!(DB.idle_statements(&ECHO), 0);

    drop((first, second, third));
    assert_eq!(DB.idle_statements(&ECHO), 3);

    for _ in 0..10 {
        let mut a = DB.query(&ECHO, &(1,)).unwrap();
        let mut b = DB.query(&ECHO, &(2,)).unwrap();
        assert_eq!(a.fetch::<(i64,)>().unwrap(), Some((1,)));
        assert_eq!(b.fetch::<(i64,)>().unwrap(), Some((2,)));
    }
    assert_eq!(DB.statements_prepared(), 3);
}

#[test]
fn test_per_thread_isolation() {
    static DIR: Lazy<tempfile::TempDir> = Lazy::new(|| tempfile::tempdir().unwrap());

    fn path() -> String {
        DIR.path().join("isolation.db").to_string_lossy().into_owned()
    }

    static DB: Database = Database::from_fn(path);
    static INSERT: Query = Query::new("insert into t (a, b) values (?1, ?2)");
    static SELECT: Query = Query::new("select b from t where a = ?1 order by b");

    create_ab(&DB);
    assert!(DB.is_connected());

    let handles: Vec<_> = (0..4i64)
        .map(|worker| {
            thread::spawn(move || {
                assert!(!DB.is_connected());
                for i in 0..25 {
                    let label = format!("{worker}-{i:02}");
                    assert_eq!(DB.execute(&INSERT, &(worker, &label)).unwrap(), ffi::SQLITE_DONE);
                }
                assert!(DB.is_connected());
                assert_eq!(DB.idle_statements(&INSERT), 1);

                let rows = DB.query(&SELECT, &(worker,)).unwrap().collect::<(String,)>().unwrap();
                assert_eq!(rows.len(), 25);
                assert!(rows.iter().all(|(b,)| b.starts_with(&format!("{worker}-"))));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(count_ab(&DB), 100);
    // One insert and one select statement per worker, plus this thread's.
    assert_eq!(DB.statements_prepared(), 1 + 4 * 2 + 1);
    assert_eq!(DB.idle_statements(&INSERT), 0);
}

#[test]
fn test_busy_writer_waits_for_lock() {
    static DIR: Lazy<tempfile::TempDir> = Lazy::new(|| tempfile::tempdir().unwrap());

    fn path() -> String {
        DIR.path().join("busy.db").to_string_lossy().into_owned()
    }

    static DB: Database = Database::from_fn(path);
    static BEGIN_IMMEDIATE: Query = Query::new("begin immediate");

    create_ab(&DB);
    assert_eq!(DB.execute(&BEGIN_IMMEDIATE, &()).unwrap(), ffi::SQLITE_DONE);

    let (started_tx, started_rx) = mpsc::channel();
    let writer = thread::spawn(move || {
        started_tx.send(()).unwrap();
        let start = Instant::now();
        let code = DB.execute(&INSERT_AB, &(1, "waited")).unwrap();
        (code, start.elapsed())
    });

    started_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(200));
    assert!(!writer.is_finished());
    DB.commit().unwrap();

    let (code, waited) = writer.join().unwrap();
    assert_eq!(code, ffi::SQLITE_DONE);
    assert!(waited >= Duration::from_millis(150), "writer waited {waited:?}");
    assert_eq!(count_ab(&DB), 1);
}

#[test]
fn test_thread_exit_closes_connection() {
    static DIR: Lazy<tempfile::TempDir> = Lazy::new(|| tempfile::tempdir().unwrap());

    fn path() -> String {
        DIR.path().join("teardown.db").to_string_lossy().into_owned()
    }

    static DB: Database = Database::from_fn(path);

    create_ab(&DB);
    thread::spawn(|| {
        DB.execute(&INSERT_AB, &(1, "committed")).unwrap();
        DB.begin_transaction().unwrap();
        DB.execute(&INSERT_AB, &(2, "pending")).unwrap();
        assert!(DB.is_connected());
        assert_eq!(DB.idle_statements(&INSERT_AB), 1);
    })
    .join()
    .unwrap();

    // The worker left a write transaction open; its lock is only released
    // if the worker's statements were finalized and its connection closed.
    let other = rusqlite::Connection::open(path()).unwrap();
    other.busy_timeout(Duration::from_secs(2)).unwrap();
    other.execute_batch("begin immediate; rollback;").unwrap();
    assert_eq!(count_ab(&DB), 1);
    assert_eq!(DB.idle_statements(&INSERT_AB), 0);
}

#[test]
fn test_cursor_exhaustion() {
    static DB: Database = Database::new(":memory:");
    create_ab(&DB);

    let mut a = 0i64;
    let mut b = String::new();
    let mut cursor = DB.query(&SELECT_AB, &(1,)).unwrap();
    for _ in 0..5 {
        assert!(!cursor.next((&mut a, &mut b)).unwrap());
    }
    assert_eq!(cursor.result_code(), ffi::SQLITE_DONE);
    assert_eq!(cursor.fetch::<(i64, String)>().unwrap(), None);
}

#[test]
fn test_column_guard() {
    static DB: Database = Database::new(":memory:");
    static TWO: Query = Query::new("select 1, 2");

    let (mut a, mut b, mut c) = (10i64, 20i64, 30i64);
    let mut cursor = DB.query(&TWO, &()).unwrap();
    assert_eq!(cursor.column_count(), 2);
    let err = cursor.next((&mut a, &mut b, &mut c)).unwrap_err();
    assert!(matches!(
        err,
        LiteError::ColumnMismatch {
            requested: 3,
            available: 2
        }
    ));
    assert_eq!((a, b, c), (10, 20, 30));

    // The row was not consumed by the failed request.
    assert!(cursor.next((&mut a, &mut b)).unwrap());
    assert_eq!((a, b), (1, 2));
}

#[test]
fn test_failed_row_leaves_outputs() {
    static DB: Database = Database::new(":memory:");
    static ROW: Query = Query::new("select 5, 300");

    let (mut a, mut b) = (0i64, 0u8);
    let mut cursor = DB.query(&ROW, &()).unwrap();
    let err = cursor.next((&mut a, &mut b)).unwrap_err();
    assert!(matches!(err, LiteError::OutOfRange { index: 1, value: 300 }));
    assert_eq!((a, b), (0, 0));
}

#[test]
fn test_collect() {
    static DB: Database = Database::new(":memory:");
    create_ab(&DB);
    for (a, b) in [(2, "two"), (1, "one"), (3, "three")] {
        DB.execute(&INSERT_AB, &(a, b)).unwrap();
    }

    let rows = DB.query(&SELECT_ALL_AB, &()).unwrap().collect::<(i64, String)>().unwrap();
    assert_eq!(
        rows,
        vec![
            (1, "one".to_string()),
            (2, "two".to_string()),
            (3, "three".to_string())
        ]
    );
}

#[derive(Debug, Clone, PartialEq)]
struct Point {
    x: i64,
    y: i64,
}

impl Serialize for Point {
    type Target = String;

    fn serialize(&self) -> String {
        format!("{},{}", self.x, self.y)
    }
}

impl Deserialize for Point {
    type Source<'r> = &'r str;

    fn deserialize(text: &str) -> Result<Self> {
        let parse = |s: Option<&str>| -> Result<i64> {
            s.and_then(|s| s.parse().ok())
                .ok_or_else(|| LiteError::Conversion(format!("bad point {text:?}")))
        };
        let mut parts = text.split(',');
        Ok(Point {
            x: parse(parts.next())?,
            y: parse(parts.next())?,
        })
    }
}

crate::register_converter!(Point);

#[test]
fn test_converter_round_trip() {
    static DB: Database = Database::new(":memory:");
    static ECHO: Query = Query::new("select ?1, typeof(?1), ?2, ?3");

    let point = Point { x: -3, y: 9 };
    let params = (point.clone(), Some(Point { x: 1, y: 2 }), None::<Point>);
    let mut cursor = DB.query(&ECHO, &params).unwrap();
    let row = cursor
        .fetch::<(Point, String, Option<Point>, Option<Point>)>()
        .unwrap()
        .unwrap();
    assert_eq!(row.0, point);
    assert_eq!(row.1, "text");
    assert_eq!(row.2, Some(Point { x: 1, y: 2 }));
    assert_eq!(row.3, None);
}

#[test]
fn test_converter_rejects_value() {
    static DB: Database = Database::new(":memory:");
    static ECHO: Query = Query::new("select ?1");

    let mut cursor = DB.query(&ECHO, &("nonsense",)).unwrap();
    let err = cursor.fetch::<(Point,)>().unwrap_err();
    assert!(matches!(err, LiteError::Conversion(_)));
}

#[test]
fn test_builtin_converters() {
    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Profile {
        name: String,
        tags: Vec<String>,
    }

    static DB: Database = Database::new(":memory:");
    static ECHO: Query = Query::new("select ?1, ?2, typeof(?2), length(?2), ?3");

    let profile = Json(Profile {
        name: "ada".into(),
        tags: vec!["math".into(), "engines".into()],
    });
    let id = Uuid::new_v4();
    let at = Utc.with_ymd_and_hms(2024, 5, 17, 8, 0, 0).unwrap();

    let params = (&profile, id, at);
    let mut cursor = DB.query(&ECHO, &params).unwrap();
    let (json, uuid, kind, len, stamp) = cursor
        .fetch::<(Json<Profile>, Uuid, String, i64, chrono::DateTime<Utc>)>()
        .unwrap()
        .unwrap();
    assert_eq!(json, profile);
    assert_eq!(uuid, id);
    assert_eq!(kind, "blob");
    assert_eq!(len, 16);
    assert_eq!(stamp, at);
}

#[test]
fn test_dynamic_values() {
    static DB: Database = Database::new(":memory:");
    static MIXED: Query = Query::new("select 1, 1.5, 'x', x'0102', null");

    let mut cursor = DB.query(&MIXED, &()).unwrap();
    let row = cursor.fetch::<(Value, Value, Value, Value, Value)>().unwrap().unwrap();
    assert_eq!(
        row,
        (
            Value::Integer(1),
            Value::Real(1.5),
            Value::Text("x".into()),
            Value::Blob(vec![1, 2]),
            Value::Null
        )
    );
}

#[test]
fn test_dynamic_values_bind() {
    static DB: Database = Database::new(":memory:");
    static KINDS: Query = Query::new(
        "select typeof(?1), typeof(?2), typeof(?3), typeof(?4), typeof(?5), ?2 + ?3, ?4 || 'u'",
    );

    let params = [
        Value::Null,
        Value::Integer(7),
        Value::Real(0.5),
        Value::Text("t".into()),
        Value::Blob(vec![9]),
    ];
    let mut cursor = DB.query(&KINDS, &params).unwrap();
    let row = cursor
        .fetch::<(&str, &str, &str, &str, &str, Value, Value)>()
        .unwrap()
        .unwrap();
    assert_eq!(
        row,
        (
            "null",
            "integer",
            "real",
            "text",
            "blob",
            Value::Real(7.5),
            Value::Text("tu".into())
        )
    );
}

#[test]
fn test_blob_binding() {
    static DB: Database = Database::new(":memory:");
    static KINDS: Query = Query::new("select typeof(?1), typeof(?2), typeof(?3), typeof(?4)");

    let owned = Blob::from("hello");
    let bytes: &[u8] = b"hello";
    let params = (&owned, owned.as_view(), bytes, "hello");
    let mut cursor = DB.query(&KINDS, &params).unwrap();
    let row = cursor.fetch::<(&str, &str, &str, &str)>().unwrap().unwrap();
    assert_eq!(row, ("blob", "blob", "blob", "text"));
}

#[test]
fn test_slice_params() {
    static DB: Database = Database::new(":memory:");
    static SUM: Query = Query::new("select ?1 + ?2 + ?3");

    let values = [1i64, 2, 3];
    let mut cursor = DB.query(&SUM, &values[..]).unwrap();
    assert_eq!(cursor.fetch::<(i64,)>().unwrap(), Some((6,)));
    drop(cursor);

    let name = String::from("n");
    let mixed: Vec<&dyn Bind> = vec![&1i64 as &dyn Bind, &name, &Null];
    static KINDS: Query = Query::new("select typeof(?1), typeof(?2), typeof(?3)");
    let mut cursor = DB.query(&KINDS, &mixed).unwrap();
    let row = cursor.fetch::<(String, String, String)>().unwrap().unwrap();
    assert_eq!(row, ("integer".into(), "text".into(), "null".into()));
}

#[test]
fn test_too_many_params() {
    static DB: Database = Database::new(":memory:");
    static ONE: Query = Query::new("select ?1");

    let err = DB.query(&ONE, &(1, 2)).unwrap_err();
    assert_eq!(err.code(), Some(ffi::SQLITE_RANGE));

    // The statement went back to the cache and is still usable.
    assert_eq!(DB.idle_statements(&ONE), 1);
    let mut cursor = DB.query(&ONE, &(5,)).unwrap();
    assert_eq!(cursor.fetch::<(i64,)>().unwrap(), Some((5,)));
    assert_eq!(DB.statements_prepared(), 1);
}

#[test]
fn test_unsigned_out_of_range() {
    static DB: Database = Database::new(":memory:");
    static ONE: Query = Query::new("select ?1");

    let err = DB.query(&ONE, &(u64::MAX,)).unwrap_err();
    assert!(matches!(err, LiteError::OutOfRange { index: 1, .. }));

    let mut cursor = DB.query(&ONE, &(4_294_967_295u64,)).unwrap();
    assert_eq!(cursor.fetch::<(u64,)>().unwrap(), Some((4_294_967_295,)));
}

#[test]
fn test_prepare_error() {
    static DB: Database = Database::new(":memory:");
    static BROKEN: Query = Query::new("selec nothing");

    let err = DB.query(&BROKEN, &()).unwrap_err();
    assert_eq!(err.code(), Some(ffi::SQLITE_ERROR));
    assert_eq!(DB.statements_prepared(), 0);
}

#[test]
fn test_step_error_is_reported_on_cursor() {
    static DB: Database = Database::new(":memory:");
    static CREATE: Query = Query::new("create table u (k text primary key)");
    static INSERT: Query = Query::new("insert into u values (?1)");

    DB.execute(&CREATE, &()).unwrap();
    assert_eq!(DB.execute(&INSERT, &("k",)).unwrap(), ffi::SQLITE_DONE);
    assert_eq!(DB.execute(&INSERT, &("k",)).unwrap(), ffi::SQLITE_CONSTRAINT);
}

#[test]
fn test_query_from_fn() {
    fn text() -> String {
        format!("select {}", 6 * 7)
    }

    static DB: Database = Database::new(":memory:");
    static ANSWER: Query = Query::from_fn(text);

    let mut cursor = DB.query(&ANSWER, &()).unwrap();
    assert_eq!(cursor.fetch::<(i64,)>().unwrap(), Some((42,)));
}

#[test]
fn test_transaction_helpers() {
    static DB: Database = Database::new(":memory:");
    create_ab(&DB);

    DB.begin_transaction().unwrap();
    DB.execute(&INSERT_AB, &(1, "kept")).unwrap();
    DB.commit().unwrap();
    assert_eq!(count_ab(&DB), 1);

    DB.begin_transaction().unwrap();
    DB.execute(&INSERT_AB, &(2, "dropped")).unwrap();
    DB.rollback().unwrap();
    assert_eq!(count_ab(&DB), 1);

    // Commit without an open transaction is an engine error.
    assert_eq!(DB.commit().unwrap_err().code(), Some(ffi::SQLITE_ERROR));
}

#[test]
fn test_transaction_guard() {
    static DB: Database = Database::new(":memory:");
    create_ab(&DB);

    {
        let _tx = DB.transaction().unwrap();
        DB.execute(&INSERT_AB, &(1, "rolled back")).unwrap();
    }
    assert_eq!(count_ab(&DB), 0);

    let tx = DB.transaction().unwrap();
    DB.execute(&INSERT_AB, &(2, "committed")).unwrap();
    tx.commit().unwrap();
    assert_eq!(count_ab(&DB), 1);
}

#[test]
fn test_custom_functions() {
    static DB: Database = Database::new(":memory:");
    static CALLS: Query = Query::new(
        "select litekit_test_increment(litekit_test_increment(?1)), litekit_test_quote(?2), litekit_test_answer()",
    );

    create_function("litekit_test_increment", |x: i64| x + 1).unwrap();
    create_function("litekit_test_quote", |s: String| format!("'{s}'")).unwrap();
    create_function("litekit_test_answer", || 42i64).unwrap();

    let mut cursor = DB.query(&CALLS, &(1, "hi")).unwrap();
    let row = cursor.fetch::<(i64, String, i64)>().unwrap().unwrap();
    assert_eq!(row, (3, "'hi'".to_string(), 42));
}

#[test]
fn test_function_error() {
    static DB: Database = Database::new(":memory:");
    static CALL: Query = Query::new("select litekit_test_total(?1)");

    create_function("litekit_test_total", |Json(values): Json<Vec<i64>>| {
        values.iter().sum::<i64>()
    })
    .unwrap();

    let mut cursor = DB.query(&CALL, &("[1, 2, 3]",)).unwrap();
    assert_eq!(cursor.fetch::<(i64,)>().unwrap(), Some((6,)));
    drop(cursor);

    let mut cursor = DB.query(&CALL, &("not json",)).unwrap();
    assert_eq!(cursor.fetch::<(i64,)>().unwrap(), None);
    assert_eq!(cursor.result_code(), ffi::SQLITE_ERROR);
}

#[test]
fn test_post_connection_hook() {
    static DB: Database = Database::new(":memory:");
    static VERSION: Query = Query::new("pragma user_version");
    static OPENED: AtomicUsize = AtomicUsize::new(0);

    DB.set_post_connection_hook(|conn| {
        OPENED.fetch_add(1, Ordering::SeqCst);
        conn.pragma_update(None, "user_version", 42)
    })
    .unwrap();
    assert!(matches!(
        DB.set_post_connection_hook(|_| Ok(())),
        Err(LiteError::HookAlreadySet)
    ));

    for _ in 0..3 {
        let mut cursor = DB.query(&VERSION, &()).unwrap();
        assert_eq!(cursor.fetch::<(i64,)>().unwrap(), Some((42,)));
    }
    assert_eq!(OPENED.load(Ordering::SeqCst), 1);

    thread::spawn(|| {
        let mut cursor = DB.query(&VERSION, &()).unwrap();
        assert_eq!(cursor.fetch::<(i64,)>().unwrap(), Some((42,)));
    })
    .join()
    .unwrap();
    assert_eq!(OPENED.load(Ordering::SeqCst), 2);
}

#[test]
fn test_failed_hook_leaves_no_connection() {
    static DB: Database = Database::new(":memory:");
    static ONE: Query = Query::new("select 1");

    DB.set_post_connection_hook(|conn| conn.execute_batch("not sql"))
        .unwrap();
    assert!(matches!(DB.query(&ONE, &()), Err(LiteError::Sqlite(_))));
    assert!(!DB.is_connected());
}

#[test]
fn test_configure_after_open() {
    static DB: Database = Database::new(":memory:");
    static ONE: Query = Query::new("select 1");

    DB.execute(&ONE, &()).unwrap();
    assert!(is_configured());
    assert!(matches!(
        configure(EngineConfig::new()),
        Err(LiteError::AlreadyConfigured)
    ));
}
