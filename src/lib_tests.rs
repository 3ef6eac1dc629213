use crate::config::RelayConfig;
use crate::connection::{DataConnection, SqliteConnection};
use crate::error::{FailureInfo, HandlerError, RelayErrorCode};
use crate::reader::{ResultHandler, StartPosition};
use crate::record::types::{ColumnType, RowShape, Rows, Value};
use crate::{ReadOutcome, RelayService};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tempfile::tempdir;

fn sqlite_service(dir: &std::path::Path) -> RelayService {
    RelayService::open(RelayConfig::default(), dir, || {
        let conn = SqliteConnection::open_in_memory()?;
        Ok(Box::new(conn) as Box<dyn DataConnection>)
    })
    .expect("open service")
}

/// Counters are caller-owned state threaded into the handler, shared with
/// the test body through `Arc`.
struct CountingHandler {
    queries: Arc<AtomicU64>,
    updates: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
}

impl ResultHandler for CountingHandler {
    fn on_query_result(
        &mut self,
        _rows: Rows<'_>,
        _text: &str,
        _args: &[Value],
    ) -> Result<(), HandlerError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_query_failure(
        &mut self,
        _error: &FailureInfo,
        _text: &str,
        _args: &[Value],
    ) -> Result<(), HandlerError> {
        self.failures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_update_result(
        &mut self,
        _count: u64,
        _text: &str,
        _args: &[Value],
    ) -> Result<(), HandlerError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_update_failure(
        &mut self,
        _error: &FailureInfo,
        _text: &str,
        _args: &[Value],
    ) -> Result<(), HandlerError> {
        self.failures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn opening_a_service_does_not_touch_the_database() {
    let dir = tempdir().expect("tempdir");
    let supplied = Arc::new(AtomicU64::new(0));
    let observer = Arc::clone(&supplied);
    let service = RelayService::open(RelayConfig::default(), dir.path(), move || {
        observer.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SqliteConnection::open_in_memory()?) as Box<dyn DataConnection>)
    })
    .expect("open");

    let _writer = service.create_writer();
    assert_eq!(supplied.load(Ordering::SeqCst), 0);

    // The connection is acquired only once an invocation executes.
    let writer = service.create_writer();
    let queries = Arc::new(AtomicU64::new(0));
    let updates = Arc::new(AtomicU64::new(0));
    let failures = Arc::new(AtomicU64::new(0));
    let mut reader = service
        .create_reader(CountingHandler {
            queries: Arc::clone(&queries),
            updates: Arc::clone(&updates),
            failures: Arc::clone(&failures),
        })
        .expect("reader");
    writer
        .execute_update("CREATE TABLE t (num INTEGER)", vec![])
        .expect("write");
    assert_eq!(
        reader.read_one(Some(Duration::from_secs(10))).expect("read"),
        ReadOutcome::Dispatched
    );
    assert_eq!(supplied.load(Ordering::SeqCst), 1);
    service.close().expect("close");
}

#[test]
fn close_is_idempotent_and_reports_log_closed_afterwards() {
    let dir = tempdir().expect("tempdir");
    let service = sqlite_service(dir.path());
    let writer = service.create_writer();
    writer
        .execute_update("CREATE TABLE t (num INTEGER)", vec![])
        .expect("write");

    service.close().expect("close");
    service.close().expect("second close");

    let err = writer
        .execute_update("INSERT INTO t VALUES (1)", vec![])
        .expect_err("closed");
    assert_eq!(err.code(), RelayErrorCode::LogClosed);

    let queries = Arc::new(AtomicU64::new(0));
    let updates = Arc::new(AtomicU64::new(0));
    let failures = Arc::new(AtomicU64::new(0));
    let err = service
        .create_reader(CountingHandler {
            queries,
            updates,
            failures,
        })
        .expect_err("closed service");
    assert_eq!(err.code(), RelayErrorCode::LogClosed);
}

#[test]
fn close_drains_pending_invocations_before_shutdown() {
    let dir = tempdir().expect("tempdir");
    let service = sqlite_service(dir.path());
    let writer = service.create_writer();
    writer
        .execute_update("CREATE TABLE t (num INTEGER)", vec![])
        .expect("create");
    for i in 0..10 {
        writer
            .execute_update("INSERT INTO t VALUES (?)", vec![Value::Integer(i)])
            .expect("insert");
    }

    // Start the dispatcher, then close immediately; every recorded
    // invocation must still produce its outcome.
    let queries = Arc::new(AtomicU64::new(0));
    let updates = Arc::new(AtomicU64::new(0));
    let failures = Arc::new(AtomicU64::new(0));
    let mut reader = service
        .create_reader_from(
            CountingHandler {
                queries: Arc::clone(&queries),
                updates: Arc::clone(&updates),
                failures: Arc::clone(&failures),
            },
            StartPosition::Start,
        )
        .expect("reader");
    service.close().expect("close");

    let mut dispatched = 0;
    loop {
        match reader.read_one(None).expect("read") {
            ReadOutcome::Dispatched => dispatched += 1,
            ReadOutcome::LogClosed => break,
            ReadOutcome::TimedOut => unreachable!("blocking read cannot time out"),
        }
    }
    assert_eq!(dispatched, 11);
    assert_eq!(updates.load(Ordering::SeqCst), 11);
    assert_eq!(failures.load(Ordering::SeqCst), 0);
}

#[test]
fn dumps_render_both_logs() {
    let dir = tempdir().expect("tempdir");
    let service = sqlite_service(dir.path());
    let writer = service.create_writer();
    writer
        .execute_update("CREATE TABLE t (name TEXT, num INTEGER)", vec![])
        .expect("create");
    writer
        .execute_query(
            "SELECT name, num FROM t",
            RowShape::new()
                .column("name", ColumnType::Text)
                .column("num", ColumnType::Integer),
            vec![],
        )
        .expect("query");

    let queries = Arc::new(AtomicU64::new(0));
    let updates = Arc::new(AtomicU64::new(0));
    let failures = Arc::new(AtomicU64::new(0));
    let mut reader = service
        .create_reader_from(
            CountingHandler {
                queries: Arc::clone(&queries),
                updates,
                failures,
            },
            StartPosition::Start,
        )
        .expect("reader");
    service.close().expect("close");
    reader.drain().expect("drain");
    assert_eq!(queries.load(Ordering::SeqCst), 1);

    let input_dump = service.dump_input().expect("input dump");
    assert!(input_dump.contains("update \"CREATE TABLE t (name TEXT, num INTEGER)\""));
    assert!(input_dump.contains("query \"SELECT name, num FROM t\""));
    assert!(input_dump.contains("shape=(name:text, num:integer)"));

    let output_dump = service.dump_output().expect("output dump");
    assert!(output_dump.contains("update-result"));
    assert!(output_dump.contains("query-result"));
    assert!(output_dump.contains("rows=0"));
}
