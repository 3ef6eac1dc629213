use crate::connection::{ConnectionError, ConnectionSupplier, DataConnection};
use crate::error::RelayError;
use crate::log::frame::Frame;
use crate::log::store::{LogTailer, RecordLog, TailPoll};
use crate::record::codec::{
    InvocationRecord, OutcomeRecord, decode_invocation, encode_outcome,
};
use crate::record::types::{RowShape, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchState {
    Idle,
    Executing,
    Recording,
}

/// Sequential execution loop converting invocation records into outcome
/// records. Exactly one dispatcher runs per log pair; the next invocation
/// is not touched before the prior outcome is durably appended, which is
/// what carries the ordering invariant between the two logs.
pub(crate) struct Dispatcher {
    input: LogTailer,
    output: RecordLog,
    supplier: ConnectionSupplier,
    connection: Option<Box<dyn DataConnection>>,
    poll_interval: Duration,
    state: DispatchState,
}

impl Dispatcher {
    /// Positions the input cursor after the last invocation that already
    /// has a recorded outcome, so a reopened pipeline never re-executes
    /// work and never skips any.
    pub(crate) fn new(
        input_log: &RecordLog,
        output: RecordLog,
        supplier: ConnectionSupplier,
        poll_interval: Duration,
    ) -> Result<Self, RelayError> {
        let resume_from = output.record_count();
        let input = input_log.tail_from(resume_from)?;
        if resume_from > 0 {
            info!(resume_from, "dispatcher resuming after recorded outcomes");
        }
        Ok(Self {
            input,
            output,
            supplier,
            connection: None,
            poll_interval,
            state: DispatchState::Idle,
        })
    }

    /// Runs until the input log is closed and fully drained. Execution
    /// failures become outcome records; malformed input records and output
    /// append failures are terminal.
    pub(crate) fn run(mut self) -> Result<(), RelayError> {
        loop {
            match self.input.poll_next(self.poll_interval)? {
                TailPoll::Record(frame) => self.process(frame)?,
                TailPoll::TimedOut => continue,
                TailPoll::Closed => break,
            }
        }
        self.output.sync()?;
        info!("dispatcher drained input log");
        Ok(())
    }

    fn process(&mut self, frame: Frame) -> Result<(), RelayError> {
        self.state = DispatchState::Executing;
        // Skipping an undecodable invocation would silently drop work, so
        // it ends the dispatcher instead.
        let invocation = decode_invocation(frame.kind, &frame.payload)?;
        debug!(
            offset = frame.offset,
            state = ?self.state,
            text = invocation.text(),
            "executing invocation"
        );
        let outcome = self.execute(invocation);

        self.state = DispatchState::Recording;
        let (kind, payload) = encode_outcome(&outcome)?;
        let outcome_offset = self.output.append(kind, &payload)?;
        debug!(
            offset = frame.offset,
            state = ?self.state,
            outcome_offset,
            kind,
            "outcome recorded"
        );
        self.state = DispatchState::Idle;
        Ok(())
    }

    fn execute(&mut self, invocation: InvocationRecord) -> OutcomeRecord {
        match invocation {
            InvocationRecord::Query { text, args, shape } => {
                match self.run_query(&text, &args, &shape) {
                    Ok(rows) => OutcomeRecord::QueryResult {
                        text,
                        args,
                        shape,
                        rows,
                    },
                    Err(e) => {
                        warn!(%text, error = %e, "query failed");
                        OutcomeRecord::QueryFailure {
                            text,
                            args,
                            error: e.into_failure(),
                        }
                    }
                }
            }
            InvocationRecord::Update { text, args } => match self.run_update(&text, &args) {
                Ok(count) => OutcomeRecord::UpdateResult { text, args, count },
                Err(e) => {
                    warn!(%text, error = %e, "update failed");
                    OutcomeRecord::UpdateFailure {
                        text,
                        args,
                        error: e.into_failure(),
                    }
                }
            },
        }
    }

    fn run_query(
        &mut self,
        text: &str,
        args: &[Value],
        shape: &RowShape,
    ) -> Result<Vec<Vec<Value>>, ConnectionError> {
        let rows = self.connection()?.run_query(text, args)?;
        for row in &rows {
            shape
                .check_row(row)
                .map_err(|e| ConnectionError::shape_mismatch(e.to_string()))?;
        }
        Ok(rows)
    }

    fn run_update(&mut self, text: &str, args: &[Value]) -> Result<u64, ConnectionError> {
        self.connection()?.run_update(text, args)
    }

    /// Lazily acquires the data connection. A failed acquisition is an
    /// execution failure for the current record; the next record retries.
    fn connection(&mut self) -> Result<&mut dyn DataConnection, ConnectionError> {
        if self.connection.is_none() {
            let conn = (self.supplier)()?;
            info!("dispatcher acquired data connection");
            self.connection = Some(conn);
        }
        match self.connection.as_deref_mut() {
            Some(conn) => Ok(conn),
            None => Err(ConnectionError::connect("connection supplier yielded nothing")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Dispatcher;
    use crate::config::DurabilityMode;
    use crate::connection::{ConnectionError, DataConnection};
    use crate::error::{FailureKind, RelayErrorCode};
    use crate::log::store::RecordLog;
    use crate::record::codec::{OutcomeRecord, decode_outcome, encode_invocation, InvocationRecord};
    use crate::record::types::{ColumnType, RowShape, Value};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Connection that replays canned responses, one per operation.
    struct ScriptedConnection {
        steps: std::vec::IntoIter<Result<Step, ConnectionError>>,
    }

    enum Step {
        Rows(Vec<Vec<Value>>),
        Count(u64),
    }

    impl ScriptedConnection {
        fn new(steps: Vec<Result<Step, ConnectionError>>) -> Self {
            Self {
                steps: steps.into_iter(),
            }
        }

        fn next_step(&mut self) -> Result<Step, ConnectionError> {
            self.steps
                .next()
                .unwrap_or_else(|| Err(ConnectionError::statement("script exhausted")))
        }
    }

    impl DataConnection for ScriptedConnection {
        fn run_query(
            &mut self,
            _text: &str,
            _args: &[Value],
        ) -> Result<Vec<Vec<Value>>, ConnectionError> {
            match self.next_step()? {
                Step::Rows(rows) => Ok(rows),
                Step::Count(_) => Err(ConnectionError::statement("expected query step")),
            }
        }

        fn run_update(&mut self, _text: &str, _args: &[Value]) -> Result<u64, ConnectionError> {
            match self.next_step()? {
                Step::Count(count) => Ok(count),
                Step::Rows(_) => Err(ConnectionError::statement("expected update step")),
            }
        }
    }

    fn logs(dir: &std::path::Path) -> (RecordLog, RecordLog) {
        let input = RecordLog::open(dir.join("input.qlog"), DurabilityMode::Full, 1024 * 1024)
            .expect("input");
        let output = RecordLog::open(dir.join("output.qlog"), DurabilityMode::Full, 1024 * 1024)
            .expect("output");
        (input, output)
    }

    fn append_invocation(log: &RecordLog, record: &InvocationRecord) {
        let (kind, payload) = encode_invocation(record).expect("encode");
        log.append(kind, &payload).expect("append");
    }

    fn scripted_supplier(
        steps: Vec<Result<Step, ConnectionError>>,
    ) -> crate::connection::ConnectionSupplier {
        let mut slot = Some(ScriptedConnection::new(steps));
        Box::new(move || match slot.take() {
            Some(conn) => Ok(Box::new(conn) as Box<dyn DataConnection>),
            None => Err(ConnectionError::connect("supplier exhausted")),
        })
    }

    fn run_dispatcher(
        input: &RecordLog,
        output: &RecordLog,
        steps: Vec<Result<Step, ConnectionError>>,
    ) -> Result<(), crate::error::RelayError> {
        let dispatcher = Dispatcher::new(
            input,
            output.clone(),
            scripted_supplier(steps),
            Duration::from_millis(1),
        )
        .expect("dispatcher");
        input.close().expect("close input");
        dispatcher.run()
    }

    fn collect_outcomes(output: &RecordLog) -> Vec<OutcomeRecord> {
        let mut tail = output.tail_from(0).expect("tail");
        let mut out = Vec::new();
        while let Some(frame) = tail.try_next().expect("next") {
            out.push(decode_outcome(frame.kind, &frame.payload).expect("decode"));
        }
        out
    }

    #[test]
    fn one_outcome_per_invocation_in_input_order() {
        let dir = tempdir().expect("tempdir");
        let (input, output) = logs(dir.path());
        let shape = RowShape::new().column("num", ColumnType::Integer);

        append_invocation(
            &input,
            &InvocationRecord::Query {
                text: "SELECT num FROM t".into(),
                args: vec![],
                shape: shape.clone(),
            },
        );
        append_invocation(
            &input,
            &InvocationRecord::Update {
                text: "UPDATE t SET num = 1".into(),
                args: vec![],
            },
        );

        run_dispatcher(
            &input,
            &output,
            vec![
                Ok(Step::Rows(vec![vec![Value::Integer(7)]])),
                Ok(Step::Count(3)),
            ],
        )
        .expect("run");

        let outcomes = collect_outcomes(&output);
        assert_eq!(outcomes.len(), 2);
        match &outcomes[0] {
            OutcomeRecord::QueryResult { text, rows, .. } => {
                assert_eq!(text, "SELECT num FROM t");
                assert_eq!(rows, &vec![vec![Value::Integer(7)]]);
            }
            other => panic!("expected query result, got {other:?}"),
        }
        match &outcomes[1] {
            OutcomeRecord::UpdateResult { count, .. } => assert_eq!(*count, 3),
            other => panic!("expected update result, got {other:?}"),
        }
    }

    #[test]
    fn execution_failure_becomes_a_record_and_does_not_halt_the_loop() {
        let dir = tempdir().expect("tempdir");
        let (input, output) = logs(dir.path());

        for text in ["UPDATE t SET a = 1", "UPDATE t SET b = 2", "UPDATE t SET c = 3"] {
            append_invocation(
                &input,
                &InvocationRecord::Update {
                    text: text.into(),
                    args: vec![],
                },
            );
        }

        run_dispatcher(
            &input,
            &output,
            vec![
                Ok(Step::Count(1)),
                Err(ConnectionError::statement("deadlock")),
                Ok(Step::Count(1)),
            ],
        )
        .expect("run");

        let outcomes = collect_outcomes(&output);
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], OutcomeRecord::UpdateResult { .. }));
        match &outcomes[1] {
            OutcomeRecord::UpdateFailure { text, error, .. } => {
                assert_eq!(text, "UPDATE t SET b = 2");
                assert_eq!(error.kind, FailureKind::Statement);
                assert_eq!(error.message, "deadlock");
            }
            other => panic!("expected update failure, got {other:?}"),
        }
        assert!(matches!(outcomes[2], OutcomeRecord::UpdateResult { .. }));
    }

    #[test]
    fn shape_mismatch_is_recorded_as_a_query_failure() {
        let dir = tempdir().expect("tempdir");
        let (input, output) = logs(dir.path());
        let shape = RowShape::new()
            .column("name", ColumnType::Text)
            .column("num", ColumnType::Integer);

        append_invocation(
            &input,
            &InvocationRecord::Query {
                text: "SELECT name FROM t".into(),
                args: vec![],
                shape,
            },
        );

        run_dispatcher(
            &input,
            &output,
            vec![Ok(Step::Rows(vec![vec![Value::Text("alice".into())]]))],
        )
        .expect("run");

        let outcomes = collect_outcomes(&output);
        match &outcomes[0] {
            OutcomeRecord::QueryFailure { error, .. } => {
                assert_eq!(error.kind, FailureKind::ShapeMismatch);
                assert!(error.message.contains("1 columns"));
            }
            other => panic!("expected query failure, got {other:?}"),
        }
    }

    #[test]
    fn malformed_invocation_is_terminal() {
        let dir = tempdir().expect("tempdir");
        let (input, output) = logs(dir.path());
        input.append(0x7f, b"garbage").expect("append");

        let err = run_dispatcher(&input, &output, vec![]).expect_err("terminal");
        assert_eq!(err.code(), RelayErrorCode::MalformedRecord);
        assert_eq!(output.record_count(), 0);
    }

    #[test]
    fn connect_failure_is_recorded_and_retried_per_record() {
        let dir = tempdir().expect("tempdir");
        let (input, output) = logs(dir.path());
        append_invocation(
            &input,
            &InvocationRecord::Update {
                text: "UPDATE t SET a = 1".into(),
                args: vec![],
            },
        );
        input.close().expect("close");

        let mut attempts = 0u32;
        let dispatcher = Dispatcher::new(
            &input,
            output.clone(),
            Box::new(move || {
                attempts += 1;
                Err(ConnectionError::connect("refused"))
            }),
            Duration::from_millis(1),
        )
        .expect("dispatcher");
        dispatcher.run().expect("run completes");

        let outcomes = collect_outcomes(&output);
        match &outcomes[0] {
            OutcomeRecord::UpdateFailure { error, .. } => {
                assert_eq!(error.kind, FailureKind::Connect);
            }
            other => panic!("expected update failure, got {other:?}"),
        }
    }

    #[test]
    fn dispatcher_resumes_after_recorded_outcomes() {
        let dir = tempdir().expect("tempdir");
        let (input, output) = logs(dir.path());
        for i in 0..3 {
            append_invocation(
                &input,
                &InvocationRecord::Update {
                    text: format!("UPDATE t SET a = {i}"),
                    args: vec![],
                },
            );
        }

        run_dispatcher(&input, &output, (0..3).map(|_| Ok(Step::Count(1))).collect())
            .expect("first run");
        assert_eq!(output.record_count(), 3);

        // A second dispatcher over the same pair starts past the recorded
        // outcomes and finds nothing left to execute.
        let input = RecordLog::open(dir.path().join("input.qlog"), DurabilityMode::Full, 1024 * 1024)
            .expect("reopen input");
        input.close().expect("close");
        let dispatcher = Dispatcher::new(
            &input,
            output.clone(),
            Box::new(|| Err(ConnectionError::connect("must not connect"))),
            Duration::from_millis(1),
        )
        .expect("dispatcher");
        dispatcher.run().expect("run");
        assert_eq!(output.record_count(), 3);
    }
}
