use crate::error::{FailureInfo, HandlerError, RelayError};
use crate::log::store::{LogTailer, RecordLog, TailPoll};
use crate::record::codec::{OutcomeRecord, decode_outcome};
use crate::record::types::{Rows, Value};
use std::time::Duration;
use tracing::debug;

/// Where a reader's cursor starts on the output log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Replay every recorded outcome from the beginning.
    Start,
    /// Only outcomes recorded after the reader is created (the default).
    End,
    /// Resume from a caller-tracked checkpoint offset.
    Offset(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// One outcome record was consumed and dispatched to the handler.
    Dispatched,
    /// Nothing arrived within the timeout.
    TimedOut,
    /// The output log is closed and every recorded outcome was consumed.
    LogClosed,
}

/// Caller-supplied capability set invoked once per outcome record during
/// replay. Errors returned here are treated as caller bugs and propagate
/// out of the reader, unlike execution failures which arrive as data.
pub trait ResultHandler {
    fn on_query_result(
        &mut self,
        rows: Rows<'_>,
        text: &str,
        args: &[Value],
    ) -> Result<(), HandlerError>;

    fn on_query_failure(
        &mut self,
        error: &FailureInfo,
        text: &str,
        args: &[Value],
    ) -> Result<(), HandlerError>;

    fn on_update_result(
        &mut self,
        count: u64,
        text: &str,
        args: &[Value],
    ) -> Result<(), HandlerError>;

    fn on_update_failure(
        &mut self,
        error: &FailureInfo,
        text: &str,
        args: &[Value],
    ) -> Result<(), HandlerError>;
}

/// Tails the output log and replays each recorded outcome against the
/// attached handler, in log order. Multiple readers over one output log
/// are independent; each owns its cursor.
pub struct OutcomeReader<H: ResultHandler> {
    tail: LogTailer,
    handler: H,
}

impl<H: ResultHandler> std::fmt::Debug for OutcomeReader<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeReader")
            .field("position", &self.tail.next_offset())
            .finish_non_exhaustive()
    }
}

impl<H: ResultHandler> OutcomeReader<H> {
    pub(crate) fn new(
        output: &RecordLog,
        handler: H,
        start: StartPosition,
    ) -> Result<Self, RelayError> {
        let offset = match start {
            StartPosition::Start => 0,
            StartPosition::End => output.record_count(),
            StartPosition::Offset(n) => n,
        };
        Ok(Self {
            tail: output.tail_from(offset)?,
            handler,
        })
    }

    /// Offset of the next outcome this reader will consume; feed it back
    /// in as [`StartPosition::Offset`] to resume after a restart.
    pub fn position(&self) -> u64 {
        self.tail.next_offset()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Consumes and dispatches exactly one pending outcome record,
    /// blocking until one arrives. With a timeout, reports
    /// [`ReadOutcome::TimedOut`] instead of blocking forever.
    pub fn read_one(&mut self, timeout: Option<Duration>) -> Result<ReadOutcome, RelayError> {
        let frame = match timeout {
            Some(timeout) => match self.tail.poll_next(timeout)? {
                TailPoll::Record(frame) => frame,
                TailPoll::TimedOut => return Ok(ReadOutcome::TimedOut),
                TailPoll::Closed => return Ok(ReadOutcome::LogClosed),
            },
            None => match self.tail.next_blocking()? {
                Some(frame) => frame,
                None => return Ok(ReadOutcome::LogClosed),
            },
        };
        self.dispatch(frame.offset, frame.kind, &frame.payload)?;
        Ok(ReadOutcome::Dispatched)
    }

    /// Dispatches every currently available outcome without blocking and
    /// returns how many were consumed.
    pub fn drain(&mut self) -> Result<usize, RelayError> {
        let mut consumed = 0;
        while let Some(frame) = self.tail.try_next()? {
            self.dispatch(frame.offset, frame.kind, &frame.payload)?;
            consumed += 1;
        }
        Ok(consumed)
    }

    fn dispatch(&mut self, offset: u64, kind: u8, payload: &[u8]) -> Result<(), RelayError> {
        let outcome = decode_outcome(kind, payload)?;
        debug!(offset, kind, "replaying outcome");
        match outcome {
            OutcomeRecord::QueryResult {
                text,
                args,
                shape,
                rows,
            } => self
                .handler
                .on_query_result(Rows::new(&shape, &rows), &text, &args)?,
            OutcomeRecord::QueryFailure { text, args, error } => {
                self.handler.on_query_failure(&error, &text, &args)?
            }
            OutcomeRecord::UpdateResult { text, args, count } => {
                self.handler.on_update_result(count, &text, &args)?
            }
            OutcomeRecord::UpdateFailure { text, args, error } => {
                self.handler.on_update_failure(&error, &text, &args)?
            }
        }
        Ok(())
    }
}
