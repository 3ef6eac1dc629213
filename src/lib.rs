pub mod config;
pub mod connection;
mod dispatch;
pub mod error;
pub mod log;
pub mod reader;
pub mod record;
pub mod writer;

use crate::config::RelayConfig;
use crate::connection::{ConnectionError, ConnectionSupplier, DataConnection};
use crate::dispatch::Dispatcher;
use crate::log::store::RecordLog;
use crate::reader::{OutcomeReader, ResultHandler, StartPosition};
use crate::record::codec::{describe_invocation, describe_outcome};
use crate::writer::RequestWriter;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

pub use crate::config::DurabilityMode;
pub use crate::error::{FailureInfo, FailureKind, HandlerError, RelayError, RelayErrorCode};
pub use crate::reader::ReadOutcome;
pub use crate::record::types::{ColumnType, Row, RowShape, Rows, Value};

const INPUT_LOG_FILE: &str = "input.qlog";
const OUTPUT_LOG_FILE: &str = "output.qlog";

/// Owns one input/output log pair, the data-connection supplier, and the
/// single dispatcher bound to them. Writers and readers created here share
/// the pair; closing the service drains the dispatcher and flushes both
/// logs on every exit path.
pub struct RelayService {
    config: RelayConfig,
    dir: PathBuf,
    input: RecordLog,
    output: RecordLog,
    supplier: Mutex<Option<ConnectionSupplier>>,
    dispatcher: Mutex<Option<JoinHandle<Result<(), RelayError>>>>,
}

impl RelayService {
    /// Opens (or reopens) the log pair under `dir`. The supplier is invoked
    /// lazily, on the dispatcher thread, when the first invocation needs a
    /// connection; opening the service touches no database.
    pub fn open<F>(
        config: RelayConfig,
        dir: impl AsRef<Path>,
        supplier: F,
    ) -> Result<Self, RelayError>
    where
        F: FnMut() -> Result<Box<dyn DataConnection>, ConnectionError> + Send + 'static,
    {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let input = RecordLog::open(
            dir.join(INPUT_LOG_FILE),
            config.durability_mode,
            config.max_record_bytes,
        )?;
        let output = RecordLog::open(
            dir.join(OUTPUT_LOG_FILE),
            config.durability_mode,
            config.max_record_bytes,
        )?;

        info!(
            dir = %dir.display(),
            pending = input.record_count().saturating_sub(output.record_count()),
            "relay service opened"
        );
        Ok(Self {
            config,
            dir,
            input,
            output,
            supplier: Mutex::new(Some(Box::new(supplier))),
            dispatcher: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns a writer bound to the input log. Writers are cheap clones
    /// and safe to use from multiple threads.
    pub fn create_writer(&self) -> RequestWriter {
        RequestWriter::new(self.input.clone())
    }

    /// Returns a reader bound to the output log and the supplied handler,
    /// starting at the current end of the log, and ensures the dispatcher
    /// is running.
    pub fn create_reader<H: ResultHandler>(
        &self,
        handler: H,
    ) -> Result<OutcomeReader<H>, RelayError> {
        self.create_reader_from(handler, StartPosition::End)
    }

    /// Like [`RelayService::create_reader`], with an explicit start
    /// position for replay-from-checkpoint use.
    pub fn create_reader_from<H: ResultHandler>(
        &self,
        handler: H,
        start: StartPosition,
    ) -> Result<OutcomeReader<H>, RelayError> {
        self.ensure_dispatcher()?;
        OutcomeReader::new(&self.output, handler, start)
    }

    /// Starts the dispatcher thread if it is not already running. The
    /// facade enforces the single-active-consumer rule: one dispatcher per
    /// log pair, ever.
    fn ensure_dispatcher(&self) -> Result<(), RelayError> {
        let mut guard = self.dispatcher.lock();
        if guard.is_some() {
            return Ok(());
        }
        if self.output.is_closed() {
            return Err(RelayError::LogClosed);
        }
        let supplier = self.supplier.lock().take().ok_or_else(|| {
            RelayError::Dispatcher("connection supplier already consumed".into())
        })?;
        let dispatcher = Dispatcher::new(
            &self.input,
            self.output.clone(),
            supplier,
            Duration::from_millis(self.config.poll_interval_ms),
        )?;
        let handle = std::thread::Builder::new()
            .name("sqlrelay-dispatcher".into())
            .spawn(move || dispatcher.run())?;
        *guard = Some(handle);
        Ok(())
    }

    /// Human-readable rendering of the input log, for diagnostics.
    pub fn dump_input(&self) -> Result<String, RelayError> {
        self.input.dump(&describe_invocation)
    }

    /// Human-readable rendering of the output log, for diagnostics.
    pub fn dump_output(&self) -> Result<String, RelayError> {
        self.output.dump(&describe_outcome)
    }

    /// Graceful shutdown: stop accepting writes, let the dispatcher drain
    /// the remaining input records, then flush and close both logs. A
    /// terminal dispatcher condition (malformed input record, output append
    /// failure) surfaces here. Idempotent.
    pub fn close(&self) -> Result<(), RelayError> {
        self.input.close()?;
        let handle = self.dispatcher.lock().take();
        let drained = match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| RelayError::Dispatcher("dispatcher thread panicked".into()))?,
            None => Ok(()),
        };
        self.output.close()?;
        info!(dir = %self.dir.display(), "relay service closed");
        drained.map_err(|e| RelayError::Dispatcher(e.to_string()))
    }
}

impl Drop for RelayService {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "relay service close failed during drop");
        }
    }
}

#[cfg(test)]
mod lib_tests;
