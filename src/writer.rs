use crate::error::RelayError;
use crate::log::store::RecordLog;
use crate::record::codec::{InvocationRecord, encode_invocation};
use crate::record::types::{RowShape, Value};
use tracing::debug;

/// Application-facing producer. Captures query/update invocations as
/// durable input-log records; never blocks on execution, and never retries
/// a rejected append.
#[derive(Clone)]
pub struct RequestWriter {
    input: RecordLog,
}

impl RequestWriter {
    pub(crate) fn new(input: RecordLog) -> Self {
        Self { input }
    }

    /// Records a query invocation and returns its input-log offset once the
    /// append is acknowledged.
    pub fn execute_query(
        &self,
        text: impl Into<String>,
        shape: RowShape,
        args: Vec<Value>,
    ) -> Result<u64, RelayError> {
        self.append(InvocationRecord::Query {
            text: text.into(),
            args,
            shape,
        })
    }

    /// Records an update invocation and returns its input-log offset once
    /// the append is acknowledged.
    pub fn execute_update(
        &self,
        text: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<u64, RelayError> {
        self.append(InvocationRecord::Update {
            text: text.into(),
            args,
        })
    }

    fn append(&self, record: InvocationRecord) -> Result<u64, RelayError> {
        let (kind, payload) = encode_invocation(&record)?;
        let offset = self.input.append(kind, &payload)?;
        debug!(offset, text = record.text(), "invocation recorded");
        Ok(offset)
    }
}
