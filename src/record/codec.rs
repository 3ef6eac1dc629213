use crate::error::{FailureInfo, RelayError};
use crate::record::types::{RowShape, Value};
use serde::{Deserialize, Serialize};

// Frame-level kind tags. Invocation and outcome tags live in disjoint
// ranges so a record appended to the wrong log is caught at decode time.
pub const KIND_QUERY: u8 = 0x01;
pub const KIND_UPDATE: u8 = 0x02;
pub const KIND_QUERY_RESULT: u8 = 0x11;
pub const KIND_QUERY_FAILURE: u8 = 0x12;
pub const KIND_UPDATE_RESULT: u8 = 0x13;
pub const KIND_UPDATE_FAILURE: u8 = 0x14;

/// One captured query/update request, appended to the input log by the
/// writer and replayed by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationRecord {
    Query {
        text: String,
        args: Vec<Value>,
        shape: RowShape,
    },
    Update {
        text: String,
        args: Vec<Value>,
    },
}

impl InvocationRecord {
    pub fn kind(&self) -> u8 {
        match self {
            InvocationRecord::Query { .. } => KIND_QUERY,
            InvocationRecord::Update { .. } => KIND_UPDATE,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            InvocationRecord::Query { text, .. } | InvocationRecord::Update { text, .. } => text,
        }
    }

    pub fn args(&self) -> &[Value] {
        match self {
            InvocationRecord::Query { args, .. } | InvocationRecord::Update { args, .. } => args,
        }
    }
}

/// One recorded execution outcome. `text` and `args` echo the originating
/// invocation byte-for-byte, which is what correlates the two logs without
/// an id scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeRecord {
    QueryResult {
        text: String,
        args: Vec<Value>,
        shape: RowShape,
        rows: Vec<Vec<Value>>,
    },
    QueryFailure {
        text: String,
        args: Vec<Value>,
        error: FailureInfo,
    },
    UpdateResult {
        text: String,
        args: Vec<Value>,
        count: u64,
    },
    UpdateFailure {
        text: String,
        args: Vec<Value>,
        error: FailureInfo,
    },
}

impl OutcomeRecord {
    pub fn kind(&self) -> u8 {
        match self {
            OutcomeRecord::QueryResult { .. } => KIND_QUERY_RESULT,
            OutcomeRecord::QueryFailure { .. } => KIND_QUERY_FAILURE,
            OutcomeRecord::UpdateResult { .. } => KIND_UPDATE_RESULT,
            OutcomeRecord::UpdateFailure { .. } => KIND_UPDATE_FAILURE,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            OutcomeRecord::QueryResult { text, .. }
            | OutcomeRecord::QueryFailure { text, .. }
            | OutcomeRecord::UpdateResult { text, .. }
            | OutcomeRecord::UpdateFailure { text, .. } => text,
        }
    }

    pub fn args(&self) -> &[Value] {
        match self {
            OutcomeRecord::QueryResult { args, .. }
            | OutcomeRecord::QueryFailure { args, .. }
            | OutcomeRecord::UpdateResult { args, .. }
            | OutcomeRecord::UpdateFailure { args, .. } => args,
        }
    }
}

// Wire bodies are dedicated structs rather than the public enums: the kind
// tag lives on the frame, so the payload layout must not depend on serde's
// enum representation.
#[derive(Serialize, Deserialize)]
struct QueryBody {
    text: String,
    args: Vec<Value>,
    shape: RowShape,
}

#[derive(Serialize, Deserialize)]
struct UpdateBody {
    text: String,
    args: Vec<Value>,
}

#[derive(Serialize, Deserialize)]
struct QueryResultBody {
    text: String,
    args: Vec<Value>,
    shape: RowShape,
    rows: Vec<Vec<Value>>,
}

#[derive(Serialize, Deserialize)]
struct UpdateResultBody {
    text: String,
    args: Vec<Value>,
    count: u64,
}

#[derive(Serialize, Deserialize)]
struct FailureBody {
    text: String,
    args: Vec<Value>,
    error: FailureInfo,
}

fn encode_body<T: Serialize>(body: &T) -> Result<Vec<u8>, RelayError> {
    rmp_serde::to_vec(body).map_err(|e| RelayError::Encode(e.to_string()))
}

fn decode_body<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, RelayError> {
    rmp_serde::from_slice(payload).map_err(|e| RelayError::MalformedRecord(e.to_string()))
}

pub fn encode_invocation(record: &InvocationRecord) -> Result<(u8, Vec<u8>), RelayError> {
    let payload = match record {
        InvocationRecord::Query { text, args, shape } => encode_body(&QueryBody {
            text: text.clone(),
            args: args.clone(),
            shape: shape.clone(),
        })?,
        InvocationRecord::Update { text, args } => encode_body(&UpdateBody {
            text: text.clone(),
            args: args.clone(),
        })?,
    };
    Ok((record.kind(), payload))
}

pub fn decode_invocation(kind: u8, payload: &[u8]) -> Result<InvocationRecord, RelayError> {
    match kind {
        KIND_QUERY => {
            let body: QueryBody = decode_body(payload)?;
            Ok(InvocationRecord::Query {
                text: body.text,
                args: body.args,
                shape: body.shape,
            })
        }
        KIND_UPDATE => {
            let body: UpdateBody = decode_body(payload)?;
            Ok(InvocationRecord::Update {
                text: body.text,
                args: body.args,
            })
        }
        other => Err(RelayError::MalformedRecord(format!(
            "unknown invocation kind tag 0x{other:02x}"
        ))),
    }
}

pub fn encode_outcome(record: &OutcomeRecord) -> Result<(u8, Vec<u8>), RelayError> {
    let payload = match record {
        OutcomeRecord::QueryResult {
            text,
            args,
            shape,
            rows,
        } => encode_body(&QueryResultBody {
            text: text.clone(),
            args: args.clone(),
            shape: shape.clone(),
            rows: rows.clone(),
        })?,
        OutcomeRecord::QueryFailure { text, args, error }
        | OutcomeRecord::UpdateFailure { text, args, error } => encode_body(&FailureBody {
            text: text.clone(),
            args: args.clone(),
            error: error.clone(),
        })?,
        OutcomeRecord::UpdateResult { text, args, count } => encode_body(&UpdateResultBody {
            text: text.clone(),
            args: args.clone(),
            count: *count,
        })?,
    };
    Ok((record.kind(), payload))
}

pub fn decode_outcome(kind: u8, payload: &[u8]) -> Result<OutcomeRecord, RelayError> {
    match kind {
        KIND_QUERY_RESULT => {
            let body: QueryResultBody = decode_body(payload)?;
            Ok(OutcomeRecord::QueryResult {
                text: body.text,
                args: body.args,
                shape: body.shape,
                rows: body.rows,
            })
        }
        KIND_QUERY_FAILURE => {
            let body: FailureBody = decode_body(payload)?;
            Ok(OutcomeRecord::QueryFailure {
                text: body.text,
                args: body.args,
                error: body.error,
            })
        }
        KIND_UPDATE_RESULT => {
            let body: UpdateResultBody = decode_body(payload)?;
            Ok(OutcomeRecord::UpdateResult {
                text: body.text,
                args: body.args,
                count: body.count,
            })
        }
        KIND_UPDATE_FAILURE => {
            let body: FailureBody = decode_body(payload)?;
            Ok(OutcomeRecord::UpdateFailure {
                text: body.text,
                args: body.args,
                error: body.error,
            })
        }
        other => Err(RelayError::MalformedRecord(format!(
            "unknown outcome kind tag 0x{other:02x}"
        ))),
    }
}

fn render_args(args: &[Value]) -> String {
    let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    format!("[{}]", rendered.join(", "))
}

/// Human-readable rendering of one input-log record, for log dumps.
pub fn describe_invocation(kind: u8, payload: &[u8]) -> String {
    match decode_invocation(kind, payload) {
        Ok(InvocationRecord::Query { text, args, shape }) => {
            format!("query {text:?} args={} shape={shape}", render_args(&args))
        }
        Ok(InvocationRecord::Update { text, args }) => {
            format!("update {text:?} args={}", render_args(&args))
        }
        Err(e) => format!("<{e}>"),
    }
}

/// Human-readable rendering of one output-log record, for log dumps.
pub fn describe_outcome(kind: u8, payload: &[u8]) -> String {
    match decode_outcome(kind, payload) {
        Ok(OutcomeRecord::QueryResult {
            text, args, rows, ..
        }) => format!(
            "query-result {text:?} args={} rows={}",
            render_args(&args),
            rows.len()
        ),
        Ok(OutcomeRecord::QueryFailure { text, args, error }) => {
            format!("query-failure {text:?} args={} error={error}", render_args(&args))
        }
        Ok(OutcomeRecord::UpdateResult { text, args, count }) => {
            format!("update-result {text:?} args={} count={count}", render_args(&args))
        }
        Ok(OutcomeRecord::UpdateFailure { text, args, error }) => {
            format!("update-failure {text:?} args={} error={error}", render_args(&args))
        }
        Err(e) => format!("<{e}>"),
    }
}
