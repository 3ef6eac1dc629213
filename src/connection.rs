use crate::error::{FailureInfo, FailureKind, RelayError};
use crate::record::types::Value;
use rusqlite::types::{ToSqlOutput, ValueRef};
use std::path::Path;
use thiserror::Error;

/// Failure raised by a backing data operation. The dispatcher converts
/// these into failure outcome records instead of propagating them.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct ConnectionError {
    pub kind: FailureKind,
    pub message: String,
}

impl ConnectionError {
    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Connect,
            message: message.into(),
        }
    }

    pub fn statement(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Statement,
            message: message.into(),
        }
    }

    pub fn shape_mismatch(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::ShapeMismatch,
            message: message.into(),
        }
    }

    pub fn into_failure(self) -> FailureInfo {
        FailureInfo::new(self.kind, self.message)
    }
}

impl From<ConnectionError> for RelayError {
    fn from(value: ConnectionError) -> Self {
        RelayError::Execution(value.into_failure())
    }
}

/// The two primitives the dispatcher needs from a backing store. The
/// connection is exclusively owned by the dispatcher; implementations do
/// not need to be thread-safe, only transferable to the dispatcher thread.
pub trait DataConnection: Send {
    fn run_query(&mut self, text: &str, args: &[Value]) -> Result<Vec<Vec<Value>>, ConnectionError>;
    fn run_update(&mut self, text: &str, args: &[Value]) -> Result<u64, ConnectionError>;
}

/// Zero-argument factory for a live connection, invoked lazily by the
/// dispatcher on first use.
pub type ConnectionSupplier =
    Box<dyn FnMut() -> Result<Box<dyn DataConnection>, ConnectionError> + Send>;

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Boolean(b) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*b))),
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
        })
    }
}

fn value_from_sqlite(column: usize, value: ValueRef<'_>) -> Result<Value, ConnectionError> {
    match value {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(i) => Ok(Value::Integer(i)),
        ValueRef::Real(f) => Ok(Value::Float(f)),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|s| Value::Text(s.into()))
            .map_err(|e| ConnectionError::statement(format!("column {column}: {e}"))),
        ValueRef::Blob(_) => Err(ConnectionError::statement(format!(
            "column {column}: blob values are outside the supported scalar set"
        ))),
    }
}

/// SQLite-backed [`DataConnection`].
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConnectionError> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| ConnectionError::connect(e.to_string()))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, ConnectionError> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| ConnectionError::connect(e.to_string()))?;
        Ok(Self { conn })
    }
}

impl DataConnection for SqliteConnection {
    fn run_query(&mut self, text: &str, args: &[Value]) -> Result<Vec<Vec<Value>>, ConnectionError> {
        let mut stmt = self
            .conn
            .prepare(text)
            .map_err(|e| ConnectionError::statement(e.to_string()))?;
        let column_count = stmt.column_count();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(args.iter()))
            .map_err(|e| ConnectionError::statement(e.to_string()))?;

        let mut out = Vec::new();
        loop {
            let row = match rows.next() {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => return Err(ConnectionError::statement(e.to_string())),
            };
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value = row
                    .get_ref(i)
                    .map_err(|e| ConnectionError::statement(e.to_string()))?;
                values.push(value_from_sqlite(i, value)?);
            }
            out.push(values);
        }
        Ok(out)
    }

    fn run_update(&mut self, text: &str, args: &[Value]) -> Result<u64, ConnectionError> {
        let count = self
            .conn
            .execute(text, rusqlite::params_from_iter(args.iter()))
            .map_err(|e| ConnectionError::statement(e.to_string()))?;
        Ok(count as u64)
    }
}
