use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
        }
    }
}

/// Scalar argument and column value. The set is closed: the wire format
/// refuses anything outside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Text(CompactString),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Null,
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::Null => "null",
        }
    }

    /// Null is accepted for any column type.
    pub fn matches_type(&self, col_type: ColumnType) -> bool {
        matches!(
            (self, col_type),
            (Value::Null, _)
                | (Value::Text(_), ColumnType::Text)
                | (Value::Integer(_), ColumnType::Integer)
                | (Value::Float(_), ColumnType::Float)
                | (Value::Boolean(_), ColumnType::Boolean)
        )
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) => 2,
            Value::Float(_) => 3,
            Value::Text(_) => 4,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank_cmp = self.kind_rank().cmp(&other.kind_rank());
        if rank_cmp != Ordering::Equal {
            return rank_cmp;
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: CompactString,
    pub col_type: ColumnType,
}

/// Caller-declared result shape for a query. Column order corresponds
/// positionally to the selected columns; the shape travels inside both the
/// invocation record and the query-result outcome record, so a decoder
/// needs no prior schema knowledge.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowShape {
    columns: Vec<ColumnSpec>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("row has {actual} columns, shape declares {expected}")]
    Arity { expected: usize, actual: usize },
    #[error("column '{column}' expects {expected}, got {actual}")]
    Kind {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },
}

impl RowShape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: impl Into<CompactString>, col_type: ColumnType) -> Self {
        self.columns.push(ColumnSpec {
            name: name.into(),
            col_type,
        });
        self
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn check_row(&self, values: &[Value]) -> Result<(), ShapeError> {
        if values.len() != self.columns.len() {
            return Err(ShapeError::Arity {
                expected: self.columns.len(),
                actual: values.len(),
            });
        }
        for (spec, value) in self.columns.iter().zip(values) {
            if !value.matches_type(spec.col_type) {
                return Err(ShapeError::Kind {
                    column: spec.name.to_string(),
                    expected: spec.col_type.as_str(),
                    actual: value.kind_name(),
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for RowShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, spec) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", spec.name, spec.col_type.as_str())?;
        }
        write!(f, ")")
    }
}

/// One decoded result row, viewed through its declared shape.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    shape: &'a RowShape,
    values: &'a [Value],
}

impl<'a> Row<'a> {
    pub(crate) fn new(shape: &'a RowShape, values: &'a [Value]) -> Self {
        Self { shape, values }
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    pub fn shape(&self) -> &'a RowShape {
        self.shape
    }

    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.shape.index_of(column).and_then(|i| self.values.get(i))
    }
}

/// Lazy sequence of shaped rows carried by a query-result outcome.
pub struct Rows<'a> {
    shape: &'a RowShape,
    rows: std::slice::Iter<'a, Vec<Value>>,
}

impl<'a> Rows<'a> {
    pub(crate) fn new(shape: &'a RowShape, rows: &'a [Vec<Value>]) -> Self {
        Self {
            shape,
            rows: rows.iter(),
        }
    }

    pub fn shape(&self) -> &'a RowShape {
        self.shape
    }
}

impl<'a> Iterator for Rows<'a> {
    type Item = Row<'a>;

    fn next(&mut self) -> Option<Row<'a>> {
        self.rows.next().map(|values| Row::new(self.shape, values))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl ExactSizeIterator for Rows<'_> {}
