use chrono::{DateTime, Utc};
use coral_model::LibraryID;
use uuid::Uuid;

use super::schema::ColumnType;
use crate::error::{CoralError, Result};

/// A single typed, nullable column value.
///
/// Keeping the type on `NULL` lets adapters bind correctly typed parameters,
/// and lets composite keys that contain `NULL` compare equal to each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Uuid(Option<Uuid>),
    Text(Option<String>),
    Int(Option<i64>),
    Timestamp(Option<DateTime<Utc>>),
}

impl Value {
    /// True for SQL `NULL` of any type.
    pub fn is_null(&self) -> bool {
        match self {
            Value::Uuid(v) => v.is_none(),
            Value::Text(v) => v.is_none(),
            Value::Int(v) => v.is_none(),
            Value::Timestamp(v) => v.is_none(),
        }
    }

    /// Column type this value binds to.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Uuid(_) => ColumnType::Uuid,
            Value::Text(_) => ColumnType::Text,
            Value::Int(_) => ColumnType::Int,
            Value::Timestamp(_) => ColumnType::Timestamp,
        }
    }

    /// The uuid, if this is a non-null uuid.
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(v) => *v,
            _ => None,
        }
    }

    /// The text, if this is non-null text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => v.as_deref(),
            _ => None,
        }
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Uuid(Some(value))
    }
}

impl From<Option<Uuid>> for Value {
    fn from(value: Option<Uuid>) -> Self {
        Value::Uuid(value)
    }
}

impl From<LibraryID> for Value {
    fn from(value: LibraryID) -> Self {
        Value::Uuid(Some(value.to_uuid()))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(Some(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(Some(value.to_string()))
    }
}

impl From<Option<String>> for Value {
    fn from(value: Option<String>) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(Some(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(Some(i64::from(value)))
    }
}

impl From<Option<i32>> for Value {
    fn from(value: Option<i32>) -> Self {
        Value::Int(value.map(i64::from))
    }
}

impl From<Option<i64>> for Value {
    fn from(value: Option<i64>) -> Self {
        Value::Int(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(Some(value))
    }
}

impl From<Option<DateTime<Utc>>> for Value {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        Value::Timestamp(value)
    }
}

/// Column values of one entity, in [`TableSchema`](super::TableSchema) column
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row(Vec<Value>);

impl Row {
    /// Row from values in column order.
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// All values in column order.
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Value of column `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Overwrite column `index`. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = value;
        }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for a row without columns.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sequential typed reader used by `from_row` implementations.
    pub fn reader(&self) -> RowReader<'_> {
        RowReader { row: self, next: 0 }
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Reads a [`Row`] column by column, failing on a type mismatch.
#[derive(Debug)]
pub struct RowReader<'a> {
    row: &'a Row,
    next: usize,
}

impl<'a> RowReader<'a> {
    fn take(&mut self) -> Result<&'a Value> {
        let index = self.next;
        self.next += 1;
        let row: &'a Row = self.row;
        row.get(index)
            .ok_or_else(|| CoralError::Decode(format!("row has no column {index}")))
    }

    fn mismatch(&self, expected: &str) -> CoralError {
        CoralError::Decode(format!(
            "expected {expected} in column {}",
            self.next.saturating_sub(1)
        ))
    }

    /// Next column as a nullable uuid.
    pub fn opt_uuid(&mut self) -> Result<Option<Uuid>> {
        match self.take()? {
            Value::Uuid(v) => Ok(*v),
            _ => Err(self.mismatch("uuid")),
        }
    }

    /// Next column as a non-null uuid.
    pub fn uuid(&mut self) -> Result<Uuid> {
        self.opt_uuid()?.ok_or_else(|| self.mismatch("non-null uuid"))
    }

    /// Next column as nullable text.
    pub fn opt_text(&mut self) -> Result<Option<String>> {
        match self.take()? {
            Value::Text(v) => Ok(v.clone()),
            _ => Err(self.mismatch("text")),
        }
    }

    /// Next column as non-null text.
    pub fn text(&mut self) -> Result<String> {
        self.opt_text()?.ok_or_else(|| self.mismatch("non-null text"))
    }

    /// Next column as a nullable integer.
    pub fn opt_int(&mut self) -> Result<Option<i64>> {
        match self.take()? {
            Value::Int(v) => Ok(*v),
            _ => Err(self.mismatch("integer")),
        }
    }

    /// Next column as a non-null integer.
    pub fn int(&mut self) -> Result<i64> {
        self.opt_int()?.ok_or_else(|| self.mismatch("non-null integer"))
    }

    /// Next column as a nullable integer that fits `i32`.
    pub fn opt_i32(&mut self) -> Result<Option<i32>> {
        self.opt_int()?
            .map(|v| i32::try_from(v).map_err(|_| self.mismatch("32-bit integer")))
            .transpose()
    }

    /// Next column as a non-null integer that fits `i32`.
    pub fn i32(&mut self) -> Result<i32> {
        self.opt_i32()?.ok_or_else(|| self.mismatch("non-null integer"))
    }

    /// Next column as a nullable timestamp.
    pub fn opt_timestamp(&mut self) -> Result<Option<DateTime<Utc>>> {
        match self.take()? {
            Value::Timestamp(v) => Ok(*v),
            _ => Err(self.mismatch("timestamp")),
        }
    }

    /// Next column as a non-null timestamp.
    pub fn timestamp(&mut self) -> Result<DateTime<Utc>> {
        self.opt_timestamp()?
            .ok_or_else(|| self.mismatch("non-null timestamp"))
    }
}
