//! Row batches and the [`Sink`] seam.
//!
//! Producers encode each row as a JSON object and ship it together with a
//! [`RowSchema`] describing the destination columns. The sink decides how to
//! bind the values; producers never build SQL for writes.

use std::future::Future;

use modcrawl_shared::{ModCrawlError, Result};
use serde_json::Value as Json;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
    /// Stored as `0`/`1`.
    Boolean,
    /// Ordered list of strings, stored as JSON text.
    TextList,
}

/// One destination column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Column layout of a batch, plus the columns that identify a row.
///
/// Rows with the same key replace each other, which makes replays of the
/// same batch idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSchema {
    pub columns: Vec<Column>,
    pub key: Vec<String>,
}

impl RowSchema {
    pub fn new(columns: Vec<Column>, key: &[&str]) -> Self {
        Self {
            columns,
            key: key.iter().map(|k| (*k).to_string()).collect(),
        }
    }

    /// Check that names are plain identifiers and key columns exist.
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(ModCrawlError::validation("row schema has no columns"));
        }
        for column in &self.columns {
            ensure_identifier(&column.name)?;
        }
        for key in &self.key {
            if !self.columns.iter().any(|c| &c.name == key) {
                return Err(ModCrawlError::validation(format!(
                    "key column '{key}' is not in the schema"
                )));
            }
        }
        Ok(())
    }

    fn is_key(&self, name: &str) -> bool {
        self.key.iter().any(|k| k == name)
    }
}

/// A batch of pre-encoded rows sharing one schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowBatch {
    pub schema: RowSchema,
    /// Each row is a serialized JSON object keyed by column name.
    pub rows: Vec<Vec<u8>>,
}

impl RowBatch {
    pub fn new(schema: RowSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<u8>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A single value returned by [`Sink::query`].
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// Destination for encoded rows.
///
/// `append` must be all-or-nothing per batch and must replace rows whose key
/// already exists. `query` runs read-only SQL and returns rows of scalars.
pub trait Sink {
    fn append(&self, batch: &RowBatch, destination: &str) -> impl Future<Output = Result<()>>;

    fn query(&self, sql: &str) -> impl Future<Output = Result<Vec<Vec<Scalar>>>>;
}

/// Reject anything but `[A-Za-z_][A-Za-z0-9_]*`.
pub fn ensure_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ModCrawlError::validation(format!(
            "'{name}' is not a valid identifier"
        )))
    }
}

/// Decode one row into values ordered like `schema.columns`.
pub(crate) fn bind_row(schema: &RowSchema, row: &[u8]) -> Result<Vec<libsql::Value>> {
    let object: serde_json::Map<String, Json> = serde_json::from_slice(row)
        .map_err(|e| ModCrawlError::validation(format!("row is not a JSON object: {e}")))?;

    schema
        .columns
        .iter()
        .map(|column| {
            let value = object.get(&column.name).unwrap_or(&Json::Null);
            if value.is_null() && schema.is_key(&column.name) {
                return Err(ModCrawlError::validation(format!(
                    "key column '{}' is null",
                    column.name
                )));
            }
            to_sql_value(column, value)
        })
        .collect()
}

fn to_sql_value(column: &Column, value: &Json) -> Result<libsql::Value> {
    use libsql::Value;

    let mismatch = || {
        ModCrawlError::validation(format!(
            "column '{}' expects {:?}, got {value}",
            column.name, column.kind
        ))
    };

    if value.is_null() {
        return Ok(Value::Null);
    }

    match column.kind {
        ColumnKind::Integer => value.as_i64().map(Value::Integer).ok_or_else(mismatch),
        ColumnKind::Real => value.as_f64().map(Value::Real).ok_or_else(mismatch),
        ColumnKind::Text => value
            .as_str()
            .map(|s| Value::Text(s.to_string()))
            .ok_or_else(mismatch),
        ColumnKind::Boolean => value
            .as_bool()
            .map(|b| Value::Integer(i64::from(b)))
            .ok_or_else(mismatch),
        ColumnKind::TextList => {
            let items = value.as_array().ok_or_else(mismatch)?;
            if !items.iter().all(Json::is_string) {
                return Err(mismatch());
            }
            Ok(Value::Text(value.to_string()))
        }
    }
}
