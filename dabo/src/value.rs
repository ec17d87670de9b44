//! # Value Module
//!
//! Dynamic column values. Record sets in Dabo are untyped at compile time
//! (columns come from whatever SELECT the SQL builder produced), so every
//! cell is a [`Value`]. Decoding from the sqlx `Any` driver goes by the
//! column's reported type name with a fallback chain for drivers that
//! report something unexpected.

// ============================================================================
// External Crate Imports
// ============================================================================

use chrono::{NaiveDate, NaiveDateTime};
use sqlx::any::AnyRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

// ============================================================================
// Internal Crate Imports
// ============================================================================

use crate::error::{DatabaseError, Error};

// ============================================================================
// Value Enum
// ============================================================================

/// A single column value in a record set.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// True when the value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the integer content, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the text content, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Date(d) => write!(f, "{d}"),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

// ============================================================================
// Decoding From AnyRow
// ============================================================================

/// Decodes one column of an `AnyRow` into a [`Value`].
///
/// The `Any` driver reports normalized type names (`BOOLEAN`, `SMALLINT`,
/// `INTEGER`, `BIGINT`, `REAL`, `DOUBLE`, `TEXT`, `BLOB`). Anything else
/// falls through a try-chain so a dialect quirk degrades to text instead
/// of failing the whole requery.
pub(crate) fn decode_column(row: &AnyRow, index: usize) -> Result<Value, Error> {
    let raw = row
        .try_get_raw(index)
        .map_err(|e| DatabaseError::Other(e.to_string()))?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();

    let decoded = match type_name.as_str() {
        "BOOLEAN" | "BOOL" => row.try_get::<bool, _>(index).map(Value::Bool),
        "SMALLINT" | "INTEGER" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(index).map(Value::Int)
        }
        "REAL" | "DOUBLE" | "FLOAT" | "NUMERIC" | "DECIMAL" => {
            row.try_get::<f64, _>(index).map(Value::Float)
        }
        "BLOB" | "VARBINARY" | "BINARY" => row.try_get::<Vec<u8>, _>(index).map(Value::Bytes),
        _ => row.try_get::<String, _>(index).map(Value::Text),
    };

    match decoded {
        Ok(v) => Ok(v),
        // Driver disagreed with its own type report; walk the chain.
        Err(_) => fallback_decode(row, index),
    }
}

fn fallback_decode(row: &AnyRow, index: usize) -> Result<Value, Error> {
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Ok(Value::Int(v));
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return Ok(Value::Float(v));
    }
    if let Ok(v) = row.try_get::<bool, _>(index) {
        return Ok(Value::Bool(v));
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Ok(Value::Text(v));
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(index) {
        return Ok(Value::Bytes(v));
    }
    let name = row.columns().get(index).map(|c| c.name().to_string());
    Err(DatabaseError::Other(format!(
        "cannot decode column {}",
        name.unwrap_or_else(|| index.to_string())
    ))
    .into())
}

/// Decodes a whole `AnyRow` into its column names and values.
pub(crate) fn decode_row(row: &AnyRow) -> Result<(Vec<String>, Vec<Value>), Error> {
    let mut names = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    for (i, col) in row.columns().iter().enumerate() {
        names.push(col.name().to_string());
        values.push(decode_column(row, i)?);
    }
    Ok((names, values))
}

// ============================================================================
// Text Encoding
// ============================================================================

/// Text encoding applied when a backend hands back raw bytes for a
/// character field. UTF-8 is the default; Latin-1 covers legacy
/// databases.
///
/// This is a read-path concern only. Statements go to the driver as
/// UTF-8 strings; transcoding on the way in belongs to the connection's
/// charset, not to the literal formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Latin1 => "latin-1",
        }
    }

    /// Decodes raw bytes, surfacing an encoding error for the given field
    /// rather than substituting replacement characters.
    pub fn decode(&self, bytes: &[u8], field: &str) -> Result<String, Error> {
        match self {
            Encoding::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|_| {
                Error::Database(DatabaseError::Encoding {
                    field: field.to_string(),
                    encoding: self.name().to_string(),
                })
            }),
            // Latin-1 maps every byte to the code point of the same value.
            Encoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_conversion_maps_none_to_null() {
        let v: Value = Option::<i64>::None.into();
        assert!(v.is_null());
        let v: Value = Some(7i64).into();
        assert_eq!(v, Value::Int(7));
    }

    #[test]
    fn latin1_decodes_any_byte_sequence() {
        let enc = Encoding::Latin1;
        assert_eq!(enc.decode(&[0x41, 0xE9], "name").unwrap(), "Aé");
    }

    #[test]
    fn utf8_surfaces_encoding_error() {
        let enc = Encoding::Utf8;
        let err = enc.decode(&[0xFF, 0xFE], "name").unwrap_err();
        assert!(matches!(
            err,
            Error::Database(DatabaseError::Encoding { .. })
        ));
    }
}
