//! # Record Set Module
//!
//! Rows and the ordered, pointer-carrying set a bizobj navigates. A row
//! is an ordered tuple of values plus a shared column map, addressable by
//! position and by name. Mutating a value here does not mark anything
//! dirty; dirtiness lives in the bizobj's change log.

// ============================================================================
// External Crate Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Internal Crate Imports
// ============================================================================

use crate::error::Error;
use crate::value::Value;

// ============================================================================
// Row Identity
// ============================================================================

/// Stable in-memory identity of a row, independent of its position and of
/// its (possibly not yet assigned) primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(pub(crate) u64);

// ============================================================================
// Column Map
// ============================================================================

/// Column name → position mapping, shared by every row in a set.
#[derive(Debug, Default)]
pub struct ColumnMap {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl ColumnMap {
    pub fn new(names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Self { names, index }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }
}

// ============================================================================
// Row
// ============================================================================

#[derive(Debug, Clone)]
pub struct Row {
    id: RowId,
    columns: Arc<ColumnMap>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(id: RowId, columns: Arc<ColumnMap>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { id, columns, values }
    }

    pub fn id(&self) -> RowId {
        self.id
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    /// Positional read.
    pub fn value_at(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// By-name read.
    pub fn value(&self, field: &str) -> Result<&Value, Error> {
        let i = self
            .columns
            .position(field)
            .ok_or_else(|| Error::FieldNotFound(field.to_string()))?;
        Ok(&self.values[i])
    }

    /// By-name write. Does not touch any change log.
    pub fn set_value(&mut self, field: &str, value: Value) -> Result<(), Error> {
        let i = self
            .columns
            .position(field)
            .ok_or_else(|| Error::FieldNotFound(field.to_string()))?;
        self.values[i] = value;
        Ok(())
    }

    /// Snapshot of every field, for change-log capture.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.columns
            .names()
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

// ============================================================================
// RecordSet
// ============================================================================

/// Ordered rows with a current-row pointer.
///
/// Invariant: the pointer is `None` iff the set is empty, otherwise it
/// indexes a valid row. Rows iterate in load order.
#[derive(Debug, Default)]
pub struct RecordSet {
    columns: Arc<ColumnMap>,
    rows: Vec<Row>,
    cursor: Option<usize>,
}

impl RecordSet {
    pub fn new(columns: Arc<ColumnMap>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            cursor: None,
        }
    }

    pub fn columns(&self) -> &Arc<ColumnMap> {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Zero-based pointer, `-1` on an empty set.
    pub fn row_number(&self) -> i64 {
        self.cursor.map(|i| i as i64).unwrap_or(-1)
    }

    pub fn row_at(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn row_at_mut(&mut self, index: usize) -> Option<&mut Row> {
        self.rows.get_mut(index)
    }

    pub fn current(&self) -> Result<&Row, Error> {
        self.cursor
            .and_then(|i| self.rows.get(i))
            .ok_or(Error::NoRecords)
    }

    pub fn current_mut(&mut self) -> Result<&mut Row, Error> {
        match self.cursor {
            Some(i) => self.rows.get_mut(i).ok_or(Error::NoRecords),
            None => Err(Error::NoRecords),
        }
    }

    pub fn move_first(&mut self) -> Result<(), Error> {
        if self.rows.is_empty() {
            return Err(Error::NoRecords);
        }
        self.cursor = Some(0);
        Ok(())
    }

    pub fn move_last(&mut self) -> Result<(), Error> {
        if self.rows.is_empty() {
            return Err(Error::NoRecords);
        }
        self.cursor = Some(self.rows.len() - 1);
        Ok(())
    }

    /// Fails with `BeginningOfFile` at the first row, pointer unchanged.
    pub fn move_prior(&mut self) -> Result<(), Error> {
        match self.cursor {
            None => Err(Error::NoRecords),
            Some(0) => Err(Error::BeginningOfFile),
            Some(i) => {
                self.cursor = Some(i - 1);
                Ok(())
            }
        }
    }

    /// Fails with `EndOfFile` at the last row, pointer unchanged.
    pub fn move_next(&mut self) -> Result<(), Error> {
        match self.cursor {
            None => Err(Error::NoRecords),
            Some(i) if i + 1 >= self.rows.len() => Err(Error::EndOfFile),
            Some(i) => {
                self.cursor = Some(i + 1);
                Ok(())
            }
        }
    }

    pub fn move_to(&mut self, index: usize) -> Result<(), Error> {
        if self.rows.is_empty() {
            return Err(Error::NoRecords);
        }
        if index >= self.rows.len() {
            return Err(Error::EndOfFile);
        }
        self.cursor = Some(index);
        Ok(())
    }

    /// Appends a row and points at it.
    pub fn append(&mut self, row: Row) {
        self.rows.push(row);
        self.cursor = Some(self.rows.len() - 1);
    }

    /// Removes the row at `index`, shifting the pointer left when it sat
    /// at or past the removed position. An emptied set gets pointer -1.
    pub fn delete_at(&mut self, index: usize) -> Result<Row, Error> {
        if index >= self.rows.len() {
            return Err(Error::NoRecords);
        }
        let row = self.rows.remove(index);
        self.cursor = if self.rows.is_empty() {
            None
        } else {
            match self.cursor {
                Some(c) if c >= index && c > 0 => Some((c - 1).min(self.rows.len() - 1)),
                Some(c) => Some(c.min(self.rows.len() - 1)),
                None => None,
            }
        };
        Ok(row)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, Row> {
        self.rows.iter_mut()
    }

    /// Position of the row with the given identity.
    pub fn position_of(&self, id: RowId) -> Option<usize> {
        self.rows.iter().position(|r| r.id() == id)
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

// ============================================================================
// Tests
// ============================================================================
