//! # Bizobj Module
//!
//! The business object: mediator between a UI form and one database
//! table. A bizobj owns a record set, a change log, a SQL builder and a
//! list of child bizobjs linked by a foreign-key field. It loads rows via
//! requery, exposes them for navigation, tracks per-field dirtiness
//! against captured originals, and writes everything back inside a single
//! transaction on save.
//!
//! One logical task drives a bizobj tree; nothing here is meant to be
//! shared across concurrent writers.

// ============================================================================
// External Crate Imports
// ============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use log::{info, trace, warn};

// ============================================================================
// Internal Crate Imports
// ============================================================================

use crate::backend::Backend;
use crate::connection::{Connection, WriteSink};
use crate::error::Error;
use crate::fieldspec::{FieldSpecCatalog, FieldType};
use crate::form::{BizEvent, Listener, Notifier};
use crate::recordset::{ColumnMap, RecordSet, Row, RowId};
use crate::sqlbuilder::{SqlBuilder, PARENT_LINK_TAG};
use crate::value::{Encoding, Value};

// ============================================================================
// Business-Rule Hooks
// ============================================================================

/// Overridable validation hooks. Returning
/// [`Error::BusinessRuleViolation`] refuses the operation and, during a
/// save, rolls the whole transaction back.
/// [`Error::BusinessRulePassed`] is advisory: it is logged and the
/// operation continues.
#[async_trait]
pub trait BusinessRules: Send + Sync {
    async fn before_save(&self, biz: &Bizobj) -> Result<(), Error> {
        let _ = biz;
        Ok(())
    }

    async fn before_delete(&self, biz: &Bizobj) -> Result<(), Error> {
        let _ = biz;
        Ok(())
    }
}

/// Runs a hook outcome through the advisory rule.
fn apply_rule(outcome: Result<(), Error>, what: &str) -> Result<(), Error> {
    match outcome {
        Ok(()) => Ok(()),
        Err(Error::BusinessRulePassed(msg)) => {
            info!("{what} rule advisory: {msg}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

// ============================================================================
// Parent-Key State
// ============================================================================

/// What a child bizobj knows about its parent's current row.
#[derive(Debug, Clone, PartialEq)]
enum ParentKey {
    /// Not a child, or the parent has no current row.
    None,
    /// The parent's current row exists but is not saved yet.
    Unsaved,
    /// The parent's current primary key.
    Key(Value),
}

// ============================================================================
// Bizobj
// ============================================================================

pub struct Bizobj {
    data_source: String,
    key_field: String,
    link_field: Option<String>,
    conn: Connection,
    backend: Arc<dyn Backend>,
    sql: SqlBuilder,
    records: RecordSet,
    new_records: HashSet<RowId>,
    old_values: HashMap<RowId, HashMap<String, Value>>,
    pending_deletes: Vec<Value>,
    default_values: IndexMap<String, Value>,
    children: Vec<Bizobj>,
    field_specs: Option<Arc<FieldSpecCatalog>>,
    encoding: Encoding,
    hooks: Option<Arc<dyn BusinessRules>>,
    notifier: Notifier,
    parent_key: ParentKey,
    next_row_id: u64,
}

impl Bizobj {
    /// Binds a bizobj to a connection and a table.
    pub fn new(
        conn: Connection,
        data_source: impl Into<String>,
        key_field: impl Into<String>,
    ) -> Self {
        let data_source = data_source.into();
        let backend = conn.backend();
        let mut sql = SqlBuilder::new();
        sql.add_from(data_source.clone());
        Self {
            data_source,
            key_field: key_field.into(),
            link_field: None,
            conn,
            backend,
            sql,
            records: RecordSet::default(),
            new_records: HashSet::new(),
            old_values: HashMap::new(),
            pending_deletes: Vec::new(),
            default_values: IndexMap::new(),
            children: Vec::new(),
            field_specs: None,
            encoding: Encoding::default(),
            hooks: None,
            notifier: Notifier::default(),
            parent_key: ParentKey::None,
            next_row_id: 0,
        }
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Names the foreign-key column linking this bizobj to its parent.
    pub fn set_link_field(&mut self, link_field: impl Into<String>) -> &mut Self {
        self.link_field = Some(link_field.into());
        // Until a parent syncs us, match nothing rather than everything.
        self.parent_key = ParentKey::Unsaved;
        self.sql.set_where("1 = 0", PARENT_LINK_TAG);
        self
    }

    /// Value applied to the named field of every newly created row.
    pub fn set_default_value(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.default_values.insert(field.into(), value.into());
        self
    }

    pub fn set_field_specs(&mut self, specs: Arc<FieldSpecCatalog>) -> &mut Self {
        self.field_specs = Some(specs);
        self
    }

    pub fn set_encoding(&mut self, encoding: Encoding) -> &mut Self {
        self.encoding = encoding;
        self
    }

    pub fn set_hooks(&mut self, hooks: Arc<dyn BusinessRules>) -> &mut Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn set_order_by(&mut self, clause: impl Into<String>) -> &mut Self {
        self.sql.set_order_by(clause);
        self
    }

    pub fn set_limit(&mut self, limit: impl Into<String>) -> &mut Self {
        self.sql.set_limit_clause(limit);
        self
    }

    /// Direct access to the owned SQL builder, for filter panels and view
    /// specs that contribute their own tagged predicates.
    pub fn sql_builder(&mut self) -> &mut SqlBuilder {
        &mut self.sql
    }

    /// Subscribes a form callback to row/value change notifications.
    pub fn subscribe(&mut self, listener: Listener) {
        self.notifier.subscribe(listener);
    }

    // ------------------------------------------------------------------
    // Children
    // ------------------------------------------------------------------

    /// Adopts a child bizobj. The child must have a link field naming the
    /// foreign key pointing at this bizobj's key field.
    pub fn add_child(&mut self, child: Bizobj) -> Result<usize, Error> {
        if child.link_field.is_none() {
            return Err(Error::FeatureNotSupported(
                "child bizobj has no link field".into(),
            ));
        }
        self.children.push(child);
        Ok(self.children.len() - 1)
    }

    pub fn children(&self) -> &[Bizobj] {
        &self.children
    }

    pub fn child(&self, index: usize) -> Option<&Bizobj> {
        self.children.get(index)
    }

    pub fn child_mut(&mut self, index: usize) -> Option<&mut Bizobj> {
        self.children.get_mut(index)
    }

    /// Finds a child by its table name.
    pub fn child_by_source_mut(&mut self, data_source: &str) -> Option<&mut Bizobj> {
        self.children
            .iter_mut()
            .find(|c| c.data_source == data_source)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    pub fn link_field(&self) -> Option<&str> {
        self.link_field.as_deref()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn row_count(&self) -> usize {
        self.records.len()
    }

    /// Zero-based pointer, -1 on an empty set.
    pub fn row_number(&self) -> i64 {
        self.records.row_number()
    }

    /// The record set, for grid binding and iteration.
    pub fn records(&self) -> &RecordSet {
        &self.records
    }

    /// Identity of the current row.
    pub fn current_row_id(&self) -> Result<RowId, Error> {
        Ok(self.records.current()?.id())
    }

    /// True when the current row was created since the last save.
    pub fn is_new_row(&self) -> bool {
        self.records
            .current()
            .map(|r| self.new_records.contains(&r.id()))
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Dirtiness
    // ------------------------------------------------------------------

    /// True when any field of the given row differs from its captured
    /// original.
    pub fn is_row_dirty(&self, id: RowId) -> bool {
        let Some(originals) = self.old_values.get(&id) else {
            return false;
        };
        let Some(index) = self.records.position_of(id) else {
            return false;
        };
        let row = match self.records.row_at(index) {
            Some(r) => r,
            None => return false,
        };
        originals
            .iter()
            .any(|(field, orig)| row.value(field).map(|cur| cur != orig).unwrap_or(false))
    }

    /// True when the current row is dirty.
    pub fn is_dirty(&self) -> bool {
        self.records
            .current()
            .map(|r| self.is_row_dirty(r.id()))
            .unwrap_or(false)
    }

    /// True when this bizobj or any descendant has anything to write:
    /// dirty rows, new rows or pending deletes.
    pub fn is_any_dirty(&self) -> bool {
        !self.new_records.is_empty()
            || !self.pending_deletes.is_empty()
            || self.old_values.keys().any(|id| self.is_row_dirty(*id))
            || self.children.iter().any(|c| c.is_any_dirty())
    }

    // ------------------------------------------------------------------
    // Field Access
    // ------------------------------------------------------------------

    fn field_type(&self, field: &str) -> Option<FieldType> {
        self.field_specs
            .as_ref()
            .and_then(|c| c.field_type(&self.data_source, field))
    }

    /// Reads the decoded value of a field on the current row.
    pub fn get_field_value(&self, field: &str) -> Result<Value, Error> {
        let row = self.records.current()?;
        let value = row.value(field)?;
        match (value, self.field_type(field)) {
            (Value::Bytes(bytes), Some(FieldType::Character)) => {
                self.encoding.decode(bytes, field).map(Value::Text)
            }
            _ => Ok(value.clone()),
        }
    }

    /// Writes a field on the current row, capturing the pre-edit value on
    /// the first write and notifying subscribers.
    pub fn set_field_value(&mut self, field: &str, value: impl Into<Value>) -> Result<(), Error> {
        let value = value.into();
        let row_number = self.records.row_number();
        let row = self.records.current_mut()?;
        let id = row.id();
        let old = row.value(field)?.clone();
        row.set_value(field, value)?;
        self.old_values
            .entry(id)
            .or_default()
            .entry(field.to_string())
            .or_insert(old);
        trace!("{}: set {field} on row {row_number}", self.data_source);
        self.notifier.notify(&BizEvent::ValueChanged {
            row: row_number,
            field: field.to_string(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Requery
    // ------------------------------------------------------------------

    /// Serializes the SQL builder, replaces the record set with freshly
    /// loaded rows, clears the change log, and requeries every child
    /// against the new current row.
    pub async fn requery(&mut self) -> Result<(), Error> {
        self.requery_inner().await
    }

    fn requery_inner(&mut self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            let sql = self.sql.to_sql()?;
            let (columns, rows) = self.conn.fetch(&sql).await?;
            let column_map = if columns.is_empty() {
                self.declared_columns()
            } else {
                Arc::new(ColumnMap::new(columns))
            };
            let mut set = RecordSet::new(Arc::clone(&column_map));
            for values in rows {
                let id = self.alloc_row_id();
                set.append(Row::new(id, Arc::clone(&column_map), values));
            }
            if !set.is_empty() {
                set.move_first()?;
            }
            trace!("{}: requeried {} rows", self.data_source, set.len());
            self.records = set;
            self.new_records.clear();
            self.old_values.clear();
            // Pending deletes survive: a parent navigating away re-filters
            // this set, and cascade marks must live until the next save or
            // cancel.
            self.notify_row_changed();
            self.sync_children().await
        })
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    pub async fn first(&mut self) -> Result<(), Error> {
        self.records.move_first()?;
        self.after_pointer_move().await
    }

    pub async fn prior(&mut self) -> Result<(), Error> {
        self.records.move_prior()?;
        self.after_pointer_move().await
    }

    pub async fn next(&mut self) -> Result<(), Error> {
        self.records.move_next()?;
        self.after_pointer_move().await
    }

    pub async fn last(&mut self) -> Result<(), Error> {
        self.records.move_last()?;
        self.after_pointer_move().await
    }

    pub async fn move_to(&mut self, index: usize) -> Result<(), Error> {
        self.records.move_to(index)?;
        self.after_pointer_move().await
    }

    async fn after_pointer_move(&mut self) -> Result<(), Error> {
        self.notify_row_changed();
        self.sync_children().await
    }

    fn notify_row_changed(&self) {
        self.notifier.notify(&BizEvent::RowChanged {
            row: self.records.row_number(),
        });
    }

    // ------------------------------------------------------------------
    // Parent/Child Link
    // ------------------------------------------------------------------

    /// What a child of this bizobj should filter on right now.
    fn current_parent_key(&self) -> ParentKey {
        match self.records.current() {
            Err(_) => ParentKey::None,
            Ok(row) => {
                if self.new_records.contains(&row.id()) {
                    return ParentKey::Unsaved;
                }
                match row.value(&self.key_field) {
                    Ok(v) if !v.is_null() => ParentKey::Key(v.clone()),
                    _ => ParentKey::Unsaved,
                }
            }
        }
    }

    /// Re-points every child's link filter at the current row and
    /// requeries it.
    fn sync_children(&mut self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            if self.children.is_empty() {
                return Ok(());
            }
            let parent_key = self.current_parent_key();
            for child in &mut self.children {
                child.apply_link_filter(parent_key.clone())?;
                child.requery_inner().await?;
            }
            Ok(())
        })
    }

    /// Sets the link filter from a known parent key. `None` installs the
    /// marker predicate that matches no rows (unsaved or absent parent).
    pub fn set_link_filter(&mut self, parent_pk: Option<Value>) -> Result<(), Error> {
        match parent_pk {
            Some(v) => self.apply_link_filter(ParentKey::Key(v)),
            None => self.apply_link_filter(ParentKey::Unsaved),
        }
    }

    fn apply_link_filter(&mut self, parent: ParentKey) -> Result<(), Error> {
        let link = self.link_field.clone().ok_or_else(|| {
            Error::FeatureNotSupported("bizobj has no link field".into())
        })?;
        match &parent {
            ParentKey::Key(v) => {
                let ftype = self.field_type(&link);
                let literal = self.backend.format_literal(v, ftype);
                self.sql.set_where(format!("{link} = {literal}"), PARENT_LINK_TAG);
            }
            // New or missing parent row: match nothing, but the set still
            // accepts new rows whose link gets stamped at parent save.
            ParentKey::Unsaved | ParentKey::None => {
                self.sql.set_where("1 = 0", PARENT_LINK_TAG);
            }
        }
        self.parent_key = parent;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Row Creation
    // ------------------------------------------------------------------

    /// Appends a blank row populated from the default values, records it
    /// as new, and points at it.
    pub async fn new_row(&mut self) -> Result<(), Error> {
        if self.records.columns().is_empty() {
            // Never requeried: build the set from declared columns.
            self.records = RecordSet::new(self.declared_columns());
        }
        let columns = Arc::clone(self.records.columns());
        let mut values = vec![Value::Null; columns.len()];
        for (i, name) in columns.names().iter().enumerate() {
            if let Some(default) = self.default_values.get(name) {
                values[i] = default.clone();
            }
        }
        if let Some(link) = &self.link_field {
            if let ParentKey::Key(pk) = &self.parent_key {
                if let Some(i) = columns.position(link) {
                    values[i] = pk.clone();
                }
            }
        }
        let id = self.alloc_row_id();
        self.records.append(Row::new(id, columns, values));
        self.new_records.insert(id);
        trace!("{}: new row {}", self.data_source, self.records.row_number());
        self.notify_row_changed();
        self.sync_children().await
    }

    fn alloc_row_id(&mut self) -> RowId {
        self.next_row_id += 1;
        RowId(self.next_row_id)
    }

    fn declared_columns(&self) -> Arc<ColumnMap> {
        if let Some(catalog) = &self.field_specs {
            if let Some(table) = catalog.table(&self.data_source) {
                return Arc::new(ColumnMap::new(table.fields.keys().cloned().collect()));
            }
        }
        let mut names = vec![self.key_field.clone()];
        if let Some(link) = &self.link_field {
            if !names.contains(link) {
                names.push(link.clone());
            }
        }
        for field in self.default_values.keys() {
            if !names.contains(field) {
                names.push(field.clone());
            }
        }
        Arc::new(ColumnMap::new(names))
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Removes the current row, cascading into children first. Rows that
    /// already exist in the database become pending DELETEs flushed by
    /// the next save; new rows are dropped locally.
    pub async fn delete(&mut self) -> Result<(), Error> {
        self.records.current()?;
        if let Some(hooks) = self.hooks.clone() {
            apply_rule(hooks.before_delete(self).await, "delete")?;
        }
        self.cascade_current_children().await?;
        self.mark_current_deleted()?;
        self.notify_row_changed();
        self.sync_children().await
    }

    /// Cascade-marks every row of this bizobj (and its descendants) for
    /// deletion and empties the set.
    pub async fn delete_all(&mut self) -> Result<(), Error> {
        self.cascade_mark().await
    }

    fn cascade_current_children(&mut self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            for child in &mut self.children {
                child.cascade_mark().await?;
            }
            Ok(())
        })
    }

    /// Walks every row: loads that row's children, cascades into them,
    /// then marks the row itself. Pending deletes accumulate across the
    /// subtree before any SQL runs, so one transaction covers the lot.
    fn cascade_mark(&mut self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            while !self.records.is_empty() {
                self.records.move_to(0)?;
                if !self.children.is_empty() {
                    self.sync_children().await?;
                    for child in &mut self.children {
                        child.cascade_mark().await?;
                    }
                }
                self.mark_current_deleted()?;
            }
            self.notify_row_changed();
            Ok(())
        })
    }

    fn mark_current_deleted(&mut self) -> Result<(), Error> {
        let index = match self.records.row_number() {
            -1 => return Err(Error::NoRecords),
            i => i as usize,
        };
        let row = self.records.current()?;
        let id = row.id();
        if !self.new_records.remove(&id) {
            let pk = self
                .old_values
                .get(&id)
                .and_then(|m| m.get(&self.key_field))
                .cloned()
                .or_else(|| row.value(&self.key_field).ok().cloned())
                .unwrap_or(Value::Null);
            self.pending_deletes.push(pk);
        }
        self.old_values.remove(&id);
        self.records.delete_at(index)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cancel
    // ------------------------------------------------------------------

    /// Reverts every dirty field from its captured original, drops new
    /// rows, discards pending deletes, and cancels children. Issues no
    /// SQL.
    pub fn cancel(&mut self) -> Result<(), Error> {
        let new_ids: Vec<RowId> = self.new_records.drain().collect();
        for id in new_ids {
            if let Some(index) = self.records.position_of(id) {
                self.records.delete_at(index)?;
            }
            self.old_values.remove(&id);
        }
        let reverts: Vec<(RowId, HashMap<String, Value>)> = self.old_values.drain().collect();
        for (id, originals) in reverts {
            if let Some(index) = self.records.position_of(id) {
                if let Some(row) = self.records.row_at_mut(index) {
                    for (field, original) in originals {
                        row.set_value(&field, original)?;
                    }
                }
            }
        }
        self.pending_deletes.clear();
        for child in &mut self.children {
            child.cancel()?;
        }
        self.notify_row_changed();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------

    /// Writes the whole subtree back in one transaction.
    ///
    /// Pending DELETEs flush first, depth-first child-before-parent, so a
    /// cascade removes detail rows ahead of their master. INSERTs and
    /// UPDATEs then run depth-first parent-before-child, so a child's
    /// link field always sees its parent's freshly assigned key. Any
    /// failure rolls the transaction back and leaves the change log
    /// intact for a retry or cancel.
    ///
    /// A clean tree issues no statements at all.
    pub async fn save(&mut self) -> Result<(), Error> {
        if !self.is_any_dirty() {
            return Ok(());
        }
        let mut sink = WriteSink::for_connection(&self.conn).await?;
        let outcome = self.flush(&mut sink).await;
        match outcome {
            Ok(()) => {
                sink.commit().await?;
                self.accept_changes();
                Ok(())
            }
            Err(e) => {
                warn!("{}: save failed, rolling back: {e}", self.data_source);
                if let Err(rb) = sink.rollback().await {
                    warn!("{}: rollback also failed: {rb}", self.data_source);
                }
                // Identities assigned inside the aborted transaction are
                // gone server-side; drop them locally too so a retry does
                // not present a key the database never committed.
                self.clear_speculative_keys();
                Err(e)
            }
        }
    }

    async fn flush(&mut self, sink: &mut WriteSink) -> Result<(), Error> {
        self.flush_deletes(sink).await?;
        self.flush_writes(sink).await
    }

    fn flush_deletes<'a>(&'a mut self, sink: &'a mut WriteSink) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            for child in &mut self.children {
                child.flush_deletes(sink).await?;
            }
            for pk in &self.pending_deletes {
                if pk.is_null() {
                    return Err(Error::MissingPk);
                }
                let literal = self.backend.format_literal(pk, self.field_type(&self.key_field));
                let sql = format!(
                    "DELETE FROM {} WHERE {} = {}",
                    self.data_source, self.key_field, literal
                );
                sink.execute(&sql).await?;
            }
            Ok(())
        })
    }

    fn flush_writes<'a>(&'a mut self, sink: &'a mut WriteSink) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            if let Some(hooks) = self.hooks.clone() {
                apply_rule(hooks.before_save(self).await, "save")?;
            }
            let ids: Vec<RowId> = self.records.iter().map(|r| r.id()).collect();
            for id in ids {
                if self.new_records.contains(&id) {
                    self.insert_row(id, sink).await?;
                } else if self.is_row_dirty(id) {
                    self.update_row(id, sink).await?;
                }
            }
            for child in &mut self.children {
                child.flush_writes(sink).await?;
            }
            Ok(())
        })
    }

    /// INSERT covering the columns whose current values differ from the
    /// defaults; the key field is left to the backend's identity.
    fn build_insert_sql(&self, id: RowId) -> Result<String, Error> {
        let index = self.records.position_of(id).ok_or(Error::NoRecords)?;
        let row = self.records.row_at(index).ok_or(Error::NoRecords)?;
        let mut columns = Vec::new();
        let mut literals = Vec::new();
        for (i, name) in row.columns().names().iter().enumerate() {
            if *name == self.key_field {
                continue;
            }
            let value = row.value_at(i).ok_or(Error::NoRecords)?;
            let differs = match self.default_values.get(name) {
                Some(default) => value != default,
                None => !value.is_null(),
            };
            if differs {
                columns.push(name.clone());
                literals.push(self.backend.format_literal(value, self.field_type(name)));
            }
        }
        if columns.is_empty() {
            // Entirely blank row: let the backend assign the identity.
            return Ok(format!(
                "INSERT INTO {} ({}) VALUES (NULL)",
                self.data_source, self.key_field
            ));
        }
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.data_source,
            columns.join(", "),
            literals.join(", ")
        ))
    }

    async fn insert_row(&mut self, id: RowId, sink: &mut WriteSink) -> Result<(), Error> {
        let sql = self.build_insert_sql(id)?;
        sink.execute(&sql).await?;
        let identity = sink.fetch_scalar_i64(self.backend.last_insert_id_sql()).await?;
        if let Some(pk) = identity {
            let index = self.records.position_of(id).ok_or(Error::NoRecords)?;
            let is_current = self.records.row_number() == index as i64;
            let key = self.key_field.clone();
            if let Some(row) = self.records.row_at_mut(index) {
                // The key may be absent when the SELECT never included it.
                let _ = row.set_value(&key, Value::Int(pk));
            }
            if is_current {
                self.stamp_children(Value::Int(pk))?;
            }
        }
        Ok(())
    }

    /// Propagates a freshly minted parent key into every child: the link
    /// filter starts matching it, and child rows created while the parent
    /// was unsaved get their link field filled before their own INSERT.
    ///
    /// New rows are stamped unconditionally. A retry after a rollback
    /// arrives here with the discarded key still in the link field, and
    /// keeping it would insert the child under the wrong parent.
    fn stamp_children(&mut self, pk: Value) -> Result<(), Error> {
        for child in &mut self.children {
            let Some(link) = child.link_field.clone() else {
                continue;
            };
            child.apply_link_filter(ParentKey::Key(pk.clone()))?;
            let ids: Vec<RowId> = child.new_records.iter().copied().collect();
            for id in ids {
                if let Some(index) = child.records.position_of(id) {
                    if let Some(row) = child.records.row_at_mut(index) {
                        row.set_value(&link, pk.clone())?;
                    }
                }
            }
        }
        Ok(())
    }

    /// UPDATE covering only the dirty columns, qualified by the primary
    /// key captured at load time. Returns `None` when nothing actually
    /// differs anymore.
    fn build_update_sql(&self, id: RowId) -> Result<Option<String>, Error> {
        let index = self.records.position_of(id).ok_or(Error::NoRecords)?;
        let row = self.records.row_at(index).ok_or(Error::NoRecords)?;
        let originals = match self.old_values.get(&id) {
            Some(o) => o,
            None => return Ok(None),
        };
        let mut assignments = Vec::new();
        for name in row.columns().names() {
            if let Some(original) = originals.get(name) {
                let current = row.value(name)?;
                if current != original {
                    assignments.push(format!(
                        "{name} = {}",
                        self.backend.format_literal(current, self.field_type(name))
                    ));
                }
            }
        }
        if assignments.is_empty() {
            return Ok(None);
        }
        let pk = originals
            .get(&self.key_field)
            .cloned()
            .or_else(|| row.value(&self.key_field).ok().cloned())
            .unwrap_or(Value::Null);
        if pk.is_null() {
            return Err(Error::MissingPk);
        }
        let literal = self.backend.format_literal(&pk, self.field_type(&self.key_field));
        Ok(Some(format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.data_source,
            assignments.join(", "),
            self.key_field,
            literal
        )))
    }

    async fn update_row(&mut self, id: RowId, sink: &mut WriteSink) -> Result<(), Error> {
        let Some(sql) = self.build_update_sql(id)? else {
            return Ok(());
        };
        let affected = sink.execute(&sql).await?;
        if affected == 0 {
            let pk = self
                .old_values
                .get(&id)
                .and_then(|m| m.get(&self.key_field))
                .cloned()
                .unwrap_or(Value::Null);
            return Err(Error::RowNotFound(pk.to_string()));
        }
        Ok(())
    }

    /// Nulls the key field of every still-new row in the subtree. Runs
    /// after a rollback: those keys came from INSERTs the transaction
    /// discarded. Link fields are left alone; the next save restamps them
    /// from the parent's real key.
    fn clear_speculative_keys(&mut self) {
        let key = self.key_field.clone();
        let ids: Vec<RowId> = self.new_records.iter().copied().collect();
        for id in ids {
            if let Some(index) = self.records.position_of(id) {
                if let Some(row) = self.records.row_at_mut(index) {
                    // The key column may be absent from a sparse set.
                    let _ = row.set_value(&key, Value::Null);
                }
            }
        }
        for child in &mut self.children {
            child.clear_speculative_keys();
        }
    }

    /// Commits the local change log after a successful save: the written
    /// values become the new originals.
    fn accept_changes(&mut self) {
        self.new_records.clear();
        self.pending_deletes.clear();
        self.old_values.clear();
        for child in &mut self.children {
            child.accept_changes();
        }
    }
}

impl std::fmt::Debug for Bizobj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bizobj")
            .field("data_source", &self.data_source)
            .field("key_field", &self.key_field)
            .field("rows", &self.records.len())
            .field("row_number", &self.records.row_number())
            .field("children", &self.children.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionInfo;

    fn memory_bizobj() -> Bizobj {
        let info = ConnectionInfo::new("SQLite", "local", "app", "", ":memory:", None);
        let conn = Connection::open(&info).unwrap();
        Bizobj::new(conn, "customer", "pkid")
    }

    fn seed_row(biz: &mut Bizobj, values: &[(&str, Value)]) -> RowId {
        let columns = Arc::new(ColumnMap::new(
            values.iter().map(|(n, _)| n.to_string()).collect(),
        ));
        let id = biz.alloc_row_id();
        let row = Row::new(
            id,
            Arc::clone(&columns),
            values.iter().map(|(_, v)| v.clone()).collect(),
        );
        let mut set = RecordSet::new(columns);
        set.append(row);
        set.move_first().unwrap();
        biz.records = set;
        id
    }

    #[tokio::test]
    async fn update_covers_only_dirty_columns() {
        let mut biz = memory_bizobj();
        seed_row(
            &mut biz,
            &[
                ("pkid", Value::Int(3)),
                ("company", Value::Text("Acme".into())),
                ("phone", Value::Text("555".into())),
            ],
        );
        biz.set_field_value("phone", "999").unwrap();
        let id = biz.current_row_id().unwrap();
        let sql = biz.build_update_sql(id).unwrap().unwrap();
        assert_eq!(sql, "UPDATE customer SET phone = '999' WHERE pkid = 3");
    }

    #[tokio::test]
    async fn update_qualifies_by_original_key_when_key_was_edited() {
        let mut biz = memory_bizobj();
        seed_row(
            &mut biz,
            &[("pkid", Value::Int(3)), ("company", Value::Text("Acme".into()))],
        );
        biz.set_field_value("pkid", 9i64).unwrap();
        let id = biz.current_row_id().unwrap();
        let sql = biz.build_update_sql(id).unwrap().unwrap();
        assert_eq!(sql, "UPDATE customer SET pkid = 9 WHERE pkid = 3");
    }

    #[tokio::test]
    async fn clean_row_builds_no_update() {
        let mut biz = memory_bizobj();
        let id = seed_row(&mut biz, &[("pkid", Value::Int(1))]);
        assert_eq!(biz.build_update_sql(id).unwrap(), None);
    }

    #[tokio::test]
    async fn edit_back_to_original_is_not_dirty() {
        let mut biz = memory_bizobj();
        seed_row(
            &mut biz,
            &[("pkid", Value::Int(1)), ("company", Value::Text("Acme".into()))],
        );
        biz.set_field_value("company", "Initech").unwrap();
        assert!(biz.is_dirty());
        biz.set_field_value("company", "Acme").unwrap();
        assert!(!biz.is_dirty());
        let id = biz.current_row_id().unwrap();
        assert_eq!(biz.build_update_sql(id).unwrap(), None);
    }

    #[tokio::test]
    async fn missing_key_value_refuses_update() {
        let mut biz = memory_bizobj();
        seed_row(
            &mut biz,
            &[("pkid", Value::Null), ("company", Value::Text("Acme".into()))],
        );
        biz.set_field_value("company", "Initech").unwrap();
        let id = biz.current_row_id().unwrap();
        assert!(matches!(biz.build_update_sql(id), Err(Error::MissingPk)));
    }

    #[tokio::test]
    async fn insert_skips_defaults_and_key() {
        let mut biz = memory_bizobj();
        biz.set_default_value("country", "US");
        let columns = Arc::new(ColumnMap::new(vec![
            "pkid".into(),
            "company".into(),
            "country".into(),
        ]));
        let id = biz.alloc_row_id();
        let row = Row::new(
            id,
            Arc::clone(&columns),
            vec![Value::Null, Value::Text("Acme".into()), Value::Text("US".into())],
        );
        let mut set = RecordSet::new(columns);
        set.append(row);
        set.move_first().unwrap();
        biz.records = set;
        biz.new_records.insert(id);
        let sql = biz.build_insert_sql(id).unwrap();
        assert_eq!(sql, "INSERT INTO customer (company) VALUES ('Acme')");
    }

    #[tokio::test]
    async fn unknown_field_write_is_field_not_found() {
        let mut biz = memory_bizobj();
        seed_row(&mut biz, &[("pkid", Value::Int(1))]);
        assert!(matches!(
            biz.set_field_value("bogus", 1i64),
            Err(Error::FieldNotFound(_))
        ));
    }
}
