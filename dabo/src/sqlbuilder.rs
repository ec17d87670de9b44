//! # SQL Builder Module
//!
//! Accumulates the pieces of a SELECT and serializes them on demand.
//! WHERE predicates are keyed by an origin tag so a contributor (a filter
//! panel, the parent-link machinery, a view spec) can replace or retract
//! its own predicates without touching anyone else's. Within one tag the
//! predicates are OR-joined; across tags they are AND-joined.
//!
//! The builder is re-serialized at every requery; nothing is cached.

// ============================================================================
// External Crate Imports
// ============================================================================

use indexmap::IndexMap;

// ============================================================================
// Internal Crate Imports
// ============================================================================

use crate::error::Error;
use crate::fieldspec::FieldDef;

// ============================================================================
// SqlBuilder
// ============================================================================

/// Reserved tag under which a child bizobj keeps its parent-link filter.
pub const PARENT_LINK_TAG: &str = "__parentLink__";

#[derive(Debug, Clone, Default)]
pub struct SqlBuilder {
    fields: Vec<String>,
    from: Vec<String>,
    wheres: IndexMap<String, Vec<String>>,
    group_by: Option<String>,
    order_by: Option<String>,
    limit: Option<String>,
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one field clause (`name` or `expr AS alias`).
    pub fn add_field(&mut self, clause: impl Into<String>) -> &mut Self {
        self.fields.push(clause.into());
        self
    }

    /// Expands field-spec entries for a table into the field clause.
    pub fn add_fields_from_data_structure(&mut self, table: &str, fields: &[FieldDef]) -> &mut Self {
        for f in fields {
            if f.alias == f.name {
                self.fields.push(format!("{table}.{}", f.name));
            } else {
                self.fields.push(format!("{table}.{} AS {}", f.name, f.alias));
            }
        }
        self
    }

    pub fn add_from(&mut self, clause: impl Into<String>) -> &mut Self {
        self.from.push(clause.into());
        self
    }

    /// Adds a predicate under an origin tag. Predicates sharing a tag are
    /// OR-joined; distinct tags are AND-joined.
    pub fn add_where(&mut self, predicate: impl Into<String>, tag: impl Into<String>) -> &mut Self {
        self.wheres.entry(tag.into()).or_default().push(predicate.into());
        self
    }

    /// Replaces every predicate previously registered under the tag.
    pub fn set_where(&mut self, predicate: impl Into<String>, tag: impl Into<String>) -> &mut Self {
        let slot = self.wheres.entry(tag.into()).or_default();
        slot.clear();
        slot.push(predicate.into());
        self
    }

    /// Drops all predicates registered under the tag.
    pub fn remove_where(&mut self, tag: &str) -> &mut Self {
        self.wheres.shift_remove(tag);
        self
    }

    pub fn set_group_by(&mut self, clause: impl Into<String>) -> &mut Self {
        self.group_by = Some(clause.into());
        self
    }

    pub fn set_order_by(&mut self, clause: impl Into<String>) -> &mut Self {
        self.order_by = Some(clause.into());
        self
    }

    /// Sets the LIMIT clause body (e.g. `"500"`).
    pub fn set_limit_clause(&mut self, clause: impl Into<String>) -> &mut Self {
        self.limit = Some(clause.into());
        self
    }

    pub fn clear_limit(&mut self) -> &mut Self {
        self.limit = None;
        self
    }

    /// Serializes the accumulated clauses into a SELECT statement.
    ///
    /// Empty accumulators are omitted; an empty field list falls back to
    /// `*`. A missing FROM list is the one unrecoverable shape and comes
    /// back as [`Error::Query`].
    pub fn to_sql(&self) -> Result<String, Error> {
        if self.from.is_empty() {
            return Err(Error::Query("no FROM clause set".into()));
        }
        let fields = if self.fields.is_empty() {
            "*".to_string()
        } else {
            self.fields.join(", ")
        };
        let mut sql = format!("SELECT {} FROM {}", fields, self.from.join(", "));

        let groups: Vec<String> = self
            .wheres
            .values()
            .filter(|preds| !preds.is_empty())
            .map(|preds| {
                if preds.len() == 1 {
                    preds[0].clone()
                } else {
                    format!("({})", preds.join(" OR "))
                }
            })
            .collect();
        if !groups.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&groups.join(" AND "));
        }
        if let Some(g) = &self.group_by {
            sql.push_str(" GROUP BY ");
            sql.push_str(g);
        }
        if let Some(o) = &self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(o);
        }
        if let Some(l) = &self.limit {
            sql.push_str(" LIMIT ");
            sql.push_str(l);
        }
        Ok(sql)
    }
}

// ============================================================================
// Tests
// ============================================================================
