//! # Field Spec Module
//!
//! Loaders for the declarative spec documents: field specs (which columns
//! a table has, their semantic types, primary keys, scale, editor hints)
//! and view specs (.vsxml — a named query as field list, FROM list, WHERE
//! template, sort and limit). Both parse with a streaming event reader;
//! malformed documents surface the document name and the element that
//! broke.

// ============================================================================
// External Crate Imports
// ============================================================================

use indexmap::IndexMap;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Internal Crate Imports
// ============================================================================

use crate::error::Error;
use crate::sqlbuilder::SqlBuilder;

// ============================================================================
// Field Types
// ============================================================================

/// Semantic column types, single-letter coded in the documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Character,
    Integer,
    Numeric,
    Date,
    Boolean,
}

impl FieldType {
    /// Parses the single-letter code (`C`, `I`, `N`, `D`, `B`).
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "C" => Some(FieldType::Character),
            "I" => Some(FieldType::Integer),
            "N" => Some(FieldType::Numeric),
            "D" => Some(FieldType::Date),
            "B" => Some(FieldType::Boolean),
            _ => None,
        }
    }
}

// ============================================================================
// Field / Table Definitions
// ============================================================================

/// One `<field>` entry of a field spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    /// Display/select alias; defaults to the column name.
    pub alias: String,
    pub ftype: FieldType,
    pub pk: bool,
    pub scale: Option<u32>,
    /// Free-form editor hint for the UI binding layer.
    pub hint: Option<String>,
}

/// One `<table>` entry: field definitions in document order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub fields: IndexMap<String, FieldDef>,
}

impl TableDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    /// The primary-key field, if the document declared one.
    pub fn pk_field(&self) -> Option<&FieldDef> {
        self.fields.values().find(|f| f.pk)
    }
}

/// A parsed field-spec document: table name → definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldSpecCatalog {
    pub tables: IndexMap<String, TableDef>,
}

impl FieldSpecCatalog {
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    /// Looks up the semantic type of `(table, field)`.
    pub fn field_type(&self, table: &str, field: &str) -> Option<FieldType> {
        self.tables.get(table)?.fields.get(field).map(|f| f.ftype)
    }

    /// Parses a field-spec document. `source` only labels errors.
    pub fn parse(xml: &str, source: &str) -> Result<Self, Error> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut catalog = FieldSpecCatalog::default();
        let mut current_table: Option<TableDef> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    match e.name().as_ref() {
                        b"tables" => {}
                        b"table" => {
                            let attrs = attr_map(&e, source, "table")?;
                            let name = require_attr(&attrs, "name", source, "table")?;
                            current_table = Some(TableDef {
                                name,
                                fields: IndexMap::new(),
                            });
                        }
                        b"field" => {
                            let attrs = attr_map(&e, source, "field")?;
                            let name = require_attr(&attrs, "name", source, "field")?;
                            let type_code = require_attr(&attrs, "type", source, "field")?;
                            let ftype = FieldType::from_code(&type_code).ok_or_else(|| {
                                Error::SpecParse {
                                    file: source.to_string(),
                                    element: "field".to_string(),
                                    message: format!("unknown type code '{type_code}'"),
                                }
                            })?;
                            let def = FieldDef {
                                alias: attrs.get("alias").cloned().unwrap_or_else(|| name.clone()),
                                pk: attrs.get("pk").map(|v| v == "true").unwrap_or(false),
                                scale: attrs.get("scale").and_then(|v| v.parse().ok()),
                                hint: attrs.get("hint").cloned(),
                                name: name.clone(),
                                ftype,
                            };
                            match current_table.as_mut() {
                                Some(table) => {
                                    table.fields.insert(name, def);
                                }
                                None => {
                                    return Err(Error::SpecParse {
                                        file: source.to_string(),
                                        element: "field".to_string(),
                                        message: "<field> outside a <table>".to_string(),
                                    })
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::End(e)) => {
                    if e.name().as_ref() == b"table" {
                        if let Some(table) = current_table.take() {
                            catalog.tables.insert(table.name.clone(), table);
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(Error::SpecParse {
                        file: source.to_string(),
                        element: "tables".to_string(),
                        message: e.to_string(),
                    })
                }
            }
        }
        Ok(catalog)
    }
}

// ============================================================================
// View Specs
// ============================================================================

/// A parsed .vsxml document: a named query whose WHERE clause may carry
/// `{token}` placeholders filled at requery time from filter controls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewSpec {
    pub name: String,
    pub fields: Vec<String>,
    pub from: Vec<String>,
    pub where_template: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<String>,
}

/// WHERE tag used for predicates a view spec contributes.
pub const VIEW_TAG: &str = "__view__";

impl ViewSpec {
    /// Parses a view-spec document. `source` only labels errors.
    pub fn parse(xml: &str, source: &str) -> Result<Self, Error> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut spec = ViewSpec::default();
        let mut path: Vec<String> = Vec::new();
        let mut text = String::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    if name == "view" {
                        let attrs = attr_map(&e, source, "view")?;
                        spec.name = require_attr(&attrs, "name", source, "view")?;
                    }
                    path.push(name);
                    text.clear();
                }
                // Characters are concatenated SAX-style; a leaf's value is
                // whatever accumulated by its end tag.
                Ok(Event::Text(t)) => {
                    text.push_str(&t.unescape().map_err(|e| Error::SpecParse {
                        file: source.to_string(),
                        element: path.last().cloned().unwrap_or_default(),
                        message: e.to_string(),
                    })?);
                }
                Ok(Event::End(_)) => {
                    let element = path.pop().unwrap_or_default();
                    let value = text.trim().to_string();
                    text.clear();
                    if value.is_empty() {
                        continue;
                    }
                    match element.as_str() {
                        "field" => spec.fields.push(value),
                        "from" => spec.from.push(value),
                        "where" => spec.where_template = Some(value),
                        "orderby" => spec.order_by = Some(value),
                        "limit" => spec.limit = Some(value),
                        _ => {}
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(Error::SpecParse {
                        file: source.to_string(),
                        element: path.last().cloned().unwrap_or_default(),
                        message: e.to_string(),
                    })
                }
            }
        }

        if spec.from.is_empty() {
            return Err(Error::SpecParse {
                file: source.to_string(),
                element: "view".to_string(),
                message: "view spec declares no FROM".to_string(),
            });
        }
        Ok(spec)
    }

    /// Populates a SQL builder from this spec, substituting `{token}`
    /// placeholders in the WHERE template from `substitutions`.
    pub fn apply(&self, builder: &mut SqlBuilder, substitutions: &HashMap<String, String>) {
        for f in &self.fields {
            builder.add_field(f.clone());
        }
        for f in &self.from {
            builder.add_from(f.clone());
        }
        if let Some(template) = &self.where_template {
            let mut clause = template.clone();
            for (token, value) in substitutions {
                clause = clause.replace(&format!("{{{token}}}"), value);
            }
            builder.set_where(clause, VIEW_TAG);
        }
        if let Some(order) = &self.order_by {
            builder.set_order_by(order.clone());
        }
        if let Some(limit) = &self.limit {
            builder.set_limit_clause(limit.clone());
        }
    }
}

// ============================================================================
// Attribute Helpers
// ============================================================================

fn attr_map(
    e: &quick_xml::events::BytesStart<'_>,
    source: &str,
    element: &str,
) -> Result<HashMap<String, String>, Error> {
    let mut out = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::SpecParse {
            file: source.to_string(),
            element: element.to_string(),
            message: err.to_string(),
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| Error::SpecParse {
                file: source.to_string(),
                element: element.to_string(),
                message: err.to_string(),
            })?
            .to_string();
        out.insert(key, value);
    }
    Ok(out)
}

fn require_attr(
    attrs: &HashMap<String, String>,
    key: &str,
    source: &str,
    element: &str,
) -> Result<String, Error> {
    attrs.get(key).cloned().ok_or_else(|| Error::SpecParse {
        file: source.to_string(),
        element: element.to_string(),
        message: format!("missing required attribute '{key}'"),
    })
}

// ============================================================================
// Tests
// ============================================================================
