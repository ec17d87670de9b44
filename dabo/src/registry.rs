//! # Connection Registry Module
//!
//! Process-level mapping from logical name to [`ConnectionInfo`], fed
//! either from a connection-definitions XML document or from a plain map
//! built in code. Lifecycle is explicit: `init` / `register` /
//! `lookup` / `teardown`; nothing registers itself behind the scenes.

// ============================================================================
// External Crate Imports
// ============================================================================

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

// ============================================================================
// Internal Crate Imports
// ============================================================================

use crate::connection::ConnectionInfo;
use crate::error::Error;

// ============================================================================
// Registry State
// ============================================================================

static REGISTRY: OnceLock<Mutex<HashMap<String, ConnectionInfo>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, ConnectionInfo>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Replaces the registry contents with a code-defined map.
pub fn init(map: HashMap<String, ConnectionInfo>) {
    if let Ok(mut reg) = registry().lock() {
        *reg = map;
    }
}

/// Registers one definition under a logical name.
pub fn register(name: impl Into<String>, info: ConnectionInfo) {
    if let Ok(mut reg) = registry().lock() {
        reg.insert(name.into(), info);
    }
}

/// Looks up a definition by logical name.
pub fn lookup(name: &str) -> Result<ConnectionInfo, Error> {
    registry()
        .lock()
        .ok()
        .and_then(|reg| reg.get(name).cloned())
        .ok_or_else(|| {
            Error::FeatureNotSupported(format!("no connection named '{name}' registered"))
        })
}

/// Drops every registered definition.
pub fn teardown() {
    if let Ok(mut reg) = registry().lock() {
        reg.clear();
    }
}

// ============================================================================
// Connection-Definitions XML
// ============================================================================

/// Parses a connection-definitions document into a map keyed `user@host`.
///
/// Each `<connection dbtype="…">` holds leaf elements whose element name
/// is the attribute it sets (`host`, `database`, `user`, `password`,
/// `port`); character data inside a leaf is concatenated.
pub fn parse_definitions(xml: &str, source: &str) -> Result<HashMap<String, ConnectionInfo>, Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut out = HashMap::new();
    let mut db_type: Option<String> = None;
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut leaf: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "connection" {
                    let mut dbtype = None;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"dbtype" {
                            dbtype = attr.unescape_value().ok().map(|v| v.to_string());
                        }
                    }
                    db_type = Some(dbtype.ok_or_else(|| Error::SpecParse {
                        file: source.to_string(),
                        element: "connection".to_string(),
                        message: "missing dbtype attribute".to_string(),
                    })?);
                    fields.clear();
                } else if db_type.is_some() {
                    leaf = Some(name);
                    text.clear();
                }
            }
            Ok(Event::Text(t)) => {
                if leaf.is_some() {
                    text.push_str(&t.unescape().map_err(|e| Error::SpecParse {
                        file: source.to_string(),
                        element: leaf.clone().unwrap_or_default(),
                        message: e.to_string(),
                    })?);
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if Some(&name) == leaf.as_ref() {
                    fields.insert(name, text.trim().to_string());
                    leaf = None;
                } else if name == "connection" {
                    let db_type = db_type.take().unwrap_or_default();
                    let port = match fields.get("port").map(|p| p.parse::<u16>()) {
                        Some(Ok(p)) => Some(p),
                        Some(Err(_)) => {
                            return Err(Error::SpecParse {
                                file: source.to_string(),
                                element: "port".to_string(),
                                message: format!(
                                    "bad port value '{}'",
                                    fields.get("port").cloned().unwrap_or_default()
                                ),
                            })
                        }
                        None => None,
                    };
                    let info = ConnectionInfo::new(
                        db_type,
                        fields.get("host").cloned().unwrap_or_default(),
                        fields.get("user").cloned().unwrap_or_default(),
                        fields.get("password").cloned().unwrap_or_default(),
                        fields.get("database").cloned().unwrap_or_default(),
                        port,
                    );
                    out.insert(info.registry_key(), info);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(Error::SpecParse {
                    file: source.to_string(),
                    element: leaf.clone().unwrap_or_else(|| "connection".to_string()),
                    message: e.to_string(),
                })
            }
        }
    }
    Ok(out)
}

/// Parses a definitions document and merges it into the registry.
/// Returns how many definitions were registered.
pub fn load_definitions(xml: &str, source: &str) -> Result<usize, Error> {
    let parsed = parse_definitions(xml, source)?;
    let count = parsed.len();
    if let Ok(mut reg) = registry().lock() {
        reg.extend(parsed);
    }
    Ok(count)
}

// ============================================================================
// Tests
// ============================================================================
