//! # Dabo
//!
//! The data-access core of a desktop application framework: business
//! objects ("bizobjs") that mediate between a UI form and one database
//! table each. A bizobj loads a record set through its own SQL builder,
//! exposes it for interactive navigation, tracks per-field dirtiness,
//! and writes changes back inside a single transaction — keeping a tree
//! of child bizobjs filtered to their parent's current row the whole
//! time.
//!
//! Built on sqlx's `Any` driver; MySQL and SQLite dialects are covered by
//! [`backend::Backend`] adapters. Connection definitions, field specs and
//! view specs load from the framework's XML documents.
//!
//! ```rust,ignore
//! use dabo::{Bizobj, Connection, ConnectionInfo};
//!
//! let info = ConnectionInfo::new("SQLite", "local", "app", "", "shop.db", None);
//! let conn = Connection::open(&info)?;
//!
//! let mut customers = Bizobj::new(conn.clone(), "customer", "pkid");
//! let mut orders = Bizobj::new(conn, "orders", "pkid");
//! orders.set_link_field("cust_fk");
//! customers.add_child(orders)?;
//!
//! customers.requery().await?;
//! customers.set_field_value("company", "Acme")?;
//! customers.save().await?;
//! ```

pub mod backend;
pub mod bizobj;
pub mod connection;
pub mod error;
pub mod fieldspec;
pub mod form;
pub mod recordset;
pub mod registry;
pub mod sqlbuilder;
pub mod value;

pub use backend::{backend_for, Backend, MySqlBackend, SqliteBackend};
pub use bizobj::{Bizobj, BusinessRules};
pub use connection::{Connection, ConnectionInfo, DbTransaction};
pub use error::{DatabaseError, Error};
pub use fieldspec::{FieldDef, FieldSpecCatalog, FieldType, TableDef, ViewSpec};
pub use form::{BizEvent, Listener, Notifier};
pub use recordset::{ColumnMap, RecordSet, Row, RowId};
pub use sqlbuilder::{SqlBuilder, PARENT_LINK_TAG};
pub use value::{Encoding, Value};
