//! # Error Module
//!
//! This module defines the error taxonomy shared by every layer of Dabo.
//! Navigation boundaries, business-rule outcomes and backend failures are
//! all distinct, matchable variants so a hosting form can decide which
//! ones to swallow (boundary bumps), which ones abort a save (rule
//! violations) and which ones to show to the user (database errors).

// ============================================================================
// External Crate Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// Top-Level Error Enum
// ============================================================================

/// Every failure a bizobj tree can surface.
///
/// The navigation variants (`BeginningOfFile`, `EndOfFile`, `NoRecords`)
/// are expected control signals: callers handle them locally and the
/// record pointer is guaranteed unchanged when they are returned.
#[derive(Debug, Error)]
pub enum Error {
    /// `prior()` was called while already on the first row.
    #[error("already at the first row")]
    BeginningOfFile,

    /// `next()` was called while already on the last row.
    #[error("already at the last row")]
    EndOfFile,

    /// The current row was accessed on an empty record set.
    #[error("the record set is empty")]
    NoRecords,

    /// The SQL builder produced a statement that cannot run.
    #[error("bad query: {0}")]
    Query(String),

    /// A pre-save or pre-delete hook refused the operation.
    #[error("business rule violation: {0}")]
    BusinessRuleViolation(String),

    /// Advisory outcome from a hook; the save continues after logging it.
    #[error("business rule advisory: {0}")]
    BusinessRulePassed(String),

    /// A save targeted a primary key that no longer exists in the backend.
    #[error("no row found for key {0}")]
    RowNotFound(String),

    /// The backend does not implement the requested feature.
    #[error("feature not implemented: {0}")]
    FeatureNotImplemented(&'static str),

    /// The operation is not valid in the bizobj's current state.
    #[error("operation not supported here: {0}")]
    FeatureNotSupported(String),

    /// A write-back was attempted on a row whose key field is NULL.
    #[error("row has no primary key value")]
    MissingPk,

    /// The driver reported a broken connection. Dabo does not reconnect.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A named field is absent from the record set or the field spec.
    #[error("field not found: {0}")]
    FieldNotFound(String),

    /// A backend failure; see [`DatabaseError`] for the subkinds.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// A spec document (connection definitions, field spec, view spec)
    /// failed to parse. Carries the document and element for context.
    #[error("spec parse error in {file} at <{element}>: {message}")]
    SpecParse {
        file: String,
        element: String,
        message: String,
    },
}

// ============================================================================
// Database Sub-Errors
// ============================================================================

/// Backend failures, split the way an interactive application needs them:
/// bad credentials and missing databases get their own variants so the
/// connect dialog can react; everything raised by a statement carries the
/// offending SQL verbatim.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Authentication failed for the supplied credentials.
    #[error("access denied: {0}")]
    NoAccess(String),

    /// The server is reachable but the named database does not exist.
    #[error("no such database on host: {0}")]
    NoDbOnHost(String),

    /// A statement failed server-side. `sql` is the statement as sent.
    #[error("query failed: {message} (sql: {sql})")]
    Query { sql: String, message: String },

    /// Raw bytes for a character field could not be decoded.
    #[error("cannot decode field {field} as {encoding}")]
    Encoding { field: String, encoding: String },

    /// Any other server-side or driver error.
    #[error("database error: {0}")]
    Other(String),
}

impl Error {
    /// Classifies a driver error into the Dabo taxonomy.
    ///
    /// Statement-level failures keep the SQL that triggered them; broken
    /// connections are pulled out into [`Error::ConnectionLost`] since the
    /// caller's recovery differs (reconnect dialog vs. retry/cancel).
    pub(crate) fn from_sqlx(err: sqlx::Error, sql: Option<&str>) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.to_string()).unwrap_or_default();
                let message = db.message().to_string();
                // MySQL 1045 = access denied, 1049 = unknown database.
                if code == "1045" || code == "28000" {
                    return Error::Database(DatabaseError::NoAccess(message));
                }
                if code == "1049" || code == "3D000" {
                    return Error::Database(DatabaseError::NoDbOnHost(message));
                }
                match sql {
                    Some(sql) => Error::Database(DatabaseError::Query {
                        sql: sql.to_string(),
                        message,
                    }),
                    None => Error::Database(DatabaseError::Other(message)),
                }
            }
            sqlx::Error::Io(e) => Error::ConnectionLost(e.to_string()),
            sqlx::Error::PoolClosed => Error::ConnectionLost("connection pool closed".into()),
            sqlx::Error::PoolTimedOut => {
                Error::ConnectionLost("timed out waiting for a connection".into())
            }
            _ => match sql {
                Some(sql) => Error::Database(DatabaseError::Query {
                    sql: sql.to_string(),
                    message: err.to_string(),
                }),
                None => Error::Database(DatabaseError::Other(err.to_string())),
            },
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::from_sqlx(err, None)
    }
}
