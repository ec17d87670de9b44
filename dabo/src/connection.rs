//! # Connection Module
//!
//! Connection info records and the live connection handle. A
//! [`Connection`] wraps a sqlx `Any` pool capped at one physical
//! connection — a bizobj tree is a single interactive session, and the
//! identity-retrieval statements only make sense on the connection that
//! ran the INSERT. The pool connects lazily: constructing a `Connection`
//! validates nothing beyond the URL, and authentication errors surface on
//! the first fetch.

// ============================================================================
// External Crate Imports
// ============================================================================

use std::sync::{Arc, Mutex, Once};

use log::debug;
use serde::{Deserialize, Serialize};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

// ============================================================================
// Internal Crate Imports
// ============================================================================

use crate::backend::{backend_for, Backend};
use crate::error::Error;
use crate::value::{decode_row, Value};

// ============================================================================
// ConnectionInfo
// ============================================================================

/// Everything needed to reach one database. Immutable after construction;
/// nothing is validated until a connection is actually requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub db_type: String,
    pub host: String,
    pub user: String,
    pub password: String,
    pub db_name: String,
    pub port: Option<u16>,
}

impl ConnectionInfo {
    pub fn new(
        db_type: impl Into<String>,
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        db_name: impl Into<String>,
        port: Option<u16>,
    ) -> Self {
        Self {
            db_type: db_type.into(),
            host: host.into(),
            user: user.into(),
            password: password.into(),
            db_name: db_name.into(),
            port,
        }
    }

    /// Registry key for this definition, `user@host`.
    pub fn registry_key(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A live (lazily opened) database connection shared across a bizobj tree.
///
/// Cloning is cheap: the pool and the statement log are shared. The
/// statement log records every statement dispatched, in order, which the
/// test suite leans on to assert save-protocol ordering.
#[derive(Clone)]
pub struct Connection {
    backend: Arc<dyn Backend>,
    pool: AnyPool,
    log: Arc<Mutex<Vec<String>>>,
}

impl Connection {
    /// Opens a connection for the given definition.
    ///
    /// "Opens" loosely: the pool is created lazily, so a wrong password
    /// shows up as `DBNoAccess` on the first statement, not here.
    pub fn open(info: &ConnectionInfo) -> Result<Self, Error> {
        static DRIVERS: Once = Once::new();
        DRIVERS.call_once(sqlx::any::install_default_drivers);
        let backend = backend_for(&info.db_type)?;
        let url = backend.url(info);
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect_lazy(&url)?;
        Ok(Self {
            backend,
            pool,
            log: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// The dialect adapter behind this connection.
    pub fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.backend)
    }

    /// Closes the connection. Safe to call more than once.
    pub async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    fn record(&self, sql: &str) {
        debug!("SQL: {sql}");
        if let Ok(mut log) = self.log.lock() {
            log.push(sql.to_string());
        }
    }

    /// Statements dispatched so far, in order.
    pub fn statement_log(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn clear_statement_log(&self) {
        if let Ok(mut log) = self.log.lock() {
            log.clear();
        }
    }

    /// Runs a SELECT and returns the column names plus every row decoded
    /// into [`Value`]s — the dict-cursor shape the bizobj consumes.
    pub async fn fetch(&self, sql: &str) -> Result<(Vec<String>, Vec<Vec<Value>>), Error> {
        self.record(sql);
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx(e, Some(sql)))?;
        let mut columns = Vec::new();
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let (names, values) = decode_row(row)?;
            if columns.is_empty() {
                columns = names;
            }
            out.push(values);
        }
        Ok((columns, out))
    }

    /// Runs a statement outside any transaction; returns rows affected.
    pub async fn execute(&self, sql: &str) -> Result<u64, Error> {
        self.record(sql);
        let result = sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx(e, Some(sql)))?;
        Ok(result.rows_affected())
    }

    /// Runs a single-value query (identity retrieval).
    pub async fn fetch_scalar_i64(&self, sql: &str) -> Result<Option<i64>, Error> {
        self.record(sql);
        let row = sqlx::query(sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx(e, Some(sql)))?;
        match row {
            Some(row) => Ok(crate::value::decode_column(&row, 0)?.as_int()),
            None => Ok(None),
        }
    }

    /// Starts a transaction on the underlying connection.
    pub async fn begin(&self) -> Result<DbTransaction, Error> {
        let tx = self.pool.begin().await.map_err(Error::from)?;
        Ok(DbTransaction {
            tx,
            log: Arc::clone(&self.log),
        })
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("backend", &self.backend.name())
            .field("closed", &self.pool.is_closed())
            .finish()
    }
}

// ============================================================================
// DbTransaction
// ============================================================================

/// A transaction over the shared connection. Dropping without commit
/// rolls back, but the save protocol always resolves it explicitly.
pub struct DbTransaction {
    tx: sqlx::Transaction<'static, sqlx::Any>,
    log: Arc<Mutex<Vec<String>>>,
}

impl DbTransaction {
    fn record(&self, sql: &str) {
        debug!("SQL (tx): {sql}");
        if let Ok(mut log) = self.log.lock() {
            log.push(sql.to_string());
        }
    }

    pub async fn execute(&mut self, sql: &str) -> Result<u64, Error> {
        self.record(sql);
        let result = sqlx::query(sql)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| Error::from_sqlx(e, Some(sql)))?;
        Ok(result.rows_affected())
    }

    pub async fn fetch_scalar_i64(&mut self, sql: &str) -> Result<Option<i64>, Error> {
        self.record(sql);
        let row = sqlx::query(sql)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| Error::from_sqlx(e, Some(sql)))?;
        match row {
            Some(row) => Ok(crate::value::decode_column(&row, 0)?.as_int()),
            None => Ok(None),
        }
    }

    pub async fn commit(self) -> Result<(), Error> {
        self.tx.commit().await.map_err(Error::from)
    }

    pub async fn rollback(self) -> Result<(), Error> {
        self.tx.rollback().await.map_err(Error::from)
    }
}

// ============================================================================
// WriteSink
// ============================================================================

/// Where a save sends its statements: a transaction when the backend
/// supports them, the bare connection otherwise.
pub(crate) enum WriteSink {
    Tx(DbTransaction),
    Direct(Connection),
}

impl WriteSink {
    pub(crate) async fn for_connection(conn: &Connection) -> Result<Self, Error> {
        if conn.backend().supports_transactions() {
            Ok(WriteSink::Tx(conn.begin().await?))
        } else {
            Ok(WriteSink::Direct(conn.clone()))
        }
    }

    pub(crate) async fn execute(&mut self, sql: &str) -> Result<u64, Error> {
        match self {
            WriteSink::Tx(tx) => tx.execute(sql).await,
            WriteSink::Direct(conn) => conn.execute(sql).await,
        }
    }

    pub(crate) async fn fetch_scalar_i64(&mut self, sql: &str) -> Result<Option<i64>, Error> {
        match self {
            WriteSink::Tx(tx) => tx.fetch_scalar_i64(sql).await,
            WriteSink::Direct(conn) => conn.fetch_scalar_i64(sql).await,
        }
    }

    pub(crate) async fn commit(self) -> Result<(), Error> {
        match self {
            WriteSink::Tx(tx) => tx.commit().await,
            WriteSink::Direct(_) => Ok(()),
        }
    }

    pub(crate) async fn rollback(self) -> Result<(), Error> {
        match self {
            WriteSink::Tx(tx) => tx.rollback().await,
            WriteSink::Direct(_) => Ok(()),
        }
    }
}
