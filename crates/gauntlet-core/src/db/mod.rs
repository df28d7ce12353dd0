//! The provenance index: a SQLite database linking teams, engines,
//! solutions, configured solutions, datasets, challenge problems,
//! evaluators, runs and evaluations.

pub mod deps;
pub mod model;
pub mod registry;
pub mod schema;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Context;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Transaction};
use tracing::debug;

use crate::errors::Fatal;

pub struct Index {
    conn: Mutex<Connection>,
    in_session: AtomicBool,
}

impl Index {
    pub fn open(path: &Path) -> anyhow::Result<Index> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open index at {}", path.display()))?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Index {
            conn: Mutex::new(conn),
            in_session: AtomicBool::new(false),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Index> {
        let conn = Connection::open_in_memory().context("failed to open in-memory index")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Index {
            conn: Mutex::new(conn),
            in_session: AtomicBool::new(false),
        })
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(schema::DDL)?;
        Ok(())
    }

    /// Runs `body` inside one transaction. Commits on `Ok`, rolls back on
    /// `Err`. Exactly one session may be active per process; nested entry
    /// is a usage error ([`Fatal::NotReentrant`]), reported distinctly
    /// from any constraint violation.
    pub fn session<T>(
        &self,
        body: impl FnOnce(&Session<'_>) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        if self.in_session.swap(true, Ordering::SeqCst) {
            return Err(Fatal::NotReentrant.into());
        }
        let result = (|| {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            let session = Session { tx: &tx };
            match body(&session) {
                Ok(value) => {
                    tx.commit()?;
                    Ok(value)
                }
                // Dropping the transaction rolls it back.
                Err(err) => Err(err),
            }
        })();
        self.in_session.store(false, Ordering::SeqCst);
        result
    }
}

/// One active transaction over the index. Registry operations and the
/// dependency walkers all take a `&Session`.
pub struct Session<'a> {
    tx: &'a Transaction<'a>,
}

impl<'a> Session<'a> {
    pub(crate) fn tx(&self) -> &Transaction<'a> {
        self.tx
    }

    /// Existence check used both for foreign-key validation and for
    /// idempotent "already registered, skip" logic.
    pub fn contains(&self, table: &str, filters: &[(&str, Value)]) -> anyhow::Result<bool> {
        let clause = filters
            .iter()
            .enumerate()
            .map(|(i, (col, _))| format!("{col} = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!("SELECT 1 FROM {table} WHERE {clause} LIMIT 1");
        let found = self
            .tx
            .query_row(
                &sql,
                rusqlite::params_from_iter(filters.iter().map(|(_, v)| v.clone())),
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Returns `value` when `table.column = value` resolves to a row, and
    /// a named [`Fatal::ForeignKey`] otherwise. Inserts validate their
    /// references through this before touching the database, so the SQL
    /// foreign-key machinery only ever fires as a second line of defense.
    pub fn require_foreign_key(
        &self,
        table: &'static str,
        column: &str,
        value: Value,
    ) -> anyhow::Result<Value> {
        if self.contains(table, &[(column, value.clone())])? {
            debug!(table, column, "foreign key resolved");
            Ok(value)
        } else {
            Err(Fatal::ForeignKey {
                table,
                key: display_value(&value),
            }
            .into())
        }
    }
}

pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(t) => t.clone(),
        Value::Blob(b) => hex::encode(b),
    }
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
