use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, TryLockError};
use std::time::Duration;

use queryeer_core::{
    Catalog, CatalogColumn, CatalogObject, CatalogSchema, ColumnMeta, Connection,
    ConnectionProfile, DatabaseInfo, DbDriver, DbError, DbKind, ObjectKind, QueryResult,
    ResolvedCredential, Row, StatementCursor, StatementResult, Value,
};
use rusqlite::{Connection as RusqliteConnection, InterruptHandle};

use crate::statements::split_statements;

const DEFAULT_SCHEMA: &str = "main";

pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DbDriver for SqliteDriver {
    fn kind(&self) -> DbKind {
        DbKind::Sqlite
    }

    fn connect(
        &self,
        profile: &ConnectionProfile,
        _credential: Option<&ResolvedCredential>,
    ) -> Result<Box<dyn Connection>, DbError> {
        let path = database_path(profile)?;

        let conn = RusqliteConnection::open(&path)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        conn.busy_timeout(profile.read_timeout().unwrap_or(profile.connect_timeout()))
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        let interrupt_handle = conn.get_interrupt_handle();
        log::info!("Opened SQLite database {}", path.display());

        Ok(Box::new(SqliteConnection {
            conn: Mutex::new(Some(conn)),
            interrupt_handle,
            cancelled: AtomicBool::new(false),
            schema: RwLock::new(DEFAULT_SCHEMA.to_string()),
            path,
        }))
    }
}

fn database_path(profile: &ConnectionProfile) -> Result<PathBuf, DbError> {
    let endpoint = profile.endpoint.trim();
    let endpoint = endpoint.strip_prefix("sqlite://").unwrap_or(endpoint);

    if endpoint.is_empty() {
        return Err(DbError::InvalidProfile(
            "SQLite file path is required".to_string(),
        ));
    }

    Ok(PathBuf::from(endpoint))
}

pub struct SqliteConnection {
    conn: Mutex<Option<RusqliteConnection>>,
    interrupt_handle: InterruptHandle,
    cancelled: AtomicBool,
    /// Attached schema that catalog requests default to.
    schema: RwLock<String>,
    path: PathBuf,
}

impl SqliteConnection {
    fn lock(&self) -> Result<MutexGuard<'_, Option<RusqliteConnection>>, DbError> {
        self.conn
            .lock()
            .map_err(|e| DbError::QueryFailed(format!("Lock error: {}", e)))
    }

    fn attached_schemas(&self, conn: &RusqliteConnection) -> Result<Vec<String>, DbError> {
        let mut stmt = conn
            .prepare("PRAGMA database_list")
            .map_err(|e| format_sqlite_query_error(&e))?;

        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(|e| format_sqlite_query_error(&e))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(names)
    }

    fn tracked_schema(&self) -> String {
        match self.schema.read() {
            Ok(guard) => guard.clone(),
            Err(poison_err) => poison_err.into_inner().clone(),
        }
    }

    fn get_objects(
        &self,
        conn: &RusqliteConnection,
        schema: &str,
    ) -> Result<Vec<CatalogObject>, DbError> {
        let sql = format!(
            "SELECT name, type FROM {}.sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name",
            sqlite_quote_ident(schema)
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| format_sqlite_query_error(&e))?;

        let entries: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| format_sqlite_query_error(&e))?
            .filter_map(|r| r.ok())
            .collect();

        let mut objects = Vec::with_capacity(entries.len());
        for (name, object_type) in entries {
            let kind = if object_type == "view" {
                ObjectKind::View
            } else {
                ObjectKind::Table
            };

            let mut object = CatalogObject::new(name, kind);
            object.columns = self.get_columns(conn, schema, &object.name)?;
            if kind == ObjectKind::Table {
                object.indexes = self.get_indexes(conn, schema, &object.name)?;
            }
            objects.push(object);
        }

        Ok(objects)
    }

    fn get_columns(
        &self,
        conn: &RusqliteConnection,
        schema: &str,
        table: &str,
    ) -> Result<Vec<CatalogColumn>, DbError> {
        let sql = format!(
            "PRAGMA {}.table_info({})",
            sqlite_quote_ident(schema),
            sqlite_quote_ident(table)
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| format_sqlite_query_error(&e))?;

        let columns = stmt
            .query_map([], |row| {
                Ok(CatalogColumn {
                    name: row.get(1)?,
                    type_name: row.get::<_, String>(2).unwrap_or_default(),
                    nullable: row.get::<_, i32>(3).unwrap_or(0) == 0,
                    is_primary_key: row.get::<_, i32>(5).unwrap_or(0) > 0,
                })
            })
            .map_err(|e| format_sqlite_query_error(&e))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(columns)
    }

    fn get_indexes(
        &self,
        conn: &RusqliteConnection,
        schema: &str,
        table: &str,
    ) -> Result<Vec<String>, DbError> {
        let sql = format!(
            "PRAGMA {}.index_list({})",
            sqlite_quote_ident(schema),
            sqlite_quote_ident(table)
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| format_sqlite_query_error(&e))?;

        let indexes = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(|e| format_sqlite_query_error(&e))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(indexes)
    }
}

impl Connection for SqliteConnection {
    fn is_valid(&self, _timeout: Duration) -> bool {
        let guard = match self.conn.try_lock() {
            Ok(guard) => guard,
            // A statement is running on it, so it is alive.
            Err(TryLockError::WouldBlock) => return true,
            Err(TryLockError::Poisoned(_)) => return false,
        };

        match guard.as_ref() {
            Some(conn) => conn.execute_batch("SELECT 1").is_ok(),
            None => false,
        }
    }

    fn close(&self) -> Result<(), DbError> {
        let conn = self.lock()?.take();

        match conn {
            Some(conn) => conn.close().map_err(|(_, e)| {
                DbError::ConnectionFailed(format!("Failed to close {}: {}", self.path.display(), e))
            }),
            None => Ok(()),
        }
    }

    fn rollback(&self) -> Result<(), DbError> {
        let guard = self.lock()?;
        let Some(conn) = guard.as_ref() else {
            return Ok(());
        };

        if conn.is_autocommit() {
            return Ok(());
        }

        log::info!("Rolling back open transaction on {}", self.path.display());
        conn.execute_batch("ROLLBACK")
            .map_err(|e| format_sqlite_query_error(&e))
    }

    fn current_database(&self) -> Result<Option<String>, DbError> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or_else(closed_error)?;

        let schema = self.tracked_schema();
        if self.attached_schemas(conn)?.contains(&schema) {
            Ok(Some(schema))
        } else {
            Ok(Some(DEFAULT_SCHEMA.to_string()))
        }
    }

    fn set_database(&self, name: &str) -> Result<(), DbError> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or_else(closed_error)?;

        if !self.attached_schemas(conn)?.iter().any(|s| s == name) {
            return Err(DbError::query_failed(format!(
                "Unknown database '{}'",
                name
            )));
        }

        match self.schema.write() {
            Ok(mut schema) => *schema = name.to_string(),
            Err(poison_err) => *poison_err.into_inner() = name.to_string(),
        }
        Ok(())
    }

    fn list_databases(&self) -> Result<Vec<DatabaseInfo>, DbError> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or_else(closed_error)?;
        let current = self.tracked_schema();

        Ok(self
            .attached_schemas(conn)?
            .into_iter()
            .map(|name| DatabaseInfo {
                is_current: name == current,
                name,
            })
            .collect())
    }

    fn execute<'a>(&'a self, batch: &str) -> Result<Box<dyn StatementCursor + 'a>, DbError> {
        self.cancelled.store(false, Ordering::SeqCst);

        let guard = self.lock()?;
        if guard.is_none() {
            return Err(closed_error());
        }

        Ok(Box::new(SqliteCursor {
            conn: guard,
            statements: split_statements(batch).into(),
            cancelled: &self.cancelled,
        }))
    }

    fn cancel_active(&self) -> Result<(), DbError> {
        self.cancelled.store(true, Ordering::SeqCst);
        self.interrupt_handle.interrupt();
        log::info!("[CANCEL] SQLite interrupt signal sent");
        Ok(())
    }

    fn crawl_catalog(&self, database: &str) -> Result<Catalog, DbError> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or_else(closed_error)?;

        if !self.attached_schemas(conn)?.iter().any(|s| s == database) {
            return Err(DbError::CrawlFailed(format!(
                "Unknown database '{}'",
                database
            )));
        }

        let objects = self.get_objects(conn, database)?;
        log::debug!(
            "Crawled {} objects from {} ({})",
            objects.len(),
            database,
            self.path.display()
        );

        Ok(Catalog::new(
            database,
            vec![CatalogSchema {
                name: database.to_string(),
                objects,
            }],
        ))
    }

    fn kind(&self) -> DbKind {
        DbKind::Sqlite
    }
}

/// Runs one statement per `next_result` call while holding the connection.
struct SqliteCursor<'a> {
    conn: MutexGuard<'a, Option<RusqliteConnection>>,
    statements: VecDeque<String>,
    cancelled: &'a AtomicBool,
}

impl SqliteCursor<'_> {
    fn run(&self, conn: &RusqliteConnection, sql: &str) -> Result<StatementResult, DbError> {
        let mut stmt = conn.prepare(sql).map_err(|e| self.error(&e))?;

        let column_count = stmt.column_count();
        if column_count == 0 {
            let changed = stmt.execute([]).map_err(|e| self.error(&e))?;
            return Ok(StatementResult::UpdateCount(changed as u64));
        }

        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows: Vec<Row> = Vec::new();
        let mut query_rows = stmt.query([]).map_err(|e| self.error(&e))?;

        loop {
            match query_rows.next() {
                Ok(Some(row)) => {
                    let mut values: Vec<Value> = Vec::with_capacity(column_count);
                    for i in 0..column_count {
                        values.push(sqlite_value_to_value(row, i));
                    }
                    rows.push(values);
                }
                Ok(None) => break,
                Err(e) => return Err(self.error(&e)),
            }
        }

        let columns = names
            .into_iter()
            .enumerate()
            .map(|(idx, name)| ColumnMeta::new(name, observed_type(&rows, idx)))
            .collect();

        Ok(StatementResult::ResultSet(QueryResult::new(columns, rows)))
    }

    fn error(&self, e: &rusqlite::Error) -> DbError {
        if self.cancelled.load(Ordering::SeqCst) || is_interrupt(e) {
            log::info!("[QUERY] SQLite query was interrupted");
            return DbError::Cancelled;
        }
        format_sqlite_query_error(e)
    }
}

impl StatementCursor for SqliteCursor<'_> {
    fn next_result(&mut self) -> Result<Option<StatementResult>, DbError> {
        let Some(sql) = self.statements.pop_front() else {
            return Ok(None);
        };

        let conn = self.conn.as_ref().ok_or_else(closed_error)?;
        self.run(conn, &sql).map(Some)
    }
}

/// Storage class of the first non-null value in column `idx`.
fn observed_type(rows: &[Row], idx: usize) -> &'static str {
    rows.iter()
        .filter_map(|row| row.get(idx))
        .find(|value| !value.is_null())
        .map(|value| match value {
            Value::Int(_) | Value::Bool(_) => "INTEGER",
            Value::Float(_) => "REAL",
            Value::Bytes(_) => "BLOB",
            Value::Text(_) | Value::Null => "TEXT",
        })
        .unwrap_or("TEXT")
}

fn sqlite_value_to_value(row: &rusqlite::Row, idx: usize) -> Value {
    use rusqlite::types::ValueRef;

    match row.get_ref(idx) {
        Ok(ValueRef::Null) => Value::Null,
        Ok(ValueRef::Integer(i)) => Value::Int(i),
        Ok(ValueRef::Real(f)) => Value::Float(f),
        Ok(ValueRef::Text(t)) => Value::Text(String::from_utf8_lossy(t).to_string()),
        Ok(ValueRef::Blob(b)) => Value::Bytes(b.to_vec()),
        Err(_) => Value::Null,
    }
}

fn is_interrupt(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::OperationInterrupted
    )
}

fn format_sqlite_error(e: &rusqlite::Error) -> String {
    match e {
        rusqlite::Error::SqliteFailure(err, msg) => {
            let message = msg.clone().unwrap_or_else(|| format!("{:?}", err.code));
            format!("{} [{:?} ({})]", message, err.code, err.extended_code)
        }
        _ => e.to_string(),
    }
}

fn format_sqlite_query_error(e: &rusqlite::Error) -> DbError {
    let message = format_sqlite_error(e);
    log::error!("SQLite query failed: {}", message);
    DbError::QueryFailed(message)
}

fn closed_error() -> DbError {
    DbError::ConnectionLost("SQLite connection is closed".to_string())
}

fn sqlite_quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_connection() -> Box<dyn Connection> {
        let profile = ConnectionProfile::new("mem", DbKind::Sqlite, ":memory:");
        SqliteDriver::new().connect(&profile, None).unwrap()
    }

    #[test]
    fn blank_path_is_rejected() {
        let profile = ConnectionProfile::new("blank", DbKind::Sqlite, "  ");
        assert!(matches!(
            SqliteDriver::new().connect(&profile, None),
            Err(DbError::InvalidProfile(_))
        ));
    }

    #[test]
    fn sqlite_scheme_prefix_is_stripped() {
        let profile = ConnectionProfile::new("file", DbKind::Sqlite, "sqlite:///tmp/app.db");
        assert_eq!(
            database_path(&profile).unwrap(),
            PathBuf::from("/tmp/app.db")
        );
    }

    #[test]
    fn observed_type_skips_nulls() {
        let rows = vec![vec![Value::Null], vec![Value::Float(1.5)]];
        assert_eq!(observed_type(&rows, 0), "REAL");
        assert_eq!(observed_type(&[], 0), "TEXT");
    }

    #[test]
    fn closed_connection_is_invalid() {
        let connection = memory_connection();
        assert!(connection.is_valid(Duration::from_secs(1)));

        connection.close().unwrap();
        assert!(!connection.is_valid(Duration::from_secs(1)));
        assert!(matches!(
            connection.execute("select 1"),
            Err(DbError::ConnectionLost(_))
        ));
    }

    #[test]
    fn rollback_discards_open_transaction() {
        let connection = memory_connection();
        {
            let mut cursor = connection
                .execute("create table t (x integer); begin; insert into t values (1);")
                .unwrap();
            while cursor.next_result().unwrap().is_some() {}
        }

        connection.rollback().unwrap();

        let mut cursor = connection.execute("select count(*) from t").unwrap();
        match cursor.next_result().unwrap() {
            Some(StatementResult::ResultSet(result)) => {
                assert_eq!(result.rows, vec![vec![Value::Int(0)]]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
