use std::sync::Arc;
use std::time::Duration;

use queryeer_core::{
    Batch, ColumnMeta, Connection, ConnectionProfile, CredentialResolver, CryptoService, DbDriver,
    DbError, DbKind, NoPrompt, ObjectKind, QueryExecutor, QuerySession, RowWriter,
    StatementResult, Value,
};
use queryeer_driver_sqlite::SqliteDriver;

fn sqlite_profile(dir: &tempfile::TempDir) -> ConnectionProfile {
    let path = dir.path().join("test.sqlite");
    ConnectionProfile::new("live-sqlite", DbKind::Sqlite, path.display().to_string())
}

fn connect_sqlite(dir: &tempfile::TempDir) -> Result<Box<dyn Connection>, DbError> {
    let connection = SqliteDriver::new().connect(&sqlite_profile(dir), None)?;
    assert!(connection.is_valid(Duration::from_secs(1)));
    Ok(connection)
}

fn run_all(connection: &dyn Connection, batch: &str) -> Result<Vec<StatementResult>, DbError> {
    let mut cursor = connection.execute(batch)?;
    let mut results = Vec::new();
    while let Some(result) = cursor.next_result()? {
        results.push(result);
    }
    Ok(results)
}

// ---------------------------------------------------------------------------
// Statement execution
// ---------------------------------------------------------------------------

#[test]
fn sqlite_batch_yields_update_counts_and_result_sets() -> Result<(), DbError> {
    let dir = tempfile::tempdir()?;
    let connection = connect_sqlite(&dir)?;

    let results = run_all(
        connection.as_ref(),
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         INSERT INTO users (name) VALUES ('alice'), ('bob');
         SELECT id, name FROM users ORDER BY id;",
    )?;

    assert_eq!(results.len(), 3);
    assert_eq!(results[1], StatementResult::UpdateCount(2));

    match &results[2] {
        StatementResult::ResultSet(result) => {
            assert_eq!(
                result.columns,
                vec![
                    ColumnMeta::new("id", "INTEGER"),
                    ColumnMeta::new("name", "TEXT")
                ]
            );
            assert_eq!(result.rows[1], vec![Value::Int(2), Value::from("bob")]);
        }
        other => panic!("expected a result set, got {:?}", other),
    }

    Ok(())
}

#[test]
fn sqlite_error_stops_the_batch_at_the_failing_statement() -> Result<(), DbError> {
    let dir = tempfile::tempdir()?;
    let connection = connect_sqlite(&dir)?;

    let mut cursor = connection.execute("SELECT 1; SELECT * FROM missing; SELECT 3")?;
    assert!(cursor.next_result()?.is_some());

    match cursor.next_result() {
        Err(DbError::QueryFailed(message)) => assert!(message.contains("missing")),
        other => panic!("expected query failure, got {:?}", other.map(|_| ())),
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Databases and catalog
// ---------------------------------------------------------------------------

#[test]
fn sqlite_attached_schemas_act_as_databases() -> Result<(), DbError> {
    let dir = tempfile::tempdir()?;
    let connection = connect_sqlite(&dir)?;
    let other = dir.path().join("other.sqlite");

    assert_eq!(connection.current_database()?.as_deref(), Some("main"));
    assert!(connection.set_database("audit").is_err());

    run_all(
        connection.as_ref(),
        &format!("ATTACH DATABASE '{}' AS audit", other.display()),
    )?;
    connection.set_database("audit")?;

    assert_eq!(connection.current_database()?.as_deref(), Some("audit"));
    let databases = connection.list_databases()?;
    assert!(databases.iter().any(|d| d.name == "audit" && d.is_current));
    assert!(databases.iter().any(|d| d.name == "main" && !d.is_current));

    Ok(())
}

#[test]
fn sqlite_crawl_lists_tables_views_columns_and_indexes() -> Result<(), DbError> {
    let dir = tempfile::tempdir()?;
    let connection = connect_sqlite(&dir)?;

    run_all(
        connection.as_ref(),
        "CREATE TABLE test_users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            email TEXT UNIQUE
         );
         CREATE INDEX idx_users_name ON test_users (name);
         CREATE VIEW active_users AS SELECT id, name FROM test_users;",
    )?;

    let catalog = connection.crawl_catalog("main")?;
    assert_eq!(catalog.database, "main");
    assert_eq!(catalog.object_count(), 2);

    let users = catalog
        .find_object(None, "TEST_USERS")
        .expect("table should be crawled");
    assert_eq!(users.kind, ObjectKind::Table);
    assert_eq!(users.columns.len(), 3);
    assert!(users.columns[0].is_primary_key);
    assert!(!users.columns[1].nullable);
    assert!(users.indexes.iter().any(|i| i == "idx_users_name"));

    let view = catalog
        .find_object(Some("main"), "active_users")
        .expect("view should be crawled");
    assert_eq!(view.kind, ObjectKind::View);
    assert_eq!(view.columns.len(), 2);

    assert!(matches!(
        connection.crawl_catalog("nope"),
        Err(DbError::CrawlFailed(_))
    ));

    Ok(())
}

// ---------------------------------------------------------------------------
// Session and executor over a real database
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CollectingWriter {
    rows: Vec<Vec<(String, Value)>>,
    current: Vec<(String, Value)>,
    pending_field: Option<String>,
    messages: Vec<String>,
    errors: Vec<(usize, String)>,
}

impl RowWriter for CollectingWriter {
    fn start_result_set(&mut self, _columns: &[ColumnMeta]) {}

    fn start_row(&mut self) {
        self.current.clear();
    }

    fn write_field_name(&mut self, name: &str) {
        self.pending_field = Some(name.to_string());
    }

    fn write_value(&mut self, value: &Value) {
        let field = self.pending_field.take().unwrap_or_default();
        self.current.push((field, value.clone()));
    }

    fn end_row(&mut self) {
        self.rows.push(std::mem::take(&mut self.current));
    }

    fn end_result_set(&mut self, _row_count: usize) {}

    fn message(&mut self, text: &str) {
        self.messages.push(text.to_string());
    }

    fn error(&mut self, batch: &Batch, error: &DbError) {
        self.errors.push((batch.start_line, error.to_string()));
    }
}

#[test]
fn sqlite_session_executes_script_and_reports_errors() -> Result<(), DbError> {
    let dir = tempfile::tempdir()?;
    let resolver = Arc::new(CredentialResolver::new(
        Arc::new(CryptoService::new()),
        Arc::new(NoPrompt),
    ));
    let session = QuerySession::new(
        sqlite_profile(&dir),
        Arc::new(SqliteDriver::new()),
        resolver,
        Duration::from_secs(1),
    );

    let mut writer = CollectingWriter::default();
    let summary = QueryExecutor::execute(
        &session,
        "CREATE TABLE t (x INTEGER);\nINSERT INTO t VALUES (7);\nSELECT x FROM t;",
        &mut writer,
    )?;

    assert_eq!(summary.batches, 1);
    assert_eq!(summary.rows, 1);
    assert_eq!(summary.rows_affected, 1);
    assert_eq!(writer.rows, vec![vec![("x".to_string(), Value::Int(7))]]);
    assert_eq!(session.database().as_deref(), Some("main"));

    let mut writer = CollectingWriter::default();
    let summary = QueryExecutor::execute(&session, "SELECT * FROM nowhere", &mut writer)?;
    assert_eq!(summary.errors, 1);
    assert_eq!(writer.errors.len(), 1);
    assert!(writer.errors[0].1.contains("nowhere"));

    session.close();
    Ok(())
}
