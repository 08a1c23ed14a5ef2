use queryeer_core::{
    BufferedCursor, Catalog, Connection, ConnectionProfile, DatabaseInfo, DbDriver, DbError,
    DbKind, QueryResult, ResolvedCredential, StatementCursor, StatementResult,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Scripted outcome of one statement inside a batch.
#[derive(Debug, Clone)]
pub enum FakeStatement {
    Rows(QueryResult),
    Updated(u64),
    Error(String),
}

impl FakeStatement {
    fn into_result(self) -> Result<StatementResult, DbError> {
        match self {
            Self::Rows(result) => Ok(StatementResult::ResultSet(result)),
            Self::Updated(count) => Ok(StatementResult::UpdateCount(count)),
            Self::Error(message) => Err(DbError::query_failed(message)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeDriverStats {
    pub connect_calls: usize,
    pub executed_batches: Vec<String>,
    pub set_database_calls: Vec<String>,
    pub crawl_calls: usize,
    pub cancel_active_calls: usize,
    pub rollback_calls: usize,
    pub close_calls: usize,
    pub last_username: Option<String>,
}

struct FakeDriverState {
    databases: RwLock<Vec<String>>,
    default_database: RwLock<Option<String>>,
    failing_databases: RwLock<HashSet<String>>,
    fatal_databases: RwLock<HashSet<String>>,
    catalogs: RwLock<HashMap<String, Catalog>>,
    crawl_error: RwLock<Option<String>>,
    crawl_delay: RwLock<Duration>,
    connect_delay: RwLock<Duration>,
    batches: RwLock<HashMap<String, Vec<FakeStatement>>>,
    fatal_batches: RwLock<HashMap<String, String>>,
    connect_error: RwLock<Option<String>>,
    accepted_password: RwLock<Option<String>>,
    live: Mutex<Vec<Arc<AtomicBool>>>,
    executed_batches: Mutex<Vec<String>>,
    set_database_calls: Mutex<Vec<String>>,
    last_username: Mutex<Option<String>>,
    connect_calls: AtomicUsize,
    crawl_calls: AtomicUsize,
    cancel_active_calls: AtomicUsize,
    rollback_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl Default for FakeDriverState {
    fn default() -> Self {
        Self {
            databases: RwLock::new(vec!["main".to_string()]),
            default_database: RwLock::new(Some("main".to_string())),
            failing_databases: RwLock::default(),
            fatal_databases: RwLock::default(),
            catalogs: RwLock::default(),
            crawl_error: RwLock::default(),
            crawl_delay: RwLock::new(Duration::ZERO),
            connect_delay: RwLock::new(Duration::ZERO),
            batches: RwLock::default(),
            fatal_batches: RwLock::default(),
            connect_error: RwLock::default(),
            accepted_password: RwLock::default(),
            live: Mutex::default(),
            executed_batches: Mutex::default(),
            set_database_calls: Mutex::default(),
            last_username: Mutex::default(),
            connect_calls: AtomicUsize::new(0),
            crawl_calls: AtomicUsize::new(0),
            cancel_active_calls: AtomicUsize::new(0),
            rollback_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }
}

/// In-memory driver whose behaviour is scripted by the test.
///
/// Clones share state, so a test can keep a handle for `stats()` and
/// runtime toggles after registering the driver.
#[derive(Clone)]
pub struct FakeDriver {
    kind: DbKind,
    state: Arc<FakeDriverState>,
}

impl FakeDriver {
    pub fn new(kind: DbKind) -> Self {
        Self {
            kind,
            state: Arc::new(FakeDriverState::default()),
        }
    }

    /// Databases the server knows. The first one is the login default.
    pub fn with_databases(self, names: &[&str]) -> Self {
        *rwlock_write(&self.state.databases) = names.iter().map(|n| n.to_string()).collect();
        *rwlock_write(&self.state.default_database) = names.first().map(|n| n.to_string());
        self
    }

    pub fn with_catalog(self, catalog: Catalog) -> Self {
        rwlock_write(&self.state.catalogs).insert(catalog.database.clone(), catalog);
        self
    }

    pub fn with_crawl_error(self, message: impl Into<String>) -> Self {
        *rwlock_write(&self.state.crawl_error) = Some(message.into());
        self
    }

    pub fn with_crawl_delay(self, delay: Duration) -> Self {
        *rwlock_write(&self.state.crawl_delay) = delay;
        self
    }

    /// Makes every connect block for `delay`, like a slow login.
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *rwlock_write(&self.state.connect_delay) = delay;
        self
    }

    pub fn with_batch(self, text: impl Into<String>, statements: Vec<FakeStatement>) -> Self {
        rwlock_write(&self.state.batches).insert(text.into(), statements);
        self
    }

    /// Executing `text` fails with `message` and kills the connection.
    pub fn with_fatal_batch(self, text: impl Into<String>, message: impl Into<String>) -> Self {
        rwlock_write(&self.state.fatal_batches).insert(text.into(), message.into());
        self
    }

    pub fn with_connect_error(self, message: impl Into<String>) -> Self {
        *rwlock_write(&self.state.connect_error) = Some(message.into());
        self
    }

    /// Connections with any other password are rejected as bad credentials.
    pub fn with_accepted_password(self, password: impl Into<String>) -> Self {
        *rwlock_write(&self.state.accepted_password) = Some(password.into());
        self
    }

    pub fn with_failing_database(self, name: impl Into<String>) -> Self {
        rwlock_write(&self.state.failing_databases).insert(name.into());
        self
    }

    /// Selecting `name` fails and kills the connection.
    pub fn with_fatal_database(self, name: impl Into<String>) -> Self {
        rwlock_write(&self.state.fatal_databases).insert(name.into());
        self
    }

    pub fn set_crawl_error(&self, message: Option<String>) {
        *rwlock_write(&self.state.crawl_error) = message;
    }

    pub fn set_connect_error(&self, message: Option<String>) {
        *rwlock_write(&self.state.connect_error) = message;
    }

    pub fn set_catalog(&self, catalog: Catalog) {
        rwlock_write(&self.state.catalogs).insert(catalog.database.clone(), catalog);
    }

    /// Marks every connection opened so far as dead.
    pub fn kill_connections(&self) {
        for alive in mutex_lock(&self.state.live).iter() {
            alive.store(false, Ordering::SeqCst);
        }
    }

    pub fn stats(&self) -> FakeDriverStats {
        FakeDriverStats {
            connect_calls: self.state.connect_calls.load(Ordering::SeqCst),
            executed_batches: mutex_lock(&self.state.executed_batches).clone(),
            set_database_calls: mutex_lock(&self.state.set_database_calls).clone(),
            crawl_calls: self.state.crawl_calls.load(Ordering::SeqCst),
            cancel_active_calls: self.state.cancel_active_calls.load(Ordering::SeqCst),
            rollback_calls: self.state.rollback_calls.load(Ordering::SeqCst),
            close_calls: self.state.close_calls.load(Ordering::SeqCst),
            last_username: mutex_lock(&self.state.last_username).clone(),
        }
    }

    pub fn as_driver_arc(self) -> Arc<dyn DbDriver> {
        Arc::new(self)
    }
}

impl DbDriver for FakeDriver {
    fn kind(&self) -> DbKind {
        self.kind
    }

    fn connect(
        &self,
        profile: &ConnectionProfile,
        credential: Option<&ResolvedCredential>,
    ) -> Result<Box<dyn Connection>, DbError> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *rwlock_read(&self.state.connect_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        if let Some(message) = rwlock_read(&self.state.connect_error).clone() {
            return Err(DbError::connection_failed(message));
        }

        if let Some(credential) = credential {
            *mutex_lock(&self.state.last_username) = Some(credential.username.clone());
        }

        if let Some(accepted) = rwlock_read(&self.state.accepted_password).as_deref() {
            let given = credential.map(|c| c.password());
            if given != Some(accepted) {
                return Err(DbError::Credentials(format!(
                    "Login failed for '{}'",
                    profile.name
                )));
            }
        }

        let alive = Arc::new(AtomicBool::new(true));
        mutex_lock(&self.state.live).push(alive.clone());

        Ok(Box::new(FakeConnection {
            kind: self.kind,
            state: self.state.clone(),
            alive,
            database: RwLock::new(rwlock_read(&self.state.default_database).clone()),
        }))
    }
}

struct FakeConnection {
    kind: DbKind,
    state: Arc<FakeDriverState>,
    alive: Arc<AtomicBool>,
    database: RwLock<Option<String>>,
}

impl FakeConnection {
    fn ensure_alive(&self) -> Result<(), DbError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DbError::ConnectionLost("Fake connection is closed".to_string()))
        }
    }
}

impl Connection for FakeConnection {
    fn is_valid(&self, _timeout: Duration) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<(), DbError> {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&self) -> Result<(), DbError> {
        self.state.rollback_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_alive()
    }

    fn current_database(&self) -> Result<Option<String>, DbError> {
        self.ensure_alive()?;
        Ok(rwlock_read(&self.database).clone())
    }

    fn set_database(&self, name: &str) -> Result<(), DbError> {
        mutex_lock(&self.state.set_database_calls).push(name.to_string());
        self.ensure_alive()?;

        if rwlock_read(&self.state.fatal_databases).contains(name) {
            self.alive.store(false, Ordering::SeqCst);
            return Err(DbError::ConnectionLost(format!(
                "Server went away while opening \"{}\"",
                name
            )));
        }

        let known = rwlock_read(&self.state.databases).iter().any(|d| d == name);
        if !known || rwlock_read(&self.state.failing_databases).contains(name) {
            return Err(DbError::query_failed(format!(
                "Cannot open database \"{}\"",
                name
            )));
        }

        *rwlock_write(&self.database) = Some(name.to_string());
        Ok(())
    }

    fn list_databases(&self) -> Result<Vec<DatabaseInfo>, DbError> {
        self.ensure_alive()?;
        let current = rwlock_read(&self.database).clone();

        Ok(rwlock_read(&self.state.databases)
            .iter()
            .map(|name| DatabaseInfo {
                name: name.clone(),
                is_current: current.as_deref() == Some(name.as_str()),
            })
            .collect())
    }

    fn execute<'a>(&'a self, batch: &str) -> Result<Box<dyn StatementCursor + 'a>, DbError> {
        mutex_lock(&self.state.executed_batches).push(batch.to_string());
        self.ensure_alive()?;

        if let Some(message) = rwlock_read(&self.state.fatal_batches).get(batch).cloned() {
            self.alive.store(false, Ordering::SeqCst);
            return Err(DbError::ConnectionLost(message));
        }

        let statements = rwlock_read(&self.state.batches)
            .get(batch)
            .cloned()
            .unwrap_or_default();

        Ok(Box::new(BufferedCursor::new(
            statements
                .into_iter()
                .map(FakeStatement::into_result)
                .collect(),
        )))
    }

    fn cancel_active(&self) -> Result<(), DbError> {
        self.state.cancel_active_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn crawl_catalog(&self, database: &str) -> Result<Catalog, DbError> {
        self.state.crawl_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_alive()?;

        let delay = *rwlock_read(&self.state.crawl_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        if let Some(message) = rwlock_read(&self.state.crawl_error).clone() {
            return Err(DbError::CrawlFailed(message));
        }

        Ok(rwlock_read(&self.state.catalogs)
            .get(database)
            .cloned()
            .unwrap_or_else(|| Catalog::new(database, Vec::new())))
    }

    fn kind(&self) -> DbKind {
        self.kind
    }
}

fn rwlock_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

fn rwlock_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

fn mutex_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}
