use crate::{
    CancelToken, Catalog, CatalogCrawler, CatalogKey, Connection, ConnectionProfile,
    CredentialResolver, DbDriver, DbError, TaskKind, WorkerPool,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Aborting,
}

struct Live {
    connection: Option<Arc<dyn Connection>>,
    database: Option<String>,
    state: SessionState,
}

/// Connection state of one query editor.
///
/// Owns at most one live transport connection and the database the user
/// selected on it. The connection is re-validated before use and recreated
/// when it has gone away. Once closed, the session never connects again.
///
/// `live` is only held for bookkeeping. Validation, connect and database
/// switches run outside it, serialized by `connecting`, so `abort` and the
/// state getters never wait on network I/O.
pub struct QuerySession {
    id: Uuid,
    profile: RwLock<Arc<ConnectionProfile>>,
    driver: Arc<dyn DbDriver>,
    resolver: Arc<CredentialResolver>,
    pool: Option<Arc<WorkerPool>>,
    validation_timeout: Duration,
    live: Mutex<Live>,
    connecting: Mutex<()>,
    closed: AtomicBool,
    abort: CancelToken,
}

impl QuerySession {
    pub fn new(
        profile: ConnectionProfile,
        driver: Arc<dyn DbDriver>,
        resolver: Arc<CredentialResolver>,
        validation_timeout: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            profile: RwLock::new(Arc::new(profile)),
            driver,
            resolver,
            pool: None,
            validation_timeout,
            live: Mutex::new(Live {
                connection: None,
                database: None,
                state: SessionState::Disconnected,
            }),
            connecting: Mutex::new(()),
            closed: AtomicBool::new(false),
            abort: CancelToken::new(),
        }
    }

    /// Tears down replaced connections on `pool` instead of inline.
    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Snapshot of the profile this session connects with.
    pub fn profile(&self) -> Arc<ConnectionProfile> {
        match self.profile.read() {
            Ok(guard) => guard.clone(),
            Err(poison_err) => {
                log::warn!("Session profile lock poisoned, recovering...");
                poison_err.into_inner().clone()
            }
        }
    }

    /// Replaces the profile used by later connects and credential lookups.
    /// The profile must be the one this session was opened for.
    pub fn update_profile(&self, profile: ConnectionProfile) {
        if profile.id != self.profile().id {
            log::warn!(
                "Ignoring profile '{}' for a session of another connection",
                profile.name
            );
            return;
        }

        match self.profile.write() {
            Ok(mut guard) => *guard = Arc::new(profile),
            Err(poison_err) => *poison_err.into_inner() = Arc::new(profile),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        self.live().state
    }

    /// Database tracked for this session, if any.
    pub fn database(&self) -> Option<String> {
        self.live().database.clone()
    }

    pub fn catalog_key(&self, database: &str) -> CatalogKey {
        CatalogKey::new(self.profile().endpoint.clone(), database)
    }

    pub fn validation_timeout(&self) -> Duration {
        self.validation_timeout
    }

    pub(crate) fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    /// Returns a validated connection, reconnecting if the current one is
    /// gone. Fails with [`DbError::ConnectionLost`] once the session is
    /// closed.
    pub fn get_connection(&self) -> Result<Arc<dyn Connection>, DbError> {
        let _connecting = self.connecting();
        self.ensure_connection()
    }

    fn ensure_connection(&self) -> Result<Arc<dyn Connection>, DbError> {
        let (current, tracked) = {
            let live = self.live();
            self.check_open()?;
            (live.connection.clone(), live.database.clone())
        };

        if let Some(connection) = current {
            if connection.is_valid(self.validation_timeout) {
                return Ok(connection);
            }

            log::warn!(
                "Connection of '{}' is no longer valid, reconnecting",
                self.profile().name
            );
            let stale = self.live().connection.take();
            if let Some(stale) = stale {
                self.teardown(stale);
            }
        }

        {
            let mut live = self.live();
            self.check_open()?;
            live.state = SessionState::Connecting;
        }

        let opened = self.open(tracked);

        let mut live = self.live();
        match opened {
            Ok((connection, _)) if self.is_closed() => {
                drop(live);
                close_quietly(&self.profile().name, connection.as_ref());
                Err(self.closed_error())
            }
            Ok((connection, database)) => {
                live.connection = Some(connection.clone());
                live.database = database;
                live.state = SessionState::Connected;
                Ok(connection)
            }
            Err(e) => {
                live.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Switches the live connection to `name`.
    ///
    /// On failure the tracked database falls back to what the connection
    /// reports. The error is returned only while the connection is still
    /// valid; a dead connection keeps `name` tracked so the next reconnect
    /// applies it.
    pub fn set_database(&self, name: &str) -> Result<(), DbError> {
        let _connecting = self.connecting();
        let connection = self.ensure_connection()?;

        match connection.set_database(name) {
            Ok(()) => {
                self.live().database = Some(name.to_string());
                log::info!("'{}' switched to database {}", self.profile().name, name);
                Ok(())
            }
            Err(e) => {
                if !connection.is_valid(self.validation_timeout) {
                    log::warn!(
                        "Switching '{}' to {} failed on a dead connection: {}",
                        self.profile().name,
                        name,
                        e
                    );
                    self.live().database = Some(name.to_string());
                    return Ok(());
                }

                match connection.current_database() {
                    Ok(actual) => self.live().database = actual,
                    Err(fallback) => {
                        log::debug!("Could not read current database: {}", fallback);
                    }
                }
                Err(e)
            }
        }
    }

    /// Requests that the running query stop. Cooperative: the executor
    /// polls the flag, and the driver is asked to cancel its statement.
    ///
    /// An abort that arrives before an execution reaches its first batch
    /// stops that execution. The flag is cleared when an execution ends.
    pub fn abort(&self) {
        self.abort.cancel();

        let connection = {
            let mut live = self.live();
            if live.state == SessionState::Connected {
                live.state = SessionState::Aborting;
            }
            live.connection.clone()
        };

        if let Some(connection) = connection
            && let Err(e) = connection.cancel_active()
        {
            log::debug!("Cancel of '{}' failed: {}", self.profile().name, e);
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    pub fn abort_token(&self) -> CancelToken {
        self.abort.clone()
    }

    /// Clears the abort flag and leaves the aborting state.
    pub(crate) fn end_execution(&self) {
        self.abort.reset();

        let mut live = self.live();
        if live.state == SessionState::Aborting {
            live.state = if live.connection.is_some() {
                SessionState::Connected
            } else {
                SessionState::Disconnected
            };
        }
    }

    /// Drops the current connection and opens a new one.
    pub fn reconnect(&self) -> Result<Arc<dyn Connection>, DbError> {
        let _connecting = self.connecting();
        let stale = self.live().connection.take();
        if let Some(stale) = stale {
            self.teardown(stale);
        }
        self.ensure_connection()
    }

    /// Rolls back and closes the connection. Errors are logged, not returned.
    ///
    /// The session stays closed: later connection requests, including
    /// queued crawls, fail instead of reconnecting.
    pub fn close(&self) {
        let stale = {
            let mut live = self.live();
            self.closed.store(true, Ordering::SeqCst);
            live.state = SessionState::Disconnected;
            live.connection.take()
        };

        if let Some(connection) = stale {
            close_quietly(&self.profile().name, connection.as_ref());
        }
    }

    fn check_open(&self) -> Result<(), DbError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        Ok(())
    }

    fn closed_error(&self) -> DbError {
        DbError::ConnectionLost(format!("Session '{}' is closed", self.profile().name))
    }

    fn open(
        &self,
        tracked: Option<String>,
    ) -> Result<(Arc<dyn Connection>, Option<String>), DbError> {
        let profile = self.profile();
        let credential = if profile.requires_credentials() {
            let credential = self.resolver.credential(profile.id).ok_or_else(|| {
                DbError::Credentials(format!("No credentials for '{}'", profile.name))
            })?;
            Some(credential)
        } else {
            None
        };

        log::info!("Connecting to {}", profile.name);
        let connection: Arc<dyn Connection> = match self
            .driver
            .connect(&profile, credential.as_deref())
        {
            Ok(connection) => connection.into(),
            Err(DbError::Credentials(message)) => {
                self.resolver.invalidate(profile.id);
                return Err(DbError::Credentials(message));
            }
            Err(e) => return Err(e),
        };

        let wanted = tracked.or_else(|| profile.default_database.clone());
        let database = match wanted {
            Some(name) => match connection.set_database(&name) {
                Ok(()) => Some(name),
                Err(e) => {
                    log::warn!(
                        "Could not restore database {} on '{}': {}",
                        name,
                        profile.name,
                        e
                    );
                    connection.current_database().unwrap_or(None)
                }
            },
            None => connection.current_database().unwrap_or(None),
        };

        Ok((connection, database))
    }

    fn teardown(&self, connection: Arc<dyn Connection>) {
        let name = self.profile().name.clone();

        match &self.pool {
            Some(pool) => {
                let description = format!("Close stale connection of {}", name);
                pool.spawn(TaskKind::Disconnect, description, move || {
                    close_quietly(&name, connection.as_ref());
                });
            }
            None => close_quietly(&name, connection.as_ref()),
        }
    }

    fn connecting(&self) -> MutexGuard<'_, ()> {
        match self.connecting.lock() {
            Ok(guard) => guard,
            Err(poison_err) => {
                log::warn!("Session connect mutex poisoned, recovering...");
                poison_err.into_inner()
            }
        }
    }

    fn live(&self) -> MutexGuard<'_, Live> {
        match self.live.lock() {
            Ok(guard) => guard,
            Err(poison_err) => {
                log::warn!("Session mutex poisoned, recovering...");
                poison_err.into_inner()
            }
        }
    }
}

impl CatalogCrawler for QuerySession {
    fn crawl(&self, database: &str) -> Result<Catalog, DbError> {
        self.check_open()?;

        let profile = self.profile();
        if !self.resolver.prepare(&profile, true) {
            return Err(DbError::Credentials(format!(
                "Credentials for '{}' are not unlocked",
                profile.name
            )));
        }

        self.get_connection()?
            .crawl_catalog(database)
            .map_err(|e| match e {
                DbError::CrawlFailed(_) => e,
                other => DbError::CrawlFailed(other.to_string()),
            })
    }
}

fn close_quietly(name: &str, connection: &dyn Connection) {
    if let Err(e) = connection.rollback() {
        log::debug!("Rollback on close of {} failed: {}", name, e);
    }

    match connection.close() {
        Ok(()) => log::info!("Closed connection: {}", name),
        Err(e) => log::warn!("Failed to close connection for {}: {}", name, e),
    }
}
