use crate::{
    AppConfig, Catalog, CatalogCrawler, ConnectionProfile, ConnectionRegistry, CredentialPrompt,
    CredentialResolver, CryptoService, DbDriver, DbError, DbKind, MasterPasswordStore,
    QuerySession, SchemaCrawlCache, ShutdownCoordinator, ShutdownPhase, WorkerPool,
};
use log::{info, warn};
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// Everything a front end needs to browse catalogs and run queries.
///
/// Built once at startup from explicit parts and shut down with
/// [`Workbench::shutdown`].
pub struct Workbench {
    config: AppConfig,
    crypto: Arc<CryptoService>,
    registry: RwLock<ConnectionRegistry>,
    resolver: Arc<CredentialResolver>,
    pool: Arc<WorkerPool>,
    cache: SchemaCrawlCache,
    drivers: HashMap<DbKind, Arc<dyn DbDriver>>,
    sessions: RwLock<HashMap<Uuid, Arc<QuerySession>>>,
    shutdown: ShutdownCoordinator,
}

impl Workbench {
    pub fn new(
        config: AppConfig,
        registry: ConnectionRegistry,
        drivers: HashMap<DbKind, Arc<dyn DbDriver>>,
        prompt: Arc<dyn CredentialPrompt>,
    ) -> Result<Self, DbError> {
        let crypto = Arc::new(CryptoService::new());
        let resolver = Arc::new(CredentialResolver::new(crypto.clone(), prompt));
        let pool = Arc::new(WorkerPool::new(config.worker_threads)?);
        let cache = SchemaCrawlCache::new(pool.clone(), config.crawl_ttl());

        info!(
            "Workbench ready: {} drivers, {} profiles",
            drivers.len(),
            registry.profiles().len()
        );

        Ok(Self {
            config,
            crypto,
            registry: RwLock::new(registry),
            resolver,
            pool,
            cache,
            drivers,
            sessions: RwLock::new(HashMap::new()),
            shutdown: ShutdownCoordinator::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn crypto(&self) -> &Arc<CryptoService> {
        &self.crypto
    }

    pub fn resolver(&self) -> &Arc<CredentialResolver> {
        &self.resolver
    }

    pub fn cache(&self) -> &SchemaCrawlCache {
        &self.cache
    }

    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    pub fn registry(&self) -> RwLockReadGuard<'_, ConnectionRegistry> {
        match self.registry.read() {
            Ok(guard) => guard,
            Err(poison_err) => {
                warn!("Registry lock poisoned, recovering...");
                poison_err.into_inner()
            }
        }
    }

    pub fn registry_mut(&self) -> RwLockWriteGuard<'_, ConnectionRegistry> {
        match self.registry.write() {
            Ok(guard) => guard,
            Err(poison_err) => {
                warn!("Registry lock poisoned, recovering...");
                poison_err.into_inner()
            }
        }
    }

    /// Derives the password key from `master_password`.
    pub fn unlock(&self, master_password: &str, salt: &[u8]) -> Result<(), DbError> {
        self.crypto.initialize(master_password, salt)?;
        info!("Password store unlocked");
        Ok(())
    }

    /// Unlocks with the master password remembered in `store`, if there is
    /// one.
    pub fn unlock_from_store(
        &self,
        store: &dyn MasterPasswordStore,
        salt: &[u8],
    ) -> Result<bool, DbError> {
        match store.recall()? {
            Some(master) => {
                self.unlock(master.expose_secret(), salt)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Encrypts and stores a password for the profile named `profile_name`.
    ///
    /// Open sessions of that profile pick the new password up on their next
    /// credential lookup.
    pub fn set_password(&self, profile_name: &str, password: &str) -> Result<(), DbError> {
        let updated = {
            let mut registry = self.registry_mut();
            let id = registry
                .find_by_name(profile_name)
                .map(|p| p.id)
                .ok_or_else(|| DbError::ProfileNotFound(profile_name.to_string()))?;

            registry.set_password(id, password, &self.crypto)?;
            registry
                .find(id)
                .cloned()
                .ok_or_else(|| DbError::ProfileNotFound(profile_name.to_string()))?
        };

        self.resolver.invalidate(updated.id);
        self.refresh_sessions(&updated);
        Ok(())
    }

    fn refresh_sessions(&self, profile: &ConnectionProfile) {
        let mut refreshed = 0;
        for session in self.sessions().values() {
            if session.profile().id == profile.id {
                session.update_profile(profile.clone());
                refreshed += 1;
            }
        }

        if refreshed > 0 {
            info!("Refreshed {} open session(s) of '{}'", refreshed, profile.name);
        }
    }

    pub fn open_session(&self, profile_name: &str) -> Result<Arc<QuerySession>, DbError> {
        if self.shutdown.is_shutdown_requested() {
            return Err(DbError::ShuttingDown);
        }

        let profile = self
            .registry()
            .find_by_name(profile_name)
            .cloned()
            .ok_or_else(|| DbError::ProfileNotFound(profile_name.to_string()))?;

        if !profile.enabled {
            return Err(DbError::InvalidProfile(format!(
                "Connection '{}' is disabled",
                profile.name
            )));
        }

        let driver = self.drivers.get(&profile.kind).cloned().ok_or_else(|| {
            DbError::NotSupported(format!("No driver for {}", profile.kind.display_name()))
        })?;

        let session = Arc::new(
            QuerySession::new(
                profile,
                driver,
                self.resolver.clone(),
                self.config.validation_timeout(),
            )
            .with_pool(self.pool.clone()),
        );

        info!(
            "Opened session {} for '{}'",
            session.id(),
            session.profile().name
        );
        self.sessions_mut().insert(session.id(), session.clone());
        Ok(session)
    }

    pub fn session(&self, id: Uuid) -> Option<Arc<QuerySession>> {
        self.sessions().get(&id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    /// Closes and forgets a session. Returns `false` if it was not open.
    pub fn close_session(&self, id: Uuid) -> bool {
        let Some(session) = self.sessions_mut().remove(&id) else {
            return false;
        };

        session.close();
        true
    }

    /// Cached catalog for `database`, starting a crawl when missing or stale.
    pub fn catalog(&self, session: &Arc<QuerySession>, database: &str) -> Option<Arc<Catalog>> {
        let crawler: Arc<dyn CatalogCrawler> = session.clone();
        self.cache.get_catalog(&session.catalog_key(database), crawler)
    }

    /// Forces a crawl of `database`. Returns `false` if one is already
    /// running.
    pub fn reload_catalog(&self, session: &Arc<QuerySession>, database: &str) -> bool {
        let crawler: Arc<dyn CatalogCrawler> = session.clone();
        self.cache.reload(&session.catalog_key(database), crawler)
    }

    /// Aborts queries, closes sessions and drains background work.
    ///
    /// Only the first call does anything.
    pub fn shutdown(&self) {
        if !self.shutdown.request_shutdown() {
            return;
        }

        info!("{}", ShutdownPhase::AbortingQueries.message());
        let sessions: Vec<Arc<QuerySession>> =
            self.sessions_mut().drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.abort();
        }

        if self
            .shutdown
            .advance_phase(ShutdownPhase::AbortingQueries, ShutdownPhase::ClosingSessions)
        {
            info!("{}", ShutdownPhase::ClosingSessions.message());
            for session in &sessions {
                session.close();
            }
            info!("Closed {} sessions during shutdown", sessions.len());
        }

        if self
            .shutdown
            .advance_phase(ShutdownPhase::ClosingSessions, ShutdownPhase::DrainingWorkers)
        {
            info!("{}", ShutdownPhase::DrainingWorkers.message());
            self.pool.shutdown(self.config.shutdown_timeout());
        }

        self.resolver.clear_all();
        self.crypto.lock();

        if self
            .shutdown
            .advance_phase(ShutdownPhase::DrainingWorkers, ShutdownPhase::Complete)
        {
            info!(
                "{} in {:?}",
                ShutdownPhase::Complete.message(),
                self.shutdown.elapsed().unwrap_or_default()
            );
        }
    }

    fn sessions(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Arc<QuerySession>>> {
        match self.sessions.read() {
            Ok(guard) => guard,
            Err(poison_err) => {
                warn!("Session map lock poisoned, recovering...");
                poison_err.into_inner()
            }
        }
    }

    fn sessions_mut(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Arc<QuerySession>>> {
        match self.sessions.write() {
            Ok(guard) => guard,
            Err(poison_err) => {
                warn!("Session map lock poisoned, recovering...");
                poison_err.into_inner()
            }
        }
    }
}

impl Drop for Workbench {
    fn drop(&mut self) {
        self.shutdown();
    }
}
