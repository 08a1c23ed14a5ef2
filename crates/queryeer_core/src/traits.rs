use crate::{Catalog, ConnectionProfile, DbError, DbKind, ResolvedCredential, StatementCursor};
use std::time::Duration;

/// Factory for transport connections of one catalog type.
///
/// Drivers are registered by `DbKind` when the workbench is built.
pub trait DbDriver: Send + Sync {
    fn kind(&self) -> DbKind;

    fn display_name(&self) -> &'static str {
        self.kind().display_name()
    }

    /// Opens a connection.
    ///
    /// `credential` is `Some` for profiles with basic authentication; the
    /// resolver has already decrypted or prompted for it.
    fn connect(
        &self,
        profile: &ConnectionProfile,
        credential: Option<&ResolvedCredential>,
    ) -> Result<Box<dyn Connection>, DbError>;

    /// Connects, checks the connection, and closes it again.
    fn test_connection(
        &self,
        profile: &ConnectionProfile,
        credential: Option<&ResolvedCredential>,
    ) -> Result<(), DbError> {
        let connection = self.connect(profile, credential)?;
        let valid = connection.is_valid(profile.connect_timeout());
        let _ = connection.close();

        if valid {
            Ok(())
        } else {
            Err(DbError::connection_failed("Connection did not validate"))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub name: String,
    pub is_current: bool,
}

/// A live transport connection.
///
/// Shared between the session that owns it and background crawls, so every
/// method takes `&self` and implementations synchronise internally.
pub trait Connection: Send + Sync {
    /// Cheap liveness check bounded by `timeout`.
    fn is_valid(&self, timeout: Duration) -> bool;

    fn close(&self) -> Result<(), DbError>;

    /// Rolls back an open transaction. A no-op when none is open.
    fn rollback(&self) -> Result<(), DbError> {
        Ok(())
    }

    /// Database the connection currently works in, as reported by the server.
    fn current_database(&self) -> Result<Option<String>, DbError>;

    fn set_database(&self, name: &str) -> Result<(), DbError>;

    fn list_databases(&self) -> Result<Vec<DatabaseInfo>, DbError> {
        Ok(Vec::new())
    }

    /// Starts executing one batch. Statements run as the cursor is pulled.
    fn execute<'a>(&'a self, batch: &str) -> Result<Box<dyn StatementCursor + 'a>, DbError>;

    /// Best-effort cancel of whatever statement is running right now.
    fn cancel_active(&self) -> Result<(), DbError>;

    fn crawl_catalog(&self, database: &str) -> Result<Catalog, DbError>;

    fn kind(&self) -> DbKind;
}
