use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported catalog types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DbKind {
    Sqlite,
    Postgres,
    MySql,
    SqlServer,
    Elasticsearch,
}

impl DbKind {
    pub const ALL: &'static [DbKind] = &[
        DbKind::Sqlite,
        DbKind::Postgres,
        DbKind::MySql,
        DbKind::SqlServer,
        DbKind::Elasticsearch,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            DbKind::Sqlite => "SQLite",
            DbKind::Postgres => "PostgreSQL",
            DbKind::MySql => "MySQL",
            DbKind::SqlServer => "SQL Server",
            DbKind::Elasticsearch => "Elasticsearch",
        }
    }

    /// Name of the JSON document holding profiles of this kind.
    pub fn file_stem(&self) -> &'static str {
        match self {
            DbKind::Sqlite => "sqlite",
            DbKind::Postgres => "postgres",
            DbKind::MySql => "mysql",
            DbKind::SqlServer => "sqlserver",
            DbKind::Elasticsearch => "elasticsearch",
        }
    }

    /// Token that separates independently executed batches in a query text.
    pub fn batch_delimiter(&self) -> Option<&'static str> {
        match self {
            DbKind::SqlServer => Some("GO"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthType {
    #[default]
    None,
    /// Username and password.
    Basic,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_enabled() -> bool {
    true
}

/// Saved connection parameters.
///
/// The password is only ever stored encrypted. The decrypted form lives in
/// the credential resolver's memory and never comes back here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub id: Uuid,
    pub name: String,
    pub kind: DbKind,

    /// JDBC-style URL, HTTP endpoint or file path, depending on `kind`.
    pub endpoint: String,

    #[serde(default)]
    pub auth: AuthType,

    #[serde(default)]
    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_password: Option<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout_secs: Option<u64>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Database selected right after connecting, before any user choice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_database: Option<String>,
}

impl ConnectionProfile {
    pub fn new(name: impl Into<String>, kind: DbKind, endpoint: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            endpoint: endpoint.into(),
            auth: AuthType::None,
            username: String::new(),
            encrypted_password: None,
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: None,
            enabled: true,
            default_database: None,
        }
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>) -> Self {
        self.auth = AuthType::Basic;
        self.username = username.into();
        self
    }

    pub fn with_default_database(mut self, database: impl Into<String>) -> Self {
        self.default_database = Some(database.into());
        self
    }

    pub fn requires_credentials(&self) -> bool {
        self.auth == AuthType::Basic
    }

    /// True when an encrypted password is stored and non-blank.
    pub fn has_stored_password(&self) -> bool {
        self.encrypted_password
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty())
    }

    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Option<std::time::Duration> {
        self.read_timeout_secs.map(std::time::Duration::from_secs)
    }
}
