use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Credentials required: {0}")]
    Credentials(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Catalog crawl failed: {0}")]
    CrawlFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Query cancelled")]
    Cancelled,

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Shutting down")]
    ShuttingDown,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DbError {
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Missing or rejected secrets; callers may re-prompt and rerun.
    pub fn is_credentials(&self) -> bool {
        matches!(self, DbError::Credentials(_))
    }

    /// The transport is gone; callers should recreate the connection.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DbError::ConnectionFailed(_) | DbError::ConnectionLost(_)
        )
    }
}
