mod app_config;
mod catalog;
mod crawl_cache;
mod credentials;
mod crypto;
mod error;
mod execution;
mod master_password;
mod profile;
mod query;
mod registry;
mod session;
mod shutdown;
mod store;
mod task;
mod traits;
mod value;
mod worker;
mod workbench;

pub use app_config::{AppConfig, AppConfigStore};
pub use catalog::{Catalog, CatalogColumn, CatalogCrawler, CatalogObject, CatalogSchema, ObjectKind};
pub use crawl_cache::{CacheEvent, CatalogKey, SchemaCrawlCache};
pub use credentials::{CredentialPrompt, CredentialResolver, NoPrompt, ResolvedCredential};
pub use crypto::{CryptoService, SALT_LEN, generate_salt};
pub use error::DbError;
pub use execution::{Batch, ExecutionSummary, QueryExecutor, RowWriter, split_batches};
pub use profile::{AuthType, ConnectionProfile, DbKind};
pub use query::{BufferedCursor, ColumnMeta, QueryResult, Row, StatementCursor, StatementResult};
pub use master_password::{
    EphemeralMasterPassword, KeyringMasterPassword, MasterPasswordStore, master_password_store,
};
pub use registry::ConnectionRegistry;
pub use session::{QuerySession, SessionState};
pub use shutdown::{ShutdownCoordinator, ShutdownPhase};
pub use store::ProfileStore;
pub use task::{CancelToken, TaskKind};
pub use traits::{Connection, DatabaseInfo, DbDriver};
pub use value::Value;
pub use workbench::Workbench;
pub use worker::WorkerPool;

pub use chrono;
