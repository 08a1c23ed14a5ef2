mod driver;
mod statements;

pub use driver::{SqliteConnection, SqliteDriver};
pub use statements::split_statements;
