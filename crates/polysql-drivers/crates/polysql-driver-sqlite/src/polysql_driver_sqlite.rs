//! SQLite database driver implementation

mod connection;
mod dialect;
mod driver;
mod error;
mod loader;
mod types;

pub use connection::{SharedConnection, SqliteGrip, SqliteStmt};
pub use dialect::{SQLITE_QUERY_KEYWORDS, sqlite_dialect};
pub use driver::{SQLITE_CONN_PARAMS, SqliteDriver};
pub use loader::SqliteBulkLoader;
pub use types::{db_type_for_kind, kind_from_decl_type};
