//! PostgreSQL database driver implementation

mod connection;
mod dialect;
mod driver;
mod error;
mod loader;
mod location;
mod numeric;
mod tls;
mod types;

pub use connection::{PostgresGrip, PostgresStmt};
pub use dialect::{POSTGRES_QUERY_KEYWORDS, postgres_dialect};
pub use driver::{POSTGRES_CONN_PARAMS, PostgresDriver};
pub use loader::PgCopyLoader;
pub use location::PgLocation;
pub use tls::{PostgresTlsConnector, SslMode, TlsSettings};
pub use types::{db_type_for_kind, kind_from_pg_type};
