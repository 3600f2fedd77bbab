//! polysql drivers - bundled database drivers and the registry that hands
//! them out by driver type.

#[cfg(feature = "postgres")]
pub use polysql_driver_postgres as postgres;
#[cfg(feature = "sqlite")]
pub use polysql_driver_sqlite as sqlite;

mod registry;

pub use registry::DriverRegistry;

/// Re-export commonly used types from polysql-core
pub use polysql_core::{
    BatchInsert, CancellationToken, ColumnDef, Driver, DriverConfig, DriverType, Grip, Kind,
    PolysqlError, QueryOutput, Record, RecordMeta, Result, Source, StmtExecer, TableDef,
    TableName, Value,
};
