//! SQLite driver implementation

use std::sync::Arc;

use async_trait::async_trait;
use polysql_core::{
    ConnParam, Dialect, Driver, DriverConfig, DriverMetadata, DriverType, Grip, Kind,
    ParamValues, Result, Source,
};

use crate::SqliteGrip;

/// Connection parameters accepted in a SQLite location's query string.
pub const SQLITE_CONN_PARAMS: &[ConnParam] = &[
    ConnParam::new("mode", ParamValues::OneOf(&["ro", "rw", "rwc", "memory"])),
    ConnParam::new("cache", ParamValues::OneOf(&["shared", "private"])),
    ConnParam::new("foreign_keys", ParamValues::Bool),
    ConnParam::new("busy_timeout", ParamValues::Duration),
    ConnParam::new("journal_mode", ParamValues::OneOf(&["delete", "truncate", "persist", "memory", "wal", "off"])),
];

/// SQLite database driver
#[derive(Debug, Clone, Default)]
pub struct SqliteDriver {
    config: DriverConfig,
}

impl SqliteDriver {
    /// Create a new SQLite driver instance
    pub fn new() -> Self {
        Self::with_config(DriverConfig::default())
    }

    pub fn with_config(config: DriverConfig) -> Self {
        tracing::debug!("SQLite driver initialized");
        Self { config }
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn driver_type(&self) -> DriverType {
        DriverType::SQLITE
    }

    fn metadata(&self) -> DriverMetadata {
        DriverMetadata {
            driver_type: DriverType::SQLITE,
            description: "SQLite".to_string(),
            doc: "https://www.sqlite.org".to_string(),
            is_sql: true,
        }
    }

    fn dialect(&self) -> &'static Dialect {
        crate::sqlite_dialect()
    }

    fn config(&self) -> &DriverConfig {
        &self.config
    }

    fn conn_params(&self) -> &'static [ConnParam] {
        SQLITE_CONN_PARAMS
    }

    #[tracing::instrument(skip(self, source), fields(handle = %source.handle))]
    async fn open(&self, source: &Source) -> Result<Arc<dyn Grip>> {
        self.validate_source(source)?;
        let grip = SqliteGrip::open(Arc::new(self.clone()), source.clone())?;
        tracing::info!(location = %source.redacted_location(), "SQLite grip opened");
        Ok(Arc::new(grip))
    }

    fn kind_from_db_type(&self, db_type: &str) -> Kind {
        crate::kind_from_decl_type(db_type)
    }

    fn db_type_for_kind(&self, kind: Kind) -> &'static str {
        crate::db_type_for_kind(kind)
    }
}
