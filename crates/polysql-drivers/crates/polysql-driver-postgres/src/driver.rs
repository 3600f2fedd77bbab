//! PostgreSQL driver implementation

use std::sync::Arc;

use async_trait::async_trait;
use polysql_core::{
    ConnParam, Dialect, Driver, DriverConfig, DriverMetadata, DriverType, Grip, Kind,
    ParamValues, Result, Source,
};

use crate::{PgLocation, PostgresGrip, SslMode};

/// Connection parameters accepted in a PostgreSQL location's query string.
pub const POSTGRES_CONN_PARAMS: &[ConnParam] = &[
    ConnParam::new("sslmode", ParamValues::OneOf(SslMode::NAMES)),
    ConnParam::new("sslrootcert", ParamValues::Any),
    ConnParam::new("sslcert", ParamValues::Any),
    ConnParam::new("sslkey", ParamValues::Any),
    ConnParam::new("application_name", ParamValues::Any),
    ConnParam::new("connect_timeout", ParamValues::Duration),
    ConnParam::new("keepalives", ParamValues::Bool),
    ConnParam::new("target_session_attrs", ParamValues::OneOf(&["any", "read-write"])),
    ConnParam::new("pool_max_conns", ParamValues::IntRange { min: 1, max: 256 }),
];

/// PostgreSQL database driver
#[derive(Debug, Clone, Default)]
pub struct PostgresDriver {
    config: DriverConfig,
}

impl PostgresDriver {
    /// Create a new PostgreSQL driver instance
    pub fn new() -> Self {
        Self::with_config(DriverConfig::default())
    }

    pub fn with_config(config: DriverConfig) -> Self {
        tracing::debug!("PostgreSQL driver initialized");
        Self { config }
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn driver_type(&self) -> DriverType {
        DriverType::POSTGRES
    }

    fn metadata(&self) -> DriverMetadata {
        DriverMetadata {
            driver_type: DriverType::POSTGRES,
            description: "PostgreSQL".to_string(),
            doc: "https://www.postgresql.org".to_string(),
            is_sql: true,
        }
    }

    fn dialect(&self) -> &'static Dialect {
        crate::postgres_dialect()
    }

    fn config(&self) -> &DriverConfig {
        &self.config
    }

    fn conn_params(&self) -> &'static [ConnParam] {
        POSTGRES_CONN_PARAMS
    }

    #[tracing::instrument(skip(self, source), fields(handle = %source.handle))]
    async fn open(&self, source: &Source) -> Result<Arc<dyn Grip>> {
        self.validate_source(source)?;
        let location = PgLocation::parse(source)?;
        let grip = PostgresGrip::open(Arc::new(self.clone()), source.clone(), location).await?;
        tracing::info!(location = %source.redacted_location(), "PostgreSQL grip opened");
        Ok(Arc::new(grip))
    }

    fn kind_from_db_type(&self, db_type: &str) -> Kind {
        crate::kind_from_pg_type(db_type)
    }

    fn db_type_for_kind(&self, kind: Kind) -> &'static str {
        crate::db_type_for_kind(kind)
    }
}
