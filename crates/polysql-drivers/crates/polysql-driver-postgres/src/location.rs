//! Parsing of PostgreSQL source locations
//!
//! The URL (or libpq key/value string) supplies host, port, user, password
//! and database. Query parameters and source options are applied on top.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use polysql_core::{PolysqlError, Result, Source, parse_bool, parse_duration};
use tokio_postgres::config::TargetSessionAttrs;

use crate::tls::{SslMode, TlsSettings};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A parsed PostgreSQL location.
#[derive(Debug, Clone)]
pub struct PgLocation {
    pub config: tokio_postgres::Config,
    pub tls: TlsSettings,
    /// Overrides the driver's pool size.
    pub pool_max_conns: Option<usize>,
}

impl PgLocation {
    pub fn parse(source: &Source) -> Result<Self> {
        let base = match source.location_url() {
            Some(mut url) => {
                url.set_query(None);
                url.to_string()
            }
            None => source.location.clone(),
        };
        let mut config = tokio_postgres::Config::from_str(&base).map_err(|e| {
            PolysqlError::Config(format!(
                "source {}: invalid PostgreSQL location {}: {}",
                source.handle,
                source.redacted_location(),
                e
            ))
        })?;
        config.connect_timeout(DEFAULT_CONNECT_TIMEOUT);

        let invalid = |name: &str, value: &str| {
            PolysqlError::Config(format!(
                "source {}: invalid value {:?} for {}",
                source.handle, value, name
            ))
        };

        let mut tls = TlsSettings::default();
        let mut pool_max_conns = None;
        for (name, value) in source.params() {
            match name.as_str() {
                "sslmode" => {
                    tls.mode = SslMode::parse(&value).ok_or_else(|| invalid(&name, &value))?;
                }
                "sslrootcert" => tls.root_cert = Some(PathBuf::from(value)),
                "sslcert" => tls.client_cert = Some(PathBuf::from(value)),
                "sslkey" => tls.client_key = Some(PathBuf::from(value)),
                "application_name" => {
                    config.application_name(&value);
                }
                "connect_timeout" => {
                    config.connect_timeout(
                        parse_duration(&value).ok_or_else(|| invalid(&name, &value))?,
                    );
                }
                "keepalives" => {
                    config.keepalives(parse_bool(&value).ok_or_else(|| invalid(&name, &value))?);
                }
                "target_session_attrs" => {
                    let attrs = match value.as_str() {
                        "any" => TargetSessionAttrs::Any,
                        "read-write" => TargetSessionAttrs::ReadWrite,
                        _ => return Err(invalid(&name, &value)),
                    };
                    config.target_session_attrs(attrs);
                }
                "pool_max_conns" => {
                    let size: usize = value.parse().map_err(|_| invalid(&name, &value))?;
                    pool_max_conns = Some(size.max(1));
                }
                _ => {
                    return Err(PolysqlError::Config(format!(
                        "source {}: unknown connection parameter {:?}",
                        source.handle, name
                    )));
                }
            }
        }
        config.ssl_mode(tls.mode.negotiation());

        Ok(Self {
            config,
            tls,
            pool_max_conns,
        })
    }

    pub fn dbname(&self) -> Option<&str> {
        self.config.get_dbname()
    }

    pub fn user(&self) -> Option<&str> {
        self.config.get_user()
    }
}
