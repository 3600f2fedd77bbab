//! PostgreSQL TLS support
//!
//! Builds native-tls connectors for the libpq-style `sslmode` values.

use std::fs;
use std::path::{Path, PathBuf};

use native_tls::{Certificate, Identity, TlsConnector as NativeTlsConnector, TlsConnectorBuilder};
use polysql_core::{PolysqlError, Result};
use postgres_native_tls::MakeTlsConnector;
use tracing::{debug, info};

/// libpq `sslmode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    Disable,
    Allow,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub const NAMES: &'static [&'static str] =
        &["disable", "allow", "prefer", "require", "verify-ca", "verify-full"];

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "disable" => Some(SslMode::Disable),
            "allow" => Some(SslMode::Allow),
            "prefer" => Some(SslMode::Prefer),
            "require" => Some(SslMode::Require),
            "verify-ca" | "verify_ca" => Some(SslMode::VerifyCa),
            "verify-full" | "verify_full" => Some(SslMode::VerifyFull),
            _ => None,
        }
    }

    /// The closest mode tokio-postgres negotiates natively.
    pub fn negotiation(&self) -> tokio_postgres::config::SslMode {
        match self {
            SslMode::Disable => tokio_postgres::config::SslMode::Disable,
            SslMode::Allow | SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => {
                tokio_postgres::config::SslMode::Require
            }
        }
    }
}

/// TLS settings taken from a source's connection parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    pub mode: SslMode,
    pub root_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

/// Builds TLS connectors suitable for tokio-postgres and deadpool.
#[derive(Debug, Clone)]
pub struct PostgresTlsConnector;

impl PostgresTlsConnector {
    /// Returns `None` when TLS is disabled.
    pub fn build(settings: &TlsSettings) -> Result<Option<MakeTlsConnector>> {
        if settings.mode == SslMode::Disable {
            return Ok(None);
        }
        if settings.client_cert.is_some() != settings.client_key.is_some() {
            return Err(PolysqlError::Config(
                "sslcert and sslkey must be given together".to_string(),
            ));
        }

        info!(mode = ?settings.mode, "building PostgreSQL TLS connector");
        let mut builder = NativeTlsConnector::builder();
        configure_verification(&mut builder, settings);

        if let Some(path) = &settings.root_cert {
            apply_ca_cert(&mut builder, path)?;
        }
        if let (Some(cert), Some(key)) = (&settings.client_cert, &settings.client_key) {
            apply_client_cert(&mut builder, cert, key)?;
        }

        let connector = builder
            .build()
            .map_err(|e| PolysqlError::Config(format!("TLS configuration error: {}", e)))?;
        Ok(Some(MakeTlsConnector::new(connector)))
    }
}

/// `require` only encrypts unless a root certificate is given, `verify-ca`
/// skips the hostname check, `verify-full` checks both.
fn configure_verification(builder: &mut TlsConnectorBuilder, settings: &TlsSettings) {
    match settings.mode {
        SslMode::Disable => {}
        SslMode::Allow | SslMode::Prefer | SslMode::Require => {
            if settings.root_cert.is_none() {
                debug!("certificate verification disabled");
                builder.danger_accept_invalid_certs(true);
            }
            builder.danger_accept_invalid_hostnames(true);
        }
        SslMode::VerifyCa => {
            builder.danger_accept_invalid_hostnames(true);
        }
        SslMode::VerifyFull => {}
    }
}

fn apply_ca_cert(builder: &mut TlsConnectorBuilder, path: &Path) -> Result<()> {
    debug!(path = %path.display(), "loading CA certificate");
    let pem = fs::read(path).map_err(|e| {
        PolysqlError::Config(format!(
            "failed to load CA certificate from {}: {}",
            path.display(),
            e
        ))
    })?;
    let cert = Certificate::from_pem(&pem)
        .map_err(|e| PolysqlError::Config(format!("invalid CA certificate: {}", e)))?;
    builder.add_root_certificate(cert);
    Ok(())
}

fn apply_client_cert(builder: &mut TlsConnectorBuilder, cert_path: &Path, key_path: &Path) -> Result<()> {
    debug!(
        cert_path = %cert_path.display(),
        key_path = %key_path.display(),
        "loading client certificate and key"
    );
    let read = |path: &Path| {
        fs::read(path).map_err(|e| {
            PolysqlError::Config(format!("failed to read {}: {}", path.display(), e))
        })
    };
    let identity = Identity::from_pkcs8(&read(cert_path)?, &read(key_path)?)
        .map_err(|e| PolysqlError::Config(format!("invalid client identity: {}", e)))?;
    builder.identity(identity);
    Ok(())
}
