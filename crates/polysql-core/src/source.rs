//! Data sources and their connection parameters

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{PolysqlError, Result};

/// Identifies a driver implementation, e.g. `sqlite3` or `postgres`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverType(Cow<'static, str>);

impl DriverType {
    pub const SQLITE: DriverType = DriverType::from_static("sqlite3");
    pub const POSTGRES: DriverType = DriverType::from_static("postgres");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DriverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user-supplied handle identifying one database or file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Handle such as `@sakila_pg`.
    pub handle: String,
    pub driver: DriverType,
    /// Connection string or file path.
    pub location: String,
    /// Extra connection options, validated against the driver's parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl Source {
    pub fn new(
        handle: impl Into<String>,
        driver: DriverType,
        location: impl Into<String>,
    ) -> Self {
        Self {
            handle: handle.into(),
            driver,
            location: location.into(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Checks the handle and that a location is present.
    pub fn validate(&self) -> Result<()> {
        validate_handle(&self.handle)?;
        if self.location.trim().is_empty() {
            return Err(PolysqlError::Config(format!(
                "source {}: location is empty",
                self.handle
            )));
        }
        Ok(())
    }

    /// Location parsed as a URL, if it is URL-shaped.
    pub fn location_url(&self) -> Option<Url> {
        if !self.location.contains("://") {
            return None;
        }
        Url::parse(&self.location).ok()
    }

    /// Location with any password masked, suitable for logs and metadata.
    pub fn redacted_location(&self) -> String {
        match self.location_url() {
            Some(mut url) if url.password().is_some() => {
                if url.set_password(Some("xxxxx")).is_err() {
                    return self.location.clone();
                }
                url.to_string()
            }
            _ => self.location.clone(),
        }
    }

    /// All connection parameters: URL query pairs followed by options.
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self
            .location_url()
            .map(|url| {
                url.query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();
        params.extend(self.options.iter().map(|(k, v)| (k.clone(), v.clone())));
        params
    }

    pub fn param(&self, name: &str) -> Option<String> {
        self.params()
            .into_iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

fn validate_handle(handle: &str) -> Result<()> {
    let invalid = || {
        PolysqlError::Config(format!(
            "invalid source handle {:?}: must start with @ then a letter, followed by letters, digits, _, - or /",
            handle
        ))
    };

    let rest = handle.strip_prefix('@').ok_or_else(invalid)?;
    let mut chars = rest.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return Err(invalid()),
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/')) {
        Ok(())
    } else {
        Err(invalid())
    }
}

/// Values a connection parameter accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValues {
    OneOf(&'static [&'static str]),
    IntRange { min: i64, max: i64 },
    Bool,
    Duration,
    Any,
}

/// A connection parameter a driver understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnParam {
    pub name: Cow<'static, str>,
    pub accepted: ParamValues,
}

impl ConnParam {
    pub const fn new(name: &'static str, accepted: ParamValues) -> Self {
        Self {
            name: Cow::Borrowed(name),
            accepted,
        }
    }

    pub fn accepts(&self, value: &str) -> bool {
        match &self.accepted {
            ParamValues::OneOf(allowed) => allowed.iter().any(|a| a.eq_ignore_ascii_case(value)),
            ParamValues::IntRange { min, max } => value
                .parse::<i64>()
                .is_ok_and(|v| (*min..=*max).contains(&v)),
            ParamValues::Bool => crate::parse_bool(value).is_some(),
            ParamValues::Duration => parse_duration(value).is_some(),
            ParamValues::Any => true,
        }
    }
}

/// Validates every parameter of `source` against the declared set.
pub fn validate_conn_params(source: &Source, declared: &[ConnParam]) -> Result<()> {
    for (name, value) in source.params() {
        let Some(param) = declared.iter().find(|p| p.name == name) else {
            return Err(PolysqlError::Config(format!(
                "source {}: unknown connection parameter {:?} for driver {}",
                source.handle, name, source.driver
            )));
        };
        if !param.accepts(&value) {
            return Err(PolysqlError::Config(format!(
                "source {}: invalid value {:?} for connection parameter {} ({:?})",
                source.handle, value, name, param.accepted
            )));
        }
    }
    Ok(())
}

/// Parses `500ms`, `10s`, `2m`, `1h`, or a bare number of seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits.parse().ok()?;
    match unit {
        "" | "s" => Some(Duration::from_secs(amount)),
        "ms" => Some(Duration::from_millis(amount)),
        "m" => Some(Duration::from_secs(amount.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(amount.checked_mul(3600)?)),
        _ => None,
    }
}
