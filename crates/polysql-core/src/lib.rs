//! polysql core - driver abstraction shared by every database backend
//!
//! This crate defines the engine-agnostic pieces that the drivers build on:
//!
//! - `Kind` and `Detector` - logical column kinds and sampling-based inference
//! - `Dialect` - placeholder, quoting, operator and exec-mode rules per engine
//! - `Driver` / `Grip` - the capability contract every backend implements
//! - `BatchInsert` - the concurrent bulk-load pipeline over a `BulkLoader`
//! - `PolysqlError` - the error taxonomy every driver wraps native errors into

mod batch;
mod config;
mod detector;
mod dialect;
mod driver;
mod error;
mod kind;
mod metadata;
mod munge;
mod record;
mod source;
mod sql;
mod types;

#[cfg(test)]
mod batch_tests;
#[cfg(test)]
mod detector_tests;
#[cfg(test)]
mod dialect_tests;

pub use batch::*;
pub use config::*;
pub use detector::*;
pub use dialect::*;
pub use driver::*;
pub use error::*;
pub use kind::*;
pub use metadata::*;
pub use munge::*;
pub use record::*;
pub use source::*;
pub use sql::*;
pub use types::*;

/// Re-exported so driver crates and callers share one cancellation type.
pub use tokio_util::sync::CancellationToken;
