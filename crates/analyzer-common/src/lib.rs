//! Shared types, configuration, error handling, and utilities for the
//! service-health observability pipeline.
//!
//! Every other crate in this workspace (`analyzer-store`, `analyzer-bus`,
//! `analyzer-engine`, `alert-engine`, `gateway`) depends on this one for
//! the data model and the ambient concerns: config, errors, retry,
//! shutdown, logging.

pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod retry;
pub mod shutdown;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
