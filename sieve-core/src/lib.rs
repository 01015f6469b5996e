//! Core shared library for the sieve workspace.
//!
//! This crate exposes the primitives the engine and the command-line
//! front-end both depend on: common errors, configuration loading,
//! JSON helpers and logging setup.

pub mod config;
pub mod errors;
pub mod logging;
pub mod serde_utils;

pub use config::EngineConfig;
pub use errors::{ConfigError, Result as CoreResult, SieveError};
