//! Configuration module for the auto-encode daemon
//!
//! Handles loading configuration from TOML files, environment variable overrides,
//! and resolving the parallel directory lists into directory pairs.

pub mod config;

pub use config::*;
