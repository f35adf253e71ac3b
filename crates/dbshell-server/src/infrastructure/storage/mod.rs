//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the saved connections and logging settings
//! from a TOML file in the platform config directory, writes them back, and
//! falls back to defaults on first run when no file exists yet.

pub mod config;
