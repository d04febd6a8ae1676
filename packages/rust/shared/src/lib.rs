//! Shared types, error model, and configuration for versebatch.
//!
//! This crate is the foundation depended on by all other versebatch crates.
//! It provides:
//! - [`VersebatchError`]: the unified error type
//! - Domain types ([`RunId`], [`RunReport`])
//! - Configuration ([`AppConfig`], [`ValidationConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, FetchConfig, ModelConfig, OFFLINE_MODEL, ValidationConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{Result, VersebatchError};
pub use types::{RunId, RunReport};
