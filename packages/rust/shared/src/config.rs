//! Application configuration for versebatch.
//!
//! User config lives at `~/.versebatch/versebatch.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VersebatchError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "versebatch.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".versebatch";

/// Model name that selects the offline arithmetic model (no API key needed).
pub const OFFLINE_MODEL: &str = "math";

// ---------------------------------------------------------------------------
// Config structs (matching versebatch.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Language-model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Fetched-document validation thresholds.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// HTTP fetch settings.
    #[serde(default)]
    pub fetch: FetchConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Number of concurrent workers in the pool.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Output file; the log file defaults to this path plus `.log`.
    #[serde(default = "default_output")]
    pub output: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            output: default_output(),
        }
    }
}

fn default_workers() -> usize {
    10
}
fn default_output() -> String {
    "output.txt".into()
}

/// `[model]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible chat completions API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model identifier, or `"math"` for the offline model.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Number of completions requested per call.
    #[serde(default = "default_n")]
    pub n: u32,

    /// Attempts per call before the failure is reported to the task.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Embedding model used for nearest-example lookup.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            top_p: default_top_p(),
            n: default_n(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            embedding_model: default_embedding_model(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_model() -> String {
    "gpt-4".into()
}
fn default_top_p() -> f32 {
    1.0
}
fn default_n() -> u32 {
    1
}
fn default_max_attempts() -> u32 {
    6
}
fn default_initial_backoff_ms() -> u64 {
    1_000
}
fn default_max_backoff_ms() -> u64 {
    60_000
}
fn default_embedding_model() -> String {
    "text-embedding-ada-002".into()
}

/// `[validation]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Fetched text is truncated to this many characters before alignment.
    #[serde(default = "default_window_chars")]
    pub window_chars: usize,

    /// Alignment distances at or above this value reject the document.
    #[serde(default = "default_max_distance")]
    pub max_distance: usize,

    /// Allowed absolute difference between expected and actual word counts.
    #[serde(default = "default_word_count_tolerance")]
    pub word_count_tolerance: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            window_chars: default_window_chars(),
            max_distance: default_max_distance(),
            word_count_tolerance: default_word_count_tolerance(),
        }
    }
}

fn default_window_chars() -> usize {
    1_000
}
fn default_max_distance() -> usize {
    15
}
fn default_word_count_tolerance() -> usize {
    30
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_redirects: default_max_redirects(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_redirects() -> usize {
    5
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.versebatch/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| VersebatchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.versebatch/versebatch.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| VersebatchError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        VersebatchError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| VersebatchError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| VersebatchError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| VersebatchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the model API key env var is set and non-empty.
///
/// The offline `math` model needs no key.
pub fn validate_api_key(model: &ModelConfig) -> Result<()> {
    if model.model == OFFLINE_MODEL {
        return Ok(());
    }

    let var_name = &model.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(()),
        _ => Err(VersebatchError::config(format!(
            "model API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("workers"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
        assert!(toml_str.contains("word_count_tolerance"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.workers, 10);
        assert_eq!(parsed.model.max_attempts, 6);
        assert_eq!(parsed.validation, ValidationConfig::default());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
workers = 3

[validation]
max_distance = 20
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.workers, 3);
        assert_eq!(config.defaults.output, "output.txt");
        assert_eq!(config.validation.max_distance, 20);
        assert_eq!(config.validation.window_chars, 1_000);
        assert_eq!(config.model.model, "gpt-4");
        assert_eq!(config.model.embedding_model, "text-embedding-ada-002");
    }

    #[test]
    fn api_key_validation() {
        let mut model = ModelConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        model.api_key_env = "VB_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&model);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }

    #[test]
    fn offline_model_needs_no_key() {
        let model = ModelConfig {
            model: OFFLINE_MODEL.into(),
            api_key_env: "VB_TEST_NONEXISTENT_KEY_12345".into(),
            ..ModelConfig::default()
        };
        assert!(validate_api_key(&model).is_ok());
    }
}
