//! Centralized, immutable configuration for the coordination core.
//!
//! Layers defaults, an optional file, environment variables, and CLI flags
//! into one validated record, resolved once at startup rather than
//! hot-reloaded.

mod cli;

pub use cli::CliArgs;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// The fully-resolved configuration record, built once in the Coordinator
/// from defaults, then a config file, then environment variables, then
/// CLI flags (each layer overriding the previous) and passed by value to
/// every subcomponent from then on.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,
    pub metrics_port: u16,

    #[validate(range(min = 1, message = "rounds must be positive"))]
    pub rounds: u32,
    pub min_clients: u32,
    pub min_available_clients: u32,

    pub model: String,
    pub dataset: String,

    pub policy_engine_url: String,
    pub strict_policy_mode: bool,
    pub stay_alive_after_training: bool,

    pub policy_timeout_secs: u64,
    pub policy_max_retries: u32,
    pub policy_retry_delay_ms: u64,
    pub policy_version_check_interval_secs: u64,

    pub storage_dir: String,
    pub model_checkpoint_file: String,

    pub log_level: String,
    pub log_file: Option<String>,

    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            metrics_port: 8081,
            rounds: 10,
            min_clients: 2,
            min_available_clients: 2,
            model: "default-model".to_string(),
            dataset: "default-dataset".to_string(),
            policy_engine_url: "http://localhost:5000".to_string(),
            strict_policy_mode: false,
            stay_alive_after_training: false,
            policy_timeout_secs: 10,
            policy_max_retries: 3,
            policy_retry_delay_ms: 2000,
            policy_version_check_interval_secs: 30,
            storage_dir: "./fl-data".to_string(),
            model_checkpoint_file: "./fl-data/checkpoint.json".to_string(),
            log_level: "info".to_string(),
            log_file: None,
            connect_timeout_secs: 10,
            read_timeout_secs: 120,
            write_timeout_secs: 30,
        }
    }
}

/// Load configuration as defaults ← optional file ← environment ← CLI flags.
///
/// `file_path` is optional: a missing file is not an error, it just means
/// that layer contributes nothing. The resulting record is immutable once
/// the Coordinator starts; there is no hot-reloading.
pub fn load(file_path: Option<&str>, cli: &CliArgs) -> Result<CoordinatorConfig> {
    let mut builder = config::Config::builder()
        .add_source(config::Config::try_from(&CoordinatorConfig::default())?);

    if let Some(path) = file_path {
        if std::path::Path::new(path).exists() {
            tracing::debug!(path, "loading configuration file layer");
            builder = builder.add_source(config::File::with_name(path));
        } else {
            tracing::debug!(path, "configuration file layer not found, skipping");
        }
    }

    builder = builder.add_source(
        config::Environment::default()
            .separator("_")
            .try_parsing(true),
    );

    let built = builder.build().context("failed to assemble configuration layers")?;
    let mut cfg: CoordinatorConfig = built
        .try_deserialize()
        .context("failed to deserialize configuration")?;

    cli.apply(&mut cfg);

    cfg.validate().context("configuration failed validation")?;
    Ok(cfg)
}
