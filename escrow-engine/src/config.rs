//! Layered configuration
//!
//! Defaults, then an optional TOML file, then `TASKBOARD__*` environment
//! variables (`TASKBOARD__ESCROW__LOCK_TIMEOUT_MS=500`).

use crate::{escrow_engine::EscrowEngineConfig, task_manager::TaskManagerConfig, EscrowResult};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_PREFIX: &str = "TASKBOARD";

/// Configuration for the whole marketplace node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    /// Escrow engine configuration
    pub escrow: EscrowEngineConfig,
    /// Task manager configuration
    pub tasks: TaskManagerConfig,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            escrow: EscrowEngineConfig::default(),
            tasks: TaskManagerConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl MarketplaceConfig {
    /// Load from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> EscrowResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: Self = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Parse a TOML document, without the environment overlay
    pub fn from_toml_str(source: &str) -> EscrowResult<Self> {
        let config: Self = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}
