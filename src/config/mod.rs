//! Application Configuration
//!
//! User settings stored in TOML format: which extraction backend to use,
//! hosted-model service parameters, and local pipeline model paths.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::extract::hosted::HostedModelConfig;
use crate::extract::local::LocalPipelineConfig;

/// Extraction backend selection
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Hosted multimodal model with structured output
    #[default]
    Hosted,
    /// Local ONNX detector + recognizer pipeline
    Local,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Orchestrator settings
    pub extraction: ExtractionSettings,
    /// Hosted-model settings
    pub hosted: HostedModelConfig,
    /// Local pipeline settings
    pub local: LocalPipelineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            extraction: ExtractionSettings::default(),
            hosted: HostedModelConfig::default(),
            local: LocalPipelineConfig::default(),
        }
    }
}

/// Orchestrator-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// Backend used when none is given on the command line
    pub backend: BackendKind,
    /// Cache extraction results by image content
    pub cache: bool,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Hosted,
            cache: true,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("dev", "mmdl", "mmdl-extract")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}
