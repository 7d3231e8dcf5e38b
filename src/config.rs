//! Configuration management for railpano

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest batch worker pool
pub const MAX_WORKERS: usize = 16;

/// Image format of corrected frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    /// Keeps 16-bit frames lossless at smaller sizes for large sequences
    Tiff,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Tiff => "tiff",
        }
    }
}

/// Batch correction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of frames corrected concurrently
    pub workers: usize,
    #[serde(default)]
    pub output_format: OutputFormat,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            output_format: OutputFormat::default(),
        }
    }
}

impl BatchConfig {
    /// Worker count clamped to `1..=MAX_WORKERS`
    pub fn worker_count(&self) -> usize {
        self.workers.clamp(1, MAX_WORKERS)
    }
}

/// Defaults for the stitched image aspect adjuster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustConfig {
    /// Unsharp mask strength, 0 disables sharpening
    pub unsharp: f32,
    /// Pixels copied verbatim from each side of the source
    pub margin: u32,
}

impl Default for AdjustConfig {
    fn default() -> Self {
        Self {
            unsharp: 1.5,
            margin: 0,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub adjust: AdjustConfig,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::debug!("Saved configuration to {:?}", path);
        Ok(())
    }
}
