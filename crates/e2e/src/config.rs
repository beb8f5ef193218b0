//! Runner configuration
//!
//! Loaded from an optional `e2e.toml`; every section falls back to its
//! defaults, and the harness overrides individual fields from CLI flags.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::capture::CaptureConfig;
use crate::error::{E2eError, E2eResult};
use crate::playwright::PlaywrightConfig;
use crate::preflight::PreflightConfig;

/// Configuration for the test runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Directory scanned for `*.yaml` suites
    pub specs_dir: PathBuf,

    /// Output directory for results
    pub output_dir: PathBuf,

    /// Test cases run concurrently
    pub workers: usize,

    pub playwright: PlaywrightConfig,
    pub capture: CaptureConfig,
    pub preflight: PreflightConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            specs_dir: PathBuf::from("specs"),
            output_dir: PathBuf::from("test-results"),
            workers: 1,
            playwright: PlaywrightConfig::default(),
            capture: CaptureConfig::default(),
            preflight: PreflightConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from file; a missing file yields the defaults
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> E2eResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| E2eError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.workers == 0 {
            return Err(E2eError::Config("workers must be at least 1".to_string()));
        }
        if self.playwright.base_url.is_empty() {
            return Err(E2eError::Config("playwright.base_url is empty".to_string()));
        }
        Ok(())
    }

    /// Path of the JSON results file
    pub fn results_path(&self) -> PathBuf {
        self.output_dir.join("test-results.json")
    }
}
