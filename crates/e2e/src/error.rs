//! Error types for the suites, the browser bridge and the capture service

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    // Browser bridge
    #[error("Playwright not found. Install with: npm i playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Driver {op} failed: {message}")]
    Driver { op: String, message: String },

    #[error("Driver connection closed")]
    DriverClosed,

    // Suites and steps
    #[error("Invalid test suite: {0}")]
    SpecParse(String),

    #[error("Step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Expected {0}")]
    AssertionFailed(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    // Environment
    #[error("Target application unreachable at {url} after {attempts} attempts")]
    Unreachable { url: String, attempts: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Malformed TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

/// Failure of a single diagnostic capture.
///
/// Never escapes the capture wrappers; they log it and carry on.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture target failed: {0}")]
    Target(#[from] E2eError),

    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
