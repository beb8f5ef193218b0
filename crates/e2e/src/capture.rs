//! Diagnostic screenshot capture
//!
//! Captures are best effort: the wrappers on [`CaptureService`] log a failed
//! capture and return `None`, so a broken screenshot never fails a passing
//! step or hides the real error of a failing one. [`CaptureService::try_capture`]
//! is the fallible primitive they are built on.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{CaptureError, E2eResult};
use crate::naming;

/// Options passed to a capture target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Capture the whole scrollable page, not just the viewport.
    /// Ignored by element targets.
    pub full_page: bool,
}

impl CaptureOptions {
    pub fn full_page() -> Self {
        Self { full_page: true }
    }

    pub fn element() -> Self {
        Self { full_page: false }
    }
}

/// Anything that can render itself to PNG bytes: a page or a located element.
#[async_trait]
pub trait CaptureTarget: Send + Sync {
    async fn capture_image(&self, options: &CaptureOptions) -> Result<Vec<u8>, CaptureError>;
}

/// A unit of work bracketed by before/after captures.
///
/// Implemented for any `FnOnce() -> impl Future<Output = Result<T, E>>`.
pub trait Action: Send {
    type Output: Send;
    type Error: Send;
    type Future: Future<Output = Result<Self::Output, Self::Error>> + Send;

    fn run(self) -> Self::Future;
}

impl<F, Fut, T, E> Action for F
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<T, E>> + Send,
    T: Send,
    E: Send,
{
    type Output = T;
    type Error = E;
    type Future = Fut;

    fn run(self) -> Fut {
        self()
    }
}

/// Phases of a bracketed call, traced at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BracketPhase {
    Idle,
    CapturingBefore,
    ActionRunning,
    Settling,
    CapturingAfter,
    Done,
    Failed,
}

/// Configuration for screenshot capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Directory receiving every artifact
    pub output_dir: PathBuf,

    /// Pause between a bracketed action and its "after" capture
    pub settle_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("screenshots"),
            settle_ms: 500,
        }
    }
}

impl CaptureConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Writes timestamped screenshots under a fixed output directory.
#[derive(Debug, Clone)]
pub struct CaptureService {
    config: CaptureConfig,
}

impl Default for CaptureService {
    fn default() -> Self {
        Self::new(CaptureConfig::default())
    }
}

impl CaptureService {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Capture `target` and write it as `<output_dir>/<test>_<label>_<ts>.png`.
    pub async fn try_capture<T>(
        &self,
        target: &T,
        options: CaptureOptions,
        label: &str,
        test_name: &str,
    ) -> Result<PathBuf, CaptureError>
    where
        T: CaptureTarget + ?Sized,
    {
        let file_name = naming::artifact_file_name(test_name, label, Utc::now());
        let path = self.config.output_dir.join(&file_name);

        let bytes = target.capture_image(&options).await?;

        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|source| CaptureError::Write {
                path: self.config.output_dir.clone(),
                source,
            })?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| CaptureError::Write {
                path: path.clone(),
                source,
            })?;

        Ok(path)
    }

    /// Full-page screenshot of `page`, labelled with `step_name`.
    pub async fn capture_page<P>(&self, page: &P, step_name: &str, test_name: &str) -> Option<PathBuf>
    where
        P: CaptureTarget + ?Sized,
    {
        match self
            .try_capture(page, CaptureOptions::full_page(), step_name, test_name)
            .await
        {
            Ok(path) => {
                info!("📸 Screenshot taken: {}", display_name(&path));
                Some(path)
            }
            Err(e) => {
                error!("❌ Failed to take screenshot: {}", e);
                None
            }
        }
    }

    /// Screenshot clipped to `element`'s rendered bounds.
    ///
    /// Visibility is not checked up front; a hidden or detached element makes
    /// the driver fail and that failure is swallowed like any other.
    pub async fn capture_element<L>(&self, element: &L, element_name: &str, test_name: &str) -> Option<PathBuf>
    where
        L: CaptureTarget + ?Sized,
    {
        match self
            .try_capture(element, CaptureOptions::element(), element_name, test_name)
            .await
        {
            Ok(path) => {
                info!("📸 Element screenshot taken: {}", display_name(&path));
                Some(path)
            }
            Err(e) => {
                error!("❌ Failed to take element screenshot: {}", e);
                None
            }
        }
    }

    /// Run `action` between a `before_<action_name>` and an
    /// `after_<action_name>` full-page capture.
    ///
    /// The action's error is returned untouched and the after-capture is
    /// skipped. Capture failures never surface here.
    pub async fn capture_around<P, A>(
        &self,
        page: &P,
        action_name: &str,
        test_name: &str,
        action: A,
    ) -> Result<A::Output, A::Error>
    where
        P: CaptureTarget + ?Sized,
        A: Action,
    {
        let mut phase = BracketPhase::Idle;
        let mut advance = |next: BracketPhase| {
            debug!(action = action_name, from = ?phase, to = ?next, "bracket transition");
            phase = next;
        };

        advance(BracketPhase::CapturingBefore);
        self.capture_page(page, &naming::before_label(action_name), test_name)
            .await;

        advance(BracketPhase::ActionRunning);
        let output = match action.run().await {
            Ok(output) => output,
            Err(e) => {
                advance(BracketPhase::Failed);
                return Err(e);
            }
        };

        advance(BracketPhase::Settling);
        tokio::time::sleep(self.config.settle()).await;

        advance(BracketPhase::CapturingAfter);
        self.capture_page(page, &naming::after_label(action_name), test_name)
            .await;

        advance(BracketPhase::Done);
        Ok(output)
    }

    /// Create the output directory plus a per-test subdirectory whose name is
    /// `test_title` with every non-alphanumeric character replaced by `_`.
    pub fn ensure_test_dir(&self, test_title: &str) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let test_dir = self.config.output_dir.join(test_dir_name(test_title));
        std::fs::create_dir_all(&test_dir)?;

        Ok(test_dir)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn test_dir_name(test_title: &str) -> String {
    test_title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
