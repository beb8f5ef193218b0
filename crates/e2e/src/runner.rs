//! Main test runner that orchestrates preflight, Playwright and captures

use std::path::PathBuf;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::capture::CaptureService;
use crate::config::RunnerConfig;
use crate::error::{E2eError, E2eResult};
use crate::expect;
use crate::fixtures::{interpolate, ValidUser};
use crate::playwright::{Page, PlaywrightHandle};
use crate::preflight;
use crate::spec::{LoadState, TestCase, TestStep, TestSuite};

/// Result of executing a test step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub step_name: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub screenshot_path: Option<PathBuf>,
}

/// Result of running a single test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub suite: String,
    pub name: String,
    pub success: bool,
    pub skipped: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
}

impl TestResult {
    fn skipped(suite: &TestSuite, case: &TestCase) -> Self {
        Self {
            suite: suite.name.clone(),
            name: case.name.clone(),
            success: true,
            skipped: true,
            duration_ms: 0,
            steps: vec![],
            error: None,
        }
    }

    fn errored(suite: &TestSuite, case: &TestCase, e: &E2eError) -> Self {
        Self {
            suite: suite.name.clone(),
            name: case.name.clone(),
            success: false,
            skipped: false,
            duration_ms: 0,
            steps: vec![],
            error: Some(e.to_string()),
        }
    }
}

/// Result of running all tests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn from_results(results: Vec<TestResult>, duration_ms: u64) -> Self {
        let skipped = results.iter().filter(|r| r.skipped).count();
        let failed = results.iter().filter(|r| !r.success).count();
        Self {
            total: results.len(),
            passed: results.len() - skipped - failed,
            failed,
            skipped,
            duration_ms,
            results,
        }
    }
}

/// State carried through the steps of one test case
struct TestContext<'a> {
    capture: &'a CaptureService,
    page: Page,
    test_name: String,
    user: Option<ValidUser>,
    steps: Vec<StepResult>,
}

/// Main E2E test runner
pub struct TestRunner {
    config: RunnerConfig,
    capture: CaptureService,
    playwright: Option<PlaywrightHandle>,
}

impl TestRunner {
    /// Create a new test runner with default configuration
    pub fn new() -> Self {
        Self::with_config(RunnerConfig::default())
    }

    /// Create a test runner with custom configuration
    pub fn with_config(config: RunnerConfig) -> Self {
        let capture = CaptureService::new(config.capture.clone());
        Self {
            config,
            capture,
            playwright: None,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Check the target is up and launch the browser
    pub async fn start(&mut self) -> E2eResult<()> {
        if self.playwright.is_some() {
            return Ok(()); // Already running
        }

        preflight::wait_for_reachable(&self.config.playwright.base_url, &self.config.preflight).await?;
        let handle = PlaywrightHandle::launch(self.config.playwright.clone()).await?;
        self.playwright = Some(handle);
        Ok(())
    }

    /// Close the browser
    pub async fn stop(&mut self) -> E2eResult<()> {
        if let Some(handle) = self.playwright.take() {
            handle.close().await?;
        }
        Ok(())
    }

    /// Run all suites in the specs directory
    pub async fn run_all(&mut self) -> E2eResult<TestSuiteResult> {
        let suites = TestSuite::load_all(&self.config.specs_dir)?;
        self.run_suites(&suites).await
    }

    /// Run suites matching a tag
    pub async fn run_tagged(&mut self, tag: &str) -> E2eResult<TestSuiteResult> {
        let suites = TestSuite::load_all(&self.config.specs_dir)?;
        let filtered: Vec<TestSuite> = TestSuite::filter_by_tag(&suites, tag)
            .into_iter()
            .cloned()
            .collect();
        self.run_suites(&filtered).await
    }

    /// Run every test case with the given name, across suites
    pub async fn run_test(&mut self, name: &str) -> E2eResult<TestSuiteResult> {
        let suites = TestSuite::load_all(&self.config.specs_dir)?;
        let filtered: Vec<TestSuite> = suites
            .into_iter()
            .filter_map(|mut suite| {
                suite.tests.retain(|t| t.name == name);
                (!suite.tests.is_empty()).then_some(suite)
            })
            .collect();

        if filtered.is_empty() {
            return Err(E2eError::SpecParse(format!("Test not found: {}", name)));
        }
        self.run_suites(&filtered).await
    }

    /// Run a list of suites
    pub async fn run_suites(&mut self, suites: &[TestSuite]) -> E2eResult<TestSuiteResult> {
        let start = Instant::now();

        self.start().await?;

        let cases: Vec<(&TestSuite, &TestCase)> = suites
            .iter()
            .flat_map(|suite| suite.tests.iter().map(move |case| (suite, case)))
            .collect();

        info!(
            "Running {} test(s) from {} suite(s) with {} worker(s)...",
            cases.len(),
            suites.len(),
            self.config.workers
        );

        let this = &*self;
        let results: Vec<TestResult> = stream::iter(cases)
            .map(|(suite, case)| async move {
                if case.skip {
                    info!("- {} (skipped)", case.name);
                    return TestResult::skipped(suite, case);
                }

                match this.run_case(suite, case).await {
                    Ok(result) => {
                        if result.success {
                            info!("✓ {} ({} ms)", result.name, result.duration_ms);
                        } else {
                            error!("✗ {} - {}", result.name, result.error.as_deref().unwrap_or("unknown error"));
                        }
                        result
                    }
                    Err(e) => {
                        error!("✗ {} - {}", case.name, e);
                        TestResult::errored(suite, case, &e)
                    }
                }
            })
            .buffered(self.config.workers.max(1))
            .collect()
            .await;

        let summary = TestSuiteResult::from_results(results, start.elapsed().as_millis() as u64);

        info!("");
        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            summary.passed, summary.failed, summary.skipped, summary.duration_ms
        );

        Ok(summary)
    }

    /// Run a single test case in a fresh browser context
    pub async fn run_case(&self, suite: &TestSuite, case: &TestCase) -> E2eResult<TestResult> {
        let start = Instant::now();
        info!("Running {}", case.name);

        match self.capture.ensure_test_dir(&case.name) {
            Ok(dir) => debug!("Artifacts for '{}' under {}", case.name, dir.display()),
            Err(e) => warn!("Failed to create artifact directory for '{}': {}", case.name, e),
        }

        let playwright = self
            .playwright
            .as_ref()
            .ok_or_else(|| E2eError::Playwright("browser not started".to_string()))?;

        let page = playwright.new_page(suite.viewport).await?;
        let mut ctx = TestContext {
            capture: &self.capture,
            page: page.clone(),
            test_name: case.name.clone(),
            user: None,
            steps: Vec::new(),
        };

        let mut outcome = execute_steps(&mut ctx, &suite.before_each).await;
        if outcome.is_ok() {
            outcome = execute_steps(&mut ctx, &case.steps).await;
        }

        if outcome.is_err() {
            self.capture.capture_page(&page, "failure", &case.name).await;
        }

        if let Err(e) = page.close().await {
            warn!("Failed to close page for '{}': {}", case.name, e);
        }

        Ok(TestResult {
            suite: suite.name.clone(),
            name: case.name.clone(),
            success: outcome.is_ok(),
            skipped: false,
            duration_ms: start.elapsed().as_millis() as u64,
            steps: ctx.steps,
            error: outcome.err().map(|e| e.to_string()),
        })
    }

    /// Write test results to JSON file
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.results_path();
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `steps` in order, stopping at the first failure
fn execute_steps<'c, 'a: 'c>(
    ctx: &'c mut TestContext<'a>,
    steps: &'c [TestStep],
) -> BoxFuture<'c, E2eResult<()>> {
    Box::pin(async move {
        for step in steps {
            let step_name = step.describe();
            let start = Instant::now();
            debug!("Executing step: {}", step_name);

            let outcome = execute_step(ctx, step).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match outcome {
                Ok(screenshot_path) => ctx.steps.push(StepResult {
                    success: true,
                    step_name,
                    duration_ms,
                    error: None,
                    screenshot_path,
                }),
                Err(e) => {
                    ctx.steps.push(StepResult {
                        success: false,
                        step_name: step_name.clone(),
                        duration_ms,
                        error: Some(e.to_string()),
                        screenshot_path: None,
                    });
                    return Err(match e {
                        already @ E2eError::StepFailed { .. } => already,
                        other => E2eError::StepFailed {
                            step: step_name,
                            reason: other.to_string(),
                        },
                    });
                }
            }
        }
        Ok(())
    })
}

async fn execute_step(ctx: &mut TestContext<'_>, step: &TestStep) -> E2eResult<Option<PathBuf>> {
    let timeout_or_default =
        |ms: Option<u64>, page: &Page| ms.map(Duration::from_millis).unwrap_or_else(|| page.default_timeout());

    match step {
        TestStep::Navigate { url, wait_until } => {
            let url = interpolate(url, ctx.user.as_ref());
            ctx.page.goto(&url, *wait_until).await?;
        }
        TestStep::WaitForLoadState { state } => {
            ctx.page.wait_for_load_state(*state).await?;
        }
        TestStep::Click { target, timeout_ms } => {
            ctx.page
                .locator(target.clone())
                .click(timeout_ms.map(Duration::from_millis))
                .await?;
        }
        TestStep::Fill { target, value, timeout_ms } => {
            let value = interpolate(value, ctx.user.as_ref());
            ctx.page
                .locator(target.clone())
                .fill(&value, timeout_ms.map(Duration::from_millis))
                .await?;
        }
        TestStep::Press { target: Some(target), key } => {
            ctx.page.locator(target.clone()).press(key).await?;
        }
        TestStep::Press { target: None, key } => {
            ctx.page.press_key(key).await?;
        }
        TestStep::FillAndBlur { target, value } => {
            let value = interpolate(value, ctx.user.as_ref());
            let field = ctx.page.locator(target.clone());
            field.click(None).await?;
            field.fill(&value, None).await?;
            field.press("Tab").await?;
        }
        TestStep::Blur { target } => {
            let field = ctx.page.locator(target.clone());
            field.click(None).await?;
            field.press("Tab").await?;
        }
        TestStep::Check { target } => {
            ctx.page.locator(target.clone()).check().await?;
        }
        TestStep::Assert {
            target,
            visible,
            enabled,
            text,
            text_contains,
            timeout_ms,
        } => {
            let timeout = timeout_or_default(*timeout_ms, &ctx.page);
            let locator = ctx.page.locator(target.clone());

            let any_check = visible.is_some() || enabled.is_some() || text.is_some() || text_contains.is_some();
            match visible {
                Some(false) => expect::to_be_hidden(&locator, timeout).await?,
                Some(true) => expect::to_be_visible(&locator, timeout).await?,
                None if !any_check => expect::to_be_visible(&locator, timeout).await?,
                None => {}
            }
            if let Some(enabled) = enabled {
                expect::to_be_enabled(&locator, *enabled, timeout).await?;
            }
            if let Some(expected) = text {
                expect::to_have_text(&locator, expected, timeout).await?;
            }
            if let Some(needle) = text_contains {
                expect::to_contain_text(&locator, needle, timeout).await?;
            }
        }
        TestStep::AssertUrl { url, timeout_ms } => {
            let timeout = timeout_or_default(*timeout_ms, &ctx.page);
            expect::to_have_url(&ctx.page, url, timeout).await?;
        }
        TestStep::Popup {
            trigger,
            url,
            timeout_ms,
            wait_until,
        } => {
            let timeout = Duration::from_millis(*timeout_ms);
            let popup = ctx.page.click_for_popup(trigger, timeout).await?;

            let checked = async {
                popup.wait_for_load_state(wait_until.unwrap_or(LoadState::Load)).await?;
                if let Some(url) = url {
                    expect::to_have_url(&popup, url, timeout).await?;
                }
                Ok::<_, E2eError>(())
            }
            .await;

            if let Err(e) = popup.close().await {
                warn!("Failed to close popup: {}", e);
            }
            checked?;
        }
        TestStep::Sleep { ms } => {
            ctx.page.wait_for_timeout(Duration::from_millis(*ms)).await;
        }
        TestStep::Screenshot { name, target: None } => {
            return Ok(ctx.capture.capture_page(&ctx.page, name, &ctx.test_name).await);
        }
        TestStep::Screenshot { name, target: Some(target) } => {
            let element = ctx.page.locator(target.clone());
            return Ok(ctx.capture.capture_element(&element, name, &ctx.test_name).await);
        }
        TestStep::Around { name, steps } => {
            let capture = ctx.capture;
            let page = ctx.page.clone();
            let test_name = ctx.test_name.clone();
            capture
                .capture_around(&page, name, &test_name, move || {
                    // Rebind so the closure owns the `&mut` and is `FnOnce`
                    let ctx = ctx;
                    execute_steps(ctx, steps)
                })
                .await?;
        }
        TestStep::GenerateUser => {
            let user = ValidUser::generate();
            info!("Generated user {}", user.email);
            ctx.user = Some(user);
        }
        TestStep::Log { message } => {
            info!("[TEST LOG] {}", interpolate(message, ctx.user.as_ref()));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureConfig;
    use crate::playwright::scripted;
    use serde_json::Value;
    use std::path::Path;

    fn result(name: &str, success: bool, skipped: bool) -> TestResult {
        TestResult {
            suite: "login".to_string(),
            name: name.to_string(),
            success,
            skipped,
            duration_ms: 1,
            steps: vec![],
            error: None,
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary = TestSuiteResult::from_results(
            vec![
                result("a", true, false),
                result("b", false, false),
                result("c", true, true),
                result("d", true, false),
            ],
            42,
        );
        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.duration_ms, 42);
    }

    #[test]
    fn test_write_results() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = TestRunner::with_config(RunnerConfig {
            output_dir: tmp.path().join("out"),
            ..Default::default()
        });

        let summary = TestSuiteResult::from_results(vec![result("a", true, false)], 5);
        let path = runner.write_results(&summary).unwrap();

        let written: TestSuiteResult = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written.total, 1);
        assert_eq!(written.results[0].name, "a");
    }

    #[tokio::test]
    async fn test_run_case_requires_started_browser() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = RunnerConfig::default();
        config.capture.output_dir = tmp.path().join("screenshots");
        let runner = TestRunner::with_config(config);

        let suite = TestSuite::from_yaml("name: s\ntests:\n  - name: Check content\n    steps: []\n").unwrap();
        let err = runner.run_case(&suite, &suite.tests[0]).await.unwrap_err();
        assert!(matches!(err, E2eError::Playwright(_)));

        // The per-test directory is prepared before the browser is needed
        assert!(tmp.path().join("screenshots").join("Check_content").is_dir());
    }

    fn steps(yaml: &str) -> Vec<TestStep> {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn artifacts(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().is_file())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_around_step_brackets_nested_steps() {
        let tmp = tempfile::tempdir().unwrap();
        let capture = CaptureService::new(CaptureConfig {
            output_dir: tmp.path().to_path_buf(),
            settle_ms: 5,
        });
        let (page, ops) = scripted::page(|op, _| match op {
            "screenshot" => scripted::png(),
            "click" => Ok(Value::Null),
            other => Err(format!("unexpected {}", other)),
        });
        let mut ctx = TestContext {
            capture: &capture,
            page,
            test_name: "Login with correct credentials".to_string(),
            user: None,
            steps: Vec::new(),
        };

        let plan = steps(
            r#"
- action: around
  name: submit
  steps:
    - action: click
      target: { role: button, name: Log in }
    - action: screenshot
      name: submitted
"#,
        );
        execute_steps(&mut ctx, &plan).await.unwrap();

        assert_eq!(
            ops.lock().as_slice(),
            &["screenshot", "click", "screenshot", "screenshot"]
        );

        let names = artifacts(tmp.path());
        assert_eq!(names.len(), 3, "{:?}", names);
        assert!(names.iter().any(|n| n.starts_with("Login with correct credentials_before_submit_")));
        assert!(names.iter().any(|n| n.starts_with("Login with correct credentials_submitted_")));
        assert!(names.iter().any(|n| n.starts_with("Login with correct credentials_after_submit_")));

        let recorded: Vec<&str> = ctx.steps.iter().map(|s| s.step_name.as_str()).collect();
        assert_eq!(recorded.len(), 3);
        assert!(recorded[2].starts_with("around:submit"));
        assert!(ctx.steps.iter().all(|s| s.success));
        assert!(ctx.steps[1].screenshot_path.is_some());
    }

    #[tokio::test]
    async fn test_failing_around_step_keeps_only_before_capture() {
        let tmp = tempfile::tempdir().unwrap();
        let capture = CaptureService::new(CaptureConfig {
            output_dir: tmp.path().to_path_buf(),
            settle_ms: 5,
        });
        let (page, _ops) = scripted::page(|op, _| match op {
            "screenshot" => scripted::png(),
            _ => Err("element is not attached to the DOM".to_string()),
        });
        let mut ctx = TestContext {
            capture: &capture,
            page,
            test_name: "Forget Password Verification".to_string(),
            user: None,
            steps: Vec::new(),
        };

        let plan = steps(
            r#"
- action: around
  name: next
  steps:
    - action: click
      target: { role: button, name: Next }
"#,
        );
        let err = execute_steps(&mut ctx, &plan).await.unwrap_err();

        match err {
            E2eError::StepFailed { step, reason } => {
                assert!(step.starts_with("click:"), "{}", step);
                assert!(reason.contains("not attached"), "{}", reason);
            }
            other => panic!("unexpected error: {}", other),
        }

        let names = artifacts(tmp.path());
        assert_eq!(names.len(), 1, "{:?}", names);
        assert!(names[0].starts_with("Forget Password Verification_before_next_"));
        assert!(ctx.steps.iter().all(|s| !s.success));
    }
}
