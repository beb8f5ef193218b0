//! Test Runs E2E Test Framework
//!
//! Browser end-to-end suites for the Test Runs authentication flows (login,
//! signup, forgot-password), driven from Rust:
//! - Controls Playwright through a long-lived `node` sidecar
//! - Parses declarative YAML test suites
//! - Captures timestamped diagnostic screenshots around each step
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    E2E Test Runner (Rust)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                 │
//! │    ├── preflight::wait_for_reachable(base_url)              │
//! │    ├── PlaywrightHandle::launch() -> Page / Locator         │
//! │    └── run_case(suite, case) -> TestResult                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CaptureService                                             │
//! │    ├── capture_page(page, step, test)                       │
//! │    ├── capture_element(locator, name, test)                 │
//! │    └── capture_around(page, action, test, action)           │
//! │          before_<action> → run → settle → after_<action>    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestSuite (YAML)                                           │
//! │    ├── name, tags, viewport                                 │
//! │    ├── before_each: [TestStep]                              │
//! │    └── tests: [{ name, steps: [TestStep] }]                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Screenshots land in `screenshots/<test>_<label>_<timestamp>.png`.

pub mod capture;
pub mod config;
pub mod error;
pub mod expect;
pub mod fixtures;
pub mod naming;
pub mod playwright;
pub mod preflight;
pub mod runner;
pub mod spec;

pub use capture::{Action, CaptureConfig, CaptureOptions, CaptureService, CaptureTarget};
pub use config::RunnerConfig;
pub use error::{CaptureError, E2eError, E2eResult};
pub use runner::TestRunner;
pub use spec::{TestCase, TestStep, TestSuite};
