//! Declarative YAML test suites

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;

use crate::error::{E2eError, E2eResult};

/// A suite of tests sharing a `before_each` hook, parsed from one YAML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuite {
    /// Suite name, used in logs and results
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering suites
    #[serde(default)]
    pub tags: Vec<String>,

    /// Viewport size for the browser
    #[serde(default = "default_viewport")]
    pub viewport: Viewport,

    /// Steps run before every test case
    #[serde(default)]
    pub before_each: Vec<TestStep>,

    /// Test cases, executed independently
    pub tests: Vec<TestCase>,
}

/// A single test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    /// Test title; also the name every capture of this test is filed under
    pub name: String,

    /// Skip this test
    #[serde(default)]
    pub skip: bool,

    /// Steps to execute in order
    pub steps: Vec<TestStep>,
}

fn default_viewport() -> Viewport {
    Viewport { width: 1280, height: 720 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Text to match: either an exact string or a regular expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Matcher {
    Pattern {
        pattern: String,
        #[serde(default)]
        ignore_case: bool,
    },
    Text(String),
}

impl Matcher {
    pub fn is_match(&self, haystack: &str) -> E2eResult<bool> {
        match self {
            Matcher::Text(expected) => Ok(haystack == expected),
            Matcher::Pattern { pattern, ignore_case } => {
                let re = regex::RegexBuilder::new(pattern)
                    .case_insensitive(*ignore_case)
                    .build()
                    .map_err(|e| E2eError::SpecParse(format!("bad pattern '{}': {}", pattern, e)))?;
                Ok(re.is_match(haystack))
            }
        }
    }

    /// Driver wire form
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            Matcher::Text(value) => json!({ "kind": "exact", "value": value }),
            Matcher::Pattern { pattern, ignore_case } => json!({
                "kind": "regex",
                "source": pattern,
                "flags": if *ignore_case { "i" } else { "" },
            }),
        }
    }
}

impl std::fmt::Display for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Matcher::Text(value) => write!(f, "'{}'", value),
            Matcher::Pattern { pattern, ignore_case: true } => write!(f, "/{}/i", pattern),
            Matcher::Pattern { pattern, .. } => write!(f, "/{}/", pattern),
        }
    }
}

impl From<&str> for Matcher {
    fn from(value: &str) -> Self {
        Matcher::Text(value.to_string())
    }
}

/// How a step locates an element on the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    Role {
        role: String,
        #[serde(default)]
        name: Option<Matcher>,
        #[serde(default)]
        exact: bool,
    },
    Text {
        text: Matcher,
        #[serde(default)]
        exact: bool,
    },
    Placeholder {
        placeholder: Matcher,
        #[serde(default)]
        exact: bool,
    },
    Label {
        label: Matcher,
        #[serde(default)]
        exact: bool,
    },
    Css {
        css: String,
    },
}

impl Target {
    pub fn css(selector: impl Into<String>) -> Self {
        Target::Css { css: selector.into() }
    }

    pub fn text(text: impl Into<Matcher>) -> Self {
        Target::Text { text: text.into(), exact: false }
    }

    pub fn role(role: impl Into<String>, name: impl Into<Matcher>) -> Self {
        Target::Role {
            role: role.into(),
            name: Some(name.into()),
            exact: false,
        }
    }

    /// Driver wire form
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            Target::Role { role, name, exact } => json!({
                "by": "role",
                "role": role,
                "name": name.as_ref().map(Matcher::to_wire),
                "exact": exact,
            }),
            Target::Text { text, exact } => json!({ "by": "text", "text": text.to_wire(), "exact": exact }),
            Target::Placeholder { placeholder, exact } => {
                json!({ "by": "placeholder", "placeholder": placeholder.to_wire(), "exact": exact })
            }
            Target::Label { label, exact } => json!({ "by": "label", "label": label.to_wire(), "exact": exact }),
            Target::Css { css } => json!({ "by": "css", "css": css }),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Role { role, name: Some(name), .. } => write!(f, "role={}[name={}]", role, name),
            Target::Role { role, name: None, .. } => write!(f, "role={}", role),
            Target::Text { text, .. } => write!(f, "text={}", text),
            Target::Placeholder { placeholder, .. } => write!(f, "placeholder={}", placeholder),
            Target::Label { label, .. } => write!(f, "label={}", label),
            Target::Css { css } => write!(f, "css={}", css),
        }
    }
}

/// Page load milestones
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    #[default]
    Load,
    DomContentLoaded,
    NetworkIdle,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::Load => "load",
            LoadState::DomContentLoaded => "domcontentloaded",
            LoadState::NetworkIdle => "networkidle",
        }
    }
}

/// A single step in a test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Navigate to a URL (absolute, or relative to the base URL)
    Navigate {
        url: String,
        #[serde(default)]
        wait_until: Option<LoadState>,
    },

    /// Wait for a load state on the current page
    WaitForLoadState {
        #[serde(default)]
        state: LoadState,
    },

    /// Click an element
    Click {
        target: Target,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Fill an input field
    Fill {
        target: Target,
        value: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Press a key, on an element or the page
    Press {
        #[serde(default)]
        target: Option<Target>,
        key: String,
    },

    /// Click an input, fill it, then tab out of it
    FillAndBlur {
        target: Target,
        value: String,
    },

    /// Click an input then tab out of it without typing
    Blur {
        target: Target,
    },

    /// Ensure a checkbox is checked
    Check {
        target: Target,
    },

    /// Assert something about an element
    Assert {
        target: Target,
        #[serde(default)]
        visible: Option<bool>,
        #[serde(default)]
        enabled: Option<bool>,
        #[serde(default)]
        text: Option<Matcher>,
        #[serde(default)]
        text_contains: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Assert the current page URL
    AssertUrl {
        url: Matcher,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Click something that opens a popup, check the popup's URL, close it
    Popup {
        trigger: Target,
        #[serde(default)]
        url: Option<Matcher>,
        #[serde(default = "default_popup_timeout")]
        timeout_ms: u64,
        #[serde(default)]
        wait_until: Option<LoadState>,
    },

    /// Wait for a fixed amount of time (use sparingly)
    Sleep {
        ms: u64,
    },

    /// Take a diagnostic screenshot of the page or one element
    Screenshot {
        name: String,
        #[serde(default)]
        target: Option<Target>,
    },

    /// Run nested steps between before/after screenshots
    Around {
        name: String,
        steps: Vec<TestStep>,
    },

    /// Generate a fresh valid user, available as `{{user.*}}`
    GenerateUser,

    /// Log a message (for debugging)
    Log {
        message: String,
    },
}

fn default_popup_timeout() -> u64 {
    10_000
}

impl TestStep {
    /// Short name used in logs and step results
    pub fn describe(&self) -> String {
        match self {
            TestStep::Navigate { url, .. } => format!("navigate:{}", url),
            TestStep::WaitForLoadState { state } => format!("wait_for_load_state:{}", state.as_str()),
            TestStep::Click { target, .. } => format!("click:{}", target),
            TestStep::Fill { target, .. } => format!("fill:{}", target),
            TestStep::Press { target: Some(target), key } => format!("press:{}:{}", target, key),
            TestStep::Press { target: None, key } => format!("press:{}", key),
            TestStep::FillAndBlur { target, .. } => format!("fill_and_blur:{}", target),
            TestStep::Blur { target } => format!("blur:{}", target),
            TestStep::Check { target } => format!("check:{}", target),
            TestStep::Assert { target, .. } => format!("assert:{}", target),
            TestStep::AssertUrl { url, .. } => format!("assert_url:{}", url),
            TestStep::Popup { trigger, .. } => format!("popup:{}", trigger),
            TestStep::Sleep { ms } => format!("sleep:{}ms", ms),
            TestStep::Screenshot { name, .. } => format!("screenshot:{}", name),
            TestStep::Around { name, steps } => format!("around:{}({} steps)", name, steps.len()),
            TestStep::GenerateUser => "generate_user".to_string(),
            TestStep::Log { message } => {
                format!("log:{}", message.chars().take(30).collect::<String>())
            }
        }
    }
}

impl TestSuite {
    /// Parse a test suite from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let suite: Self = serde_yaml::from_str(yaml)?;
        if suite.tests.is_empty() {
            return Err(E2eError::SpecParse(format!("suite '{}' has no tests", suite.name)));
        }
        Ok(suite)
    }

    /// Parse a test suite from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all test suites from a directory, sorted by path
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut paths: Vec<_> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        paths.iter().map(|p| Self::from_file(p)).collect()
    }

    /// Filter suites by tag
    pub fn filter_by_tag<'a>(suites: &'a [Self], tag: &str) -> Vec<&'a Self> {
        suites.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }
}
