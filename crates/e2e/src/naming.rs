//! Artifact naming
//!
//! `<test>_<label>_<timestamp>.png`, where the timestamp is UTC ISO-8601 with
//! millisecond precision and every `:` / `.` swapped for `-`, e.g.
//! `login_before_submit_2025-01-31T09-15-42-123Z.png`.

use chrono::{DateTime, SecondsFormat, Utc};

/// Extension of every capture artifact.
pub const ARTIFACT_EXTENSION: &str = "png";

const SEPARATOR: char = '-';

/// Filesystem-safe rendering of a capture instant.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// Replace characters that would break the name out of a single path
/// segment or add a stray extension dot.
fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            ':' | '.' | '/' | '\\' => SEPARATOR,
            other => other,
        })
        .collect()
}

/// File name for a capture of `label` taken during `test_name` at `at`.
pub fn artifact_file_name(test_name: &str, label: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}.{}",
        sanitize_component(test_name),
        sanitize_component(label),
        timestamp(at),
        ARTIFACT_EXTENSION
    )
}

/// Label used for the capture taken before a bracketed action.
pub fn before_label(action_name: &str) -> String {
    format!("before_{}", action_name)
}

/// Label used for the capture taken after a bracketed action.
pub fn after_label(action_name: &str) -> String {
    format!("after_{}", action_name)
}
