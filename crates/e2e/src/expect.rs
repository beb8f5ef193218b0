//! Auto-retrying assertions
//!
//! Each assertion re-queries the page until it holds or the timeout runs out,
//! so steps don't need explicit waits for async renders.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::debug;

use crate::error::{E2eError, E2eResult};
use crate::playwright::{Locator, Page};
use crate::spec::Matcher;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll `probe` until it yields `Ok(true)` or `timeout` elapses.
///
/// Driver errors while polling count as "not yet"; the last one is reported
/// if the deadline passes.
pub async fn poll_until<F, Fut>(what: &str, timeout: Duration, mut probe: F) -> E2eResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = E2eResult<bool>>,
{
    let start = Instant::now();
    let mut attempts = 0usize;
    let mut last_error: Option<E2eError> = None;

    loop {
        attempts += 1;
        match probe().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => last_error = Some(e),
        }

        if start.elapsed() >= timeout {
            break;
        }
        sleep(POLL_INTERVAL).await;
    }

    debug!("{} still failing after {} attempts", what, attempts);
    Err(match last_error {
        Some(e) => E2eError::AssertionFailed(format!("{} ({})", what, e)),
        None => E2eError::AssertionFailed(format!("{} (timed out after {:?})", what, timeout)),
    })
}

pub async fn to_be_visible(locator: &Locator, timeout: Duration) -> E2eResult<()> {
    poll_until(&format!("{} to be visible", locator.target()), timeout, || locator.is_visible()).await
}

pub async fn to_be_hidden(locator: &Locator, timeout: Duration) -> E2eResult<()> {
    poll_until(&format!("{} to be hidden", locator.target()), timeout, || async move {
        Ok(!locator.is_visible().await?)
    })
    .await
}

pub async fn to_be_enabled(locator: &Locator, enabled: bool, timeout: Duration) -> E2eResult<()> {
    let what = format!("{} to be {}", locator.target(), if enabled { "enabled" } else { "disabled" });
    poll_until(&what, timeout, || async move { Ok(locator.is_enabled().await? == enabled) }).await
}

/// Whole trimmed text content matches `expected`
pub async fn to_have_text(locator: &Locator, expected: &Matcher, timeout: Duration) -> E2eResult<()> {
    let what = format!("{} to have text {}", locator.target(), expected);
    poll_until(&what, timeout, || async move {
        let text = locator.text_content().await?.unwrap_or_default();
        expected.is_match(text.trim())
    })
    .await
}

pub async fn to_contain_text(locator: &Locator, needle: &str, timeout: Duration) -> E2eResult<()> {
    let what = format!("{} to contain text '{}'", locator.target(), needle);
    poll_until(&what, timeout, || async move {
        Ok(locator.text_content().await?.unwrap_or_default().contains(needle))
    })
    .await
}

pub async fn to_have_url(page: &Page, expected: &Matcher, timeout: Duration) -> E2eResult<()> {
    let what = format!("page to have URL {}", expected);
    poll_until(&what, timeout, || async move {
        let url = page.url().await?;
        expected.is_match(&url)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_poll_until_succeeds_after_retries() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        poll_until("third time lucky", Duration::from_secs(2), || async move {
            Ok(counter.fetch_add(1, Ordering::SeqCst) >= 2)
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let err = poll_until("never", Duration::from_millis(150), || async move { Ok(false) })
            .await
            .unwrap_err();
        assert!(matches!(err, E2eError::AssertionFailed(msg) if msg.contains("never")));
    }

    #[tokio::test]
    async fn test_poll_until_reports_last_error() {
        let err = poll_until("driver gone", Duration::from_millis(50), || async move {
            Err(E2eError::DriverClosed)
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Driver connection closed"));
    }
}
