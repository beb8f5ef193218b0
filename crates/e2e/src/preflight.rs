//! Reachability check of the application under test

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};

/// Configuration for the preflight check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightConfig {
    /// Skip the check entirely
    pub enabled: bool,

    /// How long to keep retrying before giving up
    pub timeout_secs: u64,

    /// Pause between attempts
    pub interval_ms: u64,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 30,
            interval_ms: 500,
        }
    }
}

/// Wait until `base_url` answers with a non-5xx status
pub async fn wait_for_reachable(base_url: &str, config: &PreflightConfig) -> E2eResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    let timeout = Duration::from_secs(config.timeout_secs);
    let start = std::time::Instant::now();
    let mut attempts = 0;

    // At least one request, even with a zero timeout
    loop {
        attempts += 1;

        match client.get(base_url).send().await {
            Ok(resp) if !resp.status().is_server_error() => {
                info!("{} reachable ({})", base_url, resp.status());
                return Ok(());
            }
            Ok(resp) => {
                warn!("Preflight returned {}", resp.status());
            }
            Err(e) => {
                if attempts == 1 {
                    info!("Waiting for {}...", base_url);
                }
                if !e.is_connect() {
                    warn!("Preflight error: {}", e);
                }
            }
        }

        if start.elapsed() >= timeout {
            break;
        }
        sleep(Duration::from_millis(config.interval_ms)).await;
    }

    Err(E2eError::Unreachable {
        url: base_url.to_string(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_preflight_skips_network() {
        let config = PreflightConfig {
            enabled: false,
            ..Default::default()
        };
        wait_for_reachable("http://127.0.0.1:1", &config).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_host_reports_attempts() {
        // Reserve a port, then release it so nothing is listening there
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let config = PreflightConfig {
            enabled: true,
            timeout_secs: 1,
            interval_ms: 200,
        };
        let err = wait_for_reachable(&format!("http://127.0.0.1:{}", port), &config)
            .await
            .unwrap_err();

        match err {
            E2eError::Unreachable { attempts, .. } => assert!(attempts >= 1),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_timeout_still_tries_once() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let config = PreflightConfig {
            enabled: true,
            timeout_secs: 0,
            interval_ms: 10,
        };
        let err = wait_for_reachable(&format!("http://127.0.0.1:{}", port), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, E2eError::Unreachable { attempts: 1, .. }), "{}", err);
    }

    #[tokio::test]
    async fn test_zero_timeout_accepts_a_live_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
            }
        });

        let config = PreflightConfig {
            enabled: true,
            timeout_secs: 0,
            interval_ms: 10,
        };
        wait_for_reachable(&format!("http://127.0.0.1:{}", port), &config)
            .await
            .unwrap();
    }
}
