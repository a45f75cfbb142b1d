//! HTTP liveness probes against deployed artifacts.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, instrument};

/// Outcome of adaptive readiness polling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Readiness {
    pub ready: bool,
    pub elapsed_secs: f64,
}

/// Shared HTTP client for liveness checks; every request carries `timeout`.
#[derive(Debug, Clone)]
pub struct LivenessProbe {
    client: Client,
    timeout: Duration,
    path: String,
}

impl LivenessProbe {
    pub fn new(timeout: Duration, path: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .context("build liveness http client")?;
        Ok(Self {
            client,
            timeout,
            path: path.into(),
        })
    }

    pub fn url(&self, port: u16) -> String {
        format!("http://127.0.0.1:{port}{}", self.path)
    }

    /// Single GET; `true` only on HTTP 200.
    pub async fn check(&self, port: u16) -> bool {
        let url = self.url(port);
        match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(resp) => {
                let ok = resp.status() == StatusCode::OK;
                debug!(url = %url, status = %resp.status(), ok, "liveness probe");
                ok
            }
            Err(e) => {
                debug!(url = %url, err = %e, "liveness probe failed");
                false
            }
        }
    }

    /// Poll every `interval` until the endpoint answers 200 or `timeout` elapses.
    #[instrument(skip_all, fields(port = port, timeout_secs = timeout.as_secs()))]
    pub async fn wait_ready(&self, port: u16, timeout: Duration, interval: Duration) -> Readiness {
        let start = Instant::now();
        loop {
            if self.check(port).await {
                let elapsed_secs = start.elapsed().as_secs_f64();
                debug!(elapsed_secs, "deployment ready");
                return Readiness {
                    ready: true,
                    elapsed_secs,
                };
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                debug!("deployment not ready before timeout");
                return Readiness {
                    ready: false,
                    elapsed_secs: elapsed.as_secs_f64(),
                };
            }
            tokio::time::sleep(interval.min(timeout - elapsed)).await;
        }
    }
}
