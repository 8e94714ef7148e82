//! Gatherer readiness probe
//!
//! Polls the gatherer's `/health/status` endpoint at startup when
//! `gatherer.wait_for_ok` is set.

use gopher_common::config::GathererConfig;
use std::time::Duration;
use tracing::{error, info, warn};

/// Delay between probe attempts
pub const PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// Gatherer health endpoint for a configuration
pub fn health_url(config: &GathererConfig) -> String {
    format!(
        "{}:{}/health/status",
        config.gatherer_host.trim_end_matches('/'),
        config.gatherer_port
    )
}

pub struct GathererProbe {
    http_client: reqwest::Client,
    url: String,
    retries: u32,
    interval: Duration,
}

impl GathererProbe {
    pub fn new(config: &GathererConfig) -> Self {
        // Builder only fails when the TLS backend cannot initialize
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client,
            url: health_url(config),
            retries: config.wait_for_ok_retries.max(1),
            interval: PROBE_INTERVAL,
        }
    }

    /// Override the delay between attempts
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll until the gatherer answers 200 or the retries run out
    pub async fn wait_until_ready(&self) -> bool {
        info!("Waiting for gatherer to wake up at {}", self.url);
        let mut last_message = String::new();

        for attempt in 1..=self.retries {
            let message = match self.http_client.get(&self.url).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(attempt, "Gatherer is ready");
                    return true;
                }
                Ok(response) => format!("Gatherer returned status: {}", response.status()),
                Err(e) => format!("Unable to get gatherer status, reason: {}", e),
            };

            // Repeat failures only at debug level
            if message != last_message {
                warn!(attempt, retries = self.retries, "{}", message);
                last_message = message;
            } else {
                tracing::debug!(attempt, "{}", message);
            }

            if attempt < self.retries {
                tokio::time::sleep(self.interval).await;
            }
        }

        error!(
            retries = self.retries,
            "Cannot get gatherer status in timely manner; continuing without it"
        );
        false
    }
}
