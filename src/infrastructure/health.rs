use crate::types::{ConnectionError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use url::Url;

/// Port for the out-of-band server health check
#[async_trait]
pub trait HealthCheck: Send + Sync + 'static {
    /// Succeeds when the server reports itself healthy
    async fn check(&self) -> Result<()>;
}

/// `GET {http_base}/health`, healthy on any 2xx
pub struct HttpHealthCheck {
    client: reqwest::Client,
    url: Url,
}

impl HttpHealthCheck {
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self) -> Result<()> {
        let response = self.client.get(self.url.clone()).send().await?;

        if !response.status().is_success() {
            return Err(ConnectionError::HealthCheck {
                status: response.status().as_u16(),
            });
        }

        tracing::debug!("Health check OK: {} {}", self.url, response.status());
        Ok(())
    }
}

/// Result of one probe
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Healthy {
        latency: Duration,
        checked_at: DateTime<Utc>,
    },
    Unhealthy {
        reason: String,
        checked_at: DateTime<Utc>,
    },
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy { .. })
    }
}

/// Runs a single probe and times it
pub async fn probe(check: &dyn HealthCheck) -> ProbeOutcome {
    let started = time::Instant::now();
    match check.check().await {
        Ok(()) => ProbeOutcome::Healthy {
            latency: started.elapsed(),
            checked_at: Utc::now(),
        },
        Err(e) => {
            tracing::warn!("Health probe failed: {}", e);
            ProbeOutcome::Unhealthy {
                reason: e.to_string(),
                checked_at: Utc::now(),
            }
        }
    }
}

/// Spawns the polling task: one probe immediately, then one per `interval`.
///
/// The task ends when `on_outcome` returns `false`.
pub fn spawn_prober<F>(
    check: Arc<dyn HealthCheck>,
    interval: Duration,
    mut on_outcome: F,
) -> JoinHandle<()>
where
    F: FnMut(ProbeOutcome) -> bool + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval_timer = time::interval(interval);
        interval_timer.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            interval_timer.tick().await;
            let outcome = probe(check.as_ref()).await;
            if !on_outcome(outcome) {
                break;
            }
        }
        tracing::debug!("Health prober finished");
    })
}
