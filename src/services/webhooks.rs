//! Outbound billing event delivery.

use anyhow::{Context, Result};
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const MAX_ELAPSED: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub event: String,
    pub occurred_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl WebhookEvent {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            occurred_at: Utc::now(),
            data,
        }
    }
}

/// Posts events to the configured endpoint. Without one, every dispatch is a no-op.
#[derive(Clone)]
pub struct WebhookDispatcher {
    client: Client,
    url: Option<String>,
}

impl WebhookDispatcher {
    pub fn new(url: Option<String>, timeout_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        if let Some(url) = &url {
            info!(url = %url, "Webhook delivery enabled");
        }

        Ok(Self { client, url })
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self {
            client: Client::new(),
            url: None,
        }
    }

    /// Deliver in the background. Failures are logged and never reach the caller.
    pub fn dispatch(&self, event: WebhookEvent) {
        let Some(url) = self.url.clone() else {
            return;
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Err(e) = deliver(&client, &url, &event).await {
                warn!(event = %event.event, error = %e, "Webhook delivery gave up");
            }
        });
    }
}

#[instrument(skip(client, event), fields(event = %event.event))]
async fn deliver(client: &Client, url: &str, event: &WebhookEvent) -> Result<()> {
    let policy = ExponentialBackoff {
        max_elapsed_time: Some(MAX_ELAPSED),
        ..ExponentialBackoff::default()
    };

    backoff::future::retry(policy, || async {
        let response = client
            .post(url)
            .json(event)
            .send()
            .await
            .map_err(|e| backoff::Error::transient(anyhow::anyhow!(e)))?;

        let status = response.status();
        if status.is_success() {
            debug!(status = %status, "Webhook delivered");
            Ok(())
        } else if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(backoff::Error::permanent(anyhow::anyhow!(
                "endpoint rejected event with {}",
                status
            )))
        } else {
            Err(backoff::Error::transient(anyhow::anyhow!(
                "endpoint returned {}",
                status
            )))
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_body_shape() {
        let event = WebhookEvent::new("invoice.paid", serde_json::json!({"invoice_id": "x"}));
        let body = serde_json::to_value(&event).unwrap();
        assert_eq!(body["event"], "invoice.paid");
        assert_eq!(body["data"]["invoice_id"], "x");
        assert!(body["occurred_at"].is_string());
    }

    #[tokio::test]
    async fn disabled_dispatcher_does_nothing() {
        let hooks = WebhookDispatcher::disabled();
        assert!(hooks.url.is_none());
        hooks.dispatch(WebhookEvent::new("invoice.issued", serde_json::json!({})));
    }
}
