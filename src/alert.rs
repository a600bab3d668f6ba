// src/alert.rs
//! Operator notification for failures that need a human (bad credentials,
//! removed endpoints, malformed config).

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use uuid::Uuid;

use crate::error::FetchError;

#[async_trait]
pub trait OperatorAlert: Send + Sync {
    async fn permanent_failure(&self, run_id: Uuid, source_id: &str, error: &FetchError);
}

/// Default sink: an `error` event on the `coordinator` target.
#[derive(Debug, Clone, Default)]
pub struct TracingAlert;

#[async_trait]
impl OperatorAlert for TracingAlert {
    async fn permanent_failure(&self, run_id: Uuid, source_id: &str, error: &FetchError) {
        tracing::error!(
            target: "coordinator",
            %run_id,
            source_id,
            error = %error,
            "source failed permanently; operator action needed"
        );
    }
}

/// Discord-compatible webhook. Delivery errors are logged, never propagated.
#[derive(Clone)]
pub struct WebhookAlert {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl WebhookAlert {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    async fn post(&self, payload: &WebhookPayload) -> Result<()> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status_ref() {
                    Ok(_) => return Ok(()),
                    Err(e) => anyhow!("alert webhook HTTP error: {e}"),
                },
                Err(e) => anyhow!("alert webhook request failed: {e}"),
            };
            if attempt >= self.max_retries {
                return Err(err);
            }
            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
        }
    }
}

#[async_trait]
impl OperatorAlert for WebhookAlert {
    async fn permanent_failure(&self, run_id: Uuid, source_id: &str, error: &FetchError) {
        TracingAlert.permanent_failure(run_id, source_id, error).await;
        let payload = WebhookPayload::embed(
            &format!("Source failed: {source_id}"),
            &format!(
                "**Error:** {error}\n**Run:** {run_id}\n**Time (UTC):** {}",
                chrono::Utc::now().to_rfc3339()
            ),
        );
        if let Err(e) = self.post(&payload).await {
            tracing::warn!(target: "coordinator", error = %e, "operator alert not delivered");
        }
    }
}

#[derive(Serialize)]
struct Embed {
    title: String,
    description: String,
}

#[derive(Serialize)]
struct WebhookPayload {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl WebhookPayload {
    fn embed(title: &str, description: &str) -> Self {
        Self {
            content: None,
            embeds: vec![Embed {
                title: title.to_string(),
                description: description.to_string(),
            }],
        }
    }
}
