use super::{AsyncValidator, RuleOutcome, ValidationContext};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Serialize)]
struct RemoteRequest<'a> {
    field: &'a str,
    value: &'a Value,
}

#[derive(Deserialize)]
struct RemoteVerdict {
    valid: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Async rule that asks an HTTP endpoint, e.g. "is this username taken".
///
/// Sends `POST { field, value }` and expects `{ valid, message? }` back. Any
/// transport, status or decode failure is returned as an error.
#[derive(Clone)]
pub struct RemoteRule {
    client: reqwest::Client,
    endpoint: String,
    code: String,
    default_message: String,
}

impl RemoteRule {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(client, endpoint))
    }

    /// Shares an existing client (and its connection pool).
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            code: "remote".to_string(),
            default_message: "This value was rejected".to_string(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_default_message(mut self, message: impl Into<String>) -> Self {
        self.default_message = message.into();
        self
    }
}

#[async_trait]
impl AsyncValidator for RemoteRule {
    async fn validate(&self, value: &Value, ctx: &ValidationContext) -> Result<RuleOutcome> {
        let body = RemoteRequest {
            field: &ctx.field,
            value,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", self.endpoint))?
            .error_for_status()?;

        let verdict: RemoteVerdict = response
            .json()
            .await
            .context("Remote validator returned an unreadable body")?;

        if verdict.valid {
            Ok(RuleOutcome::valid())
        } else {
            let message = verdict.message.unwrap_or_else(|| self.default_message.clone());
            Ok(RuleOutcome::error(self.code.clone(), message))
        }
    }
}
