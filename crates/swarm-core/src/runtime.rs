//! HTTP evaluator backed by the agent runtime
//!
//! POSTs `{"blueprint": ..., "task": ...}` to the runtime and expects an
//! `EvaluationOutcome` JSON body back.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::blueprint::TeamBlueprint;
use crate::evolution::{BlueprintEvaluator, EvaluationOutcome, EvaluationTask};

#[derive(Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Evaluation endpoint, e.g. `http://localhost:8283/v1/evaluations`
    #[serde(default = "default_runtime_url")]
    pub url: String,
    #[serde(default = "default_runtime_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_runtime_url() -> String {
    "http://localhost:8283/v1/evaluations".to_string()
}

fn default_runtime_timeout_secs() -> u64 {
    300
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            url: default_runtime_url(),
            timeout_secs: default_runtime_timeout_secs(),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("url", &self.url)
            .field("timeout_secs", &self.timeout_secs)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

pub struct RuntimeEvaluator {
    client: Client,
    config: RuntimeConfig,
}

impl RuntimeEvaluator {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build runtime HTTP client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl BlueprintEvaluator for RuntimeEvaluator {
    async fn evaluate(
        &self,
        blueprint: &TeamBlueprint,
        task: &EvaluationTask,
    ) -> Result<EvaluationOutcome> {
        debug!(
            "Evaluating blueprint {} for {} at {}",
            blueprint.id, task.niche.key, self.config.url
        );

        let mut request = self
            .client
            .post(&self.config.url)
            .json(&json!({ "blueprint": blueprint, "task": task }));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Runtime request to {} failed", self.config.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Runtime returned {}: {}", status, body));
        }

        response
            .json::<EvaluationOutcome>()
            .await
            .context("Failed to decode runtime evaluation outcome")
    }
}
