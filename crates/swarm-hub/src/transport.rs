//! HTTP transport for tool calls
//!
//! One `RpcTransport` per client instance. It owns the session id captured
//! from the first response that carries one, and re-sends it on every later
//! request for the lifetime of the instance.
//!
//! Calls that change server state use [`RetryPolicy::Unsent`]: a timed-out
//! attempt may already have been applied, so only failures that never
//! reached the server are re-sent.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::{
    HubError, HubResult, RpcRequest, SESSION_HEADER, decode_tool_result, parse_response_body,
};

/// Connection settings for a Hub or Gateway endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubClientConfig {
    /// Full endpoint URL, e.g. `http://localhost:1731/mcp`
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra attempts for timeouts and connection failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for HubClientConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:1731/mcp".to_string(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Which failures a call may be re-sent after
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Timeouts and transport failures; reads and the handshake
    Retryable,
    /// Only connection failures; creates and other state changes
    Unsent,
}

impl RetryPolicy {
    pub fn allows(self, err: &HubError) -> bool {
        match self {
            Self::Retryable => err.is_retryable(),
            Self::Unsent => err.is_unsent(),
        }
    }
}

pub struct RpcTransport {
    client: Client,
    config: HubClientConfig,
    tool_name: &'static str,
    next_id: AtomicU64,
    session_id: OnceLock<String>,
}

impl std::fmt::Debug for RpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcTransport")
            .field("client", &"<reqwest::Client>")
            .field("url", &self.config.url)
            .field("tool_name", &self.tool_name)
            .field("session_id", &self.session_id.get())
            .finish()
    }
}

impl RpcTransport {
    pub fn new(config: HubClientConfig, tool_name: &'static str) -> HubResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HubError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            tool_name,
            next_id: AtomicU64::new(1),
            session_id: OnceLock::new(),
        })
    }

    pub fn tool_name(&self) -> &'static str {
        self.tool_name
    }

    /// Session id captured from the server, if any response carried one yet
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.get().map(String::as_str)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a raw JSON-RPC request and return its `result`
    pub async fn request(&self, method: &str, params: Option<Value>) -> HubResult<Value> {
        let mut request = RpcRequest::new(method, self.next_id());
        if let Some(params) = params {
            request = request.with_params(params);
        }
        self.send_with_retry(&request, RetryPolicy::Retryable).await
    }

    /// Run a read-only `operation` through `tools/call` and decode the typed result
    pub async fn call<A, T>(&self, operation: &str, args: &A) -> HubResult<T>
    where
        A: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.call_with(operation, args, RetryPolicy::Retryable).await
    }

    pub async fn call_with<A, T>(
        &self,
        operation: &str,
        args: &A,
        policy: RetryPolicy,
    ) -> HubResult<T>
    where
        A: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let args = serde_json::to_value(args)
            .map_err(|e| HubError::Protocol(format!("failed to encode {} args: {}", operation, e)))?;
        let request = RpcRequest::tool_call(self.next_id(), self.tool_name, operation, args);
        let result = self.send_with_retry(&request, policy).await?;
        decode_tool_result(operation, result)
    }

    async fn send_with_retry(
        &self,
        request: &RpcRequest,
        policy: RetryPolicy,
    ) -> HubResult<Value> {
        let mut attempt = 0;
        loop {
            match self.send_once(request).await {
                Err(e) if policy.allows(&e) && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        "{} {} failed ({}), retrying {}/{}",
                        self.tool_name, request.method, e, attempt, self.config.max_retries
                    );
                    let backoff = self.config.retry_backoff_ms * u64::from(attempt);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                other => return other,
            }
        }
    }

    async fn send_once(&self, request: &RpcRequest) -> HubResult<Value> {
        debug!(
            "Sending {} (id {}) to {}",
            request.method, request.id, self.config.url
        );

        let mut builder = self
            .client
            .post(&self.config.url)
            .header("content-type", "application/json")
            .header("accept", "application/json, text/event-stream")
            .json(request);
        if let Some(session) = self.session_id.get() {
            builder = builder.header(SESSION_HEADER, session);
        }

        let response = builder.send().await?;

        if self.session_id.get().is_none() {
            let header = response
                .headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok());
            if let Some(session) = header {
                if self.session_id.set(session.to_string()).is_ok() {
                    debug!("{}: captured session id {}", self.tool_name, session);
                }
            }
        }

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(HubError::Http {
                status: status.as_u16(),
                body,
            });
        }

        parse_response_body(&body)?.into_result()
    }
}
