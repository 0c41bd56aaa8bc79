//! Gateway client for reasoning sessions and shared deliberation context

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::protocol::HubResult;
use crate::transport::{HubClientConfig, RetryPolicy, RpcTransport};

pub const GATEWAY_TOOL: &str = "thoughtbox_gateway";

pub mod operations {
    pub const START_NEW: &str = "start_new";
    pub const LOAD_CONTEXT: &str = "load_context";
    pub const CIPHER: &str = "cipher";
    pub const THOUGHT: &str = "thought";
    pub const SESSION: &str = "session";

    pub const SESSION_READ: &str = "read";
    pub const SESSION_STRUCTURE: &str = "structure";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartNewArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadContextArgs {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub session_id: String,
    #[serde(default)]
    pub thought_count: u32,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cipher {
    /// Notation guide the server expects thoughts to follow
    #[serde(alias = "cipher", alias = "content")]
    pub notation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtArgs {
    pub thought: String,
    pub thought_number: u32,
    pub total_thoughts: u32,
    pub next_thought_needed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtReceipt {
    pub thought_number: u32,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Thought {
    pub thought_number: u32,
    pub thought: String,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Result of `session.read`.
///
/// Servers return either a bare array or `{"thoughts": [...]}`; both decode
/// to the same ordered list.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ThoughtList(pub Vec<Thought>);

impl<'de> Deserialize<'de> for ThoughtList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Bare(Vec<Thought>),
            Wrapped { thoughts: Vec<Thought> },
        }

        Ok(match Shape::deserialize(deserializer)? {
            Shape::Bare(thoughts) => ThoughtList(thoughts),
            Shape::Wrapped { thoughts } => ThoughtList(thoughts),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStructure {
    #[serde(default)]
    pub thought_count: u32,
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub revisions: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionArgs<'a> {
    operation: &'a str,
    session_id: &'a str,
}

/// Reasoning operations consumed by the bridge
#[async_trait]
pub trait GatewayApi: Send + Sync {
    async fn start_new(&self, args: StartNewArgs) -> HubResult<Session>;
    async fn load_context(&self, args: LoadContextArgs) -> HubResult<SessionContext>;
    async fn cipher(&self) -> HubResult<Cipher>;
    async fn thought(&self, args: ThoughtArgs) -> HubResult<ThoughtReceipt>;
    async fn read_thoughts(&self, session_id: &str) -> HubResult<Vec<Thought>>;
    async fn session_structure(&self, session_id: &str) -> HubResult<SessionStructure>;
}

/// JSON-RPC client for the Gateway
#[derive(Debug)]
pub struct GatewayClient {
    transport: RpcTransport,
}

impl GatewayClient {
    pub fn new(config: HubClientConfig) -> HubResult<Self> {
        Ok(Self {
            transport: RpcTransport::new(config, GATEWAY_TOOL)?,
        })
    }

    pub fn session_id(&self) -> Option<&str> {
        self.transport.session_id()
    }
}

#[async_trait]
impl GatewayApi for GatewayClient {
    async fn start_new(&self, args: StartNewArgs) -> HubResult<Session> {
        self.transport
            .call_with(operations::START_NEW, &args, RetryPolicy::Unsent)
            .await
    }

    async fn load_context(&self, args: LoadContextArgs) -> HubResult<SessionContext> {
        self.transport.call(operations::LOAD_CONTEXT, &args).await
    }

    async fn cipher(&self) -> HubResult<Cipher> {
        self.transport
            .call(operations::CIPHER, &serde_json::json!({}))
            .await
    }

    async fn thought(&self, args: ThoughtArgs) -> HubResult<ThoughtReceipt> {
        self.transport
            .call_with(operations::THOUGHT, &args, RetryPolicy::Unsent)
            .await
    }

    async fn read_thoughts(&self, session_id: &str) -> HubResult<Vec<Thought>> {
        debug!("Reading thoughts for session {}", session_id);
        let args = SessionArgs {
            operation: operations::SESSION_READ,
            session_id,
        };
        let list: ThoughtList = self.transport.call(operations::SESSION, &args).await?;
        Ok(list.0)
    }

    async fn session_structure(&self, session_id: &str) -> HubResult<SessionStructure> {
        let args = SessionArgs {
            operation: operations::SESSION_STRUCTURE,
            session_id,
        };
        self.transport.call(operations::SESSION, &args).await
    }
}
