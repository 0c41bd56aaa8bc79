//! Hub client for workspace, problem, proposal and consensus coordination
//!
//! The evolution engine talks to the Hub through the [`HubApi`] trait so it
//! can be driven by an in-process double in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::protocol::{HubError, HubResult, PROTOCOL_VERSION};
use crate::transport::{HubClientConfig, RetryPolicy, RpcTransport};

pub const HUB_TOOL: &str = "thoughtbox_hub";

/// Hub operation names as they appear on the wire
pub mod operations {
    pub const REGISTER: &str = "register";
    pub const CREATE_WORKSPACE: &str = "create_workspace";
    pub const CREATE_PROBLEM: &str = "create_problem";
    pub const CLAIM_PROBLEM: &str = "claim_problem";
    pub const CREATE_PROPOSAL: &str = "create_proposal";
    pub const REVIEW_PROPOSAL: &str = "review_proposal";
    pub const MERGE_PROPOSAL: &str = "merge_proposal";
    pub const MARK_CONSENSUS: &str = "mark_consensus";
}

// ── Arguments ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterArgs {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkspaceArgs {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProblemArgs {
    pub workspace_id: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimProblemArgs {
    pub workspace_id: String,
    pub problem_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProposalArgs {
    pub workspace_id: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewProposalArgs {
    pub workspace_id: String,
    pub proposal_id: String,
    /// `approve`, `comment` or `request-changes`
    pub verdict: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeProposalArgs {
    pub workspace_id: String,
    pub proposal_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkConsensusArgs {
    pub workspace_id: String,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_ref: Option<u32>,
}

// ── Results ──

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub agent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub workspace_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub problem_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    #[serde(default)]
    pub problem_id: Option<String>,
    /// Collaboration branch the claimant works on
    #[serde(default)]
    pub branch_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub proposal_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    #[serde(default)]
    pub review_id: Option<String>,
    /// Verdict as recorded by the Hub
    #[serde(default)]
    pub verdict: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Merge {
    #[serde(default = "default_true")]
    pub merged: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusMarker {
    #[serde(alias = "consensusId", alias = "id")]
    pub marker_id: String,
}

/// Coordination operations the evolution engine needs from the Hub
#[async_trait]
pub trait HubApi: Send + Sync {
    async fn register(&self, args: RegisterArgs) -> HubResult<Registration>;
    async fn create_workspace(&self, args: CreateWorkspaceArgs) -> HubResult<Workspace>;
    async fn create_problem(&self, args: CreateProblemArgs) -> HubResult<Problem>;
    async fn claim_problem(&self, args: ClaimProblemArgs) -> HubResult<Claim>;
    async fn create_proposal(&self, args: CreateProposalArgs) -> HubResult<Proposal>;
    async fn review_proposal(&self, args: ReviewProposalArgs) -> HubResult<Review>;
    async fn merge_proposal(&self, args: MergeProposalArgs) -> HubResult<Merge>;
    async fn mark_consensus(&self, args: MarkConsensusArgs) -> HubResult<ConsensusMarker>;
}

/// JSON-RPC client for the Hub
#[derive(Debug)]
pub struct HubClient {
    transport: RpcTransport,
    initialized: OnceCell<()>,
    client_name: String,
}

impl HubClient {
    pub fn new(config: HubClientConfig) -> HubResult<Self> {
        Ok(Self {
            transport: RpcTransport::new(config, HUB_TOOL)?,
            initialized: OnceCell::new(),
            client_name: "swarm".to_string(),
        })
    }

    /// Name announced in the initialize handshake
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.transport.session_id()
    }

    /// Perform the initialize handshake once per client instance
    async fn ensure_initialized(&self) -> HubResult<()> {
        self.initialized
            .get_or_try_init(|| async {
                let params = serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": self.client_name,
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                });
                self.transport.request("initialize", Some(params)).await?;
                info!(
                    "Hub session initialized (session: {})",
                    self.transport.session_id().unwrap_or("none")
                );
                Ok::<(), HubError>(())
            })
            .await
            .map(|_| ())
    }

    async fn call<A, T>(&self, operation: &str, args: &A) -> HubResult<T>
    where
        A: Serialize + Sync,
        T: serde::de::DeserializeOwned,
    {
        self.ensure_initialized().await?;
        debug!("Hub call: {}", operation);
        // Every Hub operation creates or changes state
        self.transport
            .call_with(operation, args, RetryPolicy::Unsent)
            .await
    }
}

#[async_trait]
impl HubApi for HubClient {
    async fn register(&self, args: RegisterArgs) -> HubResult<Registration> {
        self.call(operations::REGISTER, &args).await
    }

    async fn create_workspace(&self, args: CreateWorkspaceArgs) -> HubResult<Workspace> {
        self.call(operations::CREATE_WORKSPACE, &args).await
    }

    async fn create_problem(&self, args: CreateProblemArgs) -> HubResult<Problem> {
        self.call(operations::CREATE_PROBLEM, &args).await
    }

    async fn claim_problem(&self, args: ClaimProblemArgs) -> HubResult<Claim> {
        self.call(operations::CLAIM_PROBLEM, &args).await
    }

    async fn create_proposal(&self, args: CreateProposalArgs) -> HubResult<Proposal> {
        self.call(operations::CREATE_PROPOSAL, &args).await
    }

    async fn review_proposal(&self, args: ReviewProposalArgs) -> HubResult<Review> {
        self.call(operations::REVIEW_PROPOSAL, &args).await
    }

    async fn merge_proposal(&self, args: MergeProposalArgs) -> HubResult<Merge> {
        self.call(operations::MERGE_PROPOSAL, &args).await
    }

    async fn mark_consensus(&self, args: MarkConsensusArgs) -> HubResult<ConsensusMarker> {
        self.call(operations::MARK_CONSENSUS, &args).await
    }
}
