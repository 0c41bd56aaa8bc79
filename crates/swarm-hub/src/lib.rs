//! swarm-hub - JSON-RPC clients for the coordination Hub and reasoning Gateway
//!
//! Both services expose a single `tools/call` endpoint. This crate provides:
//! - The JSON-RPC envelope and typed error taxonomy
//! - An HTTP transport with bounded timeouts, retries and session affinity
//! - Typed Hub operations behind the [`HubApi`] trait
//! - Typed Gateway operations behind the [`GatewayApi`] trait

pub mod gateway;
pub mod hub;
pub mod protocol;
pub mod transport;

pub use gateway::{
    Cipher, GatewayApi, GatewayClient, LoadContextArgs, Session, SessionContext,
    SessionStructure, StartNewArgs, Thought, ThoughtArgs, ThoughtList, ThoughtReceipt,
};
pub use hub::{
    Claim, ClaimProblemArgs, ConsensusMarker, CreateProblemArgs, CreateProposalArgs,
    CreateWorkspaceArgs, HubApi, HubClient, MarkConsensusArgs, Merge, MergeProposalArgs, Problem,
    Proposal, RegisterArgs, Registration, Review, ReviewProposalArgs, Workspace,
};
pub use protocol::{HubError, HubResult};
pub use transport::{HubClientConfig, RetryPolicy, RpcTransport};
