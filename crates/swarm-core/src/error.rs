//! Error type for swarm-core

use std::path::PathBuf;

use swarm_hub::HubError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The blocking registry write panicked or was cancelled
    #[error("Registry write task failed: {0}")]
    WriteTask(#[from] tokio::task::JoinError),

    /// A review verdict outside approve / comment / request-changes
    #[error("Unknown review verdict '{0}'")]
    UnknownVerdict(String),

    #[error("Queue for agent '{agent_id}' is full ({depth} messages)")]
    QueueFull { agent_id: String, depth: usize },

    #[error("No Hub problem registered for niche '{0}'")]
    MissingProblem(String),

    #[error("Hub workspace not initialized; run initialize_archive first")]
    MissingWorkspace,

    #[error(transparent)]
    Hub(#[from] HubError),
}

pub type Result<T> = std::result::Result<T, SwarmError>;
