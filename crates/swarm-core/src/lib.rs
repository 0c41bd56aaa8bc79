//! swarm-core - Niche routing and team evolution for the agent swarm
//!
//! This crate provides:
//! - Keyword niche matching for inbound chat messages
//! - Per-agent bounded FIFO queues drained concurrently by a pluggable processor
//! - A durable JSON registry of agents, routing counters and the elite archive
//! - Fitness scoring, team blueprints and their variation operators
//! - The MAP-Elites generation loop, coordinated through the Hub
//! - Optional generation traces on the reasoning Gateway

pub mod blueprint;
pub mod bounded;
pub mod bridge;
pub mod error;
pub mod evolution;
pub mod fitness;
pub mod manager;
pub mod niche;
pub mod runtime;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use blueprint::{
    AgentRoleConfig, CoordinationStrategy, HubRefs, Mutation, TeamBlueprint, mutate,
    seed_blueprint,
};
pub use bounded::BoundedMap;
pub use bridge::ReasoningBridge;
pub use error::{Result, SwarmError};
pub use evolution::{
    BlueprintEvaluator, EvaluationBudget, EvaluationOutcome, EvaluationTask, EvolutionConfig,
    EvolutionEngine, GenerationReport, NicheOutcome, NicheReport, summarize,
};
pub use fitness::{
    FitnessScores, FitnessWeights, RawFitness, ReviewThresholds, ReviewVerdict, compute_fitness,
    is_elite_replacement, normalize_review_score, verdict_for,
};
pub use manager::{EnqueueOutcome, MessageProcessor, OverflowPolicy, QueueConfig, SwarmManager};
pub use niche::{Domain, MULTI_CHANNEL, NicheDescriptor, NicheMatcher, classify_domain, match_niche};
pub use runtime::{RuntimeConfig, RuntimeEvaluator};
pub use store::{
    NicheRouteStats, RouteStats, SwarmAgentEntry, SwarmMode, SwarmRegistry, SwarmStore,
};
pub use types::{ChannelAdapter, InboundMessage};
