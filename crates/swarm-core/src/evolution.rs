//! MAP-Elites evolution loop
//!
//! Each niche key is one archive cell holding at most one elite blueprint.
//! A generation walks the requested niches in order and, per niche, runs
//! select -> vary -> claim -> evaluate -> propose -> review -> decide. The
//! promotion decision is coordinated through the Hub: a winning candidate is
//! merged and marked as consensus before it replaces the archived elite.
//!
//! Hub failures abort only the niche they happened in.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use swarm_hub::{
    ClaimProblemArgs, CreateProblemArgs, CreateProposalArgs, CreateWorkspaceArgs, HubApi,
    MarkConsensusArgs, MergeProposalArgs, RegisterArgs, ReviewProposalArgs,
};
use tracing::{debug, info, warn};

use crate::blueprint::{HubRefs, Mutation, TeamBlueprint, mutate, seed_blueprint};
use crate::bridge::ReasoningBridge;
use crate::error::{Result, SwarmError};
use crate::fitness::{
    FitnessWeights, RawFitness, ReviewThresholds, compute_fitness, is_elite_replacement,
    normalize_review_score, verdict_for,
};
use crate::niche::NicheDescriptor;
use crate::store::SwarmStore;

/// Work handed to the evaluator alongside a candidate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationTask {
    pub niche: NicheDescriptor,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
}

/// Metrics reported back for one evaluated candidate
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluationOutcome {
    pub tasks_attempted: u32,
    pub tasks_completed: u32,
    pub reasoning_steps: u32,
    pub consensus_rounds: u32,
    pub cost_usd: f64,
}

/// Runs a candidate team against a task
#[async_trait]
pub trait BlueprintEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        blueprint: &TeamBlueprint,
        task: &EvaluationTask,
    ) -> AnyResult<EvaluationOutcome>;
}

/// Reference points that turn raw outcome metrics into [0, 1] components
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EvaluationBudget {
    #[serde(default = "default_target_reasoning_steps")]
    pub target_reasoning_steps: u32,
    #[serde(default = "default_max_consensus_rounds")]
    pub max_consensus_rounds: u32,
    #[serde(default = "default_max_cost_usd")]
    pub max_cost_usd: f64,
}

fn default_target_reasoning_steps() -> u32 {
    8
}

fn default_max_consensus_rounds() -> u32 {
    5
}

fn default_max_cost_usd() -> f64 {
    0.50
}

impl Default for EvaluationBudget {
    fn default() -> Self {
        Self {
            target_reasoning_steps: default_target_reasoning_steps(),
            max_consensus_rounds: default_max_consensus_rounds(),
            max_cost_usd: default_max_cost_usd(),
        }
    }
}

/// Map outcome metrics onto the fitness components. `review_score` is left at 0.
pub fn summarize(outcome: &EvaluationOutcome, budget: &EvaluationBudget) -> RawFitness {
    let task_completion = if outcome.tasks_attempted == 0 {
        0.0
    } else {
        f64::from(outcome.tasks_completed) / f64::from(outcome.tasks_attempted)
    };

    let reasoning_depth = if budget.target_reasoning_steps == 0 {
        1.0
    } else {
        f64::from(outcome.reasoning_steps) / f64::from(budget.target_reasoning_steps)
    };

    // One round is perfect; each extra round costs 1/max
    let consensus_speed = if outcome.consensus_rounds == 0 {
        0.0
    } else {
        let extra = f64::from(outcome.consensus_rounds - 1);
        1.0 - extra / f64::from(budget.max_consensus_rounds.max(1))
    };

    let cost_efficiency = if budget.max_cost_usd <= 0.0 {
        if outcome.cost_usd <= 0.0 { 1.0 } else { 0.0 }
    } else {
        1.0 - outcome.cost_usd / budget.max_cost_usd
    };

    RawFitness {
        task_completion,
        review_score: 0.0,
        reasoning_depth,
        consensus_speed,
        cost_efficiency,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionConfig {
    #[serde(default)]
    pub weights: FitnessWeights,
    #[serde(default)]
    pub thresholds: ReviewThresholds,
    #[serde(default)]
    pub budget: EvaluationBudget,
    #[serde(default = "default_evaluation_timeout_secs")]
    pub evaluation_timeout_secs: u64,
    /// Pool for seed teams (first entry) and the model operator
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    /// Name the coordinator registers under on the Hub
    #[serde(default = "default_coordinator_name")]
    pub coordinator_name: String,
    #[serde(default = "default_workspace_name")]
    pub workspace_name: String,
    /// Fixed RNG seed for reproducible runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_evaluation_timeout_secs() -> u64 {
    300
}

fn default_models() -> Vec<String> {
    vec![
        "claude-sonnet-4-5-20250929".to_string(),
        "claude-opus-4-6".to_string(),
    ]
}

fn default_coordinator_name() -> String {
    "swarm-coordinator".to_string()
}

fn default_workspace_name() -> String {
    "swarm-evolution".to_string()
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            weights: FitnessWeights::default(),
            thresholds: ReviewThresholds::default(),
            budget: EvaluationBudget::default(),
            evaluation_timeout_secs: default_evaluation_timeout_secs(),
            models: default_models(),
            coordinator_name: default_coordinator_name(),
            workspace_name: default_workspace_name(),
            seed: None,
        }
    }
}

/// Result of one niche's step in a generation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum NicheOutcome {
    /// Candidate replaced (or became) the elite
    Promoted {
        blueprint_id: String,
        composite: f64,
        replaced: Option<String>,
    },
    /// Candidate lost and was dropped
    Discarded {
        blueprint_id: String,
        composite: f64,
        reason: String,
    },
    /// The niche could not complete this generation
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NicheReport {
    pub niche: NicheDescriptor,
    pub mutation: Option<Mutation>,
    pub outcome: NicheOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationReport {
    pub generation: u64,
    pub niches: Vec<NicheReport>,
}

impl GenerationReport {
    /// (niche, promoted blueprint id) for every promotion
    pub fn promotions(&self) -> impl Iterator<Item = (&NicheDescriptor, &str)> {
        self.niches.iter().filter_map(|r| match &r.outcome {
            NicheOutcome::Promoted { blueprint_id, .. } => Some((&r.niche, blueprint_id.as_str())),
            _ => None,
        })
    }

    pub fn failures(&self) -> usize {
        self.niches
            .iter()
            .filter(|r| matches!(r.outcome, NicheOutcome::Failed { .. }))
            .count()
    }

    /// One line per niche
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("Generation {}:", self.generation)];
        for r in &self.niches {
            let mutation = r.mutation.map(|m| m.to_string()).unwrap_or_else(|| "-".to_string());
            let line = match &r.outcome {
                NicheOutcome::Promoted { composite, .. } => {
                    format!("{} [{}] promoted at {:.3}", r.niche.key, mutation, composite)
                }
                NicheOutcome::Discarded {
                    composite, reason, ..
                } => format!(
                    "{} [{}] discarded at {:.3} ({})",
                    r.niche.key, mutation, composite, reason
                ),
                NicheOutcome::Failed { reason } => {
                    format!("{} [{}] failed: {}", r.niche.key, mutation, reason)
                }
            };
            lines.push(line);
        }
        lines.join("\n")
    }
}

pub struct EvolutionEngine {
    store: Arc<SwarmStore>,
    hub: Arc<dyn HubApi>,
    evaluator: Arc<dyn BlueprintEvaluator>,
    config: EvolutionConfig,
    rng: Mutex<StdRng>,
    bridge: Option<ReasoningBridge>,
}

impl EvolutionEngine {
    pub fn new(
        store: Arc<SwarmStore>,
        hub: Arc<dyn HubApi>,
        evaluator: Arc<dyn BlueprintEvaluator>,
        config: EvolutionConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            store,
            hub,
            evaluator,
            config,
            rng: Mutex::new(rng),
            bridge: None,
        }
    }

    /// Trace every generation to the reasoning Gateway
    pub fn with_bridge(mut self, bridge: ReasoningBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    /// Register with the Hub, open the workspace and create one problem per niche.
    ///
    /// Ids already persisted are reused, so calling this again is cheap.
    pub async fn initialize_archive(&self, niches: &[NicheDescriptor]) -> Result<()> {
        if self.store.hub_agent_id().is_none() {
            let registration = self
                .hub
                .register(RegisterArgs {
                    name: self.config.coordinator_name.clone(),
                    profile: Some("coordinator".to_string()),
                })
                .await?;
            info!("Registered with Hub as {}", registration.agent_id);
            self.store.set_hub_agent_id(registration.agent_id).await?;
        }

        let workspace_id = match self.store.hub_workspace_id() {
            Some(id) => id,
            None => {
                let workspace = self
                    .hub
                    .create_workspace(CreateWorkspaceArgs {
                        name: self.config.workspace_name.clone(),
                        description: "Team blueprint evolution, one problem per niche".to_string(),
                    })
                    .await?;
                info!("Created Hub workspace {}", workspace.workspace_id);
                self.store.set_hub_workspace_id(workspace.workspace_id.clone()).await?;
                workspace.workspace_id
            }
        };

        for niche in niches {
            if self.store.niche_problem(&niche.key).is_some() {
                continue;
            }
            let problem = self
                .hub
                .create_problem(CreateProblemArgs {
                    workspace_id: workspace_id.clone(),
                    title: format!("Evolve team for {}", niche.key),
                    description: format!(
                        "Find the best agent team for {} work arriving on {}",
                        niche.domain, niche.channel
                    ),
                })
                .await?;
            debug!("Created problem {} for niche {}", problem.problem_id, niche.key);
            self.store.set_niche_problem(&niche.key, problem.problem_id).await?;
        }

        info!("Archive initialized for {} niches", niches.len());
        Ok(())
    }

    /// Run one generation over `niches`, in order.
    ///
    /// Only a failure to advance the persisted generation counter is returned
    /// as an error; everything per-niche lands in the report.
    pub async fn run_generation(&self, niches: &[NicheDescriptor]) -> Result<GenerationReport> {
        let generation = self.store.advance_generation().await?;
        info!("Starting generation {} over {} niches", generation, niches.len());

        let mut reports = Vec::with_capacity(niches.len());
        for niche in niches {
            let mut mutation = None;
            let outcome = match self.evolve_niche(niche, &mut mutation).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Niche {} failed in generation {}: {}", niche.key, generation, e);
                    NicheOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            reports.push(NicheReport {
                niche: niche.clone(),
                mutation,
                outcome,
            });
        }

        let report = GenerationReport {
            generation,
            niches: reports,
        };

        info!(
            "Generation {} done: {} promoted, {} failed",
            generation,
            report.promotions().count(),
            report.failures()
        );

        if let Some(bridge) = &self.bridge {
            // Detached; the bridge logs its own failures
            drop(bridge.trace_generation(&report));
        }

        Ok(report)
    }

    fn vary(&self, parent: &TeamBlueprint) -> (Mutation, TeamBlueprint) {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let mutation = Mutation::random(&mut *rng);
        let child = mutate(parent, mutation, &self.config.models, &mut *rng);
        (mutation, child)
    }

    async fn evolve_niche(
        &self,
        niche: &NicheDescriptor,
        applied: &mut Option<Mutation>,
    ) -> Result<NicheOutcome> {
        let workspace_id = self
            .store
            .hub_workspace_id()
            .ok_or(SwarmError::MissingWorkspace)?;
        let problem_id = self
            .store
            .niche_problem(&niche.key)
            .ok_or_else(|| SwarmError::MissingProblem(niche.key.clone()))?;

        // Select
        let elite = self.store.get_elite(niche);
        let (parent, seeded) = match &elite {
            Some(elite) => (elite.clone(), false),
            None => {
                let model = self.config.models.first().map(String::as_str).unwrap_or("default");
                (seed_blueprint(niche, model), true)
            }
        };

        // Vary
        let (mutation, mut candidate) = self.vary(&parent);
        if seeded {
            candidate.parent_ids.clear();
        }
        *applied = Some(mutation);

        // Claim
        let claim = self
            .hub
            .claim_problem(ClaimProblemArgs {
                workspace_id: workspace_id.clone(),
                problem_id: problem_id.clone(),
            })
            .await?;

        // Evaluate
        let task = EvaluationTask {
            niche: niche.clone(),
            prompt: evaluation_prompt(niche),
            problem_id: Some(problem_id.clone()),
            branch_id: claim.branch_id.clone(),
        };
        let timeout = Duration::from_secs(self.config.evaluation_timeout_secs);
        let (mut raw, verified) =
            match tokio::time::timeout(timeout, self.evaluator.evaluate(&candidate, &task)).await {
                Ok(Ok(outcome)) => (summarize(&outcome, &self.config.budget), true),
                Ok(Err(e)) => {
                    warn!("Evaluation of {} failed: {:#}", candidate.id, e);
                    (RawFitness::default(), false)
                }
                Err(_) => {
                    warn!(
                        "Evaluation of {} timed out after {}s",
                        candidate.id,
                        timeout.as_secs()
                    );
                    (RawFitness::default(), false)
                }
            };
        let provisional = compute_fitness(raw, &self.config.weights);

        // Propose
        let proposal = self
            .hub
            .create_proposal(CreateProposalArgs {
                workspace_id: workspace_id.clone(),
                title: format!(
                    "{} generation {} ({} mutation)",
                    niche.key, candidate.generation, mutation
                ),
                description: json!({
                    "blueprint": candidate,
                    "fitness": provisional,
                    "verified": verified,
                })
                .to_string(),
                source_branch: claim.branch_id.clone(),
                problem_id: Some(problem_id.clone()),
            })
            .await?;

        // Review
        let submitted = verdict_for(&provisional, &self.config.thresholds);
        let review = self
            .hub
            .review_proposal(ReviewProposalArgs {
                workspace_id: workspace_id.clone(),
                proposal_id: proposal.proposal_id.clone(),
                verdict: submitted.to_string(),
                reasoning: format!(
                    "Pre-review composite {:.3} ({} evaluation)",
                    provisional.composite,
                    if verified { "verified" } else { "failed" }
                ),
            })
            .await?;
        let verdict = review.verdict.unwrap_or_else(|| submitted.to_string());
        raw.review_score = normalize_review_score(&verdict)?;
        let fitness = compute_fitness(raw, &self.config.weights);
        let candidate = candidate.with_fitness(fitness);

        // Decide
        let wins = verified
            && match &elite {
                Some(elite) => is_elite_replacement(&fitness, &elite.fitness),
                None => fitness.composite > 0.0,
            };

        if !wins {
            let reason = if !verified {
                "evaluation failed".to_string()
            } else {
                match &elite {
                    Some(elite) => format!("elite {} holds at {:.3}", elite.id, elite.fitness.composite),
                    None => "zero fitness".to_string(),
                }
            };
            debug!("Discarding {} for {}: {}", candidate.id, niche.key, reason);
            return Ok(NicheOutcome::Discarded {
                blueprint_id: candidate.id,
                composite: fitness.composite,
                reason,
            });
        }

        let merge = self
            .hub
            .merge_proposal(MergeProposalArgs {
                workspace_id: workspace_id.clone(),
                proposal_id: proposal.proposal_id.clone(),
            })
            .await?;
        if !merge.merged {
            return Ok(NicheOutcome::Discarded {
                blueprint_id: candidate.id,
                composite: fitness.composite,
                reason: "hub declined merge".to_string(),
            });
        }

        let marker = self
            .hub
            .mark_consensus(MarkConsensusArgs {
                workspace_id: workspace_id.clone(),
                name: format!("elite-{}", niche.key),
                description: format!(
                    "Blueprint {} is the {} elite at composite {:.3}",
                    candidate.id, niche.key, fitness.composite
                ),
                thought_ref: None,
            })
            .await?;

        let candidate = candidate.with_hub_refs(HubRefs {
            workspace_id: Some(workspace_id),
            problem_id: Some(problem_id),
            proposal_id: Some(proposal.proposal_id),
            consensus_marker_id: Some(marker.marker_id),
        });
        let blueprint_id = candidate.id.clone();
        self.store.replace_elite(candidate).await?;

        info!(
            "Promoted {} as elite for {} (composite {:.3})",
            blueprint_id, niche.key, fitness.composite
        );
        Ok(NicheOutcome::Promoted {
            blueprint_id,
            composite: fitness.composite,
            replaced: elite.map(|e| e.id),
        })
    }
}

fn evaluation_prompt(niche: &NicheDescriptor) -> String {
    format!(
        "Handle a representative {} request from a {} user end to end.",
        niche.domain, niche.channel
    )
}
