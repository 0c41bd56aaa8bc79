//! Team blueprints and variation operators
//!
//! A `TeamBlueprint` is the genome evolved per niche. Blueprints are never
//! edited in place: every operator returns a new blueprint with a fresh id,
//! `generation + 1` and the parent's id as lineage.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::fitness::FitnessScores;
use crate::niche::{Domain, NicheDescriptor};

/// Smallest and largest team the team-size operator will produce
pub const MIN_TEAM_SIZE: usize = 1;
pub const MAX_TEAM_SIZE: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentRoleConfig {
    pub role: String,
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub memory_blocks: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationStrategy {
    Sequential,
    Parallel,
    Debate,
    Pipeline,
}

impl CoordinationStrategy {
    pub const ALL: [CoordinationStrategy; 4] = [
        CoordinationStrategy::Sequential,
        CoordinationStrategy::Parallel,
        CoordinationStrategy::Debate,
        CoordinationStrategy::Pipeline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Debate => "debate",
            Self::Pipeline => "pipeline",
        }
    }
}

impl std::fmt::Display for CoordinationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hub ids a blueprint was promoted through
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HubRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_marker_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TeamBlueprint {
    pub id: String,
    pub name: String,
    pub generation: u32,
    #[serde(default)]
    pub parent_ids: Vec<String>,
    pub agents: Vec<AgentRoleConfig>,
    pub coordination_strategy: CoordinationStrategy,
    pub niche: NicheDescriptor,
    #[serde(default)]
    pub fitness: FitnessScores,
    #[serde(default)]
    pub hub_refs: HubRefs,
    pub created_at: DateTime<Utc>,
}

impl TeamBlueprint {
    /// Copy of `self` with a new identity one generation down, and lineage pointing at `self`
    fn offspring(&self) -> Self {
        let generation = self.generation + 1;
        Self {
            id: Uuid::new_v4().to_string(),
            name: format!("{}-g{}", self.niche.key, generation),
            generation,
            parent_ids: vec![self.id.clone()],
            agents: self.agents.clone(),
            coordination_strategy: self.coordination_strategy,
            niche: self.niche.clone(),
            fitness: FitnessScores::default(),
            hub_refs: HubRefs::default(),
            created_at: Utc::now(),
        }
    }

    /// Copy carrying the given scores
    pub fn with_fitness(mut self, fitness: FitnessScores) -> Self {
        self.fitness = fitness;
        self
    }

    /// Copy carrying the given Hub references
    pub fn with_hub_refs(mut self, hub_refs: HubRefs) -> Self {
        self.hub_refs = hub_refs;
        self
    }

    pub fn roles(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.role.as_str()).collect()
    }
}

struct DomainTemplate {
    roles: &'static [&'static str],
    /// Roles the role operator may swap in
    role_pool: &'static [&'static str],
    skills: &'static [&'static str],
    strategy: CoordinationStrategy,
}

fn template(domain: Domain) -> DomainTemplate {
    match domain {
        Domain::Coding => DomainTemplate {
            roles: &["planner", "coder", "reviewer"],
            role_pool: &["planner", "coder", "reviewer", "tester", "architect"],
            skills: &[
                "read_file",
                "write_file",
                "code_search",
                "run_tests",
                "static_analysis",
                "git_ops",
            ],
            strategy: CoordinationStrategy::Pipeline,
        },
        Domain::Research => DomainTemplate {
            roles: &["researcher", "analyst"],
            role_pool: &["researcher", "analyst", "fact-checker", "summarizer"],
            skills: &[
                "web_search",
                "read_url",
                "summarize",
                "cite_sources",
                "knowledge_graph",
            ],
            strategy: CoordinationStrategy::Debate,
        },
        Domain::Scheduling => DomainTemplate {
            roles: &["scheduler"],
            role_pool: &["scheduler", "calendar-keeper", "confirmer"],
            skills: &[
                "calendar_read",
                "calendar_write",
                "timezone_convert",
                "send_reminder",
            ],
            strategy: CoordinationStrategy::Sequential,
        },
        Domain::Communication => DomainTemplate {
            roles: &["drafter", "editor"],
            role_pool: &["drafter", "editor", "tone-checker"],
            skills: &["draft_email", "tone_check", "contact_lookup", "send_message"],
            strategy: CoordinationStrategy::Sequential,
        },
        Domain::General => DomainTemplate {
            roles: &["assistant"],
            role_pool: &["assistant", "planner", "researcher"],
            skills: &["web_search", "remember", "recall", "summarize"],
            strategy: CoordinationStrategy::Sequential,
        },
    }
}

fn role_prompt(role: &str, niche: &NicheDescriptor) -> String {
    format!(
        "You are the {} on a {} team answering {} users. Keep replies short and concrete.",
        role, niche.domain, niche.channel
    )
}

fn role_config(role: &str, model: &str, niche: &NicheDescriptor, skills: &[&str]) -> AgentRoleConfig {
    AgentRoleConfig {
        role: role.to_string(),
        model: model.to_string(),
        prompt: role_prompt(role, niche),
        skills: skills.iter().map(|s| s.to_string()).collect(),
        memory_blocks: vec!["persona".to_string(), format!("niche:{}", niche.key)],
    }
}

/// Minimal starting team for a niche with no elite yet. Generation 0, no lineage.
pub fn seed_blueprint(niche: &NicheDescriptor, model: &str) -> TeamBlueprint {
    let t = template(niche.domain);
    // Two starting skills per role keeps the skill operator able to both add and drop
    let starting_skills = &t.skills[..t.skills.len().min(2)];
    let agents = t
        .roles
        .iter()
        .map(|role| role_config(role, model, niche, starting_skills))
        .collect();

    debug!("Seeding blueprint for niche {}", niche.key);

    TeamBlueprint {
        id: Uuid::new_v4().to_string(),
        name: format!("{}-seed", niche.key),
        generation: 0,
        parent_ids: Vec::new(),
        agents,
        coordination_strategy: t.strategy,
        niche: niche.clone(),
        fitness: FitnessScores::default(),
        hub_refs: HubRefs::default(),
        created_at: Utc::now(),
    }
}

/// The six variation operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mutation {
    Skill,
    Role,
    PromptCrossover,
    Strategy,
    TeamSize,
    Model,
}

impl Mutation {
    pub const ALL: [Mutation; 6] = [
        Mutation::Skill,
        Mutation::Role,
        Mutation::PromptCrossover,
        Mutation::Strategy,
        Mutation::TeamSize,
        Mutation::Model,
    ];

    /// Uniform choice among all operators
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skill => "skill",
            Self::Role => "role",
            Self::PromptCrossover => "prompt-crossover",
            Self::Strategy => "strategy",
            Self::TeamSize => "team-size",
            Self::Model => "model",
        }
    }
}

impl std::fmt::Display for Mutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Apply `mutation` to `parent`, drawing randomness from `rng`.
///
/// `models` is the pool the model operator picks from; an operator with no
/// valid alternative (e.g. a single-model pool) returns an unchanged copy
/// that is still a new blueprint.
pub fn mutate<R: Rng + ?Sized>(
    parent: &TeamBlueprint,
    mutation: Mutation,
    models: &[String],
    rng: &mut R,
) -> TeamBlueprint {
    let mut child = parent.offspring();
    let t = template(parent.niche.domain);

    match mutation {
        Mutation::Skill => mutate_skill(&mut child, t.skills, rng),
        Mutation::Role => mutate_role(&mut child, t.role_pool, rng),
        Mutation::PromptCrossover => crossover_prompts(&mut child, rng),
        Mutation::Strategy => mutate_strategy(&mut child, rng),
        Mutation::TeamSize => mutate_team_size(&mut child, &t, rng),
        Mutation::Model => mutate_model(&mut child, models, rng),
    }

    debug!(
        "Applied {} mutation to {} -> {} (generation {})",
        mutation, parent.id, child.id, child.generation
    );
    child
}

fn mutate_skill<R: Rng + ?Sized>(child: &mut TeamBlueprint, pool: &[&str], rng: &mut R) {
    if child.agents.is_empty() {
        return;
    }
    let idx = rng.gen_range(0..child.agents.len());
    let agent = &mut child.agents[idx];

    let missing: Vec<&str> = pool
        .iter()
        .copied()
        .filter(|s| !agent.skills.iter().any(|have| have == s))
        .collect();

    let drop = agent.skills.len() > 1 && (missing.is_empty() || rng.gen_bool(0.5));
    if drop {
        let victim = rng.gen_range(0..agent.skills.len());
        agent.skills.remove(victim);
    } else if let Some(skill) = missing.choose(rng) {
        agent.skills.push(skill.to_string());
    }
}

fn mutate_role<R: Rng + ?Sized>(child: &mut TeamBlueprint, pool: &[&str], rng: &mut R) {
    if child.agents.is_empty() {
        return;
    }
    let idx = rng.gen_range(0..child.agents.len());
    let current = child.agents[idx].role.clone();
    let alternatives: Vec<&str> = pool.iter().copied().filter(|r| *r != current).collect();
    if let Some(role) = alternatives.choose(rng) {
        let prompt = role_prompt(role, &child.niche);
        let agent = &mut child.agents[idx];
        agent.role = role.to_string();
        agent.prompt = prompt;
    }
}

/// Splice the first half of one agent's prompt onto the second half of another's
fn crossover_prompts<R: Rng + ?Sized>(child: &mut TeamBlueprint, rng: &mut R) {
    let n = child.agents.len();
    if n < 2 {
        if let Some(agent) = child.agents.first_mut() {
            let template = role_prompt(&agent.role, &child.niche);
            agent.prompt = splice(&agent.prompt, &template);
        }
        return;
    }
    let a = rng.gen_range(0..n);
    let mut b = rng.gen_range(0..n - 1);
    if b >= a {
        b += 1;
    }
    let donor = child.agents[b].prompt.clone();
    let agent = &mut child.agents[a];
    agent.prompt = splice(&agent.prompt, &donor);
}

fn splice(head: &str, tail: &str) -> String {
    let head_words: Vec<&str> = head.split_whitespace().collect();
    let tail_words: Vec<&str> = tail.split_whitespace().collect();
    let cut_head = head_words.len().div_ceil(2);
    let cut_tail = tail_words.len() / 2;
    head_words[..cut_head]
        .iter()
        .chain(tail_words[cut_tail..].iter())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

fn mutate_strategy<R: Rng + ?Sized>(child: &mut TeamBlueprint, rng: &mut R) {
    let alternatives: Vec<CoordinationStrategy> = CoordinationStrategy::ALL
        .iter()
        .copied()
        .filter(|s| *s != child.coordination_strategy)
        .collect();
    if let Some(strategy) = alternatives.choose(rng) {
        child.coordination_strategy = *strategy;
    }
}

fn mutate_team_size<R: Rng + ?Sized>(child: &mut TeamBlueprint, t: &DomainTemplate, rng: &mut R) {
    let n = child.agents.len();
    let grow = n <= MIN_TEAM_SIZE || (n < MAX_TEAM_SIZE && rng.gen_bool(0.5));

    if grow {
        let model = child
            .agents
            .first()
            .map(|a| a.model.clone())
            .unwrap_or_default();
        let role = t.role_pool.choose(rng).copied().unwrap_or("assistant");
        let starting_skills = &t.skills[..t.skills.len().min(1)];
        let agent = role_config(role, &model, &child.niche, starting_skills);
        child.agents.push(agent);
    } else {
        let victim = rng.gen_range(0..n);
        child.agents.remove(victim);
    }
}

fn mutate_model<R: Rng + ?Sized>(child: &mut TeamBlueprint, models: &[String], rng: &mut R) {
    if child.agents.is_empty() {
        return;
    }
    let idx = rng.gen_range(0..child.agents.len());
    let agent = &mut child.agents[idx];
    let alternatives: Vec<&String> = models.iter().filter(|m| **m != agent.model).collect();
    if let Some(model) = alternatives.choose(rng) {
        agent.model = (*model).clone();
    }
}
