//! Fitness scoring and the elite replacement gate
//!
//! All functions here are pure. Each component is clamped to [0, 1] before
//! weighting, and the composite is re-clamped so that non-normalized weights
//! cannot push it out of range.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SwarmError};

/// Unclamped component inputs, as measured
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFitness {
    pub task_completion: f64,
    pub review_score: f64,
    pub reasoning_depth: f64,
    pub consensus_speed: f64,
    pub cost_efficiency: f64,
}

/// Normalized scores; every field is in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitnessScores {
    pub composite: f64,
    pub task_completion: f64,
    pub review_score: f64,
    pub reasoning_depth: f64,
    pub consensus_speed: f64,
    pub cost_efficiency: f64,
}

impl FitnessScores {
    /// Component values, without the composite
    pub fn raw(&self) -> RawFitness {
        RawFitness {
            task_completion: self.task_completion,
            review_score: self.review_score,
            reasoning_depth: self.reasoning_depth,
            consensus_speed: self.consensus_speed,
            cost_efficiency: self.cost_efficiency,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitnessWeights {
    #[serde(default = "default_task_completion_weight")]
    pub task_completion: f64,
    #[serde(default = "default_review_score_weight")]
    pub review_score: f64,
    #[serde(default = "default_reasoning_depth_weight")]
    pub reasoning_depth: f64,
    #[serde(default = "default_consensus_speed_weight")]
    pub consensus_speed: f64,
    #[serde(default = "default_cost_efficiency_weight")]
    pub cost_efficiency: f64,
}

fn default_task_completion_weight() -> f64 {
    0.35
}

fn default_review_score_weight() -> f64 {
    0.25
}

fn default_reasoning_depth_weight() -> f64 {
    0.15
}

fn default_consensus_speed_weight() -> f64 {
    0.10
}

fn default_cost_efficiency_weight() -> f64 {
    0.15
}

impl Default for FitnessWeights {
    fn default() -> Self {
        Self {
            task_completion: default_task_completion_weight(),
            review_score: default_review_score_weight(),
            reasoning_depth: default_reasoning_depth_weight(),
            consensus_speed: default_consensus_speed_weight(),
            cost_efficiency: default_cost_efficiency_weight(),
        }
    }
}

/// Clamp to [0, 1]; NaN becomes 0
fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Negative or NaN weights count as zero
fn weight(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.max(0.0) }
}

pub fn compute_fitness(raw: RawFitness, weights: &FitnessWeights) -> FitnessScores {
    let task_completion = unit(raw.task_completion);
    let review_score = unit(raw.review_score);
    let reasoning_depth = unit(raw.reasoning_depth);
    let consensus_speed = unit(raw.consensus_speed);
    let cost_efficiency = unit(raw.cost_efficiency);

    let composite = task_completion * weight(weights.task_completion)
        + review_score * weight(weights.review_score)
        + reasoning_depth * weight(weights.reasoning_depth)
        + consensus_speed * weight(weights.consensus_speed)
        + cost_efficiency * weight(weights.cost_efficiency);

    FitnessScores {
        composite: unit(composite),
        task_completion,
        review_score,
        reasoning_depth,
        consensus_speed,
        cost_efficiency,
    }
}

/// True iff `candidate` should displace `current` as the niche elite.
///
/// Strictly higher composite wins. On an exact composite tie, strictly
/// higher cost efficiency wins. Anything else keeps the incumbent.
pub fn is_elite_replacement(candidate: &FitnessScores, current: &FitnessScores) -> bool {
    if candidate.composite > current.composite {
        return true;
    }
    candidate.composite == current.composite && candidate.cost_efficiency > current.cost_efficiency
}

/// Review outcome as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewVerdict {
    Approve,
    Comment,
    RequestChanges,
}

impl ReviewVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Comment => "comment",
            Self::RequestChanges => "request-changes",
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            Self::Approve => 1.0,
            Self::Comment => 0.5,
            Self::RequestChanges => 0.0,
        }
    }
}

impl fmt::Display for ReviewVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewVerdict {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "approve" => Ok(Self::Approve),
            "comment" => Ok(Self::Comment),
            "request-changes" => Ok(Self::RequestChanges),
            other => Err(SwarmError::UnknownVerdict(other.to_string())),
        }
    }
}

/// Map a review verdict string to a score: approve 1.0, comment 0.5, request-changes 0.0
pub fn normalize_review_score(verdict: &str) -> Result<f64> {
    verdict.parse::<ReviewVerdict>().map(|v| v.score())
}

/// Composite cut-offs the coordinator uses when reviewing a candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReviewThresholds {
    #[serde(default = "default_approve_threshold")]
    pub approve: f64,
    #[serde(default = "default_comment_threshold")]
    pub comment: f64,
}

fn default_approve_threshold() -> f64 {
    0.7
}

fn default_comment_threshold() -> f64 {
    0.4
}

impl Default for ReviewThresholds {
    fn default() -> Self {
        Self {
            approve: default_approve_threshold(),
            comment: default_comment_threshold(),
        }
    }
}

/// Verdict for a candidate scored before review
pub fn verdict_for(scores: &FitnessScores, thresholds: &ReviewThresholds) -> ReviewVerdict {
    if scores.composite >= thresholds.approve {
        ReviewVerdict::Approve
    } else if scores.composite >= thresholds.comment {
        ReviewVerdict::Comment
    } else {
        ReviewVerdict::RequestChanges
    }
}
