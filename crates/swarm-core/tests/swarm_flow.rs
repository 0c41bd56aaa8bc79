//! End-to-end: an unserved niche gets evolved, promoted, staffed and then served

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use swarm_core::{
    BlueprintEvaluator, ChannelAdapter, EvaluationOutcome, EvaluationTask, EvolutionConfig,
    EvolutionEngine, InboundMessage, MessageProcessor, QueueConfig, SwarmManager, SwarmMode,
    SwarmStore, TeamBlueprint, match_niche,
};
use swarm_hub::{
    Claim, ClaimProblemArgs, ConsensusMarker, CreateProblemArgs, CreateProposalArgs,
    CreateWorkspaceArgs, HubApi, HubResult, MarkConsensusArgs, Merge, MergeProposalArgs, Problem,
    Proposal, RegisterArgs, Registration, Review, ReviewProposalArgs, Workspace,
};
use tempfile::TempDir;

struct EchoHub;

#[async_trait]
impl HubApi for EchoHub {
    async fn register(&self, _args: RegisterArgs) -> HubResult<Registration> {
        Ok(Registration {
            agent_id: "coordinator-1".to_string(),
        })
    }

    async fn create_workspace(&self, _args: CreateWorkspaceArgs) -> HubResult<Workspace> {
        Ok(Workspace {
            workspace_id: "ws-1".to_string(),
        })
    }

    async fn create_problem(&self, args: CreateProblemArgs) -> HubResult<Problem> {
        Ok(Problem {
            problem_id: format!("problem-for-{}", args.title.len()),
        })
    }

    async fn claim_problem(&self, args: ClaimProblemArgs) -> HubResult<Claim> {
        Ok(Claim {
            problem_id: Some(args.problem_id),
            branch_id: None,
        })
    }

    async fn create_proposal(&self, _args: CreateProposalArgs) -> HubResult<Proposal> {
        Ok(Proposal {
            proposal_id: "proposal-1".to_string(),
        })
    }

    async fn review_proposal(&self, args: ReviewProposalArgs) -> HubResult<Review> {
        Ok(Review {
            review_id: Some("review-1".to_string()),
            verdict: Some(args.verdict),
        })
    }

    async fn merge_proposal(&self, _args: MergeProposalArgs) -> HubResult<Merge> {
        Ok(Merge { merged: true })
    }

    async fn mark_consensus(&self, _args: MarkConsensusArgs) -> HubResult<ConsensusMarker> {
        Ok(ConsensusMarker {
            marker_id: "marker-1".to_string(),
        })
    }
}

struct SteadyEvaluator;

#[async_trait]
impl BlueprintEvaluator for SteadyEvaluator {
    async fn evaluate(
        &self,
        _blueprint: &TeamBlueprint,
        _task: &EvaluationTask,
    ) -> anyhow::Result<EvaluationOutcome> {
        Ok(EvaluationOutcome {
            tasks_attempted: 2,
            tasks_completed: 2,
            reasoning_steps: 6,
            consensus_rounds: 1,
            cost_usd: 0.1,
        })
    }
}

struct NullChannel;

#[async_trait]
impl ChannelAdapter for NullChannel {
    fn channel_id(&self) -> &str {
        "telegram"
    }

    async fn send(&self, _chat_id: &str, _text: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Collector {
    seen: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl MessageProcessor for Collector {
    async fn process(
        &self,
        agent_id: &str,
        msg: InboundMessage,
        _adapter: Arc<dyn ChannelAdapter>,
    ) -> anyhow::Result<()> {
        self.seen
            .lock()
            .unwrap()
            .push((agent_id.to_string(), msg.text));
        Ok(())
    }
}

#[tokio::test]
async fn test_unserved_niche_is_evolved_and_then_served() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SwarmStore::open(dir.path()).unwrap());
    store.set_mode(SwarmMode::Swarm).await.unwrap();

    let manager = SwarmManager::new(store.clone(), QueueConfig::default());
    let msg = InboundMessage::new("telegram", "chat-9", "user-9", "can you debug my function?");

    // No worker yet
    assert!(manager.route_message(&msg).await.is_none());
    assert_eq!(manager.unserved_niche_count("telegram-coding"), 1);

    let niche = match_niche(&msg);
    let engine = EvolutionEngine::new(
        store.clone(),
        Arc::new(EchoHub),
        Arc::new(SteadyEvaluator),
        EvolutionConfig {
            seed: Some(99),
            ..Default::default()
        },
    );
    engine.initialize_archive(std::slice::from_ref(&niche)).await.unwrap();
    let report = engine.run_generation(std::slice::from_ref(&niche)).await.unwrap();

    let promotions: Vec<_> = report.promotions().collect();
    assert_eq!(promotions.len(), 1);
    let (promoted_niche, blueprint_id) = promotions[0];
    assert_eq!(promoted_niche.key, "telegram-coding");

    manager
        .create_agent_for_niche("coder-agent", blueprint_id, promoted_niche)
        .await
        .unwrap();

    // Now served
    assert_eq!(manager.route_message(&msg).await.as_deref(), Some("coder-agent"));

    let collector = Arc::new(Collector::default());
    manager.set_processor(collector.clone());
    manager
        .enqueue_message("coder-agent", msg.clone(), Arc::new(NullChannel))
        .unwrap();
    assert_eq!(manager.process_queues().await, 1);
    assert_eq!(
        collector.seen.lock().unwrap().as_slice(),
        &[("coder-agent".to_string(), msg.text.clone())]
    );

    // Everything survives a restart
    drop(engine);
    drop(manager);
    let reopened = SwarmStore::open(dir.path()).unwrap();
    assert_eq!(reopened.mode(), SwarmMode::Swarm);
    assert_eq!(reopened.hub_agent_id().as_deref(), Some("coordinator-1"));
    assert_eq!(reopened.hub_workspace_id().as_deref(), Some("ws-1"));
    assert_eq!(reopened.agents().len(), 1);
    assert_eq!(reopened.get_elite(&niche).unwrap().id, blueprint_id);
    let stats = reopened.route_stats();
    assert_eq!(stats.success, 1);
    assert_eq!(stats.fallback, 1);
}
