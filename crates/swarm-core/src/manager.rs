//! Swarm manager - routes messages to niche agents and drains their queues

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bounded::BoundedMap;
use crate::error::{Result, SwarmError};
use crate::niche::{NicheDescriptor, NicheMatcher, match_niche};
use crate::store::{SwarmAgentEntry, SwarmMode, SwarmStore};
use crate::types::{ChannelAdapter, InboundMessage};

/// What to do when a message arrives for a full queue
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Discard the oldest queued message to make room
    #[default]
    DropOldest,
    /// Refuse the new message
    RejectNew,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum queued messages per agent
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
    /// Upper bound on one processor call
    #[serde(default = "default_processor_timeout_secs")]
    pub processor_timeout_secs: u64,
    /// Niches tracked by the in-memory unserved counter
    #[serde(default = "default_unserved_capacity")]
    pub unserved_capacity: usize,
}

fn default_max_depth() -> usize {
    100
}

fn default_processor_timeout_secs() -> u64 {
    120
}

fn default_unserved_capacity() -> usize {
    256
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            overflow: OverflowPolicy::default(),
            processor_timeout_secs: default_processor_timeout_secs(),
            unserved_capacity: default_unserved_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued { depth: usize },
    /// Queue was full; its oldest message was discarded
    DroppedOldest { depth: usize },
}

/// Performs the actual per-message work for an agent
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(
        &self,
        agent_id: &str,
        msg: InboundMessage,
        adapter: Arc<dyn ChannelAdapter>,
    ) -> anyhow::Result<()>;
}

type QueuedMessage = (InboundMessage, Arc<dyn ChannelAdapter>);

pub struct SwarmManager {
    store: Arc<SwarmStore>,
    matcher: NicheMatcher,
    config: QueueConfig,
    queues: Mutex<HashMap<String, VecDeque<QueuedMessage>>>,
    processor: RwLock<Option<Arc<dyn MessageProcessor>>>,
    /// Misses since startup, separate from the persisted counters
    unserved: Mutex<BoundedMap<String, u64>>,
}

impl SwarmManager {
    pub fn new(store: Arc<SwarmStore>, config: QueueConfig) -> Self {
        let unserved = BoundedMap::new(config.unserved_capacity);
        Self {
            store,
            matcher: match_niche,
            config,
            queues: Mutex::new(HashMap::new()),
            processor: RwLock::new(None),
            unserved: Mutex::new(unserved),
        }
    }

    /// Use a different classifier
    pub fn with_matcher(mut self, matcher: NicheMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn store(&self) -> &Arc<SwarmStore> {
        &self.store
    }

    /// Pick the agent for a message, or `None` when no worker serves its niche
    pub async fn route_message(&self, msg: &InboundMessage) -> Option<String> {
        if self.store.mode() == SwarmMode::Single {
            return self.store.agent_id();
        }

        let niche = (self.matcher)(msg);
        match self.store.get_agent_for_niche(&niche) {
            Some(entry) => {
                if let Err(e) = self.store.record_route_success(&niche.key).await {
                    warn!("Failed to record route success for {}: {}", niche.key, e);
                }
                debug!(
                    "SwarmManager: routed {}/{} -> agent '{}'",
                    msg.channel, msg.chat_id, entry.agent_id
                );
                Some(entry.agent_id)
            }
            None => {
                if let Err(e) = self.store.record_route_fallback(&niche.key).await {
                    warn!("Failed to record route fallback for {}: {}", niche.key, e);
                }
                {
                    let mut unserved = self.unserved.lock().unwrap_or_else(|e| e.into_inner());
                    *unserved.get_or_insert_with(niche.key.clone(), || 0) += 1;
                }
                debug!("SwarmManager: no agent serves niche {}", niche.key);
                None
            }
        }
    }

    /// Append to the agent's FIFO queue, applying the overflow policy
    pub fn enqueue_message(
        &self,
        agent_id: &str,
        msg: InboundMessage,
        adapter: Arc<dyn ChannelAdapter>,
    ) -> Result<EnqueueOutcome> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let queue = queues.entry(agent_id.to_string()).or_default();
        let max_depth = self.config.max_depth.max(1);

        let mut dropped = false;
        if queue.len() >= max_depth {
            match self.config.overflow {
                OverflowPolicy::RejectNew => {
                    warn!(
                        "SwarmManager: queue for '{}' full, rejecting message",
                        agent_id
                    );
                    return Err(SwarmError::QueueFull {
                        agent_id: agent_id.to_string(),
                        depth: queue.len(),
                    });
                }
                OverflowPolicy::DropOldest => {
                    queue.pop_front();
                    dropped = true;
                    warn!(
                        "SwarmManager: queue for '{}' full, dropped oldest message",
                        agent_id
                    );
                }
            }
        }

        queue.push_back((msg, adapter));
        let depth = queue.len();
        if dropped {
            Ok(EnqueueOutcome::DroppedOldest { depth })
        } else {
            Ok(EnqueueOutcome::Queued { depth })
        }
    }

    pub fn set_processor(&self, processor: Arc<dyn MessageProcessor>) {
        let mut slot = self.processor.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(processor);
    }

    fn processor(&self) -> Option<Arc<dyn MessageProcessor>> {
        self.processor
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Pop one message from every non-empty queue and process them concurrently.
    ///
    /// Waits for every started task to finish or time out. Processor errors,
    /// timeouts and panics are logged. Returns the number of tasks started.
    pub async fn process_queues(&self) -> usize {
        let Some(processor) = self.processor() else {
            debug!("SwarmManager: no processor installed, leaving queues untouched");
            return 0;
        };

        let batch: Vec<(String, QueuedMessage)> = {
            let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
            queues
                .iter_mut()
                .filter_map(|(agent_id, queue)| queue.pop_front().map(|m| (agent_id.clone(), m)))
                .collect()
        };

        let timeout = Duration::from_secs(self.config.processor_timeout_secs);
        let mut tasks = JoinSet::new();
        for (agent_id, (msg, adapter)) in batch {
            let processor = processor.clone();
            tasks.spawn(async move {
                let result =
                    tokio::time::timeout(timeout, processor.process(&agent_id, msg, adapter)).await;
                (agent_id, result)
            });
        }

        let started = tasks.len();
        if started > 0 {
            debug!("SwarmManager: processing {} queued messages", started);
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Ok(())))) => {}
                Ok((agent_id, Ok(Err(e)))) => {
                    error!("Processor failed for agent '{}': {:#}", agent_id, e);
                }
                Ok((agent_id, Err(_))) => {
                    warn!(
                        "Processor timed out for agent '{}' after {}s",
                        agent_id,
                        timeout.as_secs()
                    );
                }
                Err(e) => {
                    error!("Processor task panicked: {}", e);
                }
            }
        }

        started
    }

    /// Current depth of every agent queue
    pub fn queue_sizes(&self) -> HashMap<String, usize> {
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, q)| (id.clone(), q.len()))
            .collect()
    }

    /// Misses for a niche since this manager started
    pub fn unserved_niche_count(&self, niche_key: &str) -> u64 {
        self.unserved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&niche_key.to_string())
            .copied()
            .unwrap_or(0)
    }

    /// Register a worker agent for a niche
    pub async fn create_agent_for_niche(
        &self,
        agent_id: impl Into<String>,
        blueprint_id: impl Into<String>,
        niche: &NicheDescriptor,
    ) -> Result<SwarmAgentEntry> {
        let entry = SwarmAgentEntry::new(agent_id, blueprint_id, niche);
        self.store.add_agent(entry.clone()).await?;
        info!(
            "SwarmManager: agent '{}' now serves niche {}",
            entry.agent_id, entry.niche_key
        );
        Ok(entry)
    }

    /// Make sure a worker runs the niche's newly promoted elite.
    ///
    /// An existing worker is rebound to `blueprint_id`; otherwise a new
    /// worker is created for the niche.
    pub async fn staff_niche(
        &self,
        niche: &NicheDescriptor,
        blueprint_id: &str,
    ) -> Result<SwarmAgentEntry> {
        let Some(mut entry) = self.store.get_agent_for_niche(niche) else {
            let agent_id = format!("{}-{}", niche.key, Uuid::new_v4().simple());
            return self.create_agent_for_niche(agent_id, blueprint_id, niche).await;
        };

        if entry.blueprint_id != blueprint_id {
            self.store
                .set_agent_blueprint(&entry.agent_id, blueprint_id)
                .await?;
            info!(
                "SwarmManager: agent '{}' rebound from {} to {} for niche {}",
                entry.agent_id, entry.blueprint_id, blueprint_id, niche.key
            );
            entry.blueprint_id = blueprint_id.to_string();
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::niche::Domain;
    use tempfile::TempDir;

    struct MockChannel {
        id: String,
    }

    impl MockChannel {
        fn new(id: &str) -> Arc<dyn ChannelAdapter> {
            Arc::new(Self { id: id.to_string() })
        }
    }

    #[async_trait]
    impl ChannelAdapter for MockChannel {
        fn channel_id(&self) -> &str {
            &self.id
        }

        async fn send(&self, _chat_id: &str, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Records (agent, text) in completion order; sleeps when the text says "slow"
    #[derive(Default)]
    struct RecordingProcessor {
        done: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MessageProcessor for RecordingProcessor {
        async fn process(
            &self,
            agent_id: &str,
            msg: InboundMessage,
            _adapter: Arc<dyn ChannelAdapter>,
        ) -> anyhow::Result<()> {
            if msg.text.contains("slow") {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            if msg.text.contains("fail") {
                anyhow::bail!("processing failed");
            }
            if msg.text.contains("panic") {
                panic!("processor panic");
            }
            self.done
                .lock()
                .unwrap()
                .push((agent_id.to_string(), msg.text));
            Ok(())
        }
    }

    fn manager(dir: &TempDir, config: QueueConfig) -> SwarmManager {
        let store = Arc::new(SwarmStore::open(dir.path()).unwrap());
        SwarmManager::new(store, config)
    }

    fn msg(text: &str) -> InboundMessage {
        InboundMessage::new("telegram", "chat-1", "user-1", text)
    }

    #[tokio::test]
    async fn test_single_mode_returns_legacy_agent() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, QueueConfig::default());
        assert_eq!(mgr.route_message(&msg("debug my code")).await, None);

        mgr.store().set_agent_id("legacy").await.unwrap();
        assert_eq!(mgr.route_message(&msg("debug my code")).await.as_deref(), Some("legacy"));
        assert_eq!(mgr.route_message(&msg("hello")).await.as_deref(), Some("legacy"));
        // Single mode does not touch routing counters
        assert_eq!(mgr.store().route_stats().success, 0);
    }

    #[tokio::test]
    async fn test_swarm_mode_routes_by_niche() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, QueueConfig::default());
        mgr.store().set_mode(SwarmMode::Swarm).await.unwrap();
        mgr.create_agent_for_niche("coder-1", "bp-1", &NicheDescriptor::new("telegram", Domain::Coding))
            .await
            .unwrap();

        assert_eq!(
            mgr.route_message(&msg("please debug this")).await.as_deref(),
            Some("coder-1")
        );
        let stats = mgr.store().route_stats();
        assert_eq!(stats.success, 1);
        assert_eq!(stats.niche("telegram-coding").unwrap().success, 1);
    }

    #[tokio::test]
    async fn test_swarm_mode_miss_counts_unserved() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, QueueConfig::default());
        mgr.store().set_mode(SwarmMode::Swarm).await.unwrap();

        assert!(mgr.route_message(&msg("research quantum dots")).await.is_none());
        assert!(mgr.route_message(&msg("research more")).await.is_none());

        assert_eq!(mgr.unserved_niche_count("telegram-research"), 2);
        assert_eq!(mgr.unserved_niche_count("telegram-coding"), 0);
        let stats = mgr.store().route_stats();
        assert_eq!(stats.fallback, 2);
        assert_eq!(stats.niche("telegram-research").unwrap().unserved, 2);
    }

    #[tokio::test]
    async fn test_custom_matcher() {
        fn always_general(msg: &InboundMessage) -> NicheDescriptor {
            NicheDescriptor::new(msg.channel.clone(), Domain::General)
        }

        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, QueueConfig::default()).with_matcher(always_general);
        mgr.store().set_mode(SwarmMode::Swarm).await.unwrap();
        mgr.create_agent_for_niche("gen", "bp", &NicheDescriptor::new("telegram", Domain::General))
            .await
            .unwrap();
        assert_eq!(mgr.route_message(&msg("debug code")).await.as_deref(), Some("gen"));
    }

    #[tokio::test]
    async fn test_staff_niche_creates_then_rebinds() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, QueueConfig::default());
        let niche = NicheDescriptor::new("telegram", Domain::Coding);

        let created = mgr.staff_niche(&niche, "bp-1").await.unwrap();
        assert!(created.agent_id.starts_with("telegram-coding-"));
        assert_eq!(created.blueprint_id, "bp-1");

        let rebound = mgr.staff_niche(&niche, "bp-2").await.unwrap();
        assert_eq!(rebound.agent_id, created.agent_id);
        assert_eq!(rebound.blueprint_id, "bp-2");

        let agents = mgr.store().agents();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].blueprint_id, "bp-2");
    }

    #[tokio::test]
    async fn test_concurrent_routing_keeps_every_count() {
        let dir = TempDir::new().unwrap();
        let mgr = Arc::new(manager(&dir, QueueConfig::default()));
        mgr.store().set_mode(SwarmMode::Swarm).await.unwrap();

        let mut tasks = JoinSet::new();
        for _ in 0..10 {
            let mgr = mgr.clone();
            tasks.spawn(async move { mgr.route_message(&msg("schedule a meeting")).await });
        }
        while let Some(routed) = tasks.join_next().await {
            assert!(routed.unwrap().is_none());
        }

        assert_eq!(mgr.unserved_niche_count("telegram-scheduling"), 10);
        assert_eq!(mgr.store().route_stats().fallback, 10);
    }

    #[test]
    fn test_enqueue_independent_queues() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, QueueConfig::default());
        let ch = MockChannel::new("telegram");
        mgr.enqueue_message("a", msg("1"), ch.clone()).unwrap();
        mgr.enqueue_message("a", msg("2"), ch.clone()).unwrap();
        mgr.enqueue_message("b", msg("3"), ch).unwrap();

        let sizes = mgr.queue_sizes();
        assert_eq!(sizes["a"], 2);
        assert_eq!(sizes["b"], 1);
    }

    #[test]
    fn test_overflow_drop_oldest() {
        let dir = TempDir::new().unwrap();
        let config = QueueConfig {
            max_depth: 2,
            ..Default::default()
        };
        let mgr = manager(&dir, config);
        let ch = MockChannel::new("telegram");
        assert_eq!(
            mgr.enqueue_message("a", msg("1"), ch.clone()).unwrap(),
            EnqueueOutcome::Queued { depth: 1 }
        );
        mgr.enqueue_message("a", msg("2"), ch.clone()).unwrap();
        assert_eq!(
            mgr.enqueue_message("a", msg("3"), ch).unwrap(),
            EnqueueOutcome::DroppedOldest { depth: 2 }
        );
        assert_eq!(mgr.queue_sizes()["a"], 2);
    }

    #[test]
    fn test_overflow_reject_new() {
        let dir = TempDir::new().unwrap();
        let config = QueueConfig {
            max_depth: 1,
            overflow: OverflowPolicy::RejectNew,
            ..Default::default()
        };
        let mgr = manager(&dir, config);
        let ch = MockChannel::new("telegram");
        mgr.enqueue_message("a", msg("1"), ch.clone()).unwrap();
        let err = mgr.enqueue_message("a", msg("2"), ch).unwrap_err();
        assert!(matches!(err, SwarmError::QueueFull { depth: 1, .. }));
        assert_eq!(mgr.queue_sizes()["a"], 1);
    }

    #[tokio::test]
    async fn test_no_processor_pops_nothing() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, QueueConfig::default());
        mgr.enqueue_message("a", msg("1"), MockChannel::new("telegram"))
            .unwrap();
        assert_eq!(mgr.process_queues().await, 0);
        assert_eq!(mgr.queue_sizes()["a"], 1);
    }

    #[tokio::test]
    async fn test_process_one_per_queue_fifo() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, QueueConfig::default());
        let processor = Arc::new(RecordingProcessor::default());
        mgr.set_processor(processor.clone());

        let ch = MockChannel::new("telegram");
        mgr.enqueue_message("a", msg("a1"), ch.clone()).unwrap();
        mgr.enqueue_message("a", msg("a2"), ch.clone()).unwrap();
        mgr.enqueue_message("b", msg("b1"), ch).unwrap();

        assert_eq!(mgr.process_queues().await, 2);
        assert_eq!(mgr.queue_sizes()["a"], 1);
        assert_eq!(mgr.queue_sizes()["b"], 0);

        assert_eq!(mgr.process_queues().await, 1);
        let done = processor.done.lock().unwrap().clone();
        let a_texts: Vec<&str> = done
            .iter()
            .filter(|(id, _)| id == "a")
            .map(|(_, t)| t.as_str())
            .collect();
        assert_eq!(a_texts, vec!["a1", "a2"]);
    }

    #[tokio::test]
    async fn test_slow_agent_does_not_block_fast_agent() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, QueueConfig::default());
        let processor = Arc::new(RecordingProcessor::default());
        mgr.set_processor(processor.clone());

        let ch = MockChannel::new("telegram");
        mgr.enqueue_message("slow-agent", msg("slow job"), ch.clone())
            .unwrap();
        mgr.enqueue_message("fast-agent", msg("quick job"), ch).unwrap();

        assert_eq!(mgr.process_queues().await, 2);
        let done = processor.done.lock().unwrap().clone();
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].0, "fast-agent");
        assert_eq!(done[1].0, "slow-agent");
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_contained() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, QueueConfig::default());
        let processor = Arc::new(RecordingProcessor::default());
        mgr.set_processor(processor.clone());

        let ch = MockChannel::new("telegram");
        mgr.enqueue_message("x", msg("fail please"), ch.clone()).unwrap();
        mgr.enqueue_message("y", msg("panic please"), ch.clone()).unwrap();
        mgr.enqueue_message("z", msg("ok"), ch).unwrap();

        assert_eq!(mgr.process_queues().await, 3);
        let done = processor.done.lock().unwrap().clone();
        assert_eq!(done, vec![("z".to_string(), "ok".to_string())]);
    }

    #[tokio::test]
    async fn test_processor_timeout() {
        let dir = TempDir::new().unwrap();
        let config = QueueConfig {
            processor_timeout_secs: 0,
            ..Default::default()
        };
        let mgr = manager(&dir, config);
        let processor = Arc::new(RecordingProcessor::default());
        mgr.set_processor(processor.clone());

        mgr.enqueue_message("a", msg("slow job"), MockChannel::new("telegram"))
            .unwrap();
        assert_eq!(mgr.process_queues().await, 1);
        assert!(processor.done.lock().unwrap().is_empty());
    }

    #[test]
    fn test_queue_config_defaults() {
        let config: QueueConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_depth, 100);
        assert_eq!(config.overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.processor_timeout_secs, 120);

        let config: QueueConfig = serde_json::from_str(r#"{"overflow": "reject-new"}"#).unwrap();
        assert_eq!(config.overflow, OverflowPolicy::RejectNew);
    }
}
