//! Generation traces on the reasoning Gateway
//!
//! Each generation report becomes one numbered thought in a long-running
//! Gateway session. Tracing runs on a spawned task and never blocks or fails
//! the evolution loop. Posts are serialized, so overlapping traces share one
//! session and number their thoughts in order.

use std::sync::Arc;

use anyhow::{Context, Result};
use swarm_hub::{GatewayApi, StartNewArgs, ThoughtArgs};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::evolution::GenerationReport;
use crate::store::SwarmStore;

#[derive(Clone)]
pub struct ReasoningBridge {
    gateway: Arc<dyn GatewayApi>,
    store: Arc<SwarmStore>,
    /// Held for a whole post: session start, thought and counter bump
    posting: Arc<Mutex<()>>,
}

impl ReasoningBridge {
    pub fn new(gateway: Arc<dyn GatewayApi>, store: Arc<SwarmStore>) -> Self {
        Self {
            gateway,
            store,
            posting: Arc::new(Mutex::new(())),
        }
    }

    /// Post the report in the background. The handle is only useful for waiting in tests.
    pub fn trace_generation(&self, report: &GenerationReport) -> JoinHandle<()> {
        let bridge = self.clone();
        let generation = report.generation;
        let summary = report.summary();
        tokio::spawn(async move {
            match bridge.post(summary).await {
                Ok(n) => debug!("Traced generation {} as thought {}", generation, n),
                Err(e) => warn!("Failed to trace generation {}: {:#}", generation, e),
            }
        })
    }

    async fn session_id(&self) -> Result<String> {
        if let Some(id) = self.store.reasoning_session_id() {
            return Ok(id);
        }
        let session = self
            .gateway
            .start_new(StartNewArgs {
                title: Some("Swarm evolution".to_string()),
                tags: vec!["swarm".to_string(), "evolution".to_string()],
            })
            .await
            .context("starting reasoning session")?;
        self.store
            .set_reasoning_session_id(session.session_id.clone())
            .await?;
        debug!("Started reasoning session {}", session.session_id);
        Ok(session.session_id)
    }

    async fn post(&self, summary: String) -> Result<u32> {
        let _posting = self.posting.lock().await;
        let session_id = self.session_id().await?;
        let thought_number = self.store.reasoning_thought_count() + 1;
        self.gateway
            .thought(ThoughtArgs {
                thought: summary,
                thought_number,
                total_thoughts: thought_number + 1,
                next_thought_needed: true,
                session_id: Some(session_id),
                branch_id: None,
            })
            .await
            .context("posting generation thought")?;
        Ok(self.store.increment_reasoning_thought_count().await?)
    }
}
