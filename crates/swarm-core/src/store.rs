//! Durable swarm registry
//!
//! One JSON document per data directory holds the operating mode, routing
//! counters, the agent list, the elite archive and the Hub identity. Every
//! mutation is applied to a copy, written to a temp file, synced and renamed
//! over the live document; the in-memory state only changes once the write
//! succeeded.
//!
//! The store assumes a single writer per data directory. Two processes
//! sharing one directory will overwrite each other's changes.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::blueprint::TeamBlueprint;
use crate::error::{Result, SwarmError};
use crate::niche::NicheDescriptor;

pub const REGISTRY_FILE: &str = "swarm-registry.json";
pub const REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SwarmMode {
    /// Every message goes to the one legacy agent
    #[default]
    Single,
    /// Messages are routed per niche
    Swarm,
}

impl SwarmMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Swarm => "swarm",
        }
    }
}

impl std::fmt::Display for SwarmMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwarmMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "swarm" => Ok(Self::Swarm),
            other => Err(format!("unknown mode '{}', expected single or swarm", other)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct NicheRouteStats {
    pub success: u64,
    pub fallback: u64,
    pub unserved: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_unserved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteStats {
    pub success: u64,
    pub fallback: u64,
    pub niches: BTreeMap<String, NicheRouteStats>,
}

impl RouteStats {
    pub fn niche(&self, key: &str) -> Option<&NicheRouteStats> {
        self.niches.get(key)
    }
}

/// A worker agent assigned to a niche
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SwarmAgentEntry {
    pub agent_id: String,
    pub blueprint_id: String,
    pub niche_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SwarmAgentEntry {
    pub fn new(
        agent_id: impl Into<String>,
        blueprint_id: impl Into<String>,
        niche: &NicheDescriptor,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            blueprint_id: blueprint_id.into(),
            niche_key: niche.key.clone(),
            conversation_id: None,
            created_at: Utc::now(),
        }
    }
}

/// The persisted document. Missing fields take their defaults so older files still load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SwarmRegistry {
    pub version: u32,
    pub mode: SwarmMode,
    pub archive_ready: bool,
    pub route_stats: RouteStats,
    pub agents: Vec<SwarmAgentEntry>,
    /// Niche key to elite blueprint; at most one per niche
    pub archive: BTreeMap<String, TeamBlueprint>,
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_workspace_id: Option<String>,
    /// Niche key to Hub problem id
    pub niche_problems: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_session_id: Option<String>,
    pub reasoning_thought_count: u32,
    /// Single-mode agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl Default for SwarmRegistry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            mode: SwarmMode::default(),
            archive_ready: false,
            route_stats: RouteStats::default(),
            agents: Vec::new(),
            archive: BTreeMap::new(),
            generation: 0,
            hub_agent_id: None,
            hub_workspace_id: None,
            niche_problems: BTreeMap::new(),
            reasoning_session_id: None,
            reasoning_thought_count: 0,
            agent_id: None,
            conversation_id: None,
        }
    }
}

/// Registry handle, shared as `Arc<SwarmStore>`
#[derive(Debug)]
pub struct SwarmStore {
    path: PathBuf,
    registry: Mutex<SwarmRegistry>,
    /// Serializes updates so each one starts from the last committed state
    writer: tokio::sync::Mutex<()>,
}

impl SwarmStore {
    /// Open (or create) the registry in `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| SwarmError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(REGISTRY_FILE);
        let tmp = temp_path(&path);
        if tmp.exists() {
            warn!("Removing stale registry temp file {}", tmp.display());
            fs::remove_file(&tmp).map_err(|source| SwarmError::Io {
                path: tmp.clone(),
                source,
            })?;
        }

        let registry = if path.exists() {
            let registry = read_registry(&path)?;
            debug!(
                "Loaded swarm registry from {} ({} agents, {} elites)",
                path.display(),
                registry.agents.len(),
                registry.archive.len()
            );
            registry
        } else {
            let registry = SwarmRegistry::default();
            write_registry(&path, &registry)?;
            info!("Initialized swarm registry at {}", path.display());
            registry
        };

        Ok(Self {
            path,
            registry: Mutex::new(registry),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, SwarmRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `f` to a copy, persist it, then make it current
    async fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SwarmRegistry) -> T,
    {
        let _writer = self.writer.lock().await;
        let mut next = self.lock().clone();
        let out = f(&mut next);

        let path = self.path.clone();
        let next =
            tokio::task::spawn_blocking(move || write_registry(&path, &next).map(|_| next))
                .await??;

        *self.lock() = next;
        Ok(out)
    }

    /// Copy of the whole document
    pub fn snapshot(&self) -> SwarmRegistry {
        self.lock().clone()
    }

    // ── Agents ──────────────────────────────────────────────────

    /// Append a worker entry. Entries are not deduplicated.
    pub async fn add_agent(&self, entry: SwarmAgentEntry) -> Result<()> {
        info!(
            "SwarmStore: added agent '{}' for niche {}",
            entry.agent_id, entry.niche_key
        );
        self.update(|r| r.agents.push(entry)).await
    }

    pub fn agents(&self) -> Vec<SwarmAgentEntry> {
        self.lock().agents.clone()
    }

    /// Point an existing worker at a newer blueprint. Returns false if no such agent.
    pub async fn set_agent_blueprint(
        &self,
        agent_id: &str,
        blueprint_id: impl Into<String>,
    ) -> Result<bool> {
        let blueprint_id = blueprint_id.into();
        self.update(|r| match r.agents.iter_mut().find(|a| a.agent_id == agent_id) {
            Some(agent) => {
                agent.blueprint_id = blueprint_id;
                true
            }
            None => false,
        })
        .await
    }

    /// First entry registered for the niche
    pub fn get_agent_for_niche(&self, niche: &NicheDescriptor) -> Option<SwarmAgentEntry> {
        self.lock()
            .agents
            .iter()
            .find(|a| a.niche_key == niche.key)
            .cloned()
    }

    // ── Archive ─────────────────────────────────────────────────

    pub fn get_elite(&self, niche: &NicheDescriptor) -> Option<TeamBlueprint> {
        self.lock().archive.get(&niche.key).cloned()
    }

    /// Overwrite the archive cell for `blueprint.niche.key`
    pub async fn replace_elite(&self, blueprint: TeamBlueprint) -> Result<()> {
        let key = blueprint.niche.key.clone();
        debug!(
            "Replacing elite for {} with {} (composite {:.3})",
            key, blueprint.id, blueprint.fitness.composite
        );
        self.update(|r| {
            r.archive.insert(key, blueprint);
            r.archive_ready = true;
        })
        .await
    }

    pub fn archive(&self) -> BTreeMap<String, TeamBlueprint> {
        self.lock().archive.clone()
    }

    pub fn archive_ready(&self) -> bool {
        self.lock().archive_ready
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Bump the generation counter and return the new value
    pub async fn advance_generation(&self) -> Result<u64> {
        self.update(|r| {
            r.generation += 1;
            r.generation
        })
        .await
    }

    // ── Routing counters ────────────────────────────────────────

    pub async fn record_route_success(&self, niche_key: &str) -> Result<()> {
        self.update(|r| {
            r.route_stats.success += 1;
            r.route_stats
                .niches
                .entry(niche_key.to_string())
                .or_default()
                .success += 1;
        })
        .await
    }

    /// Count a miss: global and per-niche fallback plus the niche's unserved tally
    pub async fn record_route_fallback(&self, niche_key: &str) -> Result<()> {
        let now = Utc::now();
        self.update(|r| {
            r.route_stats.fallback += 1;
            let stats = r.route_stats.niches.entry(niche_key.to_string()).or_default();
            stats.fallback += 1;
            stats.unserved += 1;
            stats.last_unserved_at = Some(now);
        })
        .await
    }

    pub fn route_stats(&self) -> RouteStats {
        self.lock().route_stats.clone()
    }

    // ── Mode and identity ───────────────────────────────────────

    pub fn mode(&self) -> SwarmMode {
        self.lock().mode
    }

    pub async fn set_mode(&self, mode: SwarmMode) -> Result<()> {
        info!("Swarm mode set to {}", mode);
        self.update(|r| r.mode = mode).await
    }

    pub fn hub_agent_id(&self) -> Option<String> {
        self.lock().hub_agent_id.clone()
    }

    pub async fn set_hub_agent_id(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        self.update(|r| r.hub_agent_id = Some(id)).await
    }

    pub fn hub_workspace_id(&self) -> Option<String> {
        self.lock().hub_workspace_id.clone()
    }

    pub async fn set_hub_workspace_id(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        self.update(|r| r.hub_workspace_id = Some(id)).await
    }

    pub fn niche_problem(&self, niche_key: &str) -> Option<String> {
        self.lock().niche_problems.get(niche_key).cloned()
    }

    pub async fn set_niche_problem(
        &self,
        niche_key: &str,
        problem_id: impl Into<String>,
    ) -> Result<()> {
        let problem_id = problem_id.into();
        self.update(|r| {
            r.niche_problems.insert(niche_key.to_string(), problem_id);
        })
        .await
    }

    pub fn reasoning_session_id(&self) -> Option<String> {
        self.lock().reasoning_session_id.clone()
    }

    /// Start tracking a new reasoning session; resets the thought counter
    pub async fn set_reasoning_session_id(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        self.update(|r| {
            r.reasoning_session_id = Some(id);
            r.reasoning_thought_count = 0;
        })
        .await
    }

    pub fn reasoning_thought_count(&self) -> u32 {
        self.lock().reasoning_thought_count
    }

    /// Returns the new count
    pub async fn increment_reasoning_thought_count(&self) -> Result<u32> {
        self.update(|r| {
            r.reasoning_thought_count += 1;
            r.reasoning_thought_count
        })
        .await
    }

    pub fn agent_id(&self) -> Option<String> {
        self.lock().agent_id.clone()
    }

    pub async fn set_agent_id(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        self.update(|r| r.agent_id = Some(id)).await
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.lock().conversation_id.clone()
    }

    pub async fn set_conversation_id(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        self.update(|r| r.conversation_id = Some(id)).await
    }
}

fn temp_path(path: &Path) -> PathBuf {
    path.with_extension("json.tmp")
}

fn read_registry(path: &Path) -> Result<SwarmRegistry> {
    let content = fs::read_to_string(path).map_err(|source| SwarmError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| SwarmError::Serialization {
        path: path.to_path_buf(),
        source,
    })
}

fn write_registry(path: &Path, registry: &SwarmRegistry) -> Result<()> {
    let json = serde_json::to_vec_pretty(registry).map_err(|source| SwarmError::Serialization {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = temp_path(path);
    let io_err = |source| SwarmError::Io {
        path: tmp.clone(),
        source,
    };

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp).map_err(io_err)?;
    file.write_all(&json).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    fs::rename(&tmp, path).map_err(|source| SwarmError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::seed_blueprint;
    use crate::fitness::FitnessScores;
    use crate::niche::Domain;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn niche(domain: Domain) -> NicheDescriptor {
        NicheDescriptor::new("telegram", domain)
    }

    #[test]
    fn test_open_creates_document() {
        let dir = TempDir::new().unwrap();
        let store = SwarmStore::open(dir.path().join("nested")).unwrap();
        assert!(store.path().exists());
        let registry = store.snapshot();
        assert_eq!(registry.version, REGISTRY_VERSION);
        assert_eq!(registry.mode, SwarmMode::Single);
        assert!(!registry.archive_ready);
    }

    #[tokio::test]
    async fn test_reload_reproduces_state() {
        let dir = TempDir::new().unwrap();
        {
            let store = SwarmStore::open(dir.path()).unwrap();
            store.set_mode(SwarmMode::Swarm).await.unwrap();
            store.set_hub_agent_id("hub-agent-1").await.unwrap();
            store.set_hub_workspace_id("ws-1").await.unwrap();
            store
                .add_agent(SwarmAgentEntry::new("a1", "bp1", &niche(Domain::Coding)))
                .await
                .unwrap();
            store
                .add_agent(SwarmAgentEntry::new("a2", "bp2", &niche(Domain::Research)))
                .await
                .unwrap();
        }
        let store = SwarmStore::open(dir.path()).unwrap();
        assert_eq!(store.mode(), SwarmMode::Swarm);
        assert_eq!(store.hub_agent_id().as_deref(), Some("hub-agent-1"));
        assert_eq!(store.hub_workspace_id().as_deref(), Some("ws-1"));
        let ids: Vec<String> = store.agents().into_iter().map(|a| a.agent_id).collect();
        assert_eq!(ids, vec!["a1", "a2"]);
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = SwarmStore::open(dir.path()).unwrap();
        store.record_route_success("telegram-coding").await.unwrap();
        assert!(!dir.path().join("swarm-registry.json.tmp").exists());
        assert!(dir.path().join(REGISTRY_FILE).exists());
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SwarmStore::open(dir.path()).unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.spawn(async move {
                let key = if i % 2 == 0 { "telegram-coding" } else { "discord-general" };
                store.record_route_success(key).await.unwrap();
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        assert_eq!(store.route_stats().success, 16);
        let reopened = SwarmStore::open(dir.path()).unwrap();
        let stats = reopened.route_stats();
        assert_eq!(stats.success, 16);
        assert_eq!(stats.niche("telegram-coding").unwrap().success, 8);
        assert_eq!(stats.niche("discord-general").unwrap().success, 8);
    }

    #[tokio::test]
    async fn test_set_agent_blueprint() {
        let dir = TempDir::new().unwrap();
        let store = SwarmStore::open(dir.path()).unwrap();
        store
            .add_agent(SwarmAgentEntry::new("a1", "bp1", &niche(Domain::Coding)))
            .await
            .unwrap();

        assert!(store.set_agent_blueprint("a1", "bp2").await.unwrap());
        assert!(!store.set_agent_blueprint("missing", "bp3").await.unwrap());

        let reopened = SwarmStore::open(dir.path()).unwrap();
        assert_eq!(reopened.agents()[0].blueprint_id, "bp2");
    }

    #[test]
    fn test_stale_temp_file_removed_on_open() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("swarm-registry.json.tmp"), b"{ partial").unwrap();
        let _store = SwarmStore::open(dir.path()).unwrap();
        assert!(!dir.path().join("swarm-registry.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_document_is_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(REGISTRY_FILE), b"not json").unwrap();
        let err = SwarmStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, SwarmError::Serialization { .. }));
        // Left untouched
        assert_eq!(fs::read(dir.path().join(REGISTRY_FILE)).unwrap(), b"not json");
    }

    #[test]
    fn test_older_document_loads_with_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(REGISTRY_FILE),
            br#"{"mode": "swarm", "agentId": "legacy-1"}"#,
        )
        .unwrap();
        let store = SwarmStore::open(dir.path()).unwrap();
        assert_eq!(store.mode(), SwarmMode::Swarm);
        assert_eq!(store.agent_id().as_deref(), Some("legacy-1"));
        assert_eq!(store.snapshot().version, REGISTRY_VERSION);
        assert!(store.agents().is_empty());
    }

    #[tokio::test]
    async fn test_agent_for_niche() {
        let dir = TempDir::new().unwrap();
        let store = SwarmStore::open(dir.path()).unwrap();
        assert!(store.get_agent_for_niche(&niche(Domain::Coding)).is_none());
        store
            .add_agent(SwarmAgentEntry::new("a1", "bp1", &niche(Domain::Coding)))
            .await
            .unwrap();
        let found = store.get_agent_for_niche(&niche(Domain::Coding)).unwrap();
        assert_eq!(found.agent_id, "a1");
        assert!(store.get_agent_for_niche(&niche(Domain::General)).is_none());
    }

    #[tokio::test]
    async fn test_replace_elite_keeps_one_per_niche() {
        let dir = TempDir::new().unwrap();
        let store = SwarmStore::open(dir.path()).unwrap();
        let first = seed_blueprint(&niche(Domain::Coding), "m");
        let second = seed_blueprint(&niche(Domain::Coding), "m").with_fitness(FitnessScores {
            composite: 0.9,
            ..Default::default()
        });

        store.replace_elite(first).await.unwrap();
        store.replace_elite(second.clone()).await.unwrap();

        assert!(store.archive_ready());
        assert_eq!(store.archive().len(), 1);
        assert_eq!(store.get_elite(&niche(Domain::Coding)).unwrap(), second);

        let reopened = SwarmStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get_elite(&niche(Domain::Coding)).unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_route_counters() {
        let dir = TempDir::new().unwrap();
        let store = SwarmStore::open(dir.path()).unwrap();
        store.record_route_success("telegram-coding").await.unwrap();
        store.record_route_fallback("telegram-research").await.unwrap();
        store.record_route_fallback("telegram-research").await.unwrap();

        let stats = store.route_stats();
        assert_eq!(stats.success, 1);
        assert_eq!(stats.fallback, 2);
        let research = stats.niche("telegram-research").unwrap();
        assert_eq!(research.fallback, 2);
        assert_eq!(research.unserved, 2);
        assert!(research.last_unserved_at.is_some());
        assert_eq!(stats.niche("telegram-coding").unwrap().success, 1);
    }

    #[tokio::test]
    async fn test_reasoning_session_resets_counter() {
        let dir = TempDir::new().unwrap();
        let store = SwarmStore::open(dir.path()).unwrap();
        store.set_reasoning_session_id("s1").await.unwrap();
        assert_eq!(store.increment_reasoning_thought_count().await.unwrap(), 1);
        assert_eq!(store.increment_reasoning_thought_count().await.unwrap(), 2);
        store.set_reasoning_session_id("s2").await.unwrap();
        assert_eq!(store.reasoning_thought_count(), 0);
    }

    #[tokio::test]
    async fn test_generation_and_problems() {
        let dir = TempDir::new().unwrap();
        let store = SwarmStore::open(dir.path()).unwrap();
        assert_eq!(store.advance_generation().await.unwrap(), 1);
        assert_eq!(store.advance_generation().await.unwrap(), 2);
        store.set_niche_problem("telegram-coding", "p-1").await.unwrap();
        store.set_conversation_id("conv-1").await.unwrap();

        let reopened = SwarmStore::open(dir.path()).unwrap();
        assert_eq!(reopened.generation(), 2);
        assert_eq!(reopened.niche_problem("telegram-coding").as_deref(), Some("p-1"));
        assert_eq!(reopened.conversation_id().as_deref(), Some("conv-1"));
    }

    #[tokio::test]
    async fn test_document_is_camel_case() {
        let dir = TempDir::new().unwrap();
        let store = SwarmStore::open(dir.path()).unwrap();
        store.set_hub_agent_id("h").await.unwrap();
        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"hubAgentId\""));
        assert!(raw.contains("\"archiveReady\""));
        assert!(raw.contains("\"routeStats\""));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("swarm".parse::<SwarmMode>().unwrap(), SwarmMode::Swarm);
        assert_eq!("Single".parse::<SwarmMode>().unwrap(), SwarmMode::Single);
        assert!("both".parse::<SwarmMode>().is_err());
    }
}
