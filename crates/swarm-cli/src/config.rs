//! TOML configuration for the `swarm` binary

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use swarm_core::{Domain, EvolutionConfig, NicheDescriptor, QueueConfig, RuntimeConfig};
use swarm_hub::HubClientConfig;
use tracing::warn;

/// Shipped default, written by `swarm init`
pub const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub hub: HubClientConfig,
    /// Generation traces are disabled when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<HubClientConfig>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub evolution: EvolutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "~/.swarm/data".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn data_path(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }
}

// ── Scheduler Config ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between generations in `swarm evolve`
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
    #[serde(default = "default_domains")]
    pub domains: Vec<Domain>,
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_channels() -> Vec<String> {
    vec!["telegram".to_string(), "discord".to_string()]
}

fn default_domains() -> Vec<Domain> {
    Domain::ALL.to_vec()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            channels: default_channels(),
            domains: default_domains(),
        }
    }
}

impl SchedulerConfig {
    /// Every configured channel crossed with every configured domain
    pub fn niches(&self) -> Vec<NicheDescriptor> {
        self.channels
            .iter()
            .flat_map(|channel| {
                self.domains
                    .iter()
                    .map(move |domain| NicheDescriptor::new(channel.clone(), *domain))
            })
            .collect()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".swarm")
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            hub: HubClientConfig::default(),
            gateway: None,
            runtime: RuntimeConfig::default(),
            queue: QueueConfig::default(),
            scheduler: SchedulerConfig::default(),
            evolution: EvolutionConfig::default(),
        }
    }
}

impl CliConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `swarm init` first.",
                path.display()
            )
        })?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;

        if let Some(key) = &config.runtime.api_key {
            if !key.is_empty() && !content.contains("${SWARM_RUNTIME_API_KEY}") {
                warn!(
                    "Runtime API key is hardcoded in config file. For security, use environment variables: api_key = \"${{SWARM_RUNTIME_API_KEY}}\""
                );
            }
        }

        Ok(config)
    }

    /// Parse TOML after expanding allowlisted `${VAR}` references
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let mut config: Self = toml::from_str(&expanded)?;
        // An expanded-but-unset variable leaves an empty key behind
        if config.runtime.api_key.as_deref() == Some("") {
            config.runtime.api_key = None;
        }
        Ok(config)
    }

    /// TOML rendering with secrets masked
    pub fn to_masked_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        shown.runtime.api_key = shown.runtime.api_key.as_deref().map(mask_secret);
        Ok(toml::to_string_pretty(&shown)?)
    }
}

pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(s).to_path_buf()
}

/// Environment variables that may be referenced from the config file
const ALLOWED_ENV_VARS: &[&str] = &[
    "SWARM_RUNTIME_API_KEY",
    "SWARM_HUB_URL",
    "SWARM_GATEWAY_URL",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            pos = abs_start + end + 1;
            continue;
        }

        let value = std::env::var(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::OverflowPolicy;

    #[test]
    fn test_default_file_parses() {
        let config = CliConfig::parse(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.hub.url, "http://localhost:1731/mcp");
        assert!(config.gateway.is_some());
        assert_eq!(config.queue.overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.scheduler.interval_secs, 3600);
        assert_eq!(config.evolution.thresholds.approve, 0.7);
        assert_eq!(config.evolution.models.len(), 2);
        assert_eq!(config.scheduler.niches().len(), 10);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = CliConfig::parse("").unwrap();
        assert_eq!(config.storage.data_dir, "~/.swarm/data");
        assert_eq!(config.hub.timeout_secs, 30);
        assert!(config.gateway.is_none());
        assert_eq!(config.runtime.timeout_secs, 300);
        assert!(config.runtime.api_key.is_none());
        assert_eq!(config.queue.max_depth, 100);
        assert_eq!(config.evolution.weights.task_completion, 0.35);
    }

    #[test]
    fn test_niches_cross_product() {
        let scheduler = SchedulerConfig {
            interval_secs: 60,
            channels: vec!["slack".to_string()],
            domains: vec![Domain::Coding, Domain::General],
        };
        let keys: Vec<String> = scheduler.niches().into_iter().map(|n| n.key).collect();
        assert_eq!(keys, vec!["slack-coding", "slack-general"]);
    }

    #[test]
    fn test_expand_allowlisted_var() {
        let expected = std::env::var("HOME").unwrap_or_default();
        assert_eq!(expand_env_vars("dir = \"${HOME}/x\""), format!("dir = \"{}/x\"", expected));
    }

    #[test]
    fn test_unlisted_var_left_unexpanded() {
        let input = "key = \"${AWS_SECRET_ACCESS_KEY}\" other = \"${HOME}\"";
        let out = expand_env_vars(input);
        assert!(out.contains("${AWS_SECRET_ACCESS_KEY}"));
        assert!(!out.contains("${HOME}"));
    }

    #[test]
    fn test_unterminated_reference() {
        assert_eq!(expand_env_vars("a = \"${HOME"), "a = \"${HOME");
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(empty)");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("sk-runtime-abcd1234"), "sk-...1234");
    }

    #[test]
    fn test_masked_toml_hides_key() {
        let mut config = CliConfig::default();
        config.runtime.api_key = Some("sk-runtime-abcd1234".to_string());
        let rendered = config.to_masked_toml().unwrap();
        assert!(!rendered.contains("sk-runtime-abcd1234"));
        assert!(rendered.contains("sk-...1234"));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/var/lib/swarm"), PathBuf::from("/var/lib/swarm"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.swarm/data"), home.join(".swarm/data"));
        }
    }
}
