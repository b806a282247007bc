use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::Tier;

/// Per-tier assistant call settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Model identifier passed to the CLI. `None` uses the CLI's default.
    pub model: Option<String>,
    pub max_turns: u32,
    /// Call timeout in milliseconds. `0` means unlimited.
    pub timeout_ms: u64,
}

impl TierConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

fn default_chat_tier() -> TierConfig {
    TierConfig {
        model: None,
        max_turns: 25,
        timeout_ms: 120_000,
    }
}

fn default_orchestrator_tier() -> TierConfig {
    TierConfig {
        model: None,
        max_turns: 1,
        timeout_ms: 90_000,
    }
}

fn default_worker_tier() -> TierConfig {
    TierConfig {
        model: None,
        max_turns: 50,
        timeout_ms: 300_000,
    }
}

fn default_assistant_bin() -> String {
    "claude".to_string()
}

fn default_max_workers() -> usize {
    10
}

fn default_max_result_chars() -> usize {
    8_000
}

fn default_output_buffer_bytes() -> usize {
    64 * 1024
}

fn default_worker_timeout_ms() -> u64 {
    300_000
}

fn default_heartbeat_interval_ms() -> u64 {
    60_000
}

fn default_stall_check_interval_ms() -> u64 {
    30_000
}

fn default_stall_warning_ms() -> u64 {
    120_000
}

fn default_stall_kill_ms() -> u64 {
    300_000
}

fn default_retry_backoff_ms() -> u64 {
    3_000
}

fn default_orchestration_timeout_ms() -> u64 {
    3_600_000
}

fn default_summary_timeout_ms() -> u64 {
    30_000
}

fn default_service_tokens() -> Vec<String> {
    ["rumpbot", "bot", "server", "service", "daemon"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".rumpbot")
}

/// Runtime configuration.
///
/// Load priority: environment variables > local `.rumpbot/config.json` >
/// global `~/.config/rumpbot/config.json` > compiled defaults. Every field
/// carries a serde default so partial config files work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RumpbotConfig {
    /// Assistant CLI binary name or path.
    #[serde(default = "default_assistant_bin")]
    pub assistant_bin: String,

    #[serde(default = "default_chat_tier")]
    pub chat: TierConfig,
    #[serde(default = "default_orchestrator_tier")]
    pub orchestrator: TierConfig,
    #[serde(default = "default_worker_tier")]
    pub worker: TierConfig,

    /// Optional persona system prompt for the chat tier.
    #[serde(default)]
    pub persona: Option<String>,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
    /// Cap on each worker's registry output ring.
    #[serde(default = "default_output_buffer_bytes")]
    pub output_buffer_bytes: usize,

    #[serde(default = "default_worker_timeout_ms")]
    pub worker_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_stall_check_interval_ms")]
    pub stall_check_interval_ms: u64,
    #[serde(default = "default_stall_warning_ms")]
    pub stall_warning_ms: u64,
    #[serde(default = "default_stall_kill_ms")]
    pub stall_kill_ms: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_orchestration_timeout_ms")]
    pub orchestration_timeout_ms: u64,
    #[serde(default = "default_summary_timeout_ms")]
    pub summary_timeout_ms: u64,

    /// Service name tokens scanned for the needs-restart derivation.
    #[serde(default = "default_service_tokens")]
    pub service_tokens: Vec<String>,

    /// Directory for sessions.json, memory.json and invocations.ndjson.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for RumpbotConfig {
    fn default() -> Self {
        // Round-trips through an empty object so every field takes its serde default.
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

impl RumpbotConfig {
    pub fn tier(&self, tier: Tier) -> &TierConfig {
        match tier {
            Tier::Chat => &self.chat,
            Tier::Orchestrator => &self.orchestrator,
            Tier::Worker => &self.worker,
        }
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn stall_check_interval(&self) -> Duration {
        Duration::from_millis(self.stall_check_interval_ms)
    }

    pub fn stall_warning(&self) -> Duration {
        Duration::from_millis(self.stall_warning_ms)
    }

    pub fn stall_kill(&self) -> Duration {
        Duration::from_millis(self.stall_kill_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn orchestration_timeout(&self) -> Duration {
        Duration::from_millis(self.orchestration_timeout_ms)
    }

    pub fn summary_timeout(&self) -> Duration {
        Duration::from_millis(self.summary_timeout_ms)
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.state_dir.join("sessions.json")
    }

    pub fn memory_path(&self) -> PathBuf {
        self.state_dir.join("memory.json")
    }

    pub fn invocations_path(&self) -> PathBuf {
        self.state_dir.join("invocations.ndjson")
    }
}

/// Path to the global config: `~/.config/rumpbot/config.json`.
fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Failed to get config directory")?
        .join("rumpbot");
    Ok(config_dir.join("config.json"))
}

fn load_config_file(path: &Path) -> Result<Option<RumpbotConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config at {}", path.display()))?;
    let config: RumpbotConfig = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse config at {}", path.display()))?;
    Ok(Some(config))
}

/// Load configuration with priority: ENV > local > global > default.
pub fn load() -> Result<RumpbotConfig> {
    let mut config = RumpbotConfig::default();

    if let Ok(Some(global)) = global_config_path().and_then(|p| load_config_file(&p)) {
        config = global;
    }
    if let Some(local) = load_config_file(Path::new(".rumpbot/config.json"))? {
        config = local;
    }

    if let Ok(bin) = std::env::var("RUMPBOT_BIN") {
        config.assistant_bin = bin;
    }
    if let Ok(model) = std::env::var("RUMPBOT_MODEL") {
        config.chat.model = Some(model.clone());
        config.orchestrator.model = Some(model.clone());
        config.worker.model = Some(model);
    }
    if let Ok(model) = std::env::var("RUMPBOT_WORKER_MODEL") {
        config.worker.model = Some(model);
    }
    if let Ok(dir) = std::env::var("RUMPBOT_STATE_DIR") {
        config.state_dir = PathBuf::from(dir);
    }

    Ok(config)
}

/// Save a config to the global location.
pub fn save_global(config: &RumpbotConfig) -> Result<()> {
    let path = global_config_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }
    let contents = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(&path, contents).context("Failed to write config")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_spec_bounds() {
        let config = RumpbotConfig::default();
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.max_result_chars, 8_000);
        assert_eq!(config.worker_timeout_ms, 300_000);
        assert_eq!(config.orchestration_timeout_ms, 3_600_000);
        assert_eq!(config.summary_timeout_ms, 30_000);
        assert_eq!(config.orchestrator.max_turns, 1);
    }

    #[test]
    fn test_partial_config_file_fills_defaults() {
        let config: RumpbotConfig =
            serde_json::from_str(r#"{"assistant_bin":"fake-claude"}"#).unwrap();
        assert_eq!(config.assistant_bin, "fake-claude");
        assert_eq!(config.max_workers, 10);
    }

    #[test]
    fn test_zero_timeout_means_unlimited() {
        let tier = TierConfig {
            model: None,
            max_turns: 1,
            timeout_ms: 0,
        };
        assert!(tier.timeout().is_none());
    }
}
