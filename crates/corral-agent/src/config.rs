use std::path::PathBuf;
use std::time::Duration;

/// Prepare attempts made before an instance is given up and destroyed.
pub const MAX_RETRIES: u32 = 3;

/// Pause between two prepare attempts.
pub const PREPARE_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub max_prepare_retries: u32,
    pub prepare_backoff: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_prepare_retries: MAX_RETRIES,
            prepare_backoff: PREPARE_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub node_id: String,
    pub data_dir: PathBuf,
    pub lifecycle: LifecycleConfig,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Unset or
    /// unparseable values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = LifecycleConfig::default();

        let node_id = lookup("NODE_ID").unwrap_or_else(|| "node-1".to_string());
        let data_dir = lookup("AGENT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/var/lib/corral"));
        let max_prepare_retries = lookup("PREPARE_MAX_RETRIES")
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(defaults.max_prepare_retries);
        let prepare_backoff = lookup("PREPARE_BACKOFF_SECS")
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.prepare_backoff);

        Self {
            node_id,
            data_dir,
            lifecycle: LifecycleConfig {
                max_prepare_retries,
                prepare_backoff,
            },
        }
    }
}
