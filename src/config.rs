use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RecallConfig {
    pub general: GeneralConfig,
    pub storage: StorageConfig,
    pub models: ModelsConfig,
    pub channel: ChannelConfig,
    pub capture: CaptureConfig,
    pub record: RecordConfig,
    pub describe: DescribeConfig,
    pub query: QueryConfig,
    pub collection: CollectionConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    /// Echo streamed model output to stdout and skip confirmation prompts.
    pub debug: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelsConfig {
    pub host: String,
    pub description_model: String,
    pub embedding_model: String,
    pub interpreter_model: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChannelConfig {
    pub topic: String,
    pub group_id: String,
    pub poll_interval_ms: u64,
    pub prune_consumed: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CaptureConfig {
    pub downsample: bool,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RecordConfig {
    pub every_ms: u64,
    pub max_screenshot_sets: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DescribeConfig {
    pub max_attempts: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueryConfig {
    pub max_results: usize,
    pub expand: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CollectionConfig {
    pub name: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            debug: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_recall_dir()
            .join("recall.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".into(),
            description_model: "llava-phi3:3.8b-mini-q4_0".into(),
            embedding_model: "mxbai-embed-large".into(),
            interpreter_model: "mistral-openorca:7b-q4_K_M".into(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            topic: "screenshots".into(),
            group_id: "screenshot-describers".into(),
            poll_interval_ms: 500,
            prune_consumed: true,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            downsample: true,
            width: 1280,
            height: 720,
        }
    }
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            every_ms: 3000,
            max_screenshot_sets: None,
        }
    }
}

impl Default for DescribeConfig {
    fn default() -> Self {
        Self { max_attempts: 1 }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_results: 3,
            expand: false,
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            name: "recall-screenshots".into(),
        }
    }
}

impl ChannelConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl CaptureConfig {
    /// Target resolution, or `None` when images are sent at native size.
    pub fn downsample_to(&self) -> Option<(u32, u32)> {
        self.downsample.then_some((self.width, self.height))
    }
}

impl ModelsConfig {
    /// Every model the pipeline touches, in pull order.
    pub fn all(&self) -> [&str; 3] {
        [
            self.description_model.as_str(),
            self.embedding_model.as_str(),
            self.interpreter_model.as_str(),
        ]
    }
}

/// Returns `~/.local-recall/`
pub fn default_recall_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local-recall")
}

/// Returns the default config file path: `~/.local-recall/config.toml`
pub fn default_config_path() -> PathBuf {
    default_recall_dir().join("config.toml")
}

impl RecallConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            RecallConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (LOCAL_RECALL_DEBUG, LOCAL_RECALL_DB, LOCAL_RECALL_LOG_LEVEL, OLLAMA_HOST).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("LOCAL_RECALL_DEBUG") {
            self.general.debug = is_truthy(&val);
        }
        if let Ok(val) = std::env::var("LOCAL_RECALL_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("LOCAL_RECALL_LOG_LEVEL") {
            self.general.log_level = val;
        }
        if let Ok(val) = std::env::var("OLLAMA_HOST") {
            self.models.host = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

fn is_truthy(val: &str) -> bool {
    matches!(
        val.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RecallConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert!(!config.general.debug);
        assert_eq!(config.channel.topic, "screenshots");
        assert_eq!(config.collection.name, "recall-screenshots");
        assert_eq!(config.describe.max_attempts, 1);
        assert_eq!(config.record.max_screenshot_sets, None);
        assert_eq!(config.capture.downsample_to(), Some((1280, 720)));
        assert!(config.storage.db_path.ends_with("recall.db"));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[general]
log_level = "debug"

[models]
embedding_model = "nomic-embed-text"

[capture]
downsample = false

[record]
every_ms = 1000
max_screenshot_sets = 3
"#;
        let config: RecallConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.models.embedding_model, "nomic-embed-text");
        assert_eq!(config.capture.downsample_to(), None);
        assert_eq!(config.record.every_ms, 1000);
        assert_eq!(config.record.max_screenshot_sets, Some(3));
        // defaults still apply for unset fields
        assert_eq!(config.models.host, "http://localhost:11434");
        assert_eq!(config.query.max_results, 3);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = RecallConfig::default();
        std::env::set_var("LOCAL_RECALL_DEBUG", "TRUE");
        std::env::set_var("LOCAL_RECALL_DB", "/tmp/override.db");
        std::env::set_var("LOCAL_RECALL_LOG_LEVEL", "trace");
        std::env::set_var("OLLAMA_HOST", "http://gpu-box:11434");

        config.apply_env_overrides();

        assert!(config.general.debug);
        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.general.log_level, "trace");
        assert_eq!(config.models.host, "http://gpu-box:11434");

        // Clean up
        std::env::remove_var("LOCAL_RECALL_DEBUG");
        std::env::remove_var("LOCAL_RECALL_DB");
        std::env::remove_var("LOCAL_RECALL_LOG_LEVEL");
        std::env::remove_var("OLLAMA_HOST");
    }

    #[test]
    fn debug_flag_parsing() {
        assert!(is_truthy("1"));
        assert!(is_truthy(" Yes "));
        assert!(!is_truthy("FALSE"));
        assert!(!is_truthy(""));
    }

    #[test]
    fn model_list_order() {
        let models = ModelsConfig::default();
        assert_eq!(
            models.all(),
            [
                "llava-phi3:3.8b-mini-q4_0",
                "mxbai-embed-large",
                "mistral-openorca:7b-q4_K_M"
            ]
        );
    }
}
