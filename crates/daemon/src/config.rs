//! # Daemon Configuration
//!
//! Loads the daemon configuration from an optional `config.yml` plus
//! environment variables, layered so that programmatic defaults < file <
//! environment. `${VAR}` references inside the file are substituted from
//! the environment before parsing.
//!
//! The encryption key is the one fatal option: the process refuses to start
//! without a valid 32-byte key, because credentials could otherwise never
//! be decrypted again.

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use tracing::{info, warn};

/// A custom error type for configuration issues.
#[derive(Debug)]
pub enum ConfigError {
    /// An error from the underlying `config` crate or invalid values.
    General(String),
    /// A required option is missing; the process must not start.
    Fatal(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::General(msg) => write!(f, "Configuration error: {msg}"),
            ConfigError::Fatal(msg) => write!(f, "Fatal configuration error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::General(err.to_string())
    }
}

/// The root configuration structure.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Relational DSN or file path. Loaded from `TELEGRAM_DATABASE_URL`.
    #[serde(default = "default_db_url")]
    pub telegram_database_url: String,
    /// Base64-encoded 32-byte key for the credential vault. Fatal if
    /// missing. Loaded from `ENCRYPTION_KEY`.
    #[serde(default)]
    pub encryption_key: String,
    /// Service-level Telegram API credentials used for QR logins.
    #[serde(default)]
    pub telegram_api_id: String,
    #[serde(default)]
    pub telegram_api_hash: String,
    /// Parse cycle period in minutes. Loaded from `PARSER_INTERVAL_MINUTES`.
    #[serde(default = "default_parser_interval")]
    pub parser_interval_minutes: u64,
    /// Parallel per-user parse workers.
    #[serde(default = "default_parse_workers")]
    pub parse_workers: usize,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    /// Configuration for the text embedding model.
    pub embedding: EmbeddingConfig,
    /// A map of named, reusable AI provider configurations.
    pub providers: HashMap<String, ProviderConfig>,
    /// A map of LLM tasks, each binding a provider, a fallback, and a
    /// temperature.
    #[serde(default)]
    pub tasks: HashMap<String, TaskConfig>,
    /// Where the knowledge graph lives: ":memory:" or a RocksDB path.
    #[serde(default = "default_graph_path")]
    pub graph_path: String,
}

fn default_db_url() -> String {
    "db/tgrag.db".to_string()
}
fn default_parser_interval() -> u64 {
    30
}
fn default_parse_workers() -> usize {
    4
}
fn default_graph_path() -> String {
    ":memory:".to_string()
}

/// Retention cron configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct CleanupConfig {
    /// Loaded from `CLEANUP_ENABLED`.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Daily run time, `HH:MM` UTC. Loaded from `CLEANUP_SCHEDULE`.
    #[serde(default = "default_cleanup_schedule")]
    pub schedule: String,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: default_cleanup_schedule(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_cleanup_schedule() -> String {
    "03:00".to_string()
}

impl CleanupConfig {
    /// Parses the schedule into (hour, minute), falling back to 03:00 on
    /// malformed input.
    pub fn schedule_time(&self) -> (u32, u32) {
        let parsed = self.schedule.split_once(':').and_then(|(h, m)| {
            let hour: u32 = h.trim().parse().ok()?;
            let minute: u32 = m.trim().parse().ok()?;
            (hour < 24 && minute < 60).then_some((hour, minute))
        });
        match parsed {
            Some(time) => time,
            None => {
                warn!(schedule = %self.schedule, "invalid CLEANUP_SCHEDULE, using 03:00");
                (3, 0)
            }
        }
    }
}

/// Feature flag rollout settings.
#[derive(Debug, Deserialize, Clone)]
pub struct FeaturesConfig {
    #[serde(default)]
    pub use_hybrid_search: bool,
    #[serde(default = "default_percentage")]
    pub hybrid_search_percentage: u8,
    #[serde(default)]
    pub use_query_expansion: bool,
    #[serde(default = "default_percentage")]
    pub query_expansion_percentage: u8,
    #[serde(default = "default_expansion_max_terms")]
    pub query_expansion_max_terms: usize,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            use_hybrid_search: false,
            hybrid_search_percentage: default_percentage(),
            use_query_expansion: false,
            query_expansion_percentage: default_percentage(),
            query_expansion_max_terms: default_expansion_max_terms(),
        }
    }
}

fn default_percentage() -> u8 {
    100
}
fn default_expansion_max_terms() -> usize {
    3
}

impl FeaturesConfig {
    pub fn to_flags(&self) -> tgrag::flags::FeatureFlags {
        tgrag::flags::FeatureFlags {
            hybrid_search: tgrag::flags::FlagRollout::new(
                self.use_hybrid_search,
                self.hybrid_search_percentage,
            ),
            query_expansion: tgrag::flags::FlagRollout::new(
                self.use_query_expansion,
                self.query_expansion_percentage,
            ),
            query_expansion_max_terms: self.query_expansion_max_terms,
        }
    }
}

/// Configuration for the embedding model provider.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub api_url: String,
    pub model_name: String,
    pub api_key: Option<String>,
    /// Vector dimension; immutable per user collection after first use.
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

fn default_embedding_dimension() -> usize {
    1024
}
fn default_embedding_timeout() -> u64 {
    5
}

/// A reusable configuration for a specific AI provider instance.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// The type of provider ("gemini" or "local").
    pub provider: String,
    /// The API URL. Optional for Gemini, where it can be derived from the
    /// model name.
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub model_name: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_provider_timeout() -> u64 {
    30
}

/// Binds one LLM task to a provider, a fallback, and a temperature.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TaskConfig {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub fallback_provider: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// The tasks every deployment carries, with their default provider binding
/// and temperature. Conservative agents run cold, creative ones warmer.
pub const DEFAULT_TASKS: &[(&str, f32)] = &[
    ("tagging", 0.2),
    ("rag_synthesis", 0.2),
    ("digest_topics", 0.1),
    ("digest_emotions", 0.3),
    ("digest_roles", 0.3),
    ("digest_synthesis", 0.2),
    ("mention_analysis", 0.2),
];

/// A fully resolved task binding.
#[derive(Debug, Clone)]
pub struct ResolvedTask {
    pub provider: String,
    pub fallback_provider: Option<String>,
    pub temperature: f32,
}

impl AppConfig {
    /// Resolves a task against the defaults: every task in
    /// [`DEFAULT_TASKS`] exists even if the file omits it.
    pub fn resolved_task(&self, name: &str) -> Result<ResolvedTask, ConfigError> {
        let default_temperature = DEFAULT_TASKS
            .iter()
            .find(|(task, _)| *task == name)
            .map(|(_, t)| *t)
            .ok_or_else(|| ConfigError::General(format!("unknown task '{name}'")))?;
        let task = self.tasks.get(name).cloned().unwrap_or_default();

        let provider = task
            .provider
            .unwrap_or_else(|| "primary".to_string());
        if !self.providers.contains_key(&provider) {
            return Err(ConfigError::General(format!(
                "task '{name}' references unknown provider '{provider}'"
            )));
        }
        if let Some(fallback) = &task.fallback_provider {
            if !self.providers.contains_key(fallback) {
                return Err(ConfigError::General(format!(
                    "task '{name}' references unknown fallback provider '{fallback}'"
                )));
            }
        }
        Ok(ResolvedTask {
            provider,
            fallback_provider: task
                .fallback_provider
                .or_else(|| self.providers.contains_key("fallback").then(|| "fallback".to_string())),
            temperature: task.temperature.unwrap_or(default_temperature),
        })
    }

    /// Validates the options that must be present for the process to start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.encryption_key.trim().is_empty() {
            return Err(ConfigError::Fatal(
                "ENCRYPTION_KEY is required; generate one with Vault::generate_key()".to_string(),
            ));
        }
        if !self.providers.contains_key("primary") {
            return Err(ConfigError::General(
                "providers must define at least a 'primary' entry".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reads a file and substitutes `${VAR}` references from the environment.
/// Returns `Ok(None)` if the file does not exist.
fn read_and_substitute(path: &str) -> Result<Option<String>, ConfigError> {
    if !std::path::Path::new(path).exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .map_err(|e| ConfigError::General(format!("Failed to read config file '{path}': {e}")))?;

    let re = Regex::new(r"\$\{(?P<var>[A-Z0-9_]+)\}").expect("static regex");
    let expanded = re.replace_all(&content, |caps: &regex::Captures| {
        env::var(&caps["var"]).unwrap_or_default()
    });

    Ok(Some(expanded.to_string()))
}

/// Loads the daemon configuration.
///
/// Layers: the optional YAML file, then unprefixed environment variables
/// for top-level options (`ENCRYPTION_KEY`, `TELEGRAM_DATABASE_URL`,
/// `PARSER_INTERVAL_MINUTES`, ...), then `TGRAG_`-prefixed variables for
/// nested overrides (e.g. `TGRAG_EMBEDDING__API_URL`).
pub fn get_config(config_path_override: Option<&str>) -> Result<AppConfig, ConfigError> {
    let path = config_path_override.unwrap_or("config.yml");
    let mut builder = ConfigBuilder::builder();

    if let Some(content) = read_and_substitute(path)? {
        info!("Loading configuration from '{path}'.");
        builder = builder.add_source(File::from_str(&content, FileFormat::Yaml));
    }

    let settings = builder
        .add_source(Environment::default())
        .add_source(
            Environment::with_prefix("TGRAG")
                .prefix_separator("_")
                .try_parsing(true)
                .separator("__"),
        )
        .build()?;

    let mut app_config: AppConfig = settings.try_deserialize()?;

    // CLEANUP_ENABLED / CLEANUP_SCHEDULE arrive as flat variables; fold
    // them into the nested structure when present.
    if let Ok(enabled) = env::var("CLEANUP_ENABLED") {
        app_config.cleanup.enabled = matches!(enabled.to_lowercase().as_str(), "1" | "true" | "yes");
    }
    if let Ok(schedule) = env::var("CLEANUP_SCHEDULE") {
        app_config.cleanup.schedule = schedule;
    }
    if let Ok(flag) = env::var("USE_HYBRID_SEARCH") {
        app_config.features.use_hybrid_search =
            matches!(flag.to_lowercase().as_str(), "1" | "true" | "yes");
    }
    if let Ok(pct) = env::var("HYBRID_SEARCH_PERCENTAGE") {
        if let Ok(pct) = pct.parse() {
            app_config.features.hybrid_search_percentage = pct;
        }
    }
    if let Ok(flag) = env::var("USE_QUERY_EXPANSION") {
        app_config.features.use_query_expansion =
            matches!(flag.to_lowercase().as_str(), "1" | "true" | "yes");
    }
    if let Ok(pct) = env::var("QUERY_EXPANSION_PERCENTAGE") {
        if let Ok(pct) = pct.parse() {
            app_config.features.query_expansion_percentage = pct;
        }
    }
    if let Ok(max_terms) = env::var("QUERY_EXPANSION_MAX_TERMS") {
        if let Ok(max_terms) = max_terms.parse() {
            app_config.features.query_expansion_max_terms = max_terms;
        }
    }

    app_config.validate()?;
    Ok(app_config)
}
