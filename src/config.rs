use anyhow::{Context, Result};
use disclosure_nlq_core::compiler::ScoringConfig;
use disclosure_nlq_core::plan::TableSchema;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub aliases: AliasesConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub table: TableSchema,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub augmentation: AugmentationConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Alias table locations. Absent paths use the tables compiled into the binary.
#[derive(Debug, Deserialize, Clone)]
pub struct AliasesConfig {
    #[serde(default)]
    pub companies: Option<PathBuf>,
    #[serde(default)]
    pub report_types: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub auto_expand: bool,
}

impl Default for AliasesConfig {
    fn default() -> Self {
        Self {
            companies: None,
            report_types: None,
            auto_expand: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_max_items_cap")]
    pub max_items_cap: usize,
    #[serde(default = "default_full_scan_cap")]
    pub full_scan_cap: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            max_items_cap: default_max_items_cap(),
            full_scan_cap: default_full_scan_cap(),
            page_size: default_page_size(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_max_items() -> usize {
    50
}
fn default_max_items_cap() -> usize {
    5000
}
fn default_full_scan_cap() -> usize {
    50
}
fn default_page_size() -> usize {
    100
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_backoff_ms() -> u64 {
    200
}
fn default_max_backoff_ms() -> u64 {
    5000
}
fn default_call_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct AugmentationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Chat-completions endpoint. Defaults per provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_augment_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            timeout_secs: default_augment_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_augment_timeout_secs() -> u64 {
    8
}

impl AugmentationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn endpoint(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        match self.provider.as_str() {
            "ollama" => "http://localhost:11434/v1/chat/completions".to_string(),
            _ => "https://api.openai.com/v1/chat/completions".to_string(),
        }
    }
}

/// Static dataset served in degraded mode.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FallbackConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// Built-in configuration used when no config file exists.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/nlq.sqlite"),
            },
            aliases: AliasesConfig::default(),
            scoring: ScoringConfig::default(),
            table: TableSchema::default(),
            retrieval: RetrievalConfig::default(),
            augmentation: AugmentationConfig::default(),
            fallback: FallbackConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Loads `path`, or the built-in minimal config when the file does not exist.
pub fn load_or_minimal(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::minimal())
    }
}

fn validate(config: &Config) -> Result<()> {
    // Validate table layout
    config.table.validate()?;

    // Validate retrieval
    let r = &config.retrieval;
    if r.max_items_cap == 0 {
        anyhow::bail!("retrieval.max_items_cap must be >= 1");
    }
    if !(1..=r.max_items_cap).contains(&r.max_items) {
        anyhow::bail!(
            "retrieval.max_items must be in [1, {}] (max_items_cap)",
            r.max_items_cap
        );
    }
    if r.full_scan_cap == 0 || r.page_size == 0 {
        anyhow::bail!("retrieval.full_scan_cap and retrieval.page_size must be >= 1");
    }
    if r.max_attempts == 0 {
        anyhow::bail!("retrieval.max_attempts must be >= 1");
    }
    if r.base_backoff_ms > r.max_backoff_ms {
        anyhow::bail!("retrieval.base_backoff_ms must not exceed retrieval.max_backoff_ms");
    }

    // Validate scoring
    let s = &config.scoring;
    for (name, value) in [
        ("unmatched_token_penalty", s.unmatched_token_penalty),
        ("ambiguous_temporal_penalty", s.ambiguous_temporal_penalty),
        ("ambiguous_alias_penalty", s.ambiguous_alias_penalty),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("scoring.{} must be in [0.0, 1.0]", name);
        }
    }
    if s.max_window_tokens == 0 {
        anyhow::bail!("scoring.max_window_tokens must be >= 1");
    }

    // Validate augmentation
    match config.augmentation.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown augmentation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.augmentation.is_enabled() && config.augmentation.model.is_none() {
        anyhow::bail!(
            "augmentation.model must be specified when provider is '{}'",
            config.augmentation.provider
        );
    }

    Ok(())
}
