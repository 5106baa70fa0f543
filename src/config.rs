use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub distribution: DistributionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL override; each provider has its own default.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl AiConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_retry_backoff_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_pages_per_batch")]
    pub pages_per_batch: usize,
    #[serde(default = "default_analysis_concurrency")]
    pub concurrency: usize,
    /// Send the PDF itself in phase 1 when there is a single file.
    #[serde(default = "default_true")]
    pub attach_pdf: bool,
    /// Page text sent per page in prompts is cut to this many characters.
    #[serde(default = "default_max_chars_per_page")]
    pub max_chars_per_page: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            pages_per_batch: default_pages_per_batch(),
            concurrency: default_analysis_concurrency(),
            attach_pdf: true,
            max_chars_per_page: default_max_chars_per_page(),
        }
    }
}

fn default_pages_per_batch() -> usize {
    12
}
fn default_analysis_concurrency() -> usize {
    3
}
fn default_true() -> bool {
    true
}
fn default_max_chars_per_page() -> usize {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DistributionConfig {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_review_days")]
    pub review_days: u32,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            review_days: default_review_days(),
        }
    }
}

fn default_mode() -> String {
    "ai".to_string()
}
fn default_review_days() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_concurrency")]
    pub concurrency: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            concurrency: default_chunk_concurrency(),
        }
    }
}

fn default_chunk_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            blob_dir: default_blob_dir(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/planner.sqlite")
}
fn default_blob_dir() -> PathBuf {
    PathBuf::from("./data/blobs")
}

impl Config {
    /// Defaults for commands and tests that run without a config file.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Balanced distribution never calls the model.
    pub fn uses_ai_distribution(&self) -> bool {
        self.distribution.mode == "ai"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields [`Config::minimal`].
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file; using defaults");
        Ok(Config::minimal())
    }
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate analysis
    if config.analysis.pages_per_batch == 0 {
        anyhow::bail!("analysis.pages_per_batch must be >= 1");
    }
    if config.analysis.concurrency == 0 {
        anyhow::bail!("analysis.concurrency must be >= 1");
    }
    if config.analysis.max_chars_per_page == 0 {
        anyhow::bail!("analysis.max_chars_per_page must be >= 1");
    }

    // Validate chunking
    if config.chunking.concurrency == 0 {
        anyhow::bail!("chunking.concurrency must be >= 1");
    }

    // Validate distribution
    match config.distribution.mode.as_str() {
        "ai" | "balanced" => {}
        other => anyhow::bail!(
            "Unknown distribution mode: '{}'. Must be ai or balanced.",
            other
        ),
    }

    // Validate AI
    match config.ai.provider.as_str() {
        "disabled" | "gemini" | "openai" => {}
        other => anyhow::bail!(
            "Unknown AI provider: '{}'. Must be disabled, gemini, or openai.",
            other
        ),
    }
    if config.ai.is_enabled() && config.ai.model.is_none() {
        anyhow::bail!(
            "ai.model must be specified when provider is '{}'",
            config.ai.provider
        );
    }
    if config.ai.timeout_secs == 0 {
        anyhow::bail!("ai.timeout_secs must be > 0");
    }

    Ok(())
}
