//! Application and per-run configuration for PaperScout.
//!
//! User config lives at `~/.paperscout/paperscout.toml` and supplies
//! defaults; a run file (TOML) describes one pipeline run and is parsed into
//! the immutable [`RunConfig`] + [`AiConfig`] pair that every stage receives
//! by reference. No stage reads ambient state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PaperScoutError, Result};
use crate::types::SearchTarget;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "paperscout.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".paperscout";

/// System prompt used when the run file does not supply one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a senior reviewer screening papers for a literature survey.\n\
Read the title and abstract the user provides and rate how relevant the\n\
paper is to the survey topic on a 1-5 scale (5 = must read, 1 = unrelated).\n\
Respond with a single JSON object and nothing else, in the form\n\
{\"score\": <integer>, \"reason\": \"<one-sentence justification>\"}.";

// ---------------------------------------------------------------------------
// App config (paperscout.toml)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Language-model endpoint settings.
    #[serde(default)]
    pub ai: AiDefaultsConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default output directory for run artifacts.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Default earliest publication year to keep.
    #[serde(default = "default_start_year")]
    pub start_year: i32,

    /// Default per-query hit cap for the bibliographic provider.
    #[serde(default = "default_search_limit")]
    pub search_limit: u32,

    /// Default delay between consecutive abstract fetches, in milliseconds.
    #[serde(default = "default_abstract_delay_ms")]
    pub abstract_delay_ms: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            start_year: default_start_year(),
            search_limit: default_search_limit(),
            abstract_delay_ms: default_abstract_delay_ms(),
        }
    }
}

fn default_output_dir() -> String {
    "output".into()
}
fn default_start_year() -> i32 {
    2022
}
fn default_search_limit() -> u32 {
    1000
}
fn default_abstract_delay_ms() -> u64 {
    1200
}

/// `[ai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiDefaultsConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Default model for relevance scoring.
    #[serde(default = "default_model")]
    pub model: String,

    /// OpenAI-compatible endpoint base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for AiDefaultsConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_model(),
            base_url: default_base_url(),
        }
    }
}

fn default_api_key_env() -> String {
    "DEEPSEEK_API_KEY".into()
}
fn default_model() -> String {
    "deepseek-chat".into()
}
fn default_base_url() -> String {
    "https://api.deepseek.com".into()
}

// ---------------------------------------------------------------------------
// Run config (immutable per-run values)
// ---------------------------------------------------------------------------

/// Immutable parameters for one pipeline run. Created once at run start.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Run name, used to prefix output artifacts.
    pub run_name: String,
    /// Query keywords (OR semantics across the list).
    pub keywords: Vec<String>,
    /// Bibliographic sources to query.
    pub targets: Vec<SearchTarget>,
    /// Earliest publication year to keep.
    pub start_year: i32,
    /// Output directory for all run artifacts.
    pub output_dir: PathBuf,
    /// Directory name under `output_dir` for abstract documents.
    pub abstract_dir_name: String,
    /// Per-query hit cap for the bibliographic provider.
    pub search_limit: u32,
    /// Delay between consecutive abstract fetches, in milliseconds.
    pub abstract_delay_ms: u64,
    /// Whether existing intermediate results may be reused.
    pub resume: bool,
}

impl RunConfig {
    /// Path of the search-stage output table.
    pub fn search_table_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}_search.csv", self.run_name))
    }

    /// Path of the abstract-indexed table.
    pub fn indexed_table_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}_indexed.csv", self.run_name))
    }

    /// Path of the final analysis table.
    pub fn analysis_table_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}_analysis.csv", self.run_name))
    }

    /// Directory holding one abstract document per RowId.
    pub fn abstract_dir(&self) -> PathBuf {
        self.output_dir.join(&self.abstract_dir_name)
    }

    /// Path of the scoring checkpoint log.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}_checkpoint.jsonl", self.run_name))
    }
}

/// Immutable language-model parameters for one run.
#[derive(Debug, Clone)]
pub struct AiConfig {
    /// System prompt sent with every scoring request.
    pub system_prompt: String,
    /// Model identifier.
    pub model: String,
    /// OpenAI-compatible endpoint base URL.
    pub base_url: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Records dispatched (and joined) as one concurrent group.
    pub batch_size: usize,
    /// Concurrency ceiling for in-flight scoring requests.
    pub max_workers: usize,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Attempts per record before marking it failed.
    pub max_retries: u32,
    /// Base backoff between attempts, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Env var the API key is read from.
    pub api_key_env: String,
    /// Explicit API key, overriding the env var when set.
    pub api_key: Option<String>,
}

/// Resolve the API key from the explicit override or the configured env var.
///
/// A missing key is a fatal startup error.
pub fn resolve_api_key(ai: &AiConfig) -> Result<String> {
    if let Some(key) = &ai.api_key {
        if !key.is_empty() {
            return Ok(key.clone());
        }
    }
    match std::env::var(&ai.api_key_env) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(PaperScoutError::config(format!(
            "API key not found. Set the {} environment variable.",
            ai.api_key_env
        ))),
    }
}

// ---------------------------------------------------------------------------
// Run file (TOML description of one run)
// ---------------------------------------------------------------------------

/// On-disk shape of a run file. Optional fields fall back to [`AppConfig`].
#[derive(Debug, Clone, Deserialize)]
pub struct RunFile {
    pub run_name: String,
    pub keywords: Vec<String>,
    pub targets: Vec<SearchTarget>,
    #[serde(default)]
    pub start_year: Option<i32>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default = "default_abstract_dir_name")]
    pub abstract_dir_name: String,
    #[serde(default)]
    pub search_limit: Option<u32>,
    #[serde(default)]
    pub abstract_delay_ms: Option<u64>,
    #[serde(default = "default_resume")]
    pub resume: bool,
    #[serde(default)]
    pub ai: RunFileAi,
}

fn default_abstract_dir_name() -> String {
    "abstracts".into()
}
fn default_resume() -> bool {
    true
}

/// `[ai]` section of a run file.
#[derive(Debug, Clone, Deserialize)]
pub struct RunFileAi {
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for RunFileAi {
    fn default() -> Self {
        Self {
            system_prompt: None,
            model: None,
            base_url: None,
            temperature: default_temperature(),
            batch_size: default_batch_size(),
            max_workers: default_max_workers(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            api_key_env: None,
        }
    }
}

fn default_temperature() -> f32 {
    0.1
}
fn default_batch_size() -> usize {
    5
}
fn default_max_workers() -> usize {
    5
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    1000
}

/// Parse a run file and merge it with application defaults.
pub fn load_run_file(path: &Path, app: &AppConfig) -> Result<(RunConfig, AiConfig)> {
    let content = std::fs::read_to_string(path).map_err(|e| PaperScoutError::io(path, e))?;
    let file: RunFile = toml::from_str(&content).map_err(|e| {
        PaperScoutError::config(format!("failed to parse {}: {e}", path.display()))
    })?;

    if file.keywords.is_empty() {
        return Err(PaperScoutError::config("run file lists no keywords"));
    }
    if file.targets.is_empty() {
        return Err(PaperScoutError::config("run file lists no targets"));
    }

    let run = RunConfig {
        run_name: file.run_name,
        keywords: file.keywords,
        targets: file.targets,
        start_year: file.start_year.unwrap_or(app.defaults.start_year),
        output_dir: PathBuf::from(
            file.output_dir
                .unwrap_or_else(|| app.defaults.output_dir.clone()),
        ),
        abstract_dir_name: file.abstract_dir_name,
        search_limit: file.search_limit.unwrap_or(app.defaults.search_limit),
        abstract_delay_ms: file
            .abstract_delay_ms
            .unwrap_or(app.defaults.abstract_delay_ms),
        resume: file.resume,
    };

    let ai = AiConfig {
        system_prompt: file
            .ai
            .system_prompt
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        model: file.ai.model.unwrap_or_else(|| app.ai.model.clone()),
        base_url: file.ai.base_url.unwrap_or_else(|| app.ai.base_url.clone()),
        temperature: file.ai.temperature,
        batch_size: file.ai.batch_size.max(1),
        max_workers: file.ai.max_workers.max(1),
        timeout_secs: file.ai.timeout_secs,
        max_retries: file.ai.max_retries.max(1),
        retry_backoff_ms: file.ai.retry_backoff_ms,
        api_key_env: file
            .ai
            .api_key_env
            .unwrap_or_else(|| app.ai.api_key_env.clone()),
        api_key: None,
    };

    Ok((run, ai))
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.paperscout/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PaperScoutError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.paperscout/paperscout.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PaperScoutError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        PaperScoutError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PaperScoutError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PaperScoutError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PaperScoutError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
