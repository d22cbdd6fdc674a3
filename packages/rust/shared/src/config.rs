//! Application configuration for regbrief.
//!
//! User config lives at `~/.regbrief/regbrief.toml`.
//! CLI flags override config file values, which override defaults.
//! The file only names the environment variables that hold secrets; those are
//! read once by [`RunConfig::resolve`] and never again.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RegBriefError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "regbrief.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".regbrief";

// ---------------------------------------------------------------------------
// Config structs (matching regbrief.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub publish: PublishConfig,

    #[serde(default)]
    pub rules: RulesConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Topic used when none is given on the command line.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Maximum number of sources per run.
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Root that all run artifacts are written under.
    #[serde(default = "default_output_root")]
    pub output_root: String,

    /// Run-scoped artifact directory, relative to `output_root`.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: String,

    /// Summary directory, relative to `output_root`.
    #[serde(default = "default_summaries_dir")]
    pub summaries_dir: String,

    /// Per-stage worker pool size for fetches and model calls.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Timeout for page and PDF fetches.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            limit: default_limit(),
            output_root: default_output_root(),
            artifacts_dir: default_artifacts_dir(),
            summaries_dir: default_summaries_dir(),
            concurrency: default_concurrency(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

fn default_topic() -> String {
    "NIST SP 800 updates".into()
}
fn default_limit() -> usize {
    10
}
fn default_output_root() -> String {
    ".".into()
}
fn default_artifacts_dir() -> String {
    "artifacts".into()
}
fn default_summaries_dir() -> String {
    "docs/summaries".into()
}
fn default_concurrency() -> usize {
    4
}
fn default_fetch_timeout() -> u64 {
    60
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Name of the env var holding the SerpAPI key (never store the key itself).
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// SerpAPI engine parameter.
    #[serde(default = "default_search_engine")]
    pub engine: String,

    /// Domains OR-ed into the primary query as `site:` filters.
    #[serde(default = "default_primary_domains")]
    pub primary_domains: Vec<String>,

    /// Narrow query issued when the primary search yields nothing.
    #[serde(default = "default_fallback_query")]
    pub fallback_query: String,

    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_search_key_env(),
            endpoint: default_search_endpoint(),
            engine: default_search_engine(),
            primary_domains: default_primary_domains(),
            fallback_query: default_fallback_query(),
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_search_key_env() -> String {
    "SERPAPI_KEY".into()
}
fn default_search_endpoint() -> String {
    "https://serpapi.com/search.json".into()
}
fn default_search_engine() -> String {
    "google".into()
}
fn default_primary_domains() -> Vec<String> {
    vec!["nist.gov".into(), "csrc.nist.gov".into()]
}
fn default_fallback_query() -> String {
    r#"site:csrc.nist.gov "SP 800" update OR revision OR draft"#.into()
}
fn default_http_timeout() -> u64 {
    30
}

/// `[llm]` section (any OpenAI-compatible chat completions endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key.
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Characters of each document sent to the relevance judgment.
    #[serde(default = "default_relevance_max_chars")]
    pub relevance_max_chars: usize,

    /// Characters of each section sent to the mapping judgment.
    #[serde(default = "default_mapping_max_chars")]
    pub mapping_max_chars: usize,

    /// Characters of each section included in the summary grounding payload.
    #[serde(default = "default_summary_section_max_chars")]
    pub summary_section_max_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_llm_key_env(),
            base_url: default_llm_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
            relevance_max_chars: default_relevance_max_chars(),
            mapping_max_chars: default_mapping_max_chars(),
            summary_section_max_chars: default_summary_section_max_chars(),
        }
    }
}

fn default_llm_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4-turbo".into()
}
fn default_temperature() -> f32 {
    1.0
}
fn default_llm_timeout() -> u64 {
    180
}
fn default_relevance_max_chars() -> usize {
    16_000
}
fn default_mapping_max_chars() -> usize {
    6_000
}
fn default_summary_section_max_chars() -> usize {
    3_000
}

/// Which remote publishes the pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishBackend {
    /// GitHub MCP server over streamable HTTP.
    #[default]
    Mcp,
    /// GitHub REST API directly.
    Github,
}

/// `[publish]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default)]
    pub backend: PublishBackend,

    /// Target repository as `owner/repo`.
    #[serde(default)]
    pub repo: String,

    /// Base branch the PR targets.
    #[serde(default = "default_base")]
    pub base: String,

    /// Name of the env var holding the bearer token with repo write access.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    #[serde(default = "default_mcp_url")]
    pub mcp_url: String,

    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,

    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,

    #[serde(default = "default_title_prefix")]
    pub title_prefix: String,

    #[serde(default = "default_publish_timeout")]
    pub timeout_secs: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            backend: PublishBackend::default(),
            repo: String::new(),
            base: default_base(),
            token_env: default_token_env(),
            mcp_url: default_mcp_url(),
            github_api_url: default_github_api_url(),
            branch_prefix: default_branch_prefix(),
            title_prefix: default_title_prefix(),
            timeout_secs: default_publish_timeout(),
        }
    }
}

fn default_base() -> String {
    "main".into()
}
fn default_token_env() -> String {
    "MCP_GITHUB_TOKEN".into()
}
fn default_mcp_url() -> String {
    "https://api.githubcopilot.com/mcp/".into()
}
fn default_github_api_url() -> String {
    "https://api.github.com".into()
}
fn default_branch_prefix() -> String {
    "feat/nist-summary".into()
}
fn default_title_prefix() -> String {
    "NIST SP 800 Updates".into()
}
fn default_publish_timeout() -> u64 {
    60
}

/// `[rules]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Control-rule TOML replacing the built-in rule set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    8000
}

// ---------------------------------------------------------------------------
// Runtime config (resolved once at process start)
// ---------------------------------------------------------------------------

/// Runtime configuration: file config merged with CLI flags and with secrets
/// resolved from the environment exactly once.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub output_root: PathBuf,
    pub artifacts_dir: String,
    pub summaries_dir: String,
    pub concurrency: usize,
    pub fetch_timeout: Duration,
    pub search: SearchConfig,
    /// `None` degrades search to "no results"; it is not an error.
    pub search_api_key: Option<String>,
    pub llm: LlmConfig,
    pub llm_api_key: Option<String>,
    pub publish: PublishConfig,
    pub publish_token: Option<String>,
    pub rules: RulesConfig,
}

impl RunConfig {
    /// Resolve the runtime config, reading secrets through `lookup`.
    ///
    /// Pass `|name| std::env::var(name).ok()` at process start; tests pass a closure.
    /// Empty values count as unset.
    pub fn resolve(config: &AppConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secret = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Self {
            output_root: PathBuf::from(&config.defaults.output_root),
            artifacts_dir: config.defaults.artifacts_dir.clone(),
            summaries_dir: config.defaults.summaries_dir.clone(),
            concurrency: config.defaults.concurrency.max(1),
            fetch_timeout: Duration::from_secs(config.defaults.fetch_timeout_secs),
            search_api_key: secret(&config.search.api_key_env),
            search: config.search.clone(),
            llm_api_key: secret(&config.llm.api_key_env),
            llm: config.llm.clone(),
            publish_token: secret(&config.publish.token_env),
            publish: config.publish.clone(),
            rules: config.rules.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.regbrief/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RegBriefError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.regbrief/regbrief.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| RegBriefError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        RegBriefError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RegBriefError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RegBriefError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RegBriefError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
