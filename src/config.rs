//! TOML configuration.
//!
//! Loaded once at startup from `./config/chx.toml` (or `--config`). Every
//! section has defaults, so an empty `[db]`-only file is a valid config.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub expansion: ExpansionConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/chx.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Quiet period before a changed path is re-parsed.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Parser worker pool size.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Files larger than this are skipped.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Applied when a repository is registered without patterns.
    #[serde(default = "default_ignore")]
    pub default_ignore: Vec<String>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            workers: default_workers(),
            max_file_bytes: default_max_file_bytes(),
            max_tokens: default_max_tokens(),
            default_ignore: default_ignore(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    300
}
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
fn default_max_file_bytes() -> u64 {
    2 * 1024 * 1024
}
fn default_max_tokens() -> usize {
    700
}
fn default_ignore() -> Vec<String> {
    ["node_modules", ".git", "dist", "build", ".env", "*.log"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    /// `"rrf"` or `"weighted"`.
    #[serde(default = "default_merge")]
    pub merge: String,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// Weight for dense vs lexical in the weighted strategy.
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_k: default_candidate_k(),
            final_limit: default_final_limit(),
            merge: default_merge(),
            rrf_k: default_rrf_k(),
            hybrid_alpha: default_hybrid_alpha(),
        }
    }
}

fn default_candidate_k() -> usize {
    80
}
fn default_final_limit() -> usize {
    12
}
fn default_merge() -> String {
    "rrf".to_string()
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_hybrid_alpha() -> f64 {
    0.6
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpansionConfig {
    /// `"disabled"`, `"ollama"` or `"openai"`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_expansion_url")]
    pub url: String,
    #[serde(default = "default_expansion_model")]
    pub model: String,
    #[serde(default = "default_collaborator_timeout")]
    pub timeout_secs: u64,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            url: default_expansion_url(),
            model: default_expansion_model(),
            timeout_secs: default_collaborator_timeout(),
        }
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_expansion_url() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_expansion_model() -> String {
    "llama3".to_string()
}
fn default_collaborator_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    /// `"disabled"` or `"http"`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_collaborator_timeout")]
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            url: None,
            model: None,
            timeout_secs: default_collaborator_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    #[serde(default = "default_index_events")]
    pub index_events: usize,
    #[serde(default = "default_access_log")]
    pub access_log: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            index_events: default_index_events(),
            access_log: default_access_log(),
        }
    }
}

fn default_index_events() -> usize {
    50
}
fn default_access_log() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

/// A static bearer credential and the principal it resolves to.
#[derive(Debug, Deserialize, Clone)]
pub struct TokenConfig {
    pub token: String,
    pub subject: String,
    pub role: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate indexing
    if !(1..=10_000).contains(&config.indexing.debounce_ms) {
        bail!("indexing.debounce_ms must be in 1..=10000");
    }
    if config.indexing.workers == 0 {
        bail!("indexing.workers must be >= 1");
    }
    if config.indexing.max_tokens == 0 {
        bail!("indexing.max_tokens must be > 0");
    }

    // Validate retrieval
    if config.retrieval.final_limit < 1 {
        bail!("retrieval.final_limit must be >= 1");
    }
    if config.retrieval.candidate_k < 1 {
        bail!("retrieval.candidate_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if config.retrieval.rrf_k <= 0.0 {
        bail!("retrieval.rrf_k must be > 0");
    }
    match config.retrieval.merge.as_str() {
        "rrf" | "weighted" => {}
        other => bail!(
            "Unknown retrieval.merge: '{}'. Must be rrf or weighted.",
            other
        ),
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
            other
        ),
    }

    match config.expansion.provider.as_str() {
        "disabled" | "ollama" | "openai" => {}
        other => bail!(
            "Unknown expansion provider: '{}'. Must be disabled, ollama, or openai.",
            other
        ),
    }

    match config.rerank.provider.as_str() {
        "disabled" => {}
        "http" => {
            if config.rerank.url.is_none() {
                bail!("rerank.url must be specified when provider is 'http'");
            }
        }
        other => bail!(
            "Unknown rerank provider: '{}'. Must be disabled or http.",
            other
        ),
    }

    for token in &config.auth.tokens {
        token
            .role
            .parse::<code_harness_core::models::Role>()
            .map_err(|e| anyhow::anyhow!("auth.tokens[{}]: {}", token.subject, e))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"/tmp/x.sqlite\"\n").unwrap();
        assert_eq!(config.indexing.debounce_ms, 300);
        assert_eq!(config.retrieval.merge, "rrf");
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.expansion.model, "llama3");
        assert_eq!(config.audit.index_events, 50);
        assert_eq!(config.audit.access_log, 20);
        assert!(config.indexing.default_ignore.contains(&"node_modules".to_string()));
    }

    #[test]
    fn rejects_out_of_range_debounce() {
        assert!(parse("[indexing]\ndebounce_ms = 0\n").is_err());
        assert!(parse("[indexing]\ndebounce_ms = 20000\n").is_err());
    }

    #[test]
    fn rejects_unknown_merge_and_alpha() {
        assert!(parse("[retrieval]\nmerge = \"max\"\n").is_err());
        assert!(parse("[retrieval]\nhybrid_alpha = 1.5\n").is_err());
    }

    #[test]
    fn network_embedding_requires_model_and_dims() {
        assert!(parse("[embedding]\nprovider = \"openai\"\n").is_err());
        assert!(parse("[embedding]\nprovider = \"openai\"\nmodel = \"m\"\ndims = 8\n").is_ok());
    }

    #[test]
    fn token_roles_are_validated() {
        let bad = "[[auth.tokens]]\ntoken = \"t\"\nsubject = \"ci\"\nrole = \"root\"\n";
        assert!(parse(bad).is_err());
        let good = "[[auth.tokens]]\ntoken = \"t\"\nsubject = \"ci\"\nrole = \"viewer\"\nscopes = [\"search_codebase\"]\n";
        assert_eq!(parse(good).unwrap().auth.tokens[0].scopes.len(), 1);
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/chx.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
