use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_RECORDS_FILE: &str = "customers.csv";

/// Default embedding model (the hosted provider's small model)
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 15;
const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Default and upper bound for the number of search results
const DEFAULT_TOP_K: usize = 100;
const MAX_TOP_K: usize = 100;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DataConfig {
    /// CSV file with customer profiles. Relative paths resolve against the base path.
    #[serde(default)]
    pub records_path: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible HTTP API
    #[default]
    OpenAi,
    /// fastembed model running in-process
    Local,
}

/// Configuration for the embedding provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    /// Model name, e.g. "text-embedding-3-small" or "bge-small-en-v1.5" for local
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// API root for the openai provider
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Bound on a single query embedding call
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,

    /// Bound on the batch embedding call during index build
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,

    /// Retries of transient batch failures during index build
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: default_embedding_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            query_timeout_secs: default_query_timeout_secs(),
            batch_timeout_secs: default_batch_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_base_url() -> String {
    crate::semantic::openai::DEFAULT_BASE_URL.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_query_timeout_secs() -> u64 {
    DEFAULT_QUERY_TIMEOUT_SECS
}

fn default_batch_timeout_secs() -> u64 {
    DEFAULT_BATCH_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Used when the request has no usable topK
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    #[serde(default = "max_top_k")]
    pub max_top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: max_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn max_top_k() -> usize {
    MAX_TOP_K
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

/// Base directory for config and data: `PROFILES_BASE_PATH` or `~/.local/share/profiles`.
pub fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("PROFILES_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = homedir::my_home()
        .map_err(|err| anyhow::anyhow!("couldnt find home dir: {err:?}"))?
        .context("couldnt find home dir")?;

    Ok(home.join(".local/share/profiles"))
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        if self.search.max_top_k == 0 {
            bail!("search.max_top_k must be greater than 0");
        }

        if self.search.default_top_k == 0 || self.search.default_top_k > self.search.max_top_k {
            bail!(
                "search.default_top_k must be between 1 and {}, got {}",
                self.search.max_top_k,
                self.search.default_top_k
            );
        }

        if self.embedding.query_timeout_secs == 0 {
            bail!("embedding.query_timeout_secs must be greater than 0");
        }

        if self.embedding.batch_timeout_secs == 0 {
            bail!("embedding.batch_timeout_secs must be greater than 0");
        }

        if self.embedding.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }

        Ok(())
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(&base_path()?)
    }

    /// Read `config.yaml` from `base_path`, writing a default one first if missing.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let config_path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !config_path.exists() {
            log::info!("Creating default config at {config_path:?}");
            std::fs::create_dir_all(base_path)
                .with_context(|| format!("failed to create {base_path:?}"))?;
            std::fs::write(&config_path, serde_yml::to_string(&Self::default())?)
                .with_context(|| format!("failed to write {config_path:?}"))?;
        }

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {config_path:?}"))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("config {config_path:?} is malformed"))?;

        config.base_path = base_path.to_path_buf();
        config.apply_env();
        config.validate()?;

        Ok(config)
    }

    /// Environment overrides: `HOST`, `PORT`, `EMBEDDING_MODEL`.
    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => log::warn!("ignoring invalid PORT {port:?}"),
            }
        }

        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Record CSV location, resolved against the base path.
    pub fn records_path(&self) -> PathBuf {
        let path = self
            .data
            .records_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORDS_FILE));

        if path.is_absolute() {
            path
        } else {
            self.base_path.join(path)
        }
    }
}
