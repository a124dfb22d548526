use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::semantic::DEFAULT_MODEL;

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_LISTEN: &str = "0.0.0.0:5000";
/// Number of results returned when a search does not ask for a count
const DEFAULT_TOP_K: usize = 2;
const DEFAULT_IMAGE_FOLDER: &str = "images";
const DEFAULT_INDEX_PATH: &str = "vector_index";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Default per-call embedding timeout
const DEFAULT_EMBEDDING_TIMEOUT_MS: u64 = 30_000;

const DEFAULT_REFORMULATOR_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_REFORMULATOR_CONNECT_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Configuration for the embedding provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name for embeddings (e.g., "bge-base-en-v1.5")
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Timeout for a single embedding call in milliseconds
    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            timeout_ms: DEFAULT_EMBEDDING_TIMEOUT_MS,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReformulatorProvider {
    /// Use the raw query as typed
    #[default]
    None,
    Ollama,
    OpenAi,
}

/// Configuration for LLM query reformulation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReformulatorConfig {
    #[serde(default)]
    pub provider: ReformulatorProvider,

    /// API base url, provider default when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Model name, provider default when unset
    #[serde(default)]
    pub model: Option<String>,

    /// Environment variable holding the API key (openai only)
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_reformulator_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_reformulator_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ReformulatorConfig {
    fn default() -> Self {
        Self {
            provider: ReformulatorProvider::None,
            endpoint: None,
            model: None,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            timeout_ms: DEFAULT_REFORMULATOR_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_REFORMULATOR_CONNECT_TIMEOUT_MS,
        }
    }
}

fn default_embedding_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_embedding_timeout_ms() -> u64 {
    DEFAULT_EMBEDDING_TIMEOUT_MS
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_reformulator_timeout_ms() -> u64 {
    DEFAULT_REFORMULATOR_TIMEOUT_MS
}

fn default_reformulator_connect_timeout_ms() -> u64 {
    DEFAULT_REFORMULATOR_CONNECT_TIMEOUT_MS
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_image_folder() -> PathBuf {
    PathBuf::from(DEFAULT_IMAGE_FOLDER)
}

fn default_index_path() -> PathBuf {
    PathBuf::from(DEFAULT_INDEX_PATH)
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    /// Where uploads are written; relative paths resolve against the base path
    #[serde(default = "default_image_folder")]
    pub image_folder: PathBuf,
    /// Snapshot directory; relative paths resolve against the base path
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reformulator: ReformulatorConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            default_top_k: DEFAULT_TOP_K,
            image_folder: default_image_folder(),
            index_path: default_index_path(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            embedding: EmbeddingConfig::default(),
            reformulator: ReformulatorConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        if self.default_top_k == 0 {
            bail!("default_top_k must be greater than 0");
        }

        if self.max_upload_bytes == 0 {
            bail!("max_upload_bytes must be greater than 0");
        }

        if self.embedding.timeout_ms == 0 {
            bail!("embedding.timeout_ms must be greater than 0");
        }

        if self.reformulator.provider == ReformulatorProvider::OpenAi
            && self.reformulator.api_key_env.trim().is_empty()
        {
            bail!("reformulator.api_key_env must name an environment variable");
        }

        Ok(())
    }

    /// Defaults rooted at `base_path`, without touching the filesystem.
    pub fn with_base_path(base_path: &Path) -> Self {
        Self {
            base_path: base_path.to_path_buf(),
            ..Self::default()
        }
    }

    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        let config_path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !config_path.exists() {
            Self::with_base_path(base_path).save()?;
        }

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("{} is malformed", config_path.display()))?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_str = serde_yml::to_string(&self)?;
        let config_path = self.base_path.join(CONFIG_FILE);
        std::fs::write(&config_path, config_str)
            .with_context(|| format!("failed to write {}", config_path.display()))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    pub fn image_folder_path(&self) -> PathBuf {
        self.resolve(&self.image_folder)
    }

    pub fn index_dir_path(&self) -> PathBuf {
        self.resolve(&self.index_path)
    }
}
