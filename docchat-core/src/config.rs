//! Configuration system for docchat.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::chunk::ChunkUnit;
use crate::error::RagError;
use crate::index::DistanceMetric;

/// Top-level configuration for the retrieval pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

/// How documents are split before embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window length, in `unit`s.
    pub chunk_size: usize,
    /// Units shared by consecutive windows. Must be smaller than `chunk_size`.
    pub chunk_overlap: usize,
    pub unit: ChunkUnit,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            unit: ChunkUnit::Tokens,
        }
    }
}

/// Query-time retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub distance_metric: DistanceMetric,
    /// Paraphrases requested from the model per question. Zero disables expansion.
    pub n_query_variants: usize,
    /// Chunks handed to the answer generator after reranking.
    pub top_k: usize,
    /// Search depth for each query variant before merging.
    pub fetch_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            distance_metric: DistanceMetric::Cosine,
            n_query_variants: 3,
            top_k: 4,
            fetch_k: 8,
        }
    }
}

/// Index build and persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory holding the persisted index. `None` keeps the index in memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Ignore any persisted index and rebuild from the documents.
    pub force_rebuild: bool,
    /// Texts sent per embedding request.
    pub embed_batch_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: None,
            force_rebuild: false,
            embed_batch_size: 32,
        }
    }
}

/// Prompt construction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub system_prompt: String,
    /// Most recent turns rendered into the prompt. `None` renders the whole session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_turns: Option<usize>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant. Answer the question based only on the \
                            following context. If the context does not contain the answer, say so."
                .into(),
            memory_turns: None,
        }
    }
}

/// Which embedding backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Local,
}

/// Settings for the OpenAI-compatible HTTP providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedder: EmbedderKind,
    /// Vector size of the offline embedder.
    pub local_dimensions: usize,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            chat_model: "gpt-4o".into(),
            embedding_model: "text-embedding-3-small".into(),
            embedder: EmbedderKind::OpenAi,
            local_dimensions: 256,
            api_key_env: "OPENAI_API_KEY".into(),
            temperature: 0.0,
            timeout_secs: 60,
        }
    }
}

impl RagConfig {
    /// Reject settings no pipeline stage can work with.
    pub fn validate(&self) -> Result<(), RagError> {
        let chunking = &self.chunking;
        if chunking.chunk_size == 0 {
            return Err(RagError::invalid_config("chunk_size must be greater than 0"));
        }
        if chunking.chunk_overlap >= chunking.chunk_size {
            return Err(RagError::invalid_config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunking.chunk_overlap, chunking.chunk_size
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(RagError::invalid_config("top_k must be greater than 0"));
        }
        if self.retrieval.fetch_k == 0 {
            return Err(RagError::invalid_config("fetch_k must be greater than 0"));
        }
        if self.index.embed_batch_size == 0 {
            return Err(RagError::invalid_config(
                "embed_batch_size must be greater than 0",
            ));
        }
        if self.provider.embedder == EmbedderKind::Local && self.provider.local_dimensions == 0 {
            return Err(RagError::invalid_config(
                "local_dimensions must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `DOCCHAT_`, nested with `__`)
/// 3. Workspace-local config (`.docchat/config.toml`)
/// 4. User config (`~/.config/docchat/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&RagConfig>,
) -> Result<RagConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(RagConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "docchat", "docchat") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".docchat").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // DOCCHAT_CHUNKING__CHUNK_SIZE, DOCCHAT_RETRIEVAL__TOP_K, ...
    figment = figment.merge(Env::prefixed("DOCCHAT_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}
