use crate::{
    app::App,
    config::{Config, EmbeddingConfig, ProviderKind},
    records::CsvRecordSource,
    semantic::{EmbeddingProvider, OpenAiEmbedder},
};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Application factory for creating and configuring application components
pub struct AppFactory;

impl AppFactory {
    /// Create the search application from config.
    ///
    /// `records_path` overrides the configured CSV location. Blocking when the local
    /// provider has to load (or download) its model.
    pub fn create_app(config: &Config, records_path: Option<PathBuf>) -> Result<App> {
        let records_path = records_path.unwrap_or_else(|| config.records_path());
        log::info!("Using records from {records_path:?}");

        let provider = Self::create_provider(&config.embedding, config.base_path())?;
        let source = Arc::new(CsvRecordSource::new(records_path));

        Ok(App::new(source, provider, config))
    }

    /// Create the configured embedding provider
    pub fn create_provider(
        config: &EmbeddingConfig,
        base_path: &Path,
    ) -> Result<Arc<dyn EmbeddingProvider>> {
        log::info!(
            "Embedding provider: {:?}, model: {}",
            config.provider,
            config.model
        );

        match config.provider {
            ProviderKind::OpenAi => {
                let api_key = Self::read_api_key(&config.api_key_env)?;
                let embedder = OpenAiEmbedder::new(api_key, config.model.clone(), &config.base_url);
                log::info!("Embedding endpoint: {}", embedder.endpoint());
                Ok(Arc::new(embedder))
            }
            ProviderKind::Local => Self::create_local_provider(config, base_path),
        }
    }

    #[cfg(feature = "local-embeddings")]
    fn create_local_provider(
        config: &EmbeddingConfig,
        base_path: &Path,
    ) -> Result<Arc<dyn EmbeddingProvider>> {
        let embedder = crate::semantic::LocalEmbedder::new(&config.model, base_path.to_path_buf())
            .context("Failed to load local embedding model")?;
        Ok(Arc::new(embedder))
    }

    #[cfg(not(feature = "local-embeddings"))]
    fn create_local_provider(
        _config: &EmbeddingConfig,
        _base_path: &Path,
    ) -> Result<Arc<dyn EmbeddingProvider>> {
        bail!("local embeddings require the `local-embeddings` feature")
    }

    /// Read the API key from the named environment variable
    fn read_api_key(var: &str) -> Result<String> {
        let key = std::env::var(var)
            .with_context(|| format!("{var} environment variable not set"))?;

        if key.trim().is_empty() {
            bail!("{var} environment variable is empty");
        }

        Ok(key)
    }
}
