pub mod factory;

pub use factory::AppFactory;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::{
    config::Config,
    records::RecordSource,
    semantic::{
        BuildError, BuildOptions, BuildPhase, EmbeddingProvider, IndexBuilder, SearchService,
        VectorIndex,
    },
};

/// The search core wired together: one index shared by the builder and the query path.
#[derive(Clone)]
pub struct App {
    builder: Arc<IndexBuilder>,
    search: Arc<SearchService>,
}

impl App {
    pub fn new(
        source: Arc<dyn RecordSource>,
        provider: Arc<dyn EmbeddingProvider>,
        config: &Config,
    ) -> Self {
        let index = Arc::new(VectorIndex::new());

        let builder = Arc::new(IndexBuilder::new(
            source,
            provider.clone(),
            index.clone(),
            BuildOptions::from(&config.embedding),
        ));

        let search = Arc::new(SearchService::new(
            index.clone(),
            provider,
            config.search.clone(),
            Duration::from_secs(config.embedding.query_timeout_secs),
        ));

        Self {
            builder,
            search,
        }
    }

    pub fn search(&self) -> &SearchService {
        &self.search
    }

    pub fn build_phase(&self) -> BuildPhase {
        self.builder.phase()
    }

    /// Build (or rebuild) the index, waiting for completion.
    pub async fn build_index(&self) -> Result<(), BuildError> {
        self.builder.build().await
    }

    /// Rebuild in the background. Failures are logged by the builder.
    ///
    /// Returns `None` if a build is already running; no second build is queued.
    pub fn spawn_rebuild(&self) -> Option<JoinHandle<Result<(), BuildError>>> {
        self.builder.try_spawn()
    }
}
