use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use homedir::my_home;

use crate::config::Config;
use crate::search::{Retriever, SearchArchive, SearchService};
use crate::semantic::{Embedder, EmbeddingModel, LocalIndex, VectorStorage};

/// Application paths structure
#[derive(Debug, Clone, PartialEq)]
pub struct AppPaths {
    pub base_path: PathBuf,
    pub vectors_path: PathBuf,
    pub archive_path: PathBuf,
}

impl AppPaths {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            vectors_path: base_path.join("vectors.bin"),
            archive_path: base_path.join("archive.csv"),
            base_path,
        }
    }
}

/// Builds the long-lived components shared by the CLI and the daemon.
pub struct AppFactory;

impl AppFactory {
    /// Resolve and create the data directory.
    pub fn get_paths() -> Result<AppPaths> {
        let paths = AppPaths::new(Self::get_base_path()?);

        std::fs::create_dir_all(&paths.base_path)
            .context("Failed to create application base directory")?;

        Ok(paths)
    }

    fn get_base_path() -> Result<PathBuf> {
        if let Ok(base_path) = std::env::var("VENTIKO_BASE_PATH") {
            return Ok(PathBuf::from(base_path));
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;
        Ok(home.join(".local/share/ventiko"))
    }

    pub fn create_config(paths: &AppPaths) -> Result<Config> {
        Config::load_with(&paths.base_path)
            .with_context(|| format!("Failed to load config from {}", paths.base_path.display()))
    }

    pub fn create_embedder(config: &Config, paths: &AppPaths) -> Result<Arc<dyn Embedder>> {
        let model = EmbeddingModel::new(
            &config.semantic.model,
            paths.base_path.clone(),
            Some(Duration::from_secs(config.semantic.download_timeout_secs)),
        )
        .context("Failed to load embedding model")?;

        Ok(Arc::new(model))
    }

    pub fn create_index(embedder: &dyn Embedder, paths: &AppPaths) -> Result<Arc<LocalIndex>> {
        let storage = VectorStorage::new(paths.vectors_path.clone());
        let index = LocalIndex::open(storage, embedder.model_id(), embedder.dimensions())
            .with_context(|| format!("Failed to open index {}", paths.vectors_path.display()))?;

        Ok(Arc::new(index))
    }

    pub fn create_archive(paths: &AppPaths) -> Result<Arc<SearchArchive>> {
        let archive = SearchArchive::load(&paths.archive_path)
            .with_context(|| format!("Failed to load {}", paths.archive_path.display()))?;

        Ok(Arc::new(archive))
    }

    /// Wire the query pipeline: taxonomy, retriever and archive.
    pub fn create_search_service(
        config: &Config,
        paths: &AppPaths,
        embedder: Arc<dyn Embedder>,
    ) -> Result<SearchService> {
        let index = Self::create_index(embedder.as_ref(), paths)?;
        let retriever = Retriever::new(embedder, index, &config.search);

        Ok(SearchService::new(
            Arc::new(config.taxonomy()),
            retriever,
            Self::create_archive(paths)?,
        ))
    }
}
