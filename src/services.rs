//! Composition root
//!
//! Builds the single match watcher of the process and hands it explicitly to
//! the registry and the membership coordinator. Stores and the match data
//! source can be overridden, which is how tests and the CLI inject theirs.

use crate::common::config::ConfigLoader;
use crate::common::traits::MatchDataSource;
use crate::config::MatchdayConfig;
use crate::errors::MatchdayResult;
use crate::membership::MembershipCoordinator;
use crate::registry::GameServiceRegistry;
use crate::stores::{ScriptedMatchSource, Stores};
use crate::watcher::MatchWatcher;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Service container for dependency injection
pub struct ServiceContainer {
    config: MatchdayConfig,
    stores: Stores,
    watcher: Arc<MatchWatcher>,
    registry: Arc<GameServiceRegistry>,
    coordinator: Arc<MembershipCoordinator>,
    cancel: CancellationToken,
}

impl ServiceContainer {
    pub fn new(config: MatchdayConfig, stores: Stores, source: Arc<dyn MatchDataSource>) -> Self {
        let cancel = CancellationToken::new();
        let watcher = Arc::new(MatchWatcher::new(source, &config.watcher, cancel.child_token()));
        let registry = Arc::new(GameServiceRegistry::new(watcher.clone(), stores.clone(), config.clone()));
        let coordinator = Arc::new(MembershipCoordinator::new(
            registry.clone(),
            watcher.clone(),
            stores.clone(),
            config.membership.clone(),
        ));

        Self {
            config,
            stores,
            watcher,
            registry,
            coordinator,
            cancel,
        }
    }

    pub fn config(&self) -> &MatchdayConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn watcher(&self) -> Arc<MatchWatcher> {
        Arc::clone(&self.watcher)
    }

    pub fn registry(&self) -> Arc<GameServiceRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn coordinator(&self) -> Arc<MembershipCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Token cancelled by [`shutdown`](Self::shutdown), for game loops
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Load persisted games, then start the poll loop and the code sweeper
    pub async fn start(&self) -> MatchdayResult<Vec<JoinHandle<()>>> {
        let loaded = self.registry.load_all().await?;
        tracing::info!(games = loaded, "Starting background services");

        let watcher = self.watcher();
        let poller = tokio::spawn(async move { watcher.run().await });

        let sweeper = tokio::spawn(self.coordinator().run_code_sweeper(self.cancel.child_token()));

        Ok(vec![poller, sweeper])
    }

    pub fn shutdown(&self) {
        tracing::info!("Shutting down services");
        self.cancel.cancel();
    }
}

/// Service builder for creating configured service containers
#[derive(Default)]
pub struct ServiceBuilder {
    config_path: Option<PathBuf>,
    config: Option<MatchdayConfig>,
    stores: Option<Stores>,
    source: Option<Arc<dyn MatchDataSource>>,
}

impl ServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Use this configuration as is, skipping file and environment
    pub fn with_config(mut self, config: MatchdayConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn MatchDataSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn build(self) -> MatchdayResult<ServiceContainer> {
        let config = match self.config {
            Some(config) => {
                config.validate()?;
                config
            }
            None => {
                let mut loader = ConfigLoader::new();
                if let Some(path) = self.config_path {
                    loader = loader.with_path(path);
                }
                loader.load()?
            }
        };

        let stores = self.stores.unwrap_or_else(Stores::in_memory);
        let source = self
            .source
            .unwrap_or_else(|| Arc::new(ScriptedMatchSource::new()) as Arc<dyn MatchDataSource>);

        Ok(ServiceContainer::new(config, stores, source))
    }
}
