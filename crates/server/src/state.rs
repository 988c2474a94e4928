use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use dropwatch_core::{
    ActivityHandle, ActivityStore, Authenticator, Config, CycleOrchestrator, SanitizedConfig,
};

/// Shared application state
pub struct AppState {
    config: RwLock<Config>,
    config_path: Option<PathBuf>,
    authenticator: Arc<dyn Authenticator>,
    activity: ActivityHandle,
    activity_store: Arc<dyn ActivityStore>,
    orchestrator: Arc<CycleOrchestrator>,
}

impl AppState {
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        authenticator: Arc<dyn Authenticator>,
        activity: ActivityHandle,
        activity_store: Arc<dyn ActivityStore>,
        orchestrator: Arc<CycleOrchestrator>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            config_path,
            authenticator,
            activity,
            activity_store,
            orchestrator,
        }
    }

    pub fn config(&self) -> Config {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the config after a successful reload.
    pub fn set_config(&self, config: Config) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// File the config was loaded from, if any. Reload needs one.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&*self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn activity(&self) -> &ActivityHandle {
        &self.activity
    }

    pub fn activity_store(&self) -> &dyn ActivityStore {
        self.activity_store.as_ref()
    }

    pub fn orchestrator(&self) -> &Arc<CycleOrchestrator> {
        &self.orchestrator
    }
}
