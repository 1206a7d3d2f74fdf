//! Wires configuration into a ready runtime.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use herald_agent::executor::{CapabilityRegistry, Executor, RegistryError};
use herald_agent::runtime::Runtime;
use herald_agent::scheduler::Scheduler;
use herald_core::config::AppConfig;
use herald_core::{NoopSnapshotSink, PipelineError};

use crate::capabilities::{register_builtins, ChatState};
use crate::directory::{permission_map, ConfigPool};
use crate::provider::HttpCompletionClient;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("capability registry is unusable: {0}")]
    Registry(#[from] RegistryError),
    #[error("AI provider setup failed: {0}")]
    Provider(PipelineError),
}

pub struct Application {
    pub config: AppConfig,
    pub runtime: Arc<Mutex<Runtime>>,
    pub chat_state: Arc<ChatState>,
}

pub fn bootstrap(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        model = %config.llm.model,
        directory_entries = config.directory.len(),
        "bootstrapping runtime"
    );

    let chat_state = Arc::new(ChatState::default());
    let mut registry = CapabilityRegistry::new();
    register_builtins(&mut registry, chat_state.clone())?;
    registry.ensure_complete()?;

    let client =
        Arc::new(HttpCompletionClient::from_config(&config.llm).map_err(BootstrapError::Provider)?);
    let pool = Arc::new(ConfigPool::from_entries(&config.directory));
    let permissions = permission_map(&config.actors);
    let scheduler = Scheduler::new(config.limits.clone());

    let runtime = Runtime::new(
        config.pipeline.clone(),
        config.llm.model.clone(),
        Executor::new(registry),
        scheduler,
        client,
        pool,
        Arc::new(NoopSnapshotSink),
        permissions,
    );

    info!(event_name = "system.bootstrap.ready", "runtime assembled");
    Ok(Application { config, runtime: Arc::new(Mutex::new(runtime)), chat_state })
}
