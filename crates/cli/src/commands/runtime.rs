//! Wiring shared by the commands: config, provider, registries, orchestrator.

use std::sync::Arc;
use std::time::Duration;

use taskloom_config::AppConfig;
use taskloom_core::error::ProviderError;
use taskloom_core::{HttpClient, Provider, Retriever, ToolRegistry};
use taskloom_tools::{KeywordRetriever, ReqwestHttpClient};
use taskloom_workflow::{ActionRegistry, ActionServices, WorkflowDefinition, WorkflowOrchestrator};
use tracing::{debug, info, warn};

pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

pub fn load_config() -> CliResult<AppConfig> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Build the configured provider, explaining how to fix a missing key.
pub fn require_provider(config: &AppConfig) -> CliResult<Arc<dyn Provider>> {
    match taskloom_providers::build_from_config(config) {
        Ok(provider) => Ok(provider),
        Err(ProviderError::NotConfigured(reason)) => {
            eprintln!();
            eprintln!("  ERROR: {reason}");
            eprintln!();
            eprintln!("  Set one of these environment variables:");
            eprintln!("    TASKLOOM_API_KEY    = 'sk-...'       (generic)");
            eprintln!("    OPENROUTER_API_KEY  = 'sk-or-v1-...'");
            eprintln!("    OPENAI_API_KEY      = 'sk-...'");
            eprintln!();
            eprintln!("  Or add it to your config file:");
            eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
            eprintln!();
            Err("No usable provider. See above for setup instructions.".into())
        }
        Err(e) => Err(e.into()),
    }
}

/// The provider if one can be built; `llm` steps fail without it.
pub fn optional_provider(config: &AppConfig) -> Option<Arc<dyn Provider>> {
    match taskloom_providers::build_from_config(config) {
        Ok(provider) => Some(provider),
        Err(e) => {
            debug!(error = %e, "No provider; llm actions are unavailable");
            None
        }
    }
}

pub fn http_client(config: &AppConfig) -> Arc<dyn HttpClient> {
    Arc::new(ReqwestHttpClient::new(Duration::from_secs(
        config.tools.http_timeout_secs,
    )))
}

/// Load the search corpus, if one is configured.
pub fn retriever(config: &AppConfig) -> CliResult<Option<Arc<dyn Retriever>>> {
    let Some(path) = &config.tools.search_corpus else {
        return Ok(None);
    };
    let retriever = KeywordRetriever::from_json_file(path)?;
    info!(
        path = %path.display(),
        documents = retriever.len(),
        "Loaded search corpus"
    );
    Ok(Some(Arc::new(retriever)))
}

pub fn tool_registry(config: &AppConfig) -> CliResult<Arc<ToolRegistry>> {
    Ok(Arc::new(taskloom_tools::default_registry(
        http_client(config),
        retriever(config)?,
        config.tools.file_read_roots.clone(),
    )))
}

pub fn action_registry(
    config: &AppConfig,
    provider: Option<Arc<dyn Provider>>,
) -> CliResult<Arc<ActionRegistry>> {
    let mut services = ActionServices::default().with_http(http_client(config));
    if let Some(provider) = provider {
        services = services.with_provider(provider, config.default_model.clone());
    }
    if let Some(retriever) = retriever(config)? {
        services = services.with_retriever(retriever);
    }
    Ok(Arc::new(ActionRegistry::with_builtins(services)))
}

/// Orchestrator with every definition from `workflow.definitions_dir`
/// registered. Files that fail to register are skipped with a warning.
pub async fn orchestrator(
    config: &AppConfig,
    actions: Arc<ActionRegistry>,
) -> CliResult<WorkflowOrchestrator> {
    let orchestrator = WorkflowOrchestrator::new(actions).with_default_timeout(
        Duration::from_secs(config.workflow.default_step_timeout_secs),
    );

    if let Some(dir) = &config.workflow.definitions_dir {
        for definition in WorkflowDefinition::load_dir(dir)? {
            let name = definition.name.clone();
            if let Err(e) = orchestrator.register_workflow(definition).await {
                warn!(workflow = %name, error = %e, "Skipping workflow definition");
            }
        }
    }
    Ok(orchestrator)
}
