//! RAG Orchestrator service
//!
//! This is the main entry point for the application.

use anyhow::Result;
use rag_orchestrator::{
    cache::ResultCache,
    config,
    engines::{CapabilityRegistry, HttpIndexBackend, IndexSearch, WebAugmentation},
    llm::{HttpLanguageModel, LanguageModel},
    metrics::Metrics,
    network::HttpClient,
    resilience::ResilienceExecutor,
    search::{Orchestrator, QueryPlanner},
    web::{create_router, AppState},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Starting RAG Orchestrator v{}", rag_orchestrator::VERSION);

    let settings = config::load()?;
    info!("Loaded configuration for instance: {}", settings.general.instance_name);

    let client = HttpClient::with_settings(&settings.outgoing)?;
    let metrics = Arc::new(Metrics::new());
    let executor = Arc::new(ResilienceExecutor::from_settings(
        &settings.resilience,
        metrics,
    ));
    let cache = Arc::new(ResultCache::from_settings(&settings.cache));
    let model: Arc<dyn LanguageModel> =
        Arc::new(HttpLanguageModel::new(client.clone(), &settings.llm));

    let index = IndexSearch::new(
        Arc::new(HttpIndexBackend::new(client.clone(), &settings.index)),
        executor.clone(),
        settings.index.clone(),
    )
    .with_embeddings(model.clone(), settings.llm.embedding_model.clone());

    let mut web = WebAugmentation::new(
        client.clone(),
        settings.web_augmentation.clone(),
        executor.clone(),
    );
    if settings.web_augmentation.validate_content {
        web = web.with_validation(model.clone(), settings.llm.validation_model.clone());
    }

    let registry = CapabilityRegistry::new()
        .register(Arc::new(index))
        .register(Arc::new(web));
    info!("Registered {} search capabilities", registry.len());

    let planner = QueryPlanner::new(
        model,
        executor.clone(),
        settings.llm.planner_model.clone(),
        settings.search.max_sub_queries,
    );
    let orchestrator = Orchestrator::new(planner, &registry, executor.clone(), cache.clone())?;

    let addr = SocketAddr::new(
        settings.server.bind_address.parse()?,
        settings.server.port,
    );
    let app = create_router(AppState::new(settings, orchestrator, executor, cache));

    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
