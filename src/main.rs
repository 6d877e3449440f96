use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use healthcheck_rag::auth::token::TokenService;
use healthcheck_rag::config::Settings;
use healthcheck_rag::db::Database;
use healthcheck_rag::llm::OllamaClient;
use healthcheck_rag::rag::pipeline::AnalysisPipeline;
use healthcheck_rag::rag::KnowledgeBase;
use healthcheck_rag::routes::{router, AppState};
use healthcheck_rag::session::SessionStore;

#[tokio::main]
async fn main() -> Result<()> {
    // ロギング初期化
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::load()?;

    tracing::info!("Connecting to Qdrant: {}", settings.qdrant_url);
    tracing::info!("Connecting to Ollama: {} ({})", settings.ollama_url, settings.llm_model);

    // コンポーネント初期化
    let db = Database::connect(&settings.database_url, settings.db_max_connections).await?;
    db.init_schema().await?;

    let knowledge = match KnowledgeBase::connect(
        Path::new(&settings.embedding_model_dir),
        &settings.qdrant_url,
        &settings.collection,
    )
    .await
    {
        Ok(kb) => {
            tracing::info!("Knowledge base initialized successfully");
            Some(kb)
        }
        Err(e) => {
            tracing::warn!("Knowledge base initialization failed (continuing without RAG): {}", e);
            None
        }
    };

    let ollama = Arc::new(OllamaClient::new(
        &settings.ollama_url,
        &settings.llm_model,
        settings.llm_temperature,
        settings.llm_timeout_secs,
    )?);
    if !ollama.health_check().await.unwrap_or(false) {
        tracing::warn!("Ollama is not reachable at {}; analyses will fall back", settings.ollama_url);
    }

    let state = Arc::new(AppState {
        db,
        pipeline: AnalysisPipeline::new(ollama.clone(), knowledge, settings.retrieval()),
        sessions: SessionStore::new(settings.session_ttl_minutes),
        tokens: TokenService::new(&settings.jwt_secret, settings.token_expire_minutes),
        ollama: Some(ollama),
        settings,
    });

    let listener = tokio::net::TcpListener::bind(&state.settings.bind_addr).await?;
    tracing::info!("Health-check server listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state)).await?;

    Ok(())
}
