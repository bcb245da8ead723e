use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use helpdesk_rag::{
    api,
    app_state::AppState,
    config::AppConfig,
    embeddings::{Embedder, OnnxEmbedder},
    llm::GroqModel,
    logging,
    rag::ChatEngine,
    retriever::Retriever,
    session::SessionRegistry,
    vector_store::QdrantStore,
};
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    logging::init();

    // 2. Cargar configuración
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Modelo de embeddings local y vector store
    let embedder = OnnxEmbedder::from_dir(&cfg.embedding_model_dir).with_context(|| {
        format!(
            "Error cargando el modelo de embeddings desde {}",
            cfg.embedding_model_dir.display()
        )
    })?;
    let store = QdrantStore::new(&cfg.qdrant, embedder.dimensions())
        .context("Error creando el cliente de Qdrant")?;
    info!(
        "Usando la colección '{}' en {}",
        cfg.qdrant.collection, cfg.qdrant.url
    );

    // 4. Modelo de generación y motor de chat
    let model = match &cfg.groq_base_url {
        Some(base_url) => GroqModel::with_base_url(&cfg.groq_api_key, &cfg.chat_model, base_url),
        None => GroqModel::new(&cfg.groq_api_key, &cfg.chat_model),
    };
    let retriever = Retriever::new(Arc::new(embedder), Arc::new(store), cfg.top_k);
    let engine = ChatEngine::new(retriever, Arc::new(model), cfg.generation_timeout);

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let sessions = SessionRegistry::new(Arc::new(engine), cfg.memory_token_limit);
    let app_state = AppState::new(cfg.clone(), sessions, shutdown_tx);

    // Barrido periódico de sesiones abandonadas por el cliente.
    let registry = Arc::clone(&app_state.sessions);
    let idle_ttl = cfg.session_idle_ttl;
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(idle_ttl.min(SESSION_SWEEP_INTERVAL).max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            registry.reap_idle(idle_ttl);
        }
    });

    // 6. Configurar el router de la API
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", server_addr))?;
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
