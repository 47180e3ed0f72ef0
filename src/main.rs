// Módulos de la aplicación
mod action;
mod api;
mod app_state;
mod bm25;
mod checkpoint;
mod config;
mod error;
mod explorer;
mod graph_store;
mod ingest;
mod llm;
mod models;
mod neo4j_client;
mod oracle;
mod prompts;
mod runner;
mod state;
mod vector_store;

#[cfg(test)]
mod testing;

use crate::app_state::{AppState, Status};
use crate::checkpoint::{Checkpointer, FileCheckpointer, MemoryCheckpointer};
use crate::explorer::GraphExplorer;
use crate::graph_store::Neo4jGraphStore;
use crate::runner::SessionRunner;
use anyhow::{Context, Result};
use axum::Router;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        error!("Error fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Conectar a Neo4j y asegurar esquemas
    let graph = neo4j_client::connect_from_config(&cfg)
        .await
        .context("Error conectando a Neo4j")?;
    neo4j_client::ensure_schema(&graph)
        .await
        .context("Error asegurando el esquema de Neo4j")?;
    vector_store::ensure_key_element_vector_index(&graph, cfg.embedding_dimensions)
        .await
        .context("Error asegurando el índice vectorial")?;
    let graph = Arc::new(graph);

    // 4. Inicializar gestor de LLMs
    let llm_manager =
        llm::LlmManager::from_config(&cfg).context("Error inicializando LLM Manager")?;

    // 5. Explorador y runner: el grafo y el oráculo se inyectan una sola vez.
    let checkpointer: Arc<dyn Checkpointer> = if cfg.persistent_checkpoint {
        let store = FileCheckpointer::with_dir(&cfg.checkpoint_dir)
            .context("Error preparando el directorio de checkpoints")?;
        info!("Checkpoints en {}", store.dir().display());
        Arc::new(store)
    } else {
        info!("Checkpoints en memoria.");
        Arc::new(MemoryCheckpointer::new())
    };
    let explorer = GraphExplorer::new(
        Arc::new(Neo4jGraphStore::new(graph.clone(), llm_manager.clone())),
        Arc::new(llm_manager.clone()),
        cfg.initial_candidates,
    );
    let runner = SessionRunner::new(explorer, checkpointer);

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 6. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        graph,
        llm_manager,
        runner,
        status: Arc::new(Mutex::new(Status {
            is_busy: false,
            message: "Servidor listo.".to_string(),
            progress: 0.0,
        })),
        current_dir: Arc::new(Mutex::new(None)),
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 7. Configurar el router de la API
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 8. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
