// Módulos de la aplicación
mod annotation;
mod api;
mod app_state;
mod composer;
mod config;
mod dispatch;
mod engine;
mod error;
mod memory_backend;
mod models;
mod rubrix_client;

use crate::app_state::AppState;
use crate::config::{AppConfig, BackendKind};
use crate::dispatch::Dispatcher;
use crate::engine::Engine;
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Agente por defecto cuando no hay servidor que identifique al usuario.
const DEFAULT_AGENT: &str = "annotator";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = AppConfig::from_env()?;

    // 3. Conectar con el backend de anotación y fijar el agente
    let (dispatcher, agent) = connect_backend(&cfg).await?;
    info!("Backend '{}' listo; las validaciones se firmarán como '{agent}'", dispatcher.name());

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 4. Crear estado compartido de la aplicación
    let app_state = AppState::new(cfg.clone(), Engine::new(dispatcher, agent), Some(shutdown_tx));

    // 5. Configurar el router de la API
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 6. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr).await?;
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

async fn connect_backend(cfg: &AppConfig) -> Result<(Arc<dyn Dispatcher>, String)> {
    match cfg.backend {
        BackendKind::Memory => {
            let agent = cfg.agent.clone().unwrap_or_else(|| DEFAULT_AGENT.to_string());
            Ok((Arc::new(memory_backend::MemoryBackend::new(cfg.search_page_size)), agent))
        }
        BackendKind::Rubrix => {
            let (client, user) = rubrix_client::RubrixClient::connect_from_config(cfg).await?;
            let agent = cfg.agent.clone().unwrap_or(user.username);
            Ok((Arc::new(client), agent))
        }
    }
}
