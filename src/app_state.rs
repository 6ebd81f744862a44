use std::sync::{Arc, Mutex};
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use crate::{config::AppConfig, engine::Engine};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub engine: Arc<Engine>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub backend: String,
    pub agent: String,
    pub last_activity: Option<DateTime<Utc>>,
}

impl AppState {
    pub fn new(config: AppConfig, engine: Engine, shutdown_tx: Option<oneshot::Sender<()>>) -> Self {
        let status = Status {
            is_busy: false,
            message: "Servidor listo.".to_string(),
            backend: engine.backend_name().to_string(),
            agent: engine.agent().to_string(),
            last_activity: None,
        };
        Self {
            config,
            engine: Arc::new(engine),
            status: Arc::new(Mutex::new(status)),
            shutdown_sender: Arc::new(Mutex::new(shutdown_tx)),
        }
    }

    /// Marca el inicio (`busy = true`) o el final de una operación contra el backend.
    pub fn set_busy(&self, busy: bool, message: impl Into<String>) {
        if let Ok(mut status) = self.status.lock() {
            status.is_busy = busy;
            status.message = message.into();
            status.last_activity = Some(Utc::now());
        }
    }
}
