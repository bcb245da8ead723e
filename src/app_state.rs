use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use crate::{config::AppConfig, session::SessionRegistry};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub sessions: Arc<SessionRegistry>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    pub fn new(config: AppConfig, sessions: SessionRegistry, shutdown_tx: oneshot::Sender<()>) -> Self {
        Self {
            config,
            sessions: Arc::new(sessions),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
        }
    }
}

/// Estado del servidor tal como lo ve `/api/status`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Status {
    pub collection: String,
    pub model: String,
    pub live_sessions: usize,
    /// `None` si el vector store no responde.
    pub points_in_collection: Option<usize>,
}
