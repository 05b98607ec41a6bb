use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::config::ServerConfig;
use crate::security::gate::Gate;

/// Application state shared by the middleware and handlers
#[derive(Clone)]
pub struct AppState {
    /// Admission gate and the security components behind it
    pub gate: Arc<Gate>,
    /// Server settings read per request (body limit, proxy trust)
    pub server: ServerConfig,
    /// Process start time, reported by the health endpoint
    pub started_at: DateTime<Utc>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("gate", &"Arc<Gate>")
            .field("server", &self.server)
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl AppState {
    /// Create new application state
    pub fn new(gate: Arc<Gate>, server: ServerConfig) -> Self {
        Self {
            gate,
            server,
            started_at: Utc::now(),
        }
    }
}
