//! Shared application state for the HTTP and WebSocket layers

use std::sync::Arc;

use crate::engine::DispatchEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DispatchEngine>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            engine: Arc::new(DispatchEngine::new()),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
