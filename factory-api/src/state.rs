//! Shared application state for the API server.

use std::sync::Arc;

use factory::app::Factory;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub factory: Arc<Factory>,
}

impl AppState {
    pub fn new(factory: Factory) -> Self {
        Self {
            factory: Arc::new(factory),
        }
    }
}
