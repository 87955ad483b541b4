//! Shared application state for the Axum API server.

use std::sync::Arc;

use taskpush_common::config::AppConfig;
use taskpush_engine::identity::IdentityProvider;
use taskpush_engine::store::Store;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub identity: Arc<dyn IdentityProvider>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        identity: Arc<dyn IdentityProvider>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            identity,
            config,
        }
    }
}
