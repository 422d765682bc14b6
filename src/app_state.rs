//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::persistence::repository::Repository;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Repository over the database cluster.
    pub repository: Arc<Repository>,
}

impl AppState {
    /// Wraps a shared repository.
    #[must_use]
    pub fn new(repository: Arc<Repository>) -> Self {
        Self { repository }
    }
}
