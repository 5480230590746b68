//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::services::{RegistrySnapshot, RelayStats};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: RegistrySnapshot,
    pub relay_stats: Arc<RelayStats>,
}

impl AppState {
    pub fn new(registry: RegistrySnapshot, relay_stats: Arc<RelayStats>) -> Self {
        Self {
            registry,
            relay_stats,
        }
    }
}

impl FromRef<AppState> for RegistrySnapshot {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.registry.clone()
    }
}

impl FromRef<AppState> for Arc<RelayStats> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.relay_stats.clone()
    }
}
