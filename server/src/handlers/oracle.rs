use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::models::{ApiResponse, Identity};
use crate::services::{RegistrySnapshot, RelayStats, RelayStatsSnapshot};

#[derive(Debug, Serialize)]
pub struct OraclePool {
    pub count: usize,
    pub oracles: Vec<Identity>,
}

pub async fn root() -> &'static str {
    "FlightSurety Oracle Relay"
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn api_banner() -> Json<Value> {
    Json(json!({ "message": "An API for use with your Dapp!" }))
}

pub async fn list_oracles(State(registry): State<RegistrySnapshot>) -> Json<ApiResponse<OraclePool>> {
    Json(ApiResponse::ok(OraclePool {
        count: registry.len(),
        oracles: registry.all_identities().to_vec(),
    }))
}

pub async fn relay_stats(State(stats): State<Arc<RelayStats>>) -> Json<ApiResponse<RelayStatsSnapshot>> {
    Json(ApiResponse::ok(stats.snapshot()))
}
