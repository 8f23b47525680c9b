//! HTTP ルーティング (`POST /sweep`, `GET /health`)

use axum::{
    Json, Router,
    extract::{Request, State, rejection::JsonRejection},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;

use crate::error::SweepError;
use crate::sweep::{SweepEngine, SweepStage, validate_request};
use crate::types::SweepOutcome;

pub struct AppState {
    pub engine: SweepEngine,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepBody {
    pub wif: String,
    #[serde(default)]
    pub to_addr: Option<String>,
    #[serde(default)]
    pub balance_only: bool,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sweep", post(sweep))
        .route("/health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(logging_middleware))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "network": state.engine.network().to_string(),
    }))
}

async fn sweep(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SweepBody>, JsonRejection>,
) -> Result<Json<Value>, SweepError> {
    let Json(body) = payload.map_err(|e| SweepError::InvalidRequest(e.body_text()))?;

    log::debug!("段階: {}", SweepStage::Validating);
    let request = validate_request(
        &body.wif,
        body.to_addr.as_deref(),
        body.balance_only,
        state.engine.network(),
    )?;

    match state.engine.sweep(request).await? {
        SweepOutcome::Balance(total) => Ok(Json(json!(total))),
        SweepOutcome::Broadcast(txid) => Ok(Json(json!(txid.to_string()))),
    }
}

async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    log::info!(
        "{} {} -> {} ({:.1}ms)",
        method,
        path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    response
}
