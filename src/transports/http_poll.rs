//! HTTP long-poll transport: register/unregister/send_event/poll/health, all JSON.

use super::{check_bearer, cors_layer, unauthorized};
use crate::event::Event;
use crate::network::Network;
use crate::topology::TransportBinding;
use crate::types::AgentId;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
struct HttpPollState {
    network: Arc<Network>,
    bearer_token: Option<Arc<str>>,
}

/// Build the HTTP long-poll transport's router.
#[must_use]
pub fn router(network: Arc<Network>, bearer_token: Option<String>) -> axum::Router {
    let state = HttpPollState {
        network,
        bearer_token: bearer_token.map(Into::into),
    };
    axum::Router::new()
        .route("/api/register", post(register))
        .route("/api/unregister", post(unregister))
        .route("/api/send_event", post(send_event))
        .route("/api/poll", get(poll))
        .route("/api/health", get(health))
        .layer(middleware::from_fn(cors_layer))
        .with_state(state)
}

fn authorize(state: &HttpPollState, method: &Method, path: &str, headers: &HeaderMap) -> bool {
    if method == Method::OPTIONS || path == "/api/health" {
        return true;
    }
    match &state.bearer_token {
        Some(token) => check_bearer(headers, token),
        None => true,
    }
}

#[derive(Deserialize)]
struct RegisterRequest {
    agent_id: String,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    capabilities: Vec<String>,
}

async fn register(
    State(state): State<HttpPollState>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequest>,
) -> Response {
    if !authorize(&state, &Method::POST, "/api/register", &headers) {
        return unauthorized();
    }
    let Ok(agent_id) = AgentId::try_new(body.agent_id) else {
        return Json(json!({ "success": false, "message": "invalid agent_id" })).into_response();
    };
    let now = state.network.now_secs();
    let outcome = state.network.topology().register_agent(
        agent_id.clone(),
        body.metadata.into_iter().collect(),
        body.capabilities.into_iter().collect(),
        TransportBinding::HttpPoll,
        now,
        false,
    );
    state.network.agent_queues().open(agent_id.clone());
    state.network.topology().add_agent_to_all_channels(&agent_id);
    match outcome {
        crate::topology::RegisterOutcome::Ack => {
            Json(json!({ "success": true, "message": "registered" })).into_response()
        }
        crate::topology::RegisterOutcome::Reject(error) => {
            Json(json!({ "success": false, "message": error.to_string() })).into_response()
        }
    }
}

#[derive(Deserialize)]
struct UnregisterRequest {
    agent_id: String,
}

async fn unregister(
    State(state): State<HttpPollState>,
    headers: HeaderMap,
    Json(body): Json<UnregisterRequest>,
) -> Response {
    if !authorize(&state, &Method::POST, "/api/unregister", &headers) {
        return unauthorized();
    }
    let Ok(agent_id) = AgentId::try_new(body.agent_id) else {
        return Json(json!({ "success": false })).into_response();
    };
    state.network.topology().unregister_agent(&agent_id);
    state.network.agent_queues().close(&agent_id);
    Json(json!({ "success": true })).into_response()
}

async fn send_event(
    State(state): State<HttpPollState>,
    headers: HeaderMap,
    Json(event): Json<Event>,
) -> Response {
    if !authorize(&state, &Method::POST, "/api/send_event", &headers) {
        return unauthorized();
    }
    let source = AgentId::try_new(event.source_id.clone()).ok();
    match state.network.handle_inbound(event, source.as_ref()).await {
        Ok(response) => Json(json!({
            "success": response.success,
            "data": response.data,
            "message": response.message,
        }))
        .into_response(),
        Err(error) => {
            warn!(%error, "send_event rejected");
            Json(json!({ "success": false, "message": error.to_string() })).into_response()
        }
    }
}

#[derive(Deserialize)]
struct PollQuery {
    agent_id: String,
    #[serde(default = "default_wait_ms")]
    wait_ms: u64,
    #[serde(default = "default_max")]
    max: usize,
}

fn default_wait_ms() -> u64 {
    25_000
}

fn default_max() -> usize {
    100
}

async fn poll(
    State(state): State<HttpPollState>,
    headers: HeaderMap,
    Query(query): Query<PollQuery>,
) -> Response {
    if !authorize(&state, &Method::GET, "/api/poll", &headers) {
        return unauthorized();
    }
    let Ok(agent_id) = AgentId::try_new(query.agent_id) else {
        return Json(json!({ "success": false, "message": "unknown agent" })).into_response();
    };
    match state
        .network
        .agent_queues()
        .poll(&agent_id, query.max, query.wait_ms)
        .await
    {
        Ok(events) => Json(json!({ "success": true, "messages": events })).into_response(),
        Err(_) => Json(json!({ "success": false, "message": "unknown agent" })).into_response(),
    }
}

async fn health() -> StatusCode {
    StatusCode::OK
}
