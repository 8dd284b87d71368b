//! HTTP glue
//!
//! Thin axum layer that forwards requests into the gateway event loop
//! and renders the loop's responses. No gateway state lives here.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use rules_engine::error::{code, error_map};

use crate::service::ApiCommand;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub api_tx: mpsc::Sender<ApiCommand>,
    pub name: String,
    pub uuid: String,
}

/// Build the REST router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/config", get(config_info))
        .route("/api/:apikey/rules", get(get_rules).post(post_rules))
        .route(
            "/api/:apikey/rules/:id",
            get(get_rule).put(put_rule).delete(delete_rule),
        )
        .route("/api/:apikey/groups/:id/action", put(put_group_action))
        .route("/api/:apikey/lights/:id/state", put(put_light_state))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

async fn dispatch(
    state: &AppState,
    apikey: String,
    method: &str,
    path: Vec<String>,
    body: Value,
) -> (StatusCode, Json<Value>) {
    let (reply, rx) = oneshot::channel();
    let cmd = ApiCommand {
        apikey,
        method: method.to_string(),
        path,
        body,
        reply,
    };

    if state.api_tx.send(cmd).await.is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!([error_map(code::RESOURCE_NOT_AVAILABLE, "/", "gateway not running")])),
        );
    }

    match rx.await {
        Ok(rsp) => (
            StatusCode::from_u16(rsp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(rsp.body),
        ),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!([error_map(code::RESOURCE_NOT_AVAILABLE, "/", "gateway not running")])),
        ),
    }
}

/// Parse a request body, mapping malformed JSON to the standard error.
fn parse_body(raw: &str) -> Result<Value, (StatusCode, Json<Value>)> {
    if raw.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(raw).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!([error_map(code::INVALID_JSON, "/rules", "body contains invalid JSON")])),
        )
    })
}

async fn config_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "name": state.name,
        "uuid": state.uuid,
        "apiversion": env!("CARGO_PKG_VERSION"),
    }))
}

async fn get_rules(
    State(state): State<AppState>,
    Path(apikey): Path<String>,
) -> impl IntoResponse {
    dispatch(&state, apikey, "GET", vec!["rules".to_string()], Value::Null).await
}

async fn post_rules(
    State(state): State<AppState>,
    Path(apikey): Path<String>,
    raw: String,
) -> impl IntoResponse {
    let body = match parse_body(&raw) {
        Ok(body) => body,
        Err(err) => return err,
    };
    dispatch(&state, apikey, "POST", vec!["rules".to_string()], body).await
}

async fn get_rule(
    State(state): State<AppState>,
    Path((apikey, id)): Path<(String, String)>,
) -> impl IntoResponse {
    dispatch(&state, apikey, "GET", vec!["rules".to_string(), id], Value::Null).await
}

async fn put_rule(
    State(state): State<AppState>,
    Path((apikey, id)): Path<(String, String)>,
    raw: String,
) -> impl IntoResponse {
    let body = match parse_body(&raw) {
        Ok(body) => body,
        Err(err) => return err,
    };
    dispatch(&state, apikey, "PUT", vec!["rules".to_string(), id], body).await
}

async fn delete_rule(
    State(state): State<AppState>,
    Path((apikey, id)): Path<(String, String)>,
) -> impl IntoResponse {
    dispatch(&state, apikey, "DELETE", vec!["rules".to_string(), id], Value::Null).await
}

async fn put_group_action(
    State(state): State<AppState>,
    Path((apikey, id)): Path<(String, String)>,
    raw: String,
) -> impl IntoResponse {
    let body = match parse_body(&raw) {
        Ok(body) => body,
        Err(err) => return err,
    };
    dispatch(
        &state,
        apikey,
        "PUT",
        vec!["groups".to_string(), id, "action".to_string()],
        body,
    )
    .await
}

async fn put_light_state(
    State(state): State<AppState>,
    Path((apikey, id)): Path<(String, String)>,
    raw: String,
) -> impl IntoResponse {
    let body = match parse_body(&raw) {
        Ok(body) => body,
        Err(err) => return err,
    };
    dispatch(
        &state,
        apikey,
        "PUT",
        vec!["lights".to_string(), id, "state".to_string()],
        body,
    )
    .await
}
