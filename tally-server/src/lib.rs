//! HTTP front end for the Tally entity engine.
//!
//! One route per engine operation; every request carries its parameters as
//! flat key-value pairs (query string for reads, form body for writes), so
//! the engine sees the same shape regardless of transport. Authentication is
//! a bearer-token table resolved here and handed to the engine as a
//! [`Principal`].

use axum::{
    Form, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tally_engine::{Capability, Engine, Principal};
use tally_types::ApiError;

/// Everything a request handler needs.
pub struct AppState {
    pub engine: Engine,
    pub auth: AuthTable,
}

/// Bearer-token table mapping tokens to principals. Requests without a
/// recognized token run as the anonymous principal.
#[derive(Debug, Default)]
pub struct AuthTable {
    tokens: HashMap<String, Principal>,
}

#[derive(Deserialize)]
struct AuthEntry {
    username: String,
    #[serde(default)]
    superuser: bool,
    #[serde(default)]
    permissions: Vec<String>,
}

impl AuthTable {
    /// Loads a table from its JSON form: a map of token to
    /// `{username, superuser, permissions}`.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let entries: HashMap<String, AuthEntry> = serde_json::from_str(raw)?;
        let mut table = Self::default();
        for (token, entry) in entries {
            let principal = if entry.superuser {
                Principal::superuser(&entry.username)
            } else {
                let mut caps = Vec::with_capacity(entry.permissions.len());
                for name in &entry.permissions {
                    let cap = Capability::parse(name).ok_or_else(|| {
                        anyhow::anyhow!("unknown permission \"{name}\" for user {}", entry.username)
                    })?;
                    caps.push(cap);
                }
                Principal::named(&entry.username, caps)
            };
            table.insert(token, principal);
        }
        Ok(table)
    }

    pub fn insert(&mut self, token: impl Into<String>, principal: Principal) {
        self.tokens.insert(token.into(), principal);
    }

    fn resolve(&self, headers: &HeaderMap) -> Principal {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .and_then(|token| self.tokens.get(token))
            .cloned()
            .unwrap_or_else(Principal::anonymous)
    }
}

fn error_response(err: ApiError) -> Response {
    let status = match &err {
        ApiError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    let body = json!({
        "error": err.category(),
        "exception": err.to_string(),
    });
    (status, Json(body)).into_response()
}

/// Runs an engine call on the blocking pool; the engine does synchronous
/// SQLite work under a mutex and must not stall a runtime worker.
async fn respond<T, F>(f: F) -> Response
where
    T: serde::Serialize + Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Json(value).into_response(),
        Ok(Err(err)) => error_response(err),
        Err(err) => error_response(ApiError::Internal(format!("worker task failed: {err}"))),
    }
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let principal = state.auth.resolve(&headers);
    respond(move || state.engine.search(&principal, params)).await
}

async fn add_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(params): Form<Vec<(String, String)>>,
) -> Response {
    let principal = state.auth.resolve(&headers);
    respond(move || state.engine.add(&principal, params)).await
}

async fn edit_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(params): Form<Vec<(String, String)>>,
) -> Response {
    let principal = state.auth.resolve(&headers);
    respond(move || state.engine.edit(&principal, params)).await
}

async fn delete_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(params): Form<Vec<(String, String)>>,
) -> Response {
    let principal = state.auth.resolve(&headers);
    respond(move || state.engine.delete(&principal, params)).await
}

async fn reorder_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(params): Form<Vec<(String, String)>>,
) -> Response {
    let principal = state.auth.resolve(&headers);
    respond(move || state.engine.reorder(&principal, params)).await
}

async fn me_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let principal = state.auth.resolve(&headers);
    respond(move || state.engine.me(&principal)).await
}

/// Build the HTTP API router with the given application state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/search", get(search_handler))
        .route("/api/v1/add", post(add_handler))
        .route("/api/v1/edit", post(edit_handler))
        .route("/api/v1/delete", post(delete_handler))
        .route("/api/v1/reorder", post(reorder_handler))
        .route("/api/v1/me", get(me_handler))
        .with_state(state)
}
