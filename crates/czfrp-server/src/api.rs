//! Management REST API: a thin CRUD layer over the registry.
//!
//! Every route sits behind an `X-API-Key` check. Registry failures map to
//! HTTP statuses: `NotFound` → 404, `Conflict` → 409; everything else is a
//! 500 with the error message.

use crate::registry::{Registry, TunnelSnapshot};
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use czfrp_core::FrpError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Shared state threaded through the router.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<Registry>,
    pub api_secret_key: Arc<String>,
}

/// Serve the management API on an already-bound listener.
pub async fn serve(listener: TcpListener, state: ApiState) -> io::Result<()> {
    axum::serve(listener, router(state)).await
}

/// Build the API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/tunnels", post(create_tunnel))
        .route(
            "/tunnels/:tunnel_id",
            get(get_tunnel).delete(delete_tunnel),
        )
        .route("/tunnels/:tunnel_id/domain", put(map_domain))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .with_state(state)
}

async fn require_api_key(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());
    if presented != Some(state.api_secret_key.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid API Key" })),
        )
            .into_response();
    }
    next.run(request).await
}

#[derive(Debug, Deserialize)]
struct CreateTunnelRequest {
    user_id: String,
    local_port: u16,
}

#[derive(Debug, Serialize)]
struct MapDomainResponse {
    message: &'static str,
    domain: String,
}

async fn create_tunnel(
    State(state): State<ApiState>,
    Json(body): Json<CreateTunnelRequest>,
) -> Json<TunnelSnapshot> {
    let snapshot = state
        .registry
        .register_tunnel(&body.user_id, body.local_port)
        .await;
    Json(snapshot)
}

async fn get_tunnel(
    State(state): State<ApiState>,
    Path(tunnel_id): Path<String>,
) -> Result<Json<TunnelSnapshot>, ApiError> {
    let snapshot = state.registry.get_tunnel(&tunnel_id).await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
struct MapDomainRequest {
    subdomain: String,
}

async fn map_domain(
    State(state): State<ApiState>,
    Path(tunnel_id): Path<String>,
    Json(body): Json<MapDomainRequest>,
) -> Result<Json<MapDomainResponse>, ApiError> {
    let domain = state
        .registry
        .map_domain(&tunnel_id, &body.subdomain)
        .await?;
    Ok(Json(MapDomainResponse {
        message: "Domain mapped successfully",
        domain,
    }))
}

async fn delete_tunnel(
    State(state): State<ApiState>,
    Path(tunnel_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete_tunnel(&tunnel_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Registry error wrapper giving each failure mode an HTTP status.
struct ApiError(FrpError);

impl From<FrpError> for ApiError {
    fn from(error: FrpError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FrpError::NotFound(_) => StatusCode::NOT_FOUND,
            FrpError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
