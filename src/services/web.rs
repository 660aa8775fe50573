//! Axum-based HTTP API for the hub.
//!
//! Provides:
//! - GET `/api/rotators` - every rotator, keyed by name
//! - GET `/api/rotator/:name` - one rotator
//! - GET/PUT `/api/rotator/:name/azimuth` - read or set azimuth
//! - GET/PUT `/api/rotator/:name/elevation` - read or set elevation
//! - any `/api/rotator/:name/stop`, `/stop_azimuth`, `/stop_elevation`
//! - GET `/ws` - WebSocket event stream
//!
//! Every `/api/...` route is also served under `/api/v1.0/...`. Errors are
//! plain-text bodies.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::config::HttpConfig;
use crate::error::{Error, Result};
use crate::messages::{
    AzimuthGet, AzimuthPut, ElevationGet, ElevationPut, RotatorObject, RotatorObjects,
};
use crate::traits::Rotator;

use super::hub::Hub;
use super::ws::ws_handler;

// ============================================================================
// Errors
// ============================================================================

/// A plain-text error response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log::debug!("http {}: {}", self.status, self.message);
        (self.status, self.message).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn find(hub: &Hub, name: &str) -> ApiResult<Arc<dyn Rotator>> {
    hub.rotator(name)
        .ok_or_else(|| ApiError::internal("unable to find rotator"))
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|_| ApiError::bad_request("invalid json"))
}

// ============================================================================
// Route Handlers
// ============================================================================

/// GET /api/rotators
async fn get_rotators(State(hub): State<Arc<Hub>>) -> Json<RotatorObjects> {
    let objects = hub
        .rotators()
        .iter()
        .map(|r| (r.name().to_string(), r.serialize()))
        .collect();
    Json(objects)
}

/// GET /api/rotator/:name
async fn get_rotator(
    State(hub): State<Arc<Hub>>,
    Path(name): Path<String>,
) -> ApiResult<Json<RotatorObject>> {
    Ok(Json(find(&hub, &name)?.serialize()))
}

/// GET /api/rotator/:name/azimuth
async fn get_azimuth(
    State(hub): State<Arc<Hub>>,
    Path(name): Path<String>,
) -> ApiResult<Json<AzimuthGet>> {
    let r = find(&hub, &name)?;
    Ok(Json(AzimuthGet {
        has_azimuth: r.has_azimuth(),
        azimuth: r.azimuth(),
        preset: r.az_preset(),
    }))
}

/// PUT /api/rotator/:name/azimuth
///
/// Accepts JSON: `{"azimuth": 120}`
async fn put_azimuth(
    State(hub): State<Arc<Hub>>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let r = find(&hub, &name)?;
    let put: AzimuthPut = parse_body(&body)?;
    let azimuth = put.azimuth.ok_or_else(|| ApiError::bad_request("invalid request"))?;

    if !r.has_azimuth() {
        return Err(ApiError::internal(Error::Unsupported("azimuth").to_string()));
    }
    r.set_azimuth(azimuth)
        .await
        .map_err(|e| ApiError::internal(format!("unable to set azimuth to {azimuth}: {e}")))?;
    Ok(StatusCode::OK)
}

/// GET /api/rotator/:name/elevation
async fn get_elevation(
    State(hub): State<Arc<Hub>>,
    Path(name): Path<String>,
) -> ApiResult<Json<ElevationGet>> {
    let r = find(&hub, &name)?;
    Ok(Json(ElevationGet {
        has_elevation: r.has_elevation(),
        elevation: r.elevation(),
        preset: r.el_preset(),
    }))
}

/// PUT /api/rotator/:name/elevation
///
/// Accepts JSON: `{"elevation": 45}`
async fn put_elevation(
    State(hub): State<Arc<Hub>>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let r = find(&hub, &name)?;
    let put: ElevationPut = parse_body(&body)?;
    let elevation = put.elevation.ok_or_else(|| ApiError::bad_request("invalid request"))?;

    if !r.has_elevation() {
        return Err(ApiError::internal(Error::Unsupported("elevation").to_string()));
    }
    r.set_elevation(elevation)
        .await
        .map_err(|e| ApiError::internal(format!("unable to set elevation to {elevation}: {e}")))?;
    Ok(StatusCode::OK)
}

/// Which stop endpoint was hit.
#[derive(Clone, Copy)]
enum Stop {
    All,
    Azimuth,
    Elevation,
}

async fn stop(hub: &Hub, name: &str, which: Stop) -> ApiResult<StatusCode> {
    let r = find(hub, name)?;
    match which {
        Stop::Azimuth if !r.has_azimuth() => {
            return Err(ApiError::internal(Error::Unsupported("azimuth").to_string()));
        }
        Stop::Elevation if !r.has_elevation() => {
            return Err(ApiError::internal(Error::Unsupported("elevation").to_string()));
        }
        _ => {}
    }

    let res = match which {
        Stop::All => r.stop().await,
        Stop::Azimuth => r.stop_azimuth().await,
        Stop::Elevation => r.stop_elevation().await,
    };
    res.map_err(|e| ApiError::internal(format!("unable to stop rotator: {e}")))?;
    Ok(StatusCode::OK)
}

/// /api/rotator/:name/stop
async fn stop_all(State(hub): State<Arc<Hub>>, Path(name): Path<String>) -> ApiResult<StatusCode> {
    stop(&hub, &name, Stop::All).await
}

/// /api/rotator/:name/stop_azimuth
async fn stop_azimuth(
    State(hub): State<Arc<Hub>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    stop(&hub, &name, Stop::Azimuth).await
}

/// /api/rotator/:name/stop_elevation
async fn stop_elevation(
    State(hub): State<Arc<Hub>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    stop(&hub, &name, Stop::Elevation).await
}

/// Fallback handler for 404
async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

// ============================================================================
// Server Builder
// ============================================================================

fn api_routes() -> Router<Arc<Hub>> {
    Router::new()
        .route("/rotators", get(get_rotators))
        .route("/rotator/:name", get(get_rotator))
        .route("/rotator/:name/azimuth", get(get_azimuth).put(put_azimuth))
        .route("/rotator/:name/elevation", get(get_elevation).put(put_elevation))
        .route("/rotator/:name/stop", any(stop_all))
        .route("/rotator/:name/stop_azimuth", any(stop_azimuth))
        .route("/rotator/:name/stop_elevation", any(stop_elevation))
}

/// Build the Axum router with all routes
pub fn build_router(hub: Arc<Hub>, config: &HttpConfig) -> Router {
    let mut router = Router::new()
        .nest("/api", api_routes())
        .nest("/api/v1.0", api_routes())
        .route("/ws", get(ws_handler))
        .fallback(not_found)
        .with_state(hub);

    if config.cors_permissive {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

/// Serve the API on an already bound listener.
pub async fn serve_http(hub: Arc<Hub>, listener: TcpListener, config: &HttpConfig) -> Result<()> {
    let router = build_router(hub, config);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Bind `config`'s address and serve until the server fails.
pub async fn run_http_server(hub: Arc<Hub>, config: &HttpConfig) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    log::info!("HTTP API on http://{}", listener.local_addr()?);
    serve_http(hub, listener, config).await
}
