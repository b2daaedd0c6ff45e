//! HTTP Router
//!
//! The versioned API surface. The same router serves the TCP listener and
//! every plugin callback socket, so plugins call back into the host with the
//! same token-authenticated protocol as everyone else.

use axum::extract::{Path, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crucible_models::{BootEnv, Lease, Machine, Subnet};

use crate::plugin::{LaunchSpec, PluginCall, PluginError, PluginReply, PluginStatus};

use super::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/machines", get(list_machines).post(create_machine))
        .route("/machines/{uuid}", get(get_machine).delete(delete_machine))
        .route("/bootenvs", get(list_bootenvs).post(create_bootenv))
        .route("/bootenvs/{name}", get(get_bootenv).delete(delete_bootenv))
        .route("/subnets", get(list_subnets).post(create_subnet))
        .route("/subnets/{name}", get(get_subnet).delete(delete_subnet))
        .route("/leases", get(list_leases).post(create_lease))
        .route("/leases/{key}", get(get_lease).delete(delete_lease))
        .route("/plugins", get(list_plugins).post(load_plugin))
        .route("/plugins/{name}", delete(unload_plugin))
        .route("/plugins/{name}/call", post(call_plugin))
        .layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        // Health check for monitoring/load balancers; deliberately open
        .route("/healthz", get(health))
        .nest("/api/v1", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────────────────

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Middleware verifying the bearer token on every API request.
async fn require_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    match bearer_token(&req) {
        Some(token) if state.tokens().verify(token) => Ok(next.run(req).await),
        Some(_) => {
            tracing::warn!("invalid bearer token presented");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn validation_error(message: String) -> ApiError {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ErrorBody { error: message }),
    )
}

fn plugin_error(error: PluginError) -> ApiError {
    let status = match &error {
        PluginError::NotFound(_) => StatusCode::NOT_FOUND,
        PluginError::AlreadyLoaded(_) | PluginError::AdmissionRejected(_) => StatusCode::CONFLICT,
        PluginError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    plugins: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        plugins: state.registry().len(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Machines
// ─────────────────────────────────────────────────────────────────────────────

async fn list_machines(State(state): State<AppState>) -> Json<Vec<Machine>> {
    Json(state.store().machines.list())
}

async fn create_machine(
    State(state): State<AppState>,
    Json(machine): Json<Machine>,
) -> Result<(StatusCode, Json<Machine>), ApiError> {
    machine.validate().map_err(validation_error)?;
    state.store().machines.insert(machine.clone());
    Ok((StatusCode::CREATED, Json(machine)))
}

async fn get_machine(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<Machine>, StatusCode> {
    state
        .store()
        .machines
        .get(&uuid)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn delete_machine(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> StatusCode {
    match state.store().machines.remove(&uuid) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Boot Environments
// ─────────────────────────────────────────────────────────────────────────────

async fn list_bootenvs(State(state): State<AppState>) -> Json<Vec<BootEnv>> {
    Json(state.store().bootenvs.list())
}

async fn create_bootenv(
    State(state): State<AppState>,
    Json(bootenv): Json<BootEnv>,
) -> Result<(StatusCode, Json<BootEnv>), ApiError> {
    bootenv.validate().map_err(validation_error)?;
    state.store().bootenvs.insert(bootenv.clone());
    Ok((StatusCode::CREATED, Json(bootenv)))
}

async fn get_bootenv(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<BootEnv>, StatusCode> {
    state
        .store()
        .bootenvs
        .get(&name)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn delete_bootenv(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> StatusCode {
    match state.store().bootenvs.remove(&name) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subnets
// ─────────────────────────────────────────────────────────────────────────────

async fn list_subnets(State(state): State<AppState>) -> Json<Vec<Subnet>> {
    Json(state.store().subnets.list())
}

async fn create_subnet(
    State(state): State<AppState>,
    Json(subnet): Json<Subnet>,
) -> Result<(StatusCode, Json<Subnet>), ApiError> {
    subnet.validate().map_err(validation_error)?;
    state.store().subnets.insert(subnet.clone());
    Ok((StatusCode::CREATED, Json(subnet)))
}

async fn get_subnet(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Subnet>, StatusCode> {
    state
        .store()
        .subnets
        .get(&name)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn delete_subnet(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> StatusCode {
    match state.store().subnets.remove(&name) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Leases
// ─────────────────────────────────────────────────────────────────────────────

async fn list_leases(State(state): State<AppState>) -> Json<Vec<Lease>> {
    Json(state.store().leases.list())
}

async fn create_lease(
    State(state): State<AppState>,
    Json(lease): Json<Lease>,
) -> (StatusCode, Json<Lease>) {
    state.store().leases.insert(lease.clone());
    (StatusCode::CREATED, Json(lease))
}

async fn get_lease(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Lease>, StatusCode> {
    state
        .store()
        .leases
        .get(&key)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn delete_lease(State(state): State<AppState>, Path(key): Path<String>) -> StatusCode {
    match state.store().leases.remove(&key) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugins
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoadPluginRequest {
    name: String,
    executable: std::path::PathBuf,
    #[serde(default = "empty_params")]
    params: serde_json::Value,
}

fn empty_params() -> serde_json::Value {
    serde_json::json!({})
}

async fn list_plugins(State(state): State<AppState>) -> Json<Vec<PluginStatus>> {
    Json(state.registry().list())
}

async fn load_plugin(
    State(state): State<AppState>,
    Json(req): Json<LoadPluginRequest>,
) -> Result<StatusCode, ApiError> {
    let spec = LaunchSpec::new(req.name, req.executable).with_params(req.params);
    state.registry().load(spec).await.map_err(plugin_error)?;
    Ok(StatusCode::CREATED)
}

async fn unload_plugin(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry().unload(&name).await.map_err(plugin_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn call_plugin(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(call): Json<PluginCall>,
) -> Result<Json<PluginReply>, ApiError> {
    state
        .registry()
        .call(&name, &call)
        .await
        .map(Json)
        .map_err(plugin_error)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::plugin::{PluginRegistry, RegistrySettings};
    use crate::server::store::Store;
    use crate::token::RandomTokenIssuer;

    use super::*;

    fn test_router() -> Router {
        let tokens = Arc::new(RandomTokenIssuer::new(Some("secret".to_string())));
        let registry = Arc::new(PluginRegistry::new(
            RegistrySettings {
                comm_dir: std::env::temp_dir(),
                api_url: "http://127.0.0.1:9610".to_string(),
                fileserver_url: "http://127.0.0.1:9611/".to_string(),
                load_timeout: Duration::from_secs(5),
            },
            tokens.clone(),
        ));
        create_router(AppState::new(registry, Store::new(), tokens))
    }

    fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
        req.header(header::AUTHORIZATION, "Bearer secret")
    }

    #[tokio::test]
    async fn test_health_is_open() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_requires_bearer_token() {
        let router = test_router();

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/machines")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/machines")
                    .header(header::AUTHORIZATION, "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .oneshot(
                authed(Request::builder().uri("/api/v1/machines"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_machine_crud_round_trip() {
        let router = test_router();
        let machine = Machine::new("node-01", "sledgehammer");
        let uuid = machine.uuid.to_string();

        let response = router
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method("POST")
                        .uri("/api/v1/machines")
                        .header(header::CONTENT_TYPE, "application/json"),
                )
                .body(Body::from(serde_json::to_vec(&machine).unwrap()))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = router
            .clone()
            .oneshot(
                authed(Request::builder().uri(format!("/api/v1/machines/{uuid}")))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let fetched: Machine = serde_json::from_slice(&body).unwrap();
        assert_eq!(fetched.name, "node-01");

        let response = router
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method("DELETE")
                        .uri(format!("/api/v1/machines/{uuid}")),
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = router
            .oneshot(
                authed(Request::builder().uri(format!("/api/v1/machines/{uuid}")))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_machine_is_rejected() {
        let router = test_router();
        let machine = Machine::new("bad name", "sledgehammer");

        let response = router
            .oneshot(
                authed(
                    Request::builder()
                        .method("POST")
                        .uri("/api/v1/machines")
                        .header(header::CONTENT_TYPE, "application/json"),
                )
                .body(Body::from(serde_json::to_vec(&machine).unwrap()))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_call_unknown_plugin_is_not_found() {
        let router = test_router();
        let call = PluginCall::post("/echo", serde_json::json!({}));

        let response = router
            .oneshot(
                authed(
                    Request::builder()
                        .method("POST")
                        .uri("/api/v1/plugins/ghost/call")
                        .header(header::CONTENT_TYPE, "application/json"),
                )
                .body(Body::from(serde_json::to_vec(&call).unwrap()))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
