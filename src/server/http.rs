//! HTTP surface of the sync server: router, bearer-auth middleware, and the
//! handlers that put the identity manager and merge coordinator on the wire.
//!
//! Every endpoint answers the [`ApiResponse`] envelope. Auth routes that need
//! the raw token (refresh, logout) sit outside the middleware and read the
//! `Authorization` header themselves; data routes go through the middleware,
//! which resolves the token and stashes a [`SessionContext`] in the request
//! extensions.

use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use super::error::{AuthError, MergeError};
use super::identity::{IdentityManager, SessionContext};
use super::merge::MergeCoordinator;
use crate::models::Device;
use crate::protocol::{
    ApiResponse, DeviceBindData, DeviceBindRequest, DeviceInitData, DeviceInitRequest,
    FullSyncData, IncrementalSyncData, IncrementalSyncRequest, RefreshData,
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub identity: IdentityManager,
    pub merge: MergeCoordinator,
}

impl AppState {
    pub fn new(identity: IdentityManager, merge: MergeCoordinator) -> Self {
        Self { identity, merge }
    }
}

/// An error response: HTTP status plus the failure envelope.
#[derive(Debug)]
pub struct ApiFailure {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::error(self.message))).into_response()
    }
}

impl From<AuthError> for ApiFailure {
    fn from(err: AuthError) -> Self {
        let status = match &err {
            AuthError::InvalidUserUuid(_)
            | AuthError::InvalidDeviceUuid(_)
            | AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::DeviceOwnershipConflict { .. } => StatusCode::CONFLICT,
            AuthError::TokenExpired | AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &err {
            AuthError::Storage(inner) => {
                tracing::error!(error = %inner, "storage failure in auth path");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        Self { status, message }
    }
}

impl From<MergeError> for ApiFailure {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::Validation(message) => Self {
                status: StatusCode::BAD_REQUEST,
                message,
            },
            MergeError::Storage(inner) => {
                tracing::error!(error = %inner, "storage failure in sync path");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "Internal server error".to_string(),
                }
            }
        }
    }
}

/// Token from an `Authorization: Bearer …` header, if present.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Resolves the bearer token and stores the session context in the request
/// extensions for the protected routes.
async fn auth_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let token = match bearer_token(request.headers()) {
        Some(token) => token.to_string(),
        None => return ApiFailure::from(AuthError::Unauthenticated).into_response(),
    };

    match state.identity.validate_token(&token).await {
        Ok(session) => {
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        Err(err) => ApiFailure::from(err).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn device_init(
    State(state): State<AppState>,
    Json(req): Json<DeviceInitRequest>,
) -> Result<Json<ApiResponse<DeviceInitData>>, ApiFailure> {
    let data = state.identity.initialize_device(&req).await?;
    Ok(Json(ApiResponse::ok(data)))
}

async fn device_bind(
    State(state): State<AppState>,
    Json(req): Json<DeviceBindRequest>,
) -> Result<Json<ApiResponse<DeviceBindData>>, ApiFailure> {
    let data = state.identity.bind_device(&req).await?;
    Ok(Json(ApiResponse::ok(data)))
}

async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<RefreshData>>, ApiFailure> {
    let token = bearer_token(&headers).ok_or(AuthError::Unauthenticated)?;
    let data = state.identity.refresh_token(token).await?;
    Ok(Json(ApiResponse::ok(data)))
}

/// Revoking an already-dead token still answers success, so this handler sits
/// outside the auth middleware and reads the header itself.
async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiFailure> {
    if let Some(token) = bearer_token(&headers) {
        state.identity.logout(token).await?;
    }
    Ok(Json(ApiResponse::ok(serde_json::json!({}))))
}

async fn full_sync(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> Result<Json<ApiResponse<FullSyncData>>, ApiFailure> {
    let data = state.merge.full_state(&session).await?;
    Ok(Json(ApiResponse::ok(data)))
}

async fn incremental_sync(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<IncrementalSyncRequest>,
) -> Result<Json<ApiResponse<IncrementalSyncData>>, ApiFailure> {
    let data = state.merge.incremental(&session, &req).await?;
    Ok(Json(ApiResponse::ok(data)))
}

async fn list_devices(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> Result<Json<ApiResponse<Vec<Device>>>, ApiFailure> {
    let devices = state.identity.list_devices(&session.user_uuid).await?;
    Ok(Json(ApiResponse::ok(devices)))
}

async fn remove_device(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(device_uuid): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiFailure> {
    state
        .identity
        .remove_device(&session.user_uuid, &device_uuid)
        .await?;
    Ok(Json(ApiResponse::ok(serde_json::json!({}))))
}

async fn revoke_sessions(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiFailure> {
    let revoked = state.identity.revoke_all_sessions(&session.user_uuid).await?;
    Ok(Json(ApiResponse::ok(serde_json::json!({ "revoked": revoked }))))
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/api/auth/device-init", post(device_init))
        .route("/api/auth/device-bind", post(device_bind))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/logout", post(logout));

    let protected_routes = Router::new()
        .route("/api/sync/full", get(full_sync))
        .route("/api/sync/incremental", post(incremental_sync))
        .route("/api/user/devices", get(list_devices))
        .route("/api/user/devices/{device_uuid}", delete(remove_device))
        .route("/api/user/sessions", delete(revoke_sessions))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&headers_with("Bearer abc123")), Some("abc123"));
        assert_eq!(bearer_token(&headers_with("Basic abc123")), None);
        assert_eq!(bearer_token(&headers_with("bearer abc123")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_auth_error_status_mapping() {
        let cases = [
            (
                ApiFailure::from(AuthError::Unauthenticated),
                StatusCode::UNAUTHORIZED,
            ),
            (
                ApiFailure::from(AuthError::TokenExpired),
                StatusCode::UNAUTHORIZED,
            ),
            (
                ApiFailure::from(AuthError::InvalidUserUuid("x".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiFailure::from(AuthError::Validation("empty name".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiFailure::from(AuthError::DeviceOwnershipConflict {
                    device_uuid: "d".into(),
                    owner_uuid: "u".into(),
                }),
                StatusCode::CONFLICT,
            ),
        ];
        for (failure, expected) in cases {
            assert_eq!(failure.status, expected);
        }
    }

    #[test]
    fn test_expired_and_revoked_tokens_stay_distinguishable() {
        // Clients pick their recovery path from the message, so the two 401
        // variants must not collapse into one string.
        let expired = ApiFailure::from(AuthError::TokenExpired);
        let revoked = ApiFailure::from(AuthError::Unauthenticated);
        assert!(expired.message.contains("expired"));
        assert!(!revoked.message.contains("expired"));
    }

    #[test]
    fn test_merge_error_status_mapping() {
        let failure = ApiFailure::from(MergeError::Validation("bad flag".into()));
        assert_eq!(failure.status, StatusCode::BAD_REQUEST);
        assert_eq!(failure.message, "bad flag");

        let failure = ApiFailure::from(MergeError::Storage(sqlx::Error::RowNotFound));
        assert_eq!(failure.status, StatusCode::INTERNAL_SERVER_ERROR);
        // Storage detail stays in the log.
        assert_eq!(failure.message, "Internal server error");
    }

    #[tokio::test]
    async fn test_health_handler() {
        let Json(resp) = health().await;
        assert_eq!(resp.status, "ok");
        assert!(!resp.version.is_empty());
    }
}
