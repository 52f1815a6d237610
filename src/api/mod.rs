//! Thin HTTP surface over the identity service.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::blob::BlobStorage;
use crate::config::{ApiConfig, SecurityConfig};
use crate::identity::{IdentityService, SharedStore};

pub use error::ApiError;
pub use response::{ApiResponse, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub identity: Arc<IdentityService>,
    pub blobs: Arc<dyn BlobStorage>,
    pub jwt_secret: Arc<str>,
    pub audit_logging: bool,
}

impl AppState {
    pub fn new(
        store: SharedStore,
        identity: Arc<IdentityService>,
        blobs: Arc<dyn BlobStorage>,
        security: &SecurityConfig,
    ) -> Self {
        Self {
            store,
            identity,
            blobs,
            jwt_secret: Arc::from(security.jwt_secret.as_str()),
            audit_logging: security.enable_audit_logging,
        }
    }
}

pub fn router(state: AppState, api: &ApiConfig, security: &SecurityConfig) -> Router {
    let protected = Router::new()
        .route("/api/tenants", post(handlers::tenant_create))
        .route(
            "/api/tenants/:id",
            get(handlers::tenant_get)
                .patch(handlers::tenant_update)
                .delete(handlers::tenant_deactivate),
        )
        .route("/api/tenants/:id/purge", axum::routing::delete(handlers::tenant_purge))
        .route("/api/tenants/:id/resources", post(handlers::resource_create))
        .route(
            "/api/resources/:id",
            get(handlers::resource_get).delete(handlers::resource_delete),
        )
        .route(
            "/api/resources/:id/images",
            post(handlers::image_attach).delete(handlers::image_detach),
        )
        .route("/api/resources/:id/images/:name", put(handlers::image_upload))
        .route_layer(from_fn_with_state(state.clone(), middleware::jwt_auth_middleware));

    let mut app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .layer(DefaultBodyLimit::max(api.max_request_size_bytes));

    if security.enable_cors {
        app = app.layer(cors_layer(&security.cors_origins));
    }
    if api.enable_request_logging {
        app = app.layer(TraceLayer::new_for_http());
    }
    app.with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") || origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {}", o);
                None
            }
        })
        .collect();
    CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
}
