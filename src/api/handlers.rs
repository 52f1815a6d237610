use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::api::error::ApiError;
use crate::api::response::{ApiResponse, ApiResult};
use crate::api::AppState;
use crate::auth::AuthPrincipal;
use crate::identity::{Applied, NewResource, NewTenant};

#[derive(Debug, Deserialize)]
pub struct ImageBody {
    pub url: String,
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidJson(rejection.body_text())
    }
}

fn applied_json(url: &str, applied: &Applied) -> Value {
    json!({ "url": url, "changed": !matches!(applied, Applied::Unchanged) })
}

impl AppState {
    fn audit(&self, principal: &AuthPrincipal, action: &str, subject: &str) {
        if self.audit_logging {
            tracing::info!(target: "audit", principal = %principal.principal_id, action, subject, "audit");
        }
    }
}

/// GET /health - store liveness
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "success": true, "data": { "status": "ok", "timestamp": now, "store": "ok" } })),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "success": false, "data": { "status": "degraded", "timestamp": now, "store": "unavailable" } })),
            )
        }
    }
}

/// POST /api/tenants - create the caller's tenant
pub async fn tenant_create(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
    payload: Result<Json<NewTenant>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(input) = payload?;
    let tenant = state.identity.create_tenant(&principal.actor(), input).await?;
    state.audit(&principal, "tenant.create", tenant.str_field("slug").unwrap_or_default());
    Ok(ApiResponse::created(tenant.to_json()))
}

/// GET /api/tenants/:id - by id, slug or name
pub async fn tenant_get(State(state): State<AppState>, Path(raw): Path<String>) -> ApiResult<Value> {
    let tenant = ApiError::from_outcome(state.identity.get_tenant(&raw).await?, "Tenant")?;
    Ok(ApiResponse::success(tenant.to_json()))
}

/// PATCH /api/tenants/:id - replace writable fields
pub async fn tenant_update(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
    Path(raw): Path<String>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(fields) = payload?;
    let outcome = state.identity.update_tenant(&principal.actor(), &raw, fields).await?;
    let tenant = ApiError::from_outcome(outcome, "Tenant")?;
    state.audit(&principal, "tenant.update", &raw);
    Ok(ApiResponse::success(tenant.to_json()))
}

/// DELETE /api/tenants/:id - soft delete
pub async fn tenant_deactivate(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
    Path(raw): Path<String>,
) -> ApiResult<Value> {
    let outcome = state.identity.deactivate_tenant(&principal.actor(), &raw).await?;
    let tenant = ApiError::from_outcome(outcome, "Tenant")?;
    state.audit(&principal, "tenant.deactivate", &raw);
    Ok(ApiResponse::success(tenant.to_json()))
}

/// DELETE /api/tenants/:id/purge - hard delete with resources (admin)
pub async fn tenant_purge(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
    Path(raw): Path<String>,
) -> ApiResult<Value> {
    let outcome = state.identity.purge_tenant(&principal.actor(), &raw).await?;
    let report = ApiError::from_outcome(outcome, "Tenant")?;
    state.audit(&principal, "tenant.purge", &raw);
    Ok(ApiResponse::success(json!(report)))
}

/// POST /api/tenants/:id/resources
pub async fn resource_create(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
    Path(tenant_raw): Path<String>,
    payload: Result<Json<NewResource>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(input) = payload?;
    let outcome = state.identity.create_resource(&principal.actor(), &tenant_raw, input).await?;
    let resource = ApiError::from_outcome(outcome, "Tenant")?;
    state.audit(&principal, "resource.create", &tenant_raw);
    Ok(ApiResponse::created(resource.to_json()))
}

/// GET /api/resources/:id - by id or sku
pub async fn resource_get(State(state): State<AppState>, Path(raw): Path<String>) -> ApiResult<Value> {
    let resource = ApiError::from_outcome(state.identity.get_resource(&raw).await?, "Resource")?;
    Ok(ApiResponse::success(resource.to_json()))
}

/// DELETE /api/resources/:id
pub async fn resource_delete(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
    Path(raw): Path<String>,
) -> ApiResult<Value> {
    let outcome = state.identity.delete_resource(&principal.actor(), &raw).await?;
    let deleted = ApiError::from_outcome(outcome, "Resource")?;
    state.audit(&principal, "resource.delete", &raw);
    Ok(ApiResponse::success(json!({ "deleted": deleted })))
}

/// POST /api/resources/:id/images - attach an already hosted URL
pub async fn image_attach(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
    Path(raw): Path<String>,
    payload: Result<Json<ImageBody>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(body) = payload?;
    let outcome = state.identity.attach_image(&principal.actor(), &raw, &body.url).await?;
    let applied = ApiError::from_outcome(outcome, "Resource")?;
    state.audit(&principal, "image.attach", &raw);
    Ok(ApiResponse::success(applied_json(body.url.trim(), &applied)))
}

/// DELETE /api/resources/:id/images
pub async fn image_detach(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
    Path(raw): Path<String>,
    payload: Result<Json<ImageBody>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(body) = payload?;
    let outcome = state.identity.detach_image(&principal.actor(), &raw, &body.url).await?;
    let applied = ApiError::from_outcome(outcome, "Resource")?;
    state.audit(&principal, "image.detach", &raw);
    Ok(ApiResponse::success(applied_json(body.url.trim(), &applied)))
}

/// PUT /api/resources/:id/images/:name - upload raw bytes, then attach
pub async fn image_upload(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
    Path((raw, name)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Value> {
    if body.is_empty() {
        return Err(ApiError::bad_request("Image body is empty"));
    }
    let outcome = state
        .identity
        .upload_image(&principal.actor(), &raw, state.blobs.as_ref(), &name, &body)
        .await?;
    let url = ApiError::from_outcome(outcome, "Resource")?;
    state.audit(&principal, "image.upload", &raw);
    Ok(ApiResponse::created(json!({ "url": url })))
}
