use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::auth::{bearer_token, verify_jwt, AuthError, AuthPrincipal};

/// Validates the bearer token and injects the `AuthPrincipal` into the request
pub async fn jwt_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = match headers.get(AUTHORIZATION) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| ApiError::unauthorized("Invalid Authorization header format"))?,
        ),
        None => None,
    };
    let token = bearer_token(header)?;
    let claims = verify_jwt(token, &state.jwt_secret).map_err(|e| {
        if let AuthError::InvalidToken(reason) = &e {
            tracing::debug!("Rejected bearer token: {}", reason);
        }
        ApiError::from(e)
    })?;

    request.extensions_mut().insert(AuthPrincipal::from(claims));
    Ok(next.run(request).await)
}
