//! Bearer access token → `Authenticator` → AuthCtx in request extensions.
//!
//! - `Authorization: Bearer <token>` is the only accepted form.
//! - A missing header, another scheme or an empty token is `MissingToken`.
//! - Every other rejection comes straight from `Authenticator::authenticate`.

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::{self, Next},
    response::Response,
};

use crate::api::v1::extractors::AuthCtx;
use crate::error::AppError;
use crate::services::auth::AuthError;
use crate::state::AppState;

/// Apply bearer authentication to every route of `router`.
///
/// Example:
/// ```ignore
/// let v1 = api::v1::routes();
/// let v1 = middleware::auth::access::apply(v1, state.clone());
/// app = app.nest("/api/v1", v1);
/// ```
pub fn apply(router: Router<AppState>, state: AppState) -> Router<AppState> {
    // axum 0.8's from_fn cannot take a State extractor, so pass the state explicitly
    router.layer(middleware::from_fn_with_state(state, access_middleware))
}

/// Token from `Authorization: Bearer <token>`, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

async fn access_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers()).ok_or_else(|| {
        tracing::debug!("missing or non-bearer authorization header");
        AppError::from(AuthError::MissingToken)
    })?;

    let claims = match state.auth.authenticate(token) {
        Ok(claims) => claims,
        Err(err) => {
            tracing::warn!(
                reason = err.kind().as_str(),
                "access token rejected"
            );
            return Err(err.into());
        }
    };

    // middleware → extractor hand-off
    req.extensions_mut().insert(AuthCtx::new(claims));

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn extracts_bearer_token() {
        assert_eq!(bearer_token(&headers("Bearer abc.def.ghi")), Some("abc.def.ghi"));
    }

    #[test]
    fn rejects_other_schemes_and_blank_tokens() {
        assert_eq!(bearer_token(&HeaderMap::new()), None);
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwdw==")), None);
        assert_eq!(bearer_token(&headers("bearer abc")), None);
        assert_eq!(bearer_token(&headers("Bearer    ")), None);
    }
}
