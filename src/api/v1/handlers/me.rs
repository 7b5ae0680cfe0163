/*
 * Responsibility
 * - GET /api/v1/me: echo the verified caller back
 * - Smallest possible consumer of AuthCtx, used to exercise the access middleware
 */
use axum::Json;
use serde::Serialize;

use crate::api::v1::extractors::AuthCtxExtractor;
use crate::services::auth::Claims;

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub subject: String,
    pub claims: Claims,
}

pub async fn me(AuthCtxExtractor(ctx): AuthCtxExtractor) -> Json<MeResponse> {
    Json(MeResponse {
        subject: ctx.subject,
        claims: ctx.claims,
    })
}
