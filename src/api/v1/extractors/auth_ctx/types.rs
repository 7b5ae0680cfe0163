/*
 * Responsibility
 * - The "authenticated context" type handlers see
 * - The middleware verifies the token and stores this in request extensions
 */
use crate::services::auth::Claims;

/// Context attached to every authenticated request.
///
/// - `subject` is the verified `sub` claim
/// - `claims` is the full verified payload, owned by this request
#[derive(Debug, Clone)]
pub struct AuthCtx {
    pub subject: String,
    pub claims: Claims,
}

impl AuthCtx {
    pub fn new(claims: Claims) -> Self {
        Self {
            subject: claims.sub.clone(),
            claims,
        }
    }
}
