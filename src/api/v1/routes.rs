/*
 * Responsibility
 * - URL layout of v1
 * - Decide which routes sit behind the bearer access middleware
 */
use axum::{Router, routing::get};

use crate::api::v1::handlers::{health::health, me::me};
use crate::middleware::auth::access;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    let protected = Router::new().route("/me", get(me));
    let protected = access::apply(protected, state);

    Router::new().route("/health", get(health)).merge(protected)
}
