/*
 * Responsibility
 * - Public middleware surface (re-exports)
 * - auth::access (bearer token → AuthCtx), http (request id / trace / limits)
 */
pub mod auth;
pub mod http;
