//! Bearer token gateway: verify JWS tokens against a rotating key set, cache
//! verified claims, enforce revocation, and expose the result to axum handlers.
//!
//! The core lives in [`services::auth`]; everything else is HTTP glue.

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod services;
pub mod state;
