//! HTTP server module
//!
//! This module handles HTTP request routing and handling:
//! - Axum router with the split, health, version and debug endpoints
//! - Optional bearer token authentication
//! - Multipart upload decoding to local storage
//! - JSON error responses
//! - CORS and request tracing middleware

pub mod auth;
pub mod handlers;
pub mod routes;
pub mod upload;

pub use routes::create_router;
