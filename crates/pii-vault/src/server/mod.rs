//! Axum HTTP server, routing, and middleware.
//!
//! # Responsibilities
//! - Define the Axum router with all routes and shared middleware.
//! - Map [`crate::error::EnvelopeError`] onto JSON error responses.
//! - Inject shared application state (`AppState`) into handlers.

pub mod handlers;
pub mod router;
pub mod state;
