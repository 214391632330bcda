//! HTTPS server: TLS configuration, routing, and the accept loop.
//!
//! # Responsibilities
//! - Build the rustls `ServerConfig` from the materialised PEM files.
//! - Define the Axum router that answers every request with the fixed body.
//! - Bind the TLS listener, serve HTTP/1.1 and HTTP/2, and drain on shutdown.

pub mod handlers;
pub mod listener;
pub mod router;
pub mod tls;
