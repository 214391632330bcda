//! Axum router construction.

use axum::Router;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use super::handlers;

/// Build the application [`Router`].
///
/// Every path and method falls through to [`handlers::fire`]. At most
/// `max_concurrency` requests are processed at once; further requests wait
/// for a permit.
pub fn build(max_concurrency: usize) -> Router {
    Router::new()
        .fallback(handlers::fire)
        .layer(TraceLayer::new_for_http())
        .layer(GlobalConcurrencyLimitLayer::new(max_concurrency))
}
