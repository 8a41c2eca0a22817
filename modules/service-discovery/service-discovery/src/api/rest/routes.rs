use std::sync::Arc;

use axum::Router;
use axum::extract::Extension;
use axum::routing::{delete, get};
use http::{HeaderValue, header};
use service_discovery_sdk::ServiceDiscoveryClient;
use tower_http::set_header::SetResponseHeaderLayer;

use super::handlers;

pub const NO_STORE: &str = "no-store, max-age=0, must-revalidate";

/// Lookup routes for the public listener.
///
/// `/v/` and `/r/` are aliases. Every response, errors included, carries
/// headers that forbid caching.
pub fn register_routes(router: Router, client: Arc<dyn ServiceDiscoveryClient>) -> Router {
    let lookups = Router::new()
        .route("/v/{role}/{env}/{service}", get(handlers::lookup))
        .route("/r/{role}/{env}/{service}", get(handlers::lookup))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static(NO_STORE),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(Extension(client));

    router.merge(lookups)
}

/// Cache inspection routes for the admin listener.
pub fn register_admin_routes(router: Router, client: Arc<dyn ServiceDiscoveryClient>) -> Router {
    let admin = Router::new()
        .route("/debug/cache", get(handlers::cache_stats))
        .route(
            "/debug/cache/{role}/{env}/{service}",
            delete(handlers::invalidate),
        )
        .layer(Extension(client));

    router.merge(admin)
}
