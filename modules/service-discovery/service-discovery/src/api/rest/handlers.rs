use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::{StatusCode, Uri};
use axum::response::Json;
use service_discovery_sdk::ServiceDiscoveryClient;

use super::dto::{CacheStatsDto, EndpointDto};
use super::error::{discovery_error_to_problem, not_cached_problem};
use super::problem::Problem;

type IdentifierPath = Path<(String, String, String)>;

/// Current members of `role/env/service`.
#[tracing::instrument(skip_all, fields(path = %uri.path()))]
pub async fn lookup(
    Extension(client): Extension<Arc<dyn ServiceDiscoveryClient>>,
    uri: Uri,
    Path((role, env, service)): IdentifierPath,
) -> Result<Json<Vec<EndpointDto>>, Problem> {
    let raw = format!("{role}/{env}/{service}");
    let endpoints = client
        .lookup(&raw)
        .await
        .map_err(|e| discovery_error_to_problem(&e, uri.path()))?;

    tracing::debug!(members = endpoints.len(), "Lookup served");
    Ok(Json(endpoints.into_iter().map(EndpointDto::from).collect()))
}

/// Live entry counts of both registries.
#[allow(clippy::unused_async)]
pub async fn cache_stats(
    Extension(client): Extension<Arc<dyn ServiceDiscoveryClient>>,
) -> Json<CacheStatsDto> {
    Json(client.stats().into())
}

/// Evict and release the cached connection and subscription of `role/env/service`.
#[tracing::instrument(skip_all, fields(path = %uri.path()))]
pub async fn invalidate(
    Extension(client): Extension<Arc<dyn ServiceDiscoveryClient>>,
    uri: Uri,
    Path((role, env, service)): IdentifierPath,
) -> Result<StatusCode, Problem> {
    let raw = format!("{role}/{env}/{service}");
    match client.invalidate(&raw).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(not_cached_problem(&raw, uri.path())),
        Err(e) => Err(discovery_error_to_problem(&e, uri.path())),
    }
}
