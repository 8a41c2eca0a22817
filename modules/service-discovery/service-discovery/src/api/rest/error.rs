use http::StatusCode;
use service_discovery_sdk::DiscoveryError;

use super::problem::Problem;

const ERROR_TYPE_BASE: &str = "https://errors.service-discovery.dev";

fn build_problem(status: StatusCode, title: &str, code: &str, detail: String, instance: &str) -> Problem {
    Problem::new(status, title, detail)
        .with_type(format!("{ERROR_TYPE_BASE}/{code}"))
        .with_code(code)
        .with_instance(instance)
}

/// Map discovery errors to HTTP problem responses
pub fn discovery_error_to_problem(err: &DiscoveryError, instance: &str) -> Problem {
    let trace_id = tracing::Span::current()
        .id()
        .map(|id| id.into_u64().to_string());

    let mut problem = match err {
        DiscoveryError::InvalidIdentifier { .. } => build_problem(
            StatusCode::BAD_REQUEST,
            "Invalid service identifier",
            "INVALID_IDENTIFIER",
            format!("{err}; expected role/environment/service"),
            instance,
        ),
        DiscoveryError::ConnectionUnavailable { .. } => build_problem(
            StatusCode::SERVICE_UNAVAILABLE,
            "Registry connection unavailable",
            "CONNECTION_UNAVAILABLE",
            err.to_string(),
            instance,
        ),
        DiscoveryError::SubscriptionUnavailable { .. } => build_problem(
            StatusCode::SERVICE_UNAVAILABLE,
            "Serverset subscription unavailable",
            "SUBSCRIPTION_UNAVAILABLE",
            err.to_string(),
            instance,
        ),
    };

    if let Some(tid) = trace_id {
        problem = problem.with_trace_id(tid);
    }

    problem
}

/// Used when nothing was cached under the requested identifier.
pub fn not_cached_problem(raw: &str, instance: &str) -> Problem {
    build_problem(
        StatusCode::NOT_FOUND,
        "Not cached",
        "NOT_CACHED",
        format!("nothing is cached for '{raw}'"),
        instance,
    )
}

impl From<DiscoveryError> for Problem {
    fn from(e: DiscoveryError) -> Self {
        discovery_error_to_problem(&e, "/")
    }
}
