use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{FromRef, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use http::{HeaderValue, StatusCode, header};
use service_discovery::ServiceDiscoveryModule;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{AppConfig, ServerConfig};
use crate::signals;

/// Readiness flag shared by both listeners. Set once listeners are bound,
/// cleared as soon as shutdown begins.
#[derive(Clone, Default)]
pub struct Health(Arc<AtomicBool>);

impl Health {
    pub fn set(&self, healthy: bool) {
        self.0.store(healthy, Ordering::Release);
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Clone)]
struct AdminState {
    health: Health,
    stop: CancellationToken,
}

impl FromRef<AdminState> for Health {
    fn from_ref(state: &AdminState) -> Self {
        state.health.clone()
    }
}

#[allow(clippy::unused_async)]
async fn root() -> &'static str {
    "ok"
}

#[allow(clippy::unused_async)]
async fn health_check(State(health): State<Health>) -> Response {
    if health.is_healthy() {
        (StatusCode::OK, "ok").into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}

#[allow(clippy::unused_async)]
async fn quit(State(state): State<AdminState>) -> &'static str {
    warn!("Shutdown requested through admin endpoint");
    state.stop.cancel();
    "ok"
}

/// Lookup listener: `/`, `/health` and the module's `/v` and `/r` routes.
#[must_use]
pub fn public_router(
    module: &ServiceDiscoveryModule,
    health: &Health,
    server: &ServerConfig,
) -> Router {
    let router = Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .with_state(health.clone());

    module
        .register_routes(router)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            server.request_timeout,
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(TraceLayer::new_for_http())
}

/// Admin listener: health, cache inspection and process control.
#[must_use]
pub fn admin_router(
    module: &ServiceDiscoveryModule,
    health: &Health,
    stop: &CancellationToken,
) -> Router {
    let state = AdminState {
        health: health.clone(),
        stop: stop.clone(),
    };
    let router = Router::new()
        .route("/", get(|| async { Redirect::to("/debug/cache") }))
        .route("/health", get(health_check))
        .route("/quitquitquit", get(quit).post(quit))
        .route("/abortabortabort", get(quit).post(quit))
        .with_state(state);

    module
        .register_admin_routes(router)
        .layer(TraceLayer::new_for_http())
}

async fn bind(addr: SocketAddr, name: &'static str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {name} listener on {addr}"))?;
    info!(listener = name, addr = %listener.local_addr()?, "HTTP listener bound");
    Ok(listener)
}

async fn serve(
    listener: TcpListener,
    router: Router,
    stop: CancellationToken,
    name: &'static str,
) -> Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            stop.cancelled().await;
            info!(listener = name, "HTTP listener shutting down gracefully");
        })
        .await
        .with_context(|| format!("{name} listener failed"))
}

/// Run both listeners until a stop signal, `/quitquitquit`, or a listener
/// failure, then drain and release every cached registry resource.
///
/// # Errors
/// Fails if the module cannot start, a listener cannot bind, or a listener
/// stops on its own.
pub async fn run(config: &AppConfig) -> Result<()> {
    let (module, _registry) = ServiceDiscoveryModule::with_static_registry(&config.discovery)
        .context("failed to start service discovery module")?;
    let health = Health::default();
    let stop = CancellationToken::new();

    let public_listener = bind(config.server.bind_addr, "public").await?;
    let admin_listener = bind(config.server.admin_bind_addr, "admin").await?;

    let mut listeners = JoinSet::new();
    listeners.spawn(serve(
        public_listener,
        public_router(&module, &health, &config.server),
        stop.clone(),
        "public",
    ));
    listeners.spawn(serve(
        admin_listener,
        admin_router(&module, &health, &stop),
        stop.clone(),
        "admin",
    ));
    health.set(true);
    info!("Discovery server ready");

    let mut failure = None;
    tokio::select! {
        signal = signals::wait_for_stop_signal() => {
            if let Err(e) = signal {
                error!(error = %e, "Signal handling failed, shutting down");
            }
        }
        () = stop.cancelled() => {}
        Some(exited) = listeners.join_next() => {
            failure = Some(match exited {
                Ok(Ok(())) => anyhow::anyhow!("listener exited unexpectedly"),
                Ok(Err(e)) => e,
                Err(e) => anyhow::Error::new(e).context("listener task panicked"),
            });
        }
    }

    health.set(false);
    stop.cancel();

    let drain = async {
        while let Some(exited) = listeners.join_next().await {
            match exited {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Listener failed during shutdown"),
                Err(e) => error!(error = %e, "Listener task panicked during shutdown"),
            }
        }
    };
    if tokio::time::timeout(config.server.shutdown_timeout, drain)
        .await
        .is_err()
    {
        warn!(
            timeout_secs = config.server.shutdown_timeout.as_secs(),
            "Listeners did not drain in time, aborting remaining connections"
        );
        listeners.abort_all();
    }

    module.shutdown().await;
    match failure {
        Some(e) => {
            error!(error = %e, "Discovery server stopped after listener failure");
            Err(e)
        }
        None => {
            info!("Discovery server stopped");
            Ok(())
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use axum::body::Body;
    use axum::http::{Method, Request};
    use service_discovery::{DiscoveryConfig, EndpointEntity, ServiceIdentifier};
    use tower::ServiceExt;

    fn module() -> ServiceDiscoveryModule {
        let mut static_members = BTreeMap::new();
        static_members.insert(
            ServiceIdentifier::parse("search/prod/api").unwrap(),
            vec![EndpointEntity::new("10.0.0.1", 8080)],
        );
        let config = DiscoveryConfig {
            static_members,
            ..DiscoveryConfig::default()
        };
        ServiceDiscoveryModule::with_static_registry(&config).unwrap().0
    }

    async fn get_path(router: &Router, method: Method, uri: &str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        router.clone().oneshot(request).await.unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn public_root_and_health() {
        let module = module();
        let health = Health::default();
        let router = public_router(&module, &health, &ServerConfig::default());

        let response = get_path(&router, Method::GET, "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");

        let response = get_path(&router, Method::GET, "/health").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_text(response).await.is_empty());

        health.set(true);
        let response = get_path(&router, Method::GET, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        health.set(false);
        let response = get_path(&router, Method::GET, "/health").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn public_router_serves_lookups_with_security_headers() {
        let module = module();
        let router = public_router(&module, &Health::default(), &ServerConfig::default());

        let response = get_path(&router, Method::GET, "/v/search/prod/api").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::X_CONTENT_TYPE_OPTIONS).unwrap(),
            "nosniff"
        );
        assert!(body_text(response).await.contains("10.0.0.1"));
    }

    #[tokio::test]
    async fn admin_root_redirects_to_cache_stats() {
        let module = module();
        let router = admin_router(&module, &Health::default(), &CancellationToken::new());

        let response = get_path(&router, Method::GET, "/").await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/debug/cache"
        );

        let response = get_path(&router, Method::GET, "/debug/cache").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn quitquitquit_requests_stop() {
        let module = module();
        let stop = CancellationToken::new();
        let router = admin_router(&module, &Health::default(), &stop);

        let response = get_path(&router, Method::POST, "/quitquitquit").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(stop.is_cancelled());
    }

    #[tokio::test]
    async fn abortabortabort_stops_gracefully() {
        let module = module();
        for method in [Method::GET, Method::POST] {
            let stop = CancellationToken::new();
            let router = admin_router(&module, &Health::default(), &stop);

            let response = get_path(&router, method, "/abortabortabort").await;

            assert_eq!(response.status(), StatusCode::OK);
            assert!(stop.is_cancelled());
        }
    }

    #[tokio::test]
    async fn lookup_routes_are_not_on_admin_listener() {
        let module = module();
        let router = admin_router(&module, &Health::default(), &CancellationToken::new());

        let response = get_path(&router, Method::GET, "/v/search/prod/api").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
