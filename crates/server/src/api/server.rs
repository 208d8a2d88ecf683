use anyhow::Result;
use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::routing::get;
use git_http::GitHttpState;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::metrics_exporter::render_metrics;

pub async fn metrics_handler() -> String {
    render_metrics()
}

fn cors_layer(origin: &str) -> Result<CorsLayer> {
    let origin = HeaderValue::from_str(origin)?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::USER_AGENT])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS]))
}

/// `/metrics` plus the git gateway, which owns every other path.
pub fn build_router<S: GitHttpState>(state: S, allow_origin: Option<&str>) -> Result<Router> {
    let router = Router::new()
        .route("/metrics", get(metrics_handler))
        .fallback_service(git_http::router(state));

    match allow_origin {
        Some(origin) => Ok(router.layer(cors_layer(origin)?)),
        None => Ok(router),
    }
}

pub async fn run_api(router: Router, listen: &str, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(address = %listener.local_addr()?, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
