use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::trace::TraceLayer;

use podcov_core::peers::HttpTransport;
use podcov_core::{CoverDirRuntime, CoverageContext};

use crate::config::PodcovConfig;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(ctx: Arc<CoverageContext>) -> Router {
    podcov_core::http::router(ctx).layer(TraceLayer::new_for_http())
}

/// Wire the real runtime, tool and transport into a context.
pub fn build_context(config: &PodcovConfig) -> Result<CoverageContext> {
    let runtime = Arc::new(CoverDirRuntime::new(&config.cover_dir));
    let tool = Arc::new(config.tool.clone());
    let transport = Arc::new(HttpTransport::new().context("failed to build HTTP client")?);
    Ok(CoverageContext::new(runtime, tool, transport).with_config(config.coverage.clone()))
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(config: PodcovConfig) -> Result<()> {
    if !config.cover_dir.is_dir() {
        tracing::warn!(
            cover_dir = %config.cover_dir.display(),
            "coverage directory does not exist yet"
        );
    }

    let ctx = Arc::new(build_context(&config)?);
    tracing::info!(
        identity = %ctx.identity(),
        replicas = ctx.config().target_replicas,
        entry_url = ctx.config().entry_url.as_deref().unwrap_or("<from request>"),
        "coverage context ready"
    );

    let app = build_router(ctx);
    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.bind, config.port))?;
    tracing::info!("podcov serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("podcov serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
