//! HTTP endpoints under `/debug/coverage/`.
//!
//! Mount [`router`] into the application's own axum router, or run it
//! standalone with `podcov serve`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;

use crate::aggregate::aggregate;
use crate::context::CoverageContext;
use crate::guard::{self, RequestOrigin};
use crate::peers::{FILENAME_HEADER, HOSTNAME_HEADER};
use crate::runtime::find_counter_file;
use crate::scratch::ScratchArea;

pub const PERCENT_PATH: &str = "/debug/coverage/";
pub const RESET_PATH: &str = "/debug/coverage/reset";
pub const HTML_PATH: &str = "/debug/coverage/html";
pub const PROFILE_PATH: &str = "/debug/coverage/profile";

pub const RESET_CONFIRMATION: &str = "Coverage counters have been reset";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Any failure while serving a coverage endpoint. Clients only ever see a
/// bare status code; the detail goes to the logger.
#[derive(Debug)]
pub struct HandlerError {
    status: StatusCode,
    message: String,
}

impl HandlerError {
    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        self.status.into_response()
    }
}

/// Log `err` through the context logger and turn it into a 500.
fn fail(ctx: &CoverageContext, endpoint: &str, err: anyhow::Error) -> HandlerError {
    let err = HandlerError::internal(err);
    ctx.logger().error(&format!("{endpoint}: {}", err.message()));
    err
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(ctx: Arc<CoverageContext>) -> Router {
    Router::new()
        .route(PERCENT_PATH, get(coverage_percent))
        .route(RESET_PATH, get(coverage_reset))
        .route(HTML_PATH, get(coverage_html))
        .route(PROFILE_PATH, get(coverage_profile))
        .with_state(ctx)
}

/// `<scheme>://<host>` of the inbound request, used as the entry URL when
/// none is configured.
///
/// HTTP/2 requests carry the authority in the request target instead of a
/// `Host` header, so the URI is the fallback.
pub fn request_base_url(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let host = match headers.get(HOST) {
        Some(value) => value.to_str().ok()?.to_string(),
        None => uri.authority()?.as_str().to_string(),
    };
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.scheme_str())
        .filter(|s| matches!(*s, "http" | "https"))
        .unwrap_or("http");
    Some(format!("{scheme}://{host}"))
}

// ---------------------------------------------------------------------------
// Shared pipeline
// ---------------------------------------------------------------------------

/// Write the local artifact, collect every peer's, and merge them.
///
/// The returned [`ScratchArea`] owns the merged directory; keep it alive
/// until the merged data has been read.
async fn gather_merged(
    ctx: &CoverageContext,
    headers: &HeaderMap,
    uri: &Uri,
) -> anyhow::Result<(ScratchArea, PathBuf)> {
    let scratch = ScratchArea::create().context("error creating temporary directory")?;
    scratch
        .write_local(ctx.runtime(), ctx.identity())
        .context("error writing local coverage data")?;

    let entry = request_base_url(headers, uri);
    let targets = ctx.peer_targets(entry.as_deref(), PROFILE_PATH);
    let summary = ctx
        .collect_peers(scratch.path(), &targets)
        .await
        .context("error collecting coverage from other replicas")?;
    ctx.logger().info(&format!(
        "collected coverage from {} peer(s) in {} request(s), {:?}",
        summary.peers.len(),
        summary.requests,
        summary.elapsed
    ));

    let inputs = scratch
        .contributor_dirs()
        .context("error listing coverage directories")?;
    let merged = scratch
        .create_merged_dir()
        .context("error creating merge directory")?;
    ctx.tool()
        .merge(&inputs, &merged)
        .await
        .context("error merging coverage data")?;

    Ok((scratch, merged))
}

async fn percent_report(
    ctx: &CoverageContext,
    headers: &HeaderMap,
    uri: &Uri,
) -> anyhow::Result<f64> {
    let (_scratch, merged) = gather_merged(ctx, headers, uri).await?;
    let report = ctx
        .tool()
        .percent(&merged)
        .await
        .context("error computing coverage percent")?;
    let total = aggregate(&report).context("error calculating total coverage")?;
    Ok(total)
}

async fn html_report(
    ctx: &CoverageContext,
    headers: &HeaderMap,
    uri: &Uri,
) -> anyhow::Result<Vec<u8>> {
    let (scratch, merged) = gather_merged(ctx, headers, uri).await?;
    ctx.logger().info("generate HTML coverage report");
    let html = ctx
        .tool()
        .render_html(&merged, scratch.path())
        .await
        .context("error rendering HTML coverage report")?;
    Ok(html)
}

/// Dump this replica's counters and return the counter file's name and
/// contents, or `None` when there are no counters (e.g. after a reset).
/// The dump directory is removed before returning.
async fn dump_profile(ctx: &CoverageContext) -> anyhow::Result<Option<(String, Vec<u8>)>> {
    let dir = tempfile::Builder::new()
        .prefix("coverage")
        .tempdir()
        .context("error creating temporary directory")?;
    ctx.runtime()
        .write_meta_dir(dir.path())
        .context("error writing meta data")?;
    ctx.runtime()
        .write_counters_dir(dir.path())
        .context("error writing counters data")?;

    let found = find_counter_file(dir.path()).context("error reading temporary directory")?;
    let Some(path) = found else {
        return Ok(None);
    };
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("counter file has no name")?;
    let data = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Some((filename, data)))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn coverage_percent(
    State(ctx): State<Arc<CoverageContext>>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, HandlerError> {
    let total = percent_report(&ctx, &headers, &uri)
        .await
        .map_err(|e| fail(&ctx, PERCENT_PATH, e))?;
    Ok((
        [(CONTENT_TYPE, "text/plain")],
        format!("Total Average Coverage: {total:.2}%\n"),
    )
        .into_response())
}

async fn coverage_html(
    State(ctx): State<Arc<CoverageContext>>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, HandlerError> {
    let html = html_report(&ctx, &headers, &uri)
        .await
        .map_err(|e| fail(&ctx, HTML_PATH, e))?;
    Ok(([(CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response())
}

async fn coverage_reset(
    State(ctx): State<Arc<CoverageContext>>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, HandlerError> {
    let origin = guard::classify_headers(&headers, ctx.identity());
    if origin == RequestOrigin::Own {
        return Ok(guard::short_circuit(ctx.identity()));
    }

    ctx.runtime()
        .clear_counters()
        .context("error clearing counters")
        .map_err(|e| fail(&ctx, RESET_PATH, e))?;

    match origin {
        RequestOrigin::Peer(from) => {
            // The sender is already polling every replica; no re-broadcast.
            ctx.logger()
                .info(&format!("coverage counters reset at the request of {from}"));
        }
        _ => {
            let entry = request_base_url(&headers, &uri);
            let targets = ctx.peer_targets(entry.as_deref(), RESET_PATH);
            let summary = ctx
                .broadcast_reset(&targets)
                .await
                .context("error resetting other replicas")
                .map_err(|e| fail(&ctx, RESET_PATH, e))?;
            ctx.logger().info(&format!(
                "coverage counters reset on this replica and {} peer(s)",
                summary.peers.len()
            ));
        }
    }

    Ok((
        [(HOSTNAME_HEADER, ctx.identity().to_string())],
        RESET_CONFIRMATION,
    )
        .into_response())
}

async fn coverage_profile(
    State(ctx): State<Arc<CoverageContext>>,
    headers: HeaderMap,
) -> Result<Response, HandlerError> {
    if guard::is_self_originated(&headers, ctx.identity()) {
        return Ok(guard::short_circuit(ctx.identity()));
    }

    let dumped = dump_profile(&ctx)
        .await
        .map_err(|e| fail(&ctx, PROFILE_PATH, e))?;
    let content_type = [(CONTENT_TYPE, "application/octet-stream")];
    let identity = [(HOSTNAME_HEADER, ctx.identity().to_string())];
    let response = match dumped {
        Some((filename, data)) => {
            (content_type, identity, [(FILENAME_HEADER, filename)], data).into_response()
        }
        // Still a contribution: the peer merges our metadata at zero coverage.
        None => (content_type, identity, Vec::<u8>::new()).into_response(),
    };
    Ok(response)
}
