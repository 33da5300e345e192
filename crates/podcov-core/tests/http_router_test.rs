//! Endpoint behaviour of the coverage router, exercised in-process with
//! fake runtime, tool and transport.

use std::io;
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, Uri};
use tower::ServiceExt;

use podcov_core::config::{CoverageConfig, PeerSource};
use podcov_core::http::{
    HTML_PATH, PERCENT_PATH, PROFILE_PATH, RESET_CONFIRMATION, RESET_PATH, request_base_url, router,
};
use podcov_core::peers::{FILENAME_HEADER, HOSTNAME_HEADER};
use podcov_core::runtime::CoverageRuntime;
use podcov_core::{CoverDirRuntime, CoverageContext, InstanceIdentity};
use podcov_test_utils::{Answer, FakeRuntime, FakeTool, ScriptedTransport};

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct Fixture {
    runtime: Arc<FakeRuntime>,
    tool: Arc<FakeTool>,
    transport: Arc<ScriptedTransport>,
    ctx: Arc<CoverageContext>,
}

fn fixture(coverage: f64, replicas: usize, answers: Vec<Answer>) -> Fixture {
    let runtime = Arc::new(FakeRuntime::new("pod-0", coverage));
    let tool = Arc::new(FakeTool::new());
    let transport = Arc::new(ScriptedTransport::new(answers));

    let mut config = CoverageConfig::default();
    config.set_target_replicas(replicas).unwrap();

    let ctx = CoverageContext::new(runtime.clone(), tool.clone(), transport.clone())
        .with_config(config)
        .with_identity(InstanceIdentity::new("pod-0"));

    Fixture {
        runtime,
        tool,
        transport,
        ctx: Arc::new(ctx),
    }
}

async fn send(ctx: &Arc<CoverageContext>, req: Request<Body>) -> axum::response::Response {
    router(ctx.clone()).oneshot(req).await.unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("host", "svc.internal:8080")
        .body(Body::empty())
        .unwrap()
}

fn get_from(uri: &str, sender: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("host", "svc.internal:8080")
        .header(HOSTNAME_HEADER, sender)
        .body(Body::empty())
        .unwrap()
}

/// A single replica backed by a real cover directory.
fn cover_dir_context(cover: &Path) -> Arc<CoverageContext> {
    Arc::new(
        CoverageContext::new(
            Arc::new(CoverDirRuntime::new(cover)),
            Arc::new(FakeTool::new()),
            Arc::new(ScriptedTransport::new(Vec::new())),
        )
        .with_identity(InstanceIdentity::new("pod-0")),
    )
}

async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), 1_048_576)
        .await
        .unwrap()
        .to_vec()
}

async fn body_text(resp: axum::response::Response) -> String {
    String::from_utf8(body_bytes(resp).await).unwrap()
}

fn header<'a>(resp: &'a axum::response::Response, name: &str) -> Option<&'a str> {
    resp.headers().get(name).and_then(|v| v.to_str().ok())
}

// ---------------------------------------------------------------------------
// Percent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn percent_single_replica() {
    let f = fixture(42.5, 1, vec![]);

    let resp = send(&f.ctx, get(PERCENT_PATH)).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "content-type"), Some("text/plain"));
    assert_eq!(body_text(resp).await, "Total Average Coverage: 42.50%\n");
    assert!(f.transport.requests().is_empty(), "no peer polling for N=1");
    assert_eq!(f.tool.merges().len(), 1);
    assert_eq!(f.tool.merges()[0].len(), 1);
}

#[tokio::test]
async fn percent_averages_across_replicas() {
    let f = fixture(
        30.0,
        3,
        vec![
            Answer::Coverage("pod-0".to_string(), 30.0),
            Answer::Coverage("pod-1".to_string(), 60.0),
            Answer::Coverage("pod-1".to_string(), 60.0),
            Answer::Coverage("pod-2".to_string(), 90.0),
        ],
    );

    let resp = send(&f.ctx, get(PERCENT_PATH)).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "Total Average Coverage: 60.00%\n");

    let requests = f.transport.requests();
    assert_eq!(requests.len(), 4);
    for (url, sender) in &requests {
        assert_eq!(url, "http://svc.internal:8080/debug/coverage/profile");
        assert_eq!(sender, "pod-0");
    }
    assert_eq!(f.tool.merges()[0].len(), 3, "one input per distinct replica");
}

#[tokio::test]
async fn percent_fails_when_peers_never_complete() {
    let mut config = CoverageConfig::default();
    config.set_target_replicas(2).unwrap();
    config.policy = podcov_test_utils::fast_policy();

    let runtime = Arc::new(FakeRuntime::new("pod-0", 10.0));
    let transport = Arc::new(
        ScriptedTransport::peers(["pod-0"]).with_delay(std::time::Duration::from_millis(20)),
    );
    let ctx = Arc::new(
        CoverageContext::new(runtime, Arc::new(FakeTool::new()), transport)
            .with_config(config)
            .with_identity(InstanceIdentity::new("pod-0")),
    );

    let resp = send(&ctx, get(PERCENT_PATH)).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn percent_fails_on_transport_error() {
    let f = fixture(
        30.0,
        3,
        vec![
            Answer::Coverage("pod-1".to_string(), 60.0),
            Answer::Fail("connection reset".to_string()),
        ],
    );

    let resp = send(&f.ctx, get(PERCENT_PATH)).await;

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(f.tool.merges().is_empty(), "nothing merged after a failure");
}

#[tokio::test]
async fn percent_without_entry_url_fails() {
    let f = fixture(30.0, 2, vec![]);
    let req = Request::builder()
        .uri(PERCENT_PATH)
        .body(Body::empty())
        .unwrap();

    let resp = send(&f.ctx, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

// ---------------------------------------------------------------------------
// HTML
// ---------------------------------------------------------------------------

#[tokio::test]
async fn html_report_is_served() {
    let f = fixture(50.0, 2, vec![Answer::Coverage("pod-1".to_string(), 70.0)]);

    let resp = send(&f.ctx, get(HTML_PATH)).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        header(&resp, "content-type"),
        Some("text/html; charset=utf-8")
    );
    assert_eq!(body_text(resp).await, "<html><body>2 profiles</body></html>");
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

#[tokio::test]
async fn profile_returns_local_counters() {
    let f = fixture(75.0, 3, vec![]);

    let resp = send(&f.ctx, get_from(PROFILE_PATH, "pod-7")).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, HOSTNAME_HEADER), Some("pod-0"));
    assert_eq!(header(&resp, FILENAME_HEADER), Some("covcounters.pod-0"));
    assert_eq!(
        header(&resp, "content-type"),
        Some("application/octet-stream")
    );
    assert_eq!(body_text(resp).await, "75");
    assert!(f.transport.requests().is_empty(), "profile never polls peers");
}

#[tokio::test]
async fn profile_from_self_is_short_circuited() {
    let f = fixture(75.0, 3, vec![]);

    let resp = send(&f.ctx, get_from(PROFILE_PATH, "pod-0")).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, HOSTNAME_HEADER), Some("pod-0"));
    assert!(header(&resp, FILENAME_HEADER).is_none());
    assert!(body_bytes(resp).await.is_empty());
    assert_eq!(f.runtime.counter_dumps(), 0, "no counters dumped");
}

#[tokio::test]
async fn profile_and_percent_use_the_same_counter_file() {
    let cover = tempfile::TempDir::new().unwrap();
    std::fs::write(cover.path().join("covmeta.h"), "meta").unwrap();
    std::fs::write(cover.path().join("covcounters.h.1.1"), "40").unwrap();
    std::fs::write(cover.path().join("covcounters.h.2.2"), "80").unwrap();
    let ctx = cover_dir_context(cover.path());

    let resp = send(&ctx, get_from(PROFILE_PATH, "pod-7")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, FILENAME_HEADER), Some("covcounters.h.1.1"));
    assert_eq!(body_text(resp).await, "40");

    let resp = send(&ctx, get(PERCENT_PATH)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "Total Average Coverage: 40.00%\n");
}

struct BrokenRuntime;

impl CoverageRuntime for BrokenRuntime {
    fn write_meta_dir(&self, _dir: &Path) -> io::Result<()> {
        Ok(())
    }

    fn write_counters_dir(&self, _dir: &Path) -> io::Result<()> {
        Err(io::Error::other("binary not built with coverage"))
    }

    fn clear_counters(&self) -> io::Result<()> {
        Err(io::Error::other("binary not built with coverage"))
    }
}

fn broken_context() -> Arc<CoverageContext> {
    Arc::new(
        CoverageContext::new(
            Arc::new(BrokenRuntime),
            Arc::new(FakeTool::new()),
            Arc::new(ScriptedTransport::new(Vec::new())),
        )
        .with_identity(InstanceIdentity::new("pod-0")),
    )
}

#[tokio::test]
async fn runtime_failures_become_500() {
    let ctx = broken_context();

    for path in [PERCENT_PATH, HTML_PATH, PROFILE_PATH, RESET_PATH] {
        let resp = send(&ctx, get(path)).await;
        assert_eq!(
            resp.status(),
            StatusCode::INTERNAL_SERVER_ERROR,
            "{path} should fail"
        );
        assert!(body_bytes(resp).await.is_empty(), "{path} leaks no detail");
    }
}

// ---------------------------------------------------------------------------
// Reset
// ---------------------------------------------------------------------------

#[tokio::test]
async fn operator_reset_clears_and_broadcasts() {
    let f = fixture(
        40.0,
        3,
        vec![
            Answer::Peer("pod-2".to_string()),
            Answer::Peer("pod-0".to_string()),
            Answer::Peer("pod-1".to_string()),
        ],
    );

    let resp = send(&f.ctx, get(RESET_PATH)).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, RESET_CONFIRMATION);
    assert_eq!(f.runtime.clears(), 1);
    assert_eq!(f.runtime.coverage(), 0.0);

    let requests = f.transport.requests();
    assert_eq!(requests.len(), 3);
    assert!(
        requests
            .iter()
            .all(|(url, _)| url == "http://svc.internal:8080/debug/coverage/reset")
    );
}

#[tokio::test]
async fn peer_reset_clears_without_broadcasting() {
    let f = fixture(40.0, 3, vec![]);

    let resp = send(&f.ctx, get_from(RESET_PATH, "pod-5")).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, HOSTNAME_HEADER), Some("pod-0"));
    assert_eq!(body_text(resp).await, RESET_CONFIRMATION);
    assert_eq!(f.runtime.clears(), 1);
    assert!(f.transport.requests().is_empty());
}

#[tokio::test]
async fn reset_from_self_is_short_circuited() {
    let f = fixture(40.0, 3, vec![]);

    let resp = send(&f.ctx, get_from(RESET_PATH, "pod-0")).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, HOSTNAME_HEADER), Some("pod-0"));
    assert!(body_bytes(resp).await.is_empty());
    assert_eq!(f.runtime.clears(), 0);
    assert_eq!(f.runtime.coverage(), 40.0);
}

#[tokio::test]
async fn operator_reset_fails_when_broadcast_fails() {
    let f = fixture(40.0, 2, vec![Answer::Fail("no route".to_string())]);

    let resp = send(&f.ctx, get(RESET_PATH)).await;

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(f.runtime.clears(), 1, "local reset happens first");
}

#[tokio::test]
async fn endpoints_keep_working_after_reset() {
    let cover = tempfile::TempDir::new().unwrap();
    std::fs::write(cover.path().join("covmeta.h"), "meta").unwrap();
    std::fs::write(cover.path().join("covcounters.h.1.1"), "40").unwrap();
    let ctx = cover_dir_context(cover.path());

    let resp = send(&ctx, get(PERCENT_PATH)).await;
    assert_eq!(body_text(resp).await, "Total Average Coverage: 40.00%\n");

    let resp = send(&ctx, get(RESET_PATH)).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(&ctx, get(PERCENT_PATH)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "Total Average Coverage: 0.00%\n");

    let resp = send(&ctx, get_from(PROFILE_PATH, "pod-7")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, HOSTNAME_HEADER), Some("pod-0"));
    assert!(header(&resp, FILENAME_HEADER).is_none());
    assert!(body_bytes(resp).await.is_empty());
}

#[tokio::test]
async fn peer_without_counters_counts_as_zero() {
    let f = fixture(30.0, 2, vec![Answer::NoCounters("pod-1".to_string())]);

    let resp = send(&f.ctx, get(PERCENT_PATH)).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "Total Average Coverage: 15.00%\n");
    assert_eq!(f.tool.merges()[0].len(), 2);
}

// ---------------------------------------------------------------------------
// Entry URL and peer targets
// ---------------------------------------------------------------------------

#[test]
fn base_url_from_request_headers() {
    let path_only: Uri = "/debug/coverage/".parse().unwrap();
    let mut headers = axum::http::HeaderMap::new();
    assert_eq!(request_base_url(&headers, &path_only), None);

    headers.insert("host", "svc:8080".parse().unwrap());
    let base = request_base_url(&headers, &path_only);
    assert_eq!(base.as_deref(), Some("http://svc:8080"));

    headers.insert("x-forwarded-proto", "https".parse().unwrap());
    let base = request_base_url(&headers, &path_only);
    assert_eq!(base.as_deref(), Some("https://svc:8080"));

    headers.insert("x-forwarded-proto", "gopher".parse().unwrap());
    let base = request_base_url(&headers, &path_only);
    assert_eq!(base.as_deref(), Some("http://svc:8080"));
}

#[test]
fn base_url_falls_back_to_uri_authority() {
    let headers = axum::http::HeaderMap::new();

    let uri: Uri = "http://svc:9090/debug/coverage/".parse().unwrap();
    let base = request_base_url(&headers, &uri);
    assert_eq!(base.as_deref(), Some("http://svc:9090"));

    let uri: Uri = "https://svc/debug/coverage/".parse().unwrap();
    let base = request_base_url(&headers, &uri);
    assert_eq!(base.as_deref(), Some("https://svc"));
}

#[tokio::test]
async fn percent_without_host_header_polls_uri_authority() {
    let f = fixture(30.0, 2, vec![Answer::Coverage("pod-1".to_string(), 50.0)]);
    let req = Request::builder()
        .uri("http://svc:9090/debug/coverage/")
        .body(Body::empty())
        .unwrap();

    let resp = send(&f.ctx, req).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "Total Average Coverage: 40.00%\n");
    assert_eq!(
        f.transport.requests()[0].0,
        "http://svc:9090/debug/coverage/profile"
    );
}

#[test]
fn configured_entry_url_wins_over_request() {
    let f = fixture(0.0, 1, vec![]);
    assert_eq!(
        f.ctx.peer_targets(Some("http://derived"), PROFILE_PATH),
        vec!["http://derived/debug/coverage/profile"]
    );
    assert!(f.ctx.peer_targets(None, PROFILE_PATH).is_empty());

    let config = CoverageConfig {
        entry_url: Some("http://lb.internal/".to_string()),
        ..CoverageConfig::default()
    };
    let ctx = CoverageContext::new(
        Arc::new(FakeRuntime::new("x", 0.0)),
        Arc::new(FakeTool::new()),
        Arc::new(ScriptedTransport::new(Vec::new())),
    )
    .with_config(config);
    assert_eq!(
        ctx.peer_targets(Some("http://derived"), RESET_PATH),
        vec!["http://lb.internal/debug/coverage/reset"]
    );
}

#[test]
fn static_peers_are_each_targeted() {
    let config = CoverageConfig {
        peers: PeerSource::static_list(["http://pod-a:8080/", "https://pod-b"]).unwrap(),
        ..CoverageConfig::default()
    };
    let ctx = CoverageContext::new(
        Arc::new(FakeRuntime::new("x", 0.0)),
        Arc::new(FakeTool::new()),
        Arc::new(ScriptedTransport::new(Vec::new())),
    )
    .with_config(config);

    assert_eq!(
        ctx.peer_targets(Some("http://ignored"), PROFILE_PATH),
        vec![
            "http://pod-a:8080/debug/coverage/profile",
            "https://pod-b/debug/coverage/profile",
        ]
    );
}

// ---------------------------------------------------------------------------
// Context wiring
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingLogger {
    errors: std::sync::Mutex<Vec<String>>,
}

impl podcov_core::CoverageLogger for RecordingLogger {
    fn info(&self, _message: &str) {}

    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

#[tokio::test]
async fn context_components_can_be_swapped() {
    let tool = Arc::new(FakeTool::new());
    let logger = Arc::new(RecordingLogger::default());

    let mut ctx = CoverageContext::new(
        Arc::new(BrokenRuntime),
        Arc::new(FakeTool::new()),
        Arc::new(ScriptedTransport::new(Vec::new())),
    )
    .with_runtime(Arc::new(FakeRuntime::new("pod-0", 20.0)))
    .with_tool(tool.clone())
    .with_transport(Arc::new(ScriptedTransport::peers(["pod-1"])))
    .with_identity(InstanceIdentity::new("pod-0"));

    assert!(ctx.set_target_replicas(0).is_err());
    ctx.set_target_replicas(2).unwrap();
    ctx.set_logger(logger.clone());
    let ctx = Arc::new(ctx);

    // pod-1 answers with a non-numeric counter file, so the percent step fails.
    let resp = send(&ctx, get(PERCENT_PATH)).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(tool.merges().len(), 1, "swapped tool was used");

    let errors = logger.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with(PERCENT_PATH), "got {:?}", errors[0]);
}
