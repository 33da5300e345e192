//! Shared test utilities for podcov integration tests.
//!
//! - [`FakeRuntime`] / [`FakeTool`]: in-process stand-ins for the coverage
//!   counter writer and the external merge/percent tool. A fake counter file
//!   holds its coverage percentage as text, and the fake percent report lists
//!   one package per counter file, plus a 0% package for every contributor
//!   that sent metadata without counters.
//! - [`ScriptedTransport`]: replays canned peer answers.
//! - [`Cluster`]: N real replicas serving the coverage router, behind a
//!   round-robin load balancer, all on loopback ports.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use podcov_core::config::{CoverageConfig, PollPolicy};
use podcov_core::peers::{
    FILENAME_HEADER, HOSTNAME_HEADER, HttpTransport, PeerResponse, PeerTransport, TransportError,
};
use podcov_core::runtime::{COUNTERS_PREFIX, CoverageRuntime, META_PREFIX};
use podcov_core::tool::{CoverageTool, ToolError};
use podcov_core::{CoverageContext, InstanceIdentity};

// ---------------------------------------------------------------------------
// Fake runtime
// ---------------------------------------------------------------------------

/// Coverage runtime whose counters are a single percentage.
#[derive(Debug)]
pub struct FakeRuntime {
    label: String,
    coverage: Mutex<f64>,
    clears: AtomicUsize,
    counter_dumps: AtomicUsize,
}

impl FakeRuntime {
    pub fn new(label: impl Into<String>, coverage: f64) -> Self {
        Self {
            label: label.into(),
            coverage: Mutex::new(coverage),
            clears: AtomicUsize::new(0),
            counter_dumps: AtomicUsize::new(0),
        }
    }

    pub fn counter_filename(&self) -> String {
        format!("{COUNTERS_PREFIX}.{}", self.label)
    }

    pub fn coverage(&self) -> f64 {
        *self.coverage.lock().unwrap()
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn counter_dumps(&self) -> usize {
        self.counter_dumps.load(Ordering::SeqCst)
    }
}

impl CoverageRuntime for FakeRuntime {
    fn write_meta_dir(&self, dir: &Path) -> io::Result<()> {
        fs::write(
            dir.join(format!("{META_PREFIX}.{}", self.label)),
            self.label.as_bytes(),
        )
    }

    fn write_counters_dir(&self, dir: &Path) -> io::Result<()> {
        self.counter_dumps.fetch_add(1, Ordering::SeqCst);
        fs::write(dir.join(self.counter_filename()), self.coverage().to_string())
    }

    fn clear_counters(&self) -> io::Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        *self.coverage.lock().unwrap() = 0.0;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fake tool
// ---------------------------------------------------------------------------

/// Merge copies counter and metadata files side by side, suffixed with the
/// input index; percent reports each counter file as a package.
#[derive(Debug, Default)]
pub struct FakeTool {
    merges: Mutex<Vec<Vec<PathBuf>>>,
}

impl FakeTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Input directory lists of every merge call so far.
    pub fn merges(&self) -> Vec<Vec<PathBuf>> {
        self.merges.lock().unwrap().clone()
    }
}

fn prefixed_files(dir: &Path, prefix: &str) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with(prefix))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn counter_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    prefixed_files(dir, COUNTERS_PREFIX)
}

/// The input index a merged file was suffixed with.
fn merge_index(path: &Path) -> Option<String> {
    path.extension().map(|ext| ext.to_string_lossy().into_owned())
}

#[async_trait]
impl CoverageTool for FakeTool {
    fn name(&self) -> &str {
        "fake"
    }

    async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ToolError> {
        self.merges.lock().unwrap().push(inputs.to_vec());
        for (idx, input) in inputs.iter().enumerate() {
            let mut files = counter_files(input)?;
            files.extend(prefixed_files(input, META_PREFIX)?);
            for file in files {
                let name = file.file_name().unwrap_or_default().to_string_lossy();
                fs::copy(&file, output.join(format!("{name}.{idx}")))?;
            }
        }
        Ok(())
    }

    async fn percent(&self, input: &Path) -> Result<String, ToolError> {
        let mut report = String::new();
        let counters = counter_files(input)?;
        for file in &counters {
            let value = fs::read_to_string(file)?;
            let name = file.file_name().unwrap_or_default().to_string_lossy();
            report.push_str(&format!(
                "\tfake/{name}\t\tcoverage: {}% of statements\n",
                value.trim()
            ));
        }

        let counted: Vec<_> = counters.iter().filter_map(|f| merge_index(f)).collect();
        for meta in prefixed_files(input, META_PREFIX)? {
            if counted.contains(&merge_index(&meta).unwrap_or_default()) {
                continue;
            }
            let name = meta.file_name().unwrap_or_default().to_string_lossy();
            report.push_str(&format!("\tfake/{name}\t\tcoverage: 0% of statements\n"));
        }
        Ok(report)
    }

    async fn render_html(&self, input: &Path, _workdir: &Path) -> Result<Vec<u8>, ToolError> {
        let n = counter_files(input)?.len();
        Ok(format!("<html><body>{n} profiles</body></html>").into_bytes())
    }
}

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

/// One canned answer from [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub enum Answer {
    /// A peer with this identity answers with a small artifact.
    Peer(String),
    /// A peer answers with a counter file holding this coverage, in the
    /// format [`FakeRuntime`] writes.
    Coverage(String, f64),
    /// A peer with this identity has no counters (e.g. just reset) and
    /// answers with its identity only.
    NoCounters(String),
    /// The request fails at the transport level.
    Fail(String),
}

/// Replays answers in order, then repeats the last one forever.
#[derive(Debug)]
pub struct ScriptedTransport {
    answers: Mutex<VecDeque<Answer>>,
    requests: Mutex<Vec<(String, String)>>,
    delay: Duration,
}

impl ScriptedTransport {
    pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Sleep this long before every answer, like a real round trip.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Peers answering in the given order.
    pub fn peers<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(ids.into_iter().map(|id| Answer::Peer(id.to_string())))
    }

    /// `(url, x-hostname)` of every request made.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerTransport for ScriptedTransport {
    async fn get(
        &self,
        url: &str,
        identity: &InstanceIdentity,
        _timeout: Duration,
    ) -> Result<PeerResponse, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), identity.to_string()));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let answer = {
            let mut answers = self.answers.lock().unwrap();
            if answers.len() > 1 {
                answers.pop_front()
            } else {
                answers.front().cloned()
            }
        };

        match answer {
            Some(Answer::Peer(id)) => Ok(PeerResponse {
                status: 200,
                filename: Some(format!("{COUNTERS_PREFIX}.{id}")),
                body: id.as_bytes().to_vec(),
                identity: Some(id),
            }),
            Some(Answer::Coverage(id, coverage)) => Ok(PeerResponse {
                status: 200,
                filename: Some(format!("{COUNTERS_PREFIX}.{id}")),
                body: coverage.to_string().into_bytes(),
                identity: Some(id),
            }),
            Some(Answer::NoCounters(id)) => Ok(PeerResponse {
                status: 200,
                identity: Some(id),
                ..PeerResponse::default()
            }),
            Some(Answer::Fail(reason)) => Err(TransportError::Unreachable(reason)),
            None => Err(TransportError::Unreachable("script is empty".to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// In-process cluster
// ---------------------------------------------------------------------------

/// One replica of a [`Cluster`].
pub struct Replica {
    pub identity: InstanceIdentity,
    pub addr: SocketAddr,
    pub runtime: Arc<FakeRuntime>,
    pub tool: Arc<FakeTool>,
    handle: JoinHandle<()>,
}

impl Replica {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

/// Replicas behind a round-robin load balancer.
pub struct Cluster {
    pub replicas: Vec<Replica>,
    pub lb_addr: SocketAddr,
    lb_handle: JoinHandle<()>,
    client: reqwest::Client,
}

/// Poll policy short enough for tests.
pub fn fast_policy() -> PollPolicy {
    PollPolicy::new(Duration::from_millis(500), Duration::from_secs(3))
        .expect("valid test policy")
}

struct Balancer {
    backends: Vec<String>,
    next: AtomicUsize,
    client: reqwest::Client,
}

async fn forward(State(lb): State<Arc<Balancer>>, uri: Uri, headers: HeaderMap) -> Response {
    let idx = lb.next.fetch_add(1, Ordering::SeqCst) % lb.backends.len();
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let mut req = lb.client.get(format!("{}{path}", lb.backends[idx]));
    if let Some(v) = headers.get(HOSTNAME_HEADER) {
        req = req.header(HOSTNAME_HEADER, v.clone());
    }

    let resp = match req.send().await {
        Ok(resp) => resp,
        Err(_) => return StatusCode::BAD_GATEWAY.into_response(),
    };

    let status = resp.status();
    let mut out = HeaderMap::new();
    for name in [HOSTNAME_HEADER, FILENAME_HEADER, "content-type"] {
        if let Some(v) = resp.headers().get(name) {
            out.insert(HeaderName::from_static(name), v.clone());
        }
    }
    match resp.bytes().await {
        Ok(body) => (status, out, body).into_response(),
        Err(_) => StatusCode::BAD_GATEWAY.into_response(),
    }
}

impl Cluster {
    /// Start one replica per entry of `coverages`, each expecting
    /// `target_replicas` peers and polling through the load balancer.
    pub async fn start(coverages: &[f64], target_replicas: usize, policy: PollPolicy) -> Self {
        let lb_listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind load balancer");
        let lb_addr = lb_listener.local_addr().expect("load balancer address");
        let entry_url = format!("http://{lb_addr}");

        let mut replicas = Vec::with_capacity(coverages.len());
        for (idx, coverage) in coverages.iter().enumerate() {
            let identity = InstanceIdentity::new(format!("replica-{idx}"));
            let runtime = Arc::new(FakeRuntime::new(identity.as_str(), *coverage));
            let tool = Arc::new(FakeTool::new());
            let transport = Arc::new(HttpTransport::new().expect("http transport"));

            let mut config = CoverageConfig {
                policy,
                entry_url: Some(entry_url.clone()),
                ..CoverageConfig::default()
            };
            config
                .set_target_replicas(target_replicas)
                .expect("valid replica count");

            let ctx = CoverageContext::new(runtime.clone(), tool.clone(), transport)
                .with_config(config)
                .with_identity(identity.clone());
            let app = podcov_core::http::router(Arc::new(ctx));

            let listener = TcpListener::bind("127.0.0.1:0")
                .await
                .expect("failed to bind replica");
            let addr = listener.local_addr().expect("replica address");
            let handle = tokio::spawn(async move {
                axum::serve(listener, app).await.ok();
            });

            replicas.push(Replica {
                identity,
                addr,
                runtime,
                tool,
                handle,
            });
        }

        let balancer = Arc::new(Balancer {
            backends: replicas.iter().map(Replica::base_url).collect(),
            next: AtomicUsize::new(0),
            client: reqwest::Client::new(),
        });
        let lb_app = Router::new().fallback(forward).with_state(balancer);
        let lb_handle = tokio::spawn(async move {
            axum::serve(lb_listener, lb_app).await.ok();
        });

        Self {
            replicas,
            lb_addr,
            lb_handle,
            client: reqwest::Client::new(),
        }
    }

    pub fn entry_url(&self) -> String {
        format!("http://{}", self.lb_addr)
    }

    /// GET `path` through the load balancer, as an operator would.
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.entry_url()))
            .send()
            .await
            .expect("request through load balancer failed")
    }

    pub fn shutdown(self) {
        self.lb_handle.abort();
        for replica in self.replicas {
            replica.handle.abort();
        }
    }
}
