use std::path::Path;
use std::sync::Arc;

use crate::config::{ConfigError, CoverageConfig, PeerSource};
use crate::identity::InstanceIdentity;
use crate::logger::{CoverageLogger, TracingLogger};
use crate::peers::{
    BroadcastSummary, CollectSummary, PeerCollector, PeerError, PeerTransport, ResetBroadcaster,
};
use crate::runtime::CoverageRuntime;
use crate::tool::CoverageTool;

/// Everything the coverage endpoints need, built once before traffic starts.
///
/// Shared as `Arc<CoverageContext>` between handlers and never mutated after
/// the router is built.
pub struct CoverageContext {
    config: CoverageConfig,
    identity: InstanceIdentity,
    runtime: Arc<dyn CoverageRuntime>,
    tool: Arc<dyn CoverageTool>,
    transport: Arc<dyn PeerTransport>,
    logger: Arc<dyn CoverageLogger>,
}

impl CoverageContext {
    /// Create a context with the default config, the process identity and
    /// the `tracing` logger.
    pub fn new(
        runtime: Arc<dyn CoverageRuntime>,
        tool: Arc<dyn CoverageTool>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            config: CoverageConfig::default(),
            identity: InstanceIdentity::local().clone(),
            runtime,
            tool,
            transport,
            logger: Arc::new(TracingLogger),
        }
    }

    pub fn with_config(mut self, config: CoverageConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the identity (tests run several replicas in one process).
    pub fn with_identity(mut self, identity: InstanceIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_runtime(mut self, runtime: Arc<dyn CoverageRuntime>) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn CoverageTool>) -> Self {
        self.tool = tool;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn PeerTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Number of replicas to collect from, this one included. Must be set
    /// before traffic begins.
    pub fn set_target_replicas(&mut self, n: usize) -> Result<(), ConfigError> {
        self.config.set_target_replicas(n)
    }

    pub fn set_logger(&mut self, logger: Arc<dyn CoverageLogger>) {
        self.logger = logger;
    }

    pub fn config(&self) -> &CoverageConfig {
        &self.config
    }

    pub fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }

    pub fn runtime(&self) -> &dyn CoverageRuntime {
        self.runtime.as_ref()
    }

    pub fn tool(&self) -> &dyn CoverageTool {
        self.tool.as_ref()
    }

    pub fn logger(&self) -> &dyn CoverageLogger {
        self.logger.as_ref()
    }

    /// Full URLs to poll for `path`.
    ///
    /// With a static peer list, every configured base URL. Otherwise the
    /// entry URL (configured, or `entry` derived from the inbound request).
    pub fn peer_targets(&self, entry: Option<&str>, path: &str) -> Vec<String> {
        match &self.config.peers {
            PeerSource::Static(bases) => bases.iter().map(|b| format!("{b}{path}")).collect(),
            PeerSource::Sampling => self
                .config
                .entry_url
                .as_deref()
                .or(entry)
                .map(|base| format!("{}{path}", base.trim_end_matches('/')))
                .into_iter()
                .collect(),
        }
    }

    /// Collect every peer's artifact into `scratch_dir`.
    pub async fn collect_peers(
        &self,
        scratch_dir: &Path,
        targets: &[String],
    ) -> Result<CollectSummary, PeerError> {
        PeerCollector::new(
            self.transport.as_ref(),
            self.runtime.as_ref(),
            self.logger.as_ref(),
            &self.identity,
            self.config.target_replicas,
            self.config.policy,
        )
        .collect(scratch_dir, targets)
        .await
    }

    /// Make every peer reset its counters.
    pub async fn broadcast_reset(&self, targets: &[String]) -> Result<BroadcastSummary, PeerError> {
        ResetBroadcaster::new(
            self.transport.as_ref(),
            self.logger.as_ref(),
            &self.identity,
            self.config.target_replicas,
            self.config.policy,
        )
        .broadcast(targets)
        .await
    }
}

impl std::fmt::Debug for CoverageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverageContext")
            .field("config", &self.config)
            .field("identity", &self.identity)
            .field("tool", &self.tool.name())
            .finish_non_exhaustive()
    }
}
