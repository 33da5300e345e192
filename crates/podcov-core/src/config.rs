use std::time::Duration;

/// Errors raised while building a [`CoverageConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("replica count must be at least 1, got {0}")]
    InvalidReplicas(usize),

    #[error("per-request timeout {request:?} must be shorter than the total budget {total:?}")]
    InvalidPolicy { request: Duration, total: Duration },

    #[error("peer URL must start with http:// or https://: {0}")]
    InvalidPeerUrl(String),
}

/// Timeouts bounding one collection or broadcast run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Timeout applied to each outbound peer request.
    pub request_timeout: Duration,
    /// Wall-clock budget for the whole run, checked once per iteration.
    pub total_budget: Duration,
}

impl PollPolicy {
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
    pub const DEFAULT_TOTAL_BUDGET: Duration = Duration::from_secs(15);

    pub fn new(request_timeout: Duration, total_budget: Duration) -> Result<Self, ConfigError> {
        if request_timeout >= total_budget {
            return Err(ConfigError::InvalidPolicy {
                request: request_timeout,
                total: total_budget,
            });
        }
        Ok(Self {
            request_timeout,
            total_budget,
        })
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            total_budget: Self::DEFAULT_TOTAL_BUDGET,
        }
    }
}

/// Where peer requests are sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PeerSource {
    /// Poll the load-balanced entry URL and identify whoever answers.
    #[default]
    Sampling,
    /// Poll an explicit list of replica base URLs round-robin.
    Static(Vec<String>),
}

impl PeerSource {
    /// Build a static source, rejecting anything that is not an http(s) URL.
    pub fn static_list<I, S>(urls: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Vec::new();
        for url in urls {
            let url = url.into();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidPeerUrl(url));
            }
            list.push(url.trim_end_matches('/').to_owned());
        }
        if list.is_empty() {
            return Ok(Self::Sampling);
        }
        Ok(Self::Static(list))
    }
}

/// Process-wide coverage settings. Built before traffic starts and treated
/// as read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageConfig {
    /// Number of replicas expected to answer, this one included.
    pub target_replicas: usize,
    pub policy: PollPolicy,
    pub peers: PeerSource,
    /// Base URL used instead of the inbound request's `Host` when polling.
    pub entry_url: Option<String>,
}

impl CoverageConfig {
    pub const DEFAULT_REPLICAS: usize = 1;

    pub fn set_target_replicas(&mut self, n: usize) -> Result<(), ConfigError> {
        if n == 0 {
            return Err(ConfigError::InvalidReplicas(n));
        }
        self.target_replicas = n;
        Ok(())
    }
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            target_replicas: Self::DEFAULT_REPLICAS,
            policy: PollPolicy::default(),
            peers: PeerSource::default(),
            entry_url: None,
        }
    }
}
