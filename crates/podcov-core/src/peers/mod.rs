//! Peer discovery by distinct sampling through a shared entry point.
//!
//! There is no membership service: a replica repeatedly sends a
//! self-identifying request to the load-balanced entry URL, reads the
//! responder's identity from the `x-hostname` header, and stops once it has
//! seen `target_replicas` distinct identities (itself included) or the time
//! budget runs out.
//!
//! - [`PeerCollector`] stores the first artifact each new peer returns.
//! - [`ResetBroadcaster`] only needs each peer to answer once, since the
//!   peer resets itself before replying.
//!
//! A single transport failure aborts the whole run. There are no retries:
//! a broken peer must not be skipped silently.

pub mod broadcast;
pub mod collector;
pub mod transport;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::config::PollPolicy;
use crate::identity::InstanceIdentity;

pub use broadcast::{BroadcastSummary, ResetBroadcaster};
pub use collector::{CollectSummary, PeerCollector};
pub use transport::{HttpTransport, PeerResponse, PeerTransport, TransportError};

/// Header carrying the sender's identity on requests and responses.
pub const HOSTNAME_HEADER: &str = "x-hostname";
/// Response header naming the artifact file in the body.
pub const FILENAME_HEADER: &str = "x-filename";

/// Errors that abort a collection or broadcast run.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error(
        "requests timeout exceeded: {seen} of {target} replicas answered within {budget:?}"
    )]
    BudgetExceeded {
        seen: usize,
        target: usize,
        budget: Duration,
    },

    #[error("failed to perform request to {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("response from {url} is missing the {header} header")]
    MissingHeader { url: String, header: &'static str },

    #[error("peer {identity} sent an unusable artifact filename {filename:?}")]
    InvalidFilename { identity: String, filename: String },

    #[error("failed to persist artifact from {identity}: {source}")]
    Persist {
        identity: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no peer URL available to reach {target} replicas")]
    NoTargets { target: usize },
}

impl PeerError {
    /// Whether the run ended because the overall budget elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::BudgetExceeded { .. })
    }
}

/// Identities observed during one run, seeded with the local identity.
#[derive(Debug, Clone)]
pub struct SeenHosts {
    set: HashSet<String>,
    order: Vec<String>,
}

impl SeenHosts {
    pub fn new(local: &InstanceIdentity) -> Self {
        let mut set = HashSet::new();
        set.insert(local.as_str().to_owned());
        Self {
            set,
            order: Vec::new(),
        }
    }

    /// Insert `identity`; returns `false` if it was already present.
    pub fn insert(&mut self, identity: &str) -> bool {
        if !self.set.insert(identity.to_owned()) {
            return false;
        }
        self.order.push(identity.to_owned());
        true
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.set.contains(identity)
    }

    /// Number of distinct identities, self included.
    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Peers in the order they were first observed (self excluded).
    pub fn into_peers(self) -> Vec<String> {
        self.order
    }
}

/// Result of a successful poll loop.
#[derive(Debug, Clone)]
pub(crate) struct PollOutcome {
    pub peers: Vec<String>,
    pub requests: usize,
    pub elapsed: Duration,
}

/// Inputs shared by the collector and the broadcaster.
#[derive(Clone, Copy)]
pub(crate) struct PollParams<'a> {
    pub transport: &'a dyn PeerTransport,
    pub identity: &'a InstanceIdentity,
    pub target: usize,
    pub policy: PollPolicy,
}

/// Poll `targets` round-robin until `target` distinct identities (self
/// included) have answered, calling `on_new_peer` once per new identity.
pub(crate) async fn poll_distinct<F>(
    params: PollParams<'_>,
    targets: &[String],
    mut on_new_peer: F,
) -> Result<PollOutcome, PeerError>
where
    F: FnMut(&str, PeerResponse) -> Result<(), PeerError>,
{
    let mut seen = SeenHosts::new(params.identity);
    let mut cursor = targets.iter().cycle();
    let mut requests = 0usize;
    let start = Instant::now();

    while seen.len() < params.target {
        if start.elapsed() > params.policy.total_budget {
            return Err(PeerError::BudgetExceeded {
                seen: seen.len(),
                target: params.target,
                budget: params.policy.total_budget,
            });
        }

        let Some(url) = cursor.next() else {
            return Err(PeerError::NoTargets {
                target: params.target,
            });
        };

        requests += 1;
        let response = params
            .transport
            .get(url, params.identity, params.policy.request_timeout)
            .await
            .map_err(|source| PeerError::Transport {
                url: url.clone(),
                source,
            })?;

        let Some(peer) = response.identity.clone() else {
            return Err(PeerError::MissingHeader {
                url: url.clone(),
                header: HOSTNAME_HEADER,
            });
        };

        if !seen.insert(&peer) {
            tracing::debug!(%peer, %url, "duplicate replica, skipping");
            continue;
        }

        tracing::debug!(%peer, seen = seen.len(), target = params.target, "new replica");
        on_new_peer(&peer, response)?;
    }

    Ok(PollOutcome {
        peers: seen.into_peers(),
        requests,
        elapsed: start.elapsed(),
    })
}

/// Turn an identity into a safe directory-name prefix.
pub fn dir_prefix(identity: &str) -> String {
    let cleaned: String = identity
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "peer".to_owned()
    } else {
        cleaned.to_owned()
    }
}

/// Whether a peer-supplied filename can be joined onto a directory safely.
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
