use std::time::Duration;

use super::{PeerError, PeerTransport, PollParams, poll_distinct};
use crate::config::PollPolicy;
use crate::identity::InstanceIdentity;
use crate::logger::CoverageLogger;

/// Outcome of a successful reset broadcast.
#[derive(Debug, Clone)]
pub struct BroadcastSummary {
    /// Peers that acknowledged the reset, in the order they answered.
    pub peers: Vec<String>,
    pub requests: usize,
    pub elapsed: Duration,
}

/// Keeps hitting the reset endpoint until every replica has acknowledged.
///
/// A peer clears its own counters before it replies, so the broadcaster only
/// has to see each identity once.
pub struct ResetBroadcaster<'a> {
    transport: &'a dyn PeerTransport,
    logger: &'a dyn CoverageLogger,
    identity: &'a InstanceIdentity,
    target: usize,
    policy: PollPolicy,
}

impl<'a> ResetBroadcaster<'a> {
    pub fn new(
        transport: &'a dyn PeerTransport,
        logger: &'a dyn CoverageLogger,
        identity: &'a InstanceIdentity,
        target: usize,
        policy: PollPolicy,
    ) -> Self {
        Self {
            transport,
            logger,
            identity,
            target,
            policy,
        }
    }

    pub async fn broadcast(&self, targets: &[String]) -> Result<BroadcastSummary, PeerError> {
        let params = PollParams {
            transport: self.transport,
            identity: self.identity,
            target: self.target,
            policy: self.policy,
        };

        let outcome = poll_distinct(params, targets, |peer, _response| {
            self.logger.info(&format!("coverage counters reset on {peer}"));
            Ok(())
        })
        .await?;

        Ok(BroadcastSummary {
            peers: outcome.peers,
            requests: outcome.requests,
            elapsed: outcome.elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::logger::TracingLogger;
    use crate::peers::{PeerResponse, TransportError};

    /// Answers as `pod-(n % replicas)` for the n-th request.
    struct Rotating {
        replicas: usize,
        calls: AtomicUsize,
        seen_headers: Mutex<Vec<String>>,
    }

    impl Rotating {
        fn new(replicas: usize) -> Self {
            Self {
                replicas,
                calls: AtomicUsize::new(0),
                seen_headers: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PeerTransport for Rotating {
        async fn get(
            &self,
            _url: &str,
            identity: &InstanceIdentity,
            _timeout: Duration,
        ) -> Result<PeerResponse, TransportError> {
            self.seen_headers
                .lock()
                .unwrap()
                .push(identity.to_string());
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PeerResponse {
                status: 200,
                identity: Some(format!("pod-{}", n % self.replicas)),
                ..PeerResponse::default()
            })
        }
    }

    struct Refusing;

    #[async_trait]
    impl PeerTransport for Refusing {
        async fn get(
            &self,
            _url: &str,
            _identity: &InstanceIdentity,
            timeout: Duration,
        ) -> Result<PeerResponse, TransportError> {
            Err(TransportError::Timeout(timeout))
        }
    }

    fn targets() -> Vec<String> {
        vec!["http://lb/debug/coverage/reset".to_string()]
    }

    fn policy() -> PollPolicy {
        PollPolicy::new(Duration::from_millis(10), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn stops_after_every_replica_answered() {
        let transport = Rotating::new(4);
        let identity = InstanceIdentity::new("pod-2");
        let broadcaster =
            ResetBroadcaster::new(&transport, &TracingLogger, &identity, 4, policy());

        let summary = broadcaster.broadcast(&targets()).await.unwrap();
        // pod-0 and pod-1 are new, pod-2 is self, pod-3 completes the set.
        assert_eq!(summary.peers, vec!["pod-0", "pod-1", "pod-3"]);
        assert_eq!(summary.requests, 4);
        assert!(
            transport
                .seen_headers
                .lock()
                .unwrap()
                .iter()
                .all(|h| h == "pod-2"),
            "every request must carry the local identity"
        );
    }

    #[tokio::test]
    async fn transport_error_aborts() {
        let identity = InstanceIdentity::new("pod-0");
        let broadcaster = ResetBroadcaster::new(&Refusing, &TracingLogger, &identity, 2, policy());

        let err = broadcaster.broadcast(&targets()).await.unwrap_err();
        match err {
            PeerError::Transport { source, .. } => {
                assert!(matches!(source, TransportError::Timeout(_)));
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }
}
