use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{PeerError, PeerTransport, PollParams, dir_prefix, is_safe_filename, poll_distinct};
use crate::config::PollPolicy;
use crate::identity::InstanceIdentity;
use crate::logger::CoverageLogger;
use crate::runtime::CoverageRuntime;

/// Outcome of a successful collection.
#[derive(Debug, Clone)]
pub struct CollectSummary {
    /// Peers whose artifact was stored, in the order they answered.
    pub peers: Vec<String>,
    /// Directories the artifacts were written to, parallel to `peers`.
    pub artifact_dirs: Vec<PathBuf>,
    /// Requests issued, duplicates included.
    pub requests: usize,
    pub elapsed: Duration,
}

/// Gathers one coverage artifact from every distinct replica.
pub struct PeerCollector<'a> {
    transport: &'a dyn PeerTransport,
    runtime: &'a dyn CoverageRuntime,
    logger: &'a dyn CoverageLogger,
    identity: &'a InstanceIdentity,
    target: usize,
    policy: PollPolicy,
}

impl<'a> PeerCollector<'a> {
    pub fn new(
        transport: &'a dyn PeerTransport,
        runtime: &'a dyn CoverageRuntime,
        logger: &'a dyn CoverageLogger,
        identity: &'a InstanceIdentity,
        target: usize,
        policy: PollPolicy,
    ) -> Self {
        Self {
            transport,
            runtime,
            logger,
            identity,
            target,
            policy,
        }
    }

    /// Poll `targets` until every replica has contributed an artifact to
    /// `scratch_dir`.
    ///
    /// Each new replica gets a fresh subdirectory named after its identity,
    /// holding the counter file it sent (if any) plus a metadata dump
    /// written locally. Duplicate answers are discarded. The first transport error
    /// aborts the run, as does exceeding the overall budget.
    pub async fn collect(
        &self,
        scratch_dir: &Path,
        targets: &[String],
    ) -> Result<CollectSummary, PeerError> {
        let params = PollParams {
            transport: self.transport,
            identity: self.identity,
            target: self.target,
            policy: self.policy,
        };

        let mut artifact_dirs = Vec::new();
        let outcome = poll_distinct(params, targets, |peer, response| {
            let filename = response.filename.as_deref();
            let dir = persist_artifact(self.runtime, scratch_dir, peer, filename, &response.body)?;
            match filename {
                Some(name) => self.logger.info(&format!(
                    "stored coverage artifact {name} from {peer} ({} bytes)",
                    response.body.len()
                )),
                None => self
                    .logger
                    .info(&format!("{peer} has no counters, contributing metadata only")),
            }
            artifact_dirs.push(dir);
            Ok(())
        })
        .await?;

        Ok(CollectSummary {
            peers: outcome.peers,
            artifact_dirs,
            requests: outcome.requests,
            elapsed: outcome.elapsed,
        })
    }
}

/// Write one peer's artifact into a new subdirectory of `scratch_dir`.
///
/// Counters without matching metadata cannot be interpreted, so the local
/// metadata is dumped next to the received counter file. A peer with no
/// counters (no filename, empty body) contributes the metadata alone.
pub fn persist_artifact(
    runtime: &dyn CoverageRuntime,
    scratch_dir: &Path,
    identity: &str,
    filename: Option<&str>,
    body: &[u8],
) -> Result<PathBuf, PeerError> {
    let counters = match filename {
        Some(name) if is_safe_filename(name) => Some(name),
        None if body.is_empty() => None,
        other => {
            return Err(PeerError::InvalidFilename {
                identity: identity.to_owned(),
                filename: other.unwrap_or_default().to_owned(),
            });
        }
    };

    let persist = |source| PeerError::Persist {
        identity: identity.to_owned(),
        source,
    };

    let dir = tempfile::Builder::new()
        .prefix(&format!("{}-", dir_prefix(identity)))
        .tempdir_in(scratch_dir)
        .map_err(persist)?
        .keep();

    runtime.write_meta_dir(&dir).map_err(persist)?;
    if let Some(name) = counters {
        fs::write(dir.join(name), body).map_err(persist)?;
    }
    Ok(dir)
}
