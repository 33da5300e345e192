//! Process identity used to tell replicas apart.
//!
//! Every outbound peer request carries the identity in `x-hostname`, and
//! every termination and dedup decision compares against it, so it must not
//! change for the lifetime of the process.

use std::fmt;
use std::sync::{Arc, OnceLock};

/// Prefix of the identity synthesized when the hostname is unusable.
pub const FALLBACK_PREFIX: &str = "generated-hostname-";

/// A token identifying one running replica (its hostname, or a random
/// fallback).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceIdentity(Arc<str>);

impl InstanceIdentity {
    /// Wrap an explicit identity (useful for tests and static configs).
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    /// Resolve the identity from the OS hostname.
    pub fn resolve() -> Self {
        Self::resolve_with(|| gethostname::gethostname().into_string().ok())
    }

    /// Resolve the identity from `lookup`, falling back to
    /// `generated-hostname-<random>` when it yields nothing usable.
    pub fn resolve_with(lookup: impl FnOnce() -> Option<String>) -> Self {
        match lookup().map(|h| h.trim().to_owned()) {
            Some(host) if !host.is_empty() => Self::new(host),
            _ => {
                let fallback = format!("{FALLBACK_PREFIX}{}", rand::random::<u64>());
                tracing::debug!(identity = %fallback, "hostname lookup failed, using fallback");
                Self::new(fallback)
            }
        }
    }

    /// The identity of this process, resolved on first use and cached.
    pub fn local() -> &'static InstanceIdentity {
        static LOCAL: IdentityCell = IdentityCell::new();
        LOCAL.get_or_resolve()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this identity was synthesized rather than read from the OS.
    pub fn is_generated(&self) -> bool {
        self.0.starts_with(FALLBACK_PREFIX)
    }
}

impl fmt::Display for InstanceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for InstanceIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolve-once storage for an [`InstanceIdentity`].
#[derive(Debug, Default)]
pub struct IdentityCell {
    cell: OnceLock<InstanceIdentity>,
}

impl IdentityCell {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Return the cached identity, resolving it from the OS hostname first.
    pub fn get_or_resolve(&self) -> &InstanceIdentity {
        self.cell.get_or_init(InstanceIdentity::resolve)
    }

    /// Return the cached identity, resolving it through `lookup` on first
    /// call. Later calls ignore `lookup`.
    pub fn get_or_resolve_with(
        &self,
        lookup: impl FnOnce() -> Option<String>,
    ) -> &InstanceIdentity {
        self.cell.get_or_init(|| InstanceIdentity::resolve_with(lookup))
    }
}
