//! Outbound requests to sibling replicas.

use std::time::Duration;

use async_trait::async_trait;

use super::{FILENAME_HEADER, HOSTNAME_HEADER};
use crate::identity::InstanceIdentity;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// What a peer answered, reduced to the parts the protocol reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerResponse {
    pub status: u16,
    /// Value of the `x-hostname` response header.
    pub identity: Option<String>,
    /// Value of the `x-filename` response header.
    pub filename: Option<String>,
    pub body: Vec<u8>,
}

/// Issues one GET to a peer endpoint.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// GET `url` with `identity` in the `x-hostname` header, bounded by
    /// `timeout`. The status code is reported but not judged.
    async fn get(
        &self,
        url: &str,
        identity: &InstanceIdentity,
        timeout: Duration,
    ) -> Result<PeerResponse, TransportError>;
}

// Compile-time assertion: PeerTransport must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn PeerTransport) {}
};

/// [`PeerTransport`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("podcov/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn header_string(headers: &reqwest::header::HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        identity: &InstanceIdentity,
        timeout: Duration,
    ) -> Result<PeerResponse, TransportError> {
        let classify = |err: reqwest::Error| {
            if err.is_timeout() {
                TransportError::Timeout(timeout)
            } else {
                TransportError::Http(err)
            }
        };

        let resp = self
            .client
            .get(url)
            .header(HOSTNAME_HEADER, identity.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status().as_u16();
        let identity = header_string(resp.headers(), HOSTNAME_HEADER);
        let filename = header_string(resp.headers(), FILENAME_HEADER);
        let body = resp.bytes().await.map_err(classify)?.to_vec();

        Ok(PeerResponse {
            status,
            identity,
            filename,
            body,
        })
    }
}
