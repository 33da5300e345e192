//! Recognise requests that a replica sent to itself.
//!
//! Peer polls go through the load balancer, which may route them straight
//! back to the replica that issued them. Such a request must be answered
//! immediately, before any counters are dumped or reset, and the answer must
//! still carry `x-hostname` so the caller can discard it as a duplicate.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::identity::InstanceIdentity;
use crate::peers::HOSTNAME_HEADER;

/// Who sent an inbound coverage request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOrigin {
    /// This replica, looped back through the load balancer.
    Own,
    /// Another replica polling through the load balancer.
    Peer(String),
    /// An operator or any client that did not identify itself.
    Operator,
}

pub fn classify(claimed: Option<&str>, local: &InstanceIdentity) -> RequestOrigin {
    match claimed {
        Some(id) if id == local.as_str() => RequestOrigin::Own,
        Some(id) => RequestOrigin::Peer(id.to_owned()),
        None => RequestOrigin::Operator,
    }
}

pub fn classify_headers(headers: &HeaderMap, local: &InstanceIdentity) -> RequestOrigin {
    let claimed = headers.get(HOSTNAME_HEADER).and_then(|v| v.to_str().ok());
    classify(claimed, local)
}

pub fn is_self_originated(headers: &HeaderMap, local: &InstanceIdentity) -> bool {
    classify_headers(headers, local) == RequestOrigin::Own
}

/// 200 with no body, echoing the local identity.
pub fn short_circuit(local: &InstanceIdentity) -> Response {
    (StatusCode::OK, [(HOSTNAME_HEADER, local.to_string())]).into_response()
}
