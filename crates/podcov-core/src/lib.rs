//! Runtime code-coverage endpoints that aggregate across every replica of a
//! horizontally scaled deployment.
//!
//! A replica only knows a load-balanced entry URL and how many replicas
//! exist. The [`peers`] module discovers the rest by polling that URL with a
//! self-identifying header until every distinct identity has answered, or
//! until the time budget runs out.
//!
//! ```text
//! GET /debug/coverage/
//!     |
//!     v
//! ScratchArea <- local artifact (CoverageRuntime)
//!     |
//!     v
//! PeerCollector --GET /debug/coverage/profile (x-hostname)--> load balancer
//!     |
//!     v
//! CoverageTool::merge -> CoverageTool::percent -> aggregate::aggregate
//! ```

pub mod aggregate;
pub mod config;
pub mod context;
pub mod guard;
pub mod http;
pub mod identity;
pub mod logger;
pub mod peers;
pub mod runtime;
pub mod scratch;
pub mod tool;

pub use aggregate::{AggregateError, PercentageReport, aggregate, parse_report};
pub use config::{ConfigError, CoverageConfig, PeerSource, PollPolicy};
pub use context::CoverageContext;
pub use identity::InstanceIdentity;
pub use logger::{CoverageLogger, TracingLogger};
pub use peers::{PeerCollector, PeerError, ResetBroadcaster};
pub use runtime::{CoverDirRuntime, CoverageRuntime};
pub use tool::{CovdataTool, CoverageTool, ToolError};
