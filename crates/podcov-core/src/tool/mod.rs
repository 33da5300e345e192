//! External coverage tool interface.
//!
//! Merging several replicas' artifacts, computing the percent report and
//! rendering HTML are all delegated to an external tool. The [`CoverageTool`]
//! trait keeps the peer protocol testable without spawning processes;
//! [`CovdataTool`] drives the real `covdata` / `cover` commands.

pub mod covdata;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

pub use covdata::CovdataTool;

/// Errors from invoking the external coverage tool.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed (exit {code:?}):\n{output}")]
    Exit {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("{command} timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    #[error("coverage tool I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Merge, summarize and render coverage artifacts.
#[async_trait]
pub trait CoverageTool: Send + Sync {
    /// Human-readable name (e.g. "covdata").
    fn name(&self) -> &str;

    /// Merge every directory in `inputs` into `output`.
    async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ToolError>;

    /// Produce the textual percent report for the data in `input`.
    async fn percent(&self, input: &Path) -> Result<String, ToolError>;

    /// Render an HTML report for the data in `input`, using `workdir` for
    /// intermediate files.
    async fn render_html(&self, input: &Path, workdir: &Path) -> Result<Vec<u8>, ToolError>;
}

// Compile-time assertion: CoverageTool must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn CoverageTool) {}
};
