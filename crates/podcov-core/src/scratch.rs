//! Per-request temporary storage for coverage artifacts.
//!
//! One subdirectory per contributing replica (this one included) and, after
//! merging, one `merged*` subdirectory. The whole tree is removed when the
//! [`ScratchArea`] is dropped, on success and error paths alike.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::identity::InstanceIdentity;
use crate::peers::dir_prefix;
use crate::runtime::{CoverageRuntime, retain_counter_file};

const MERGED_PREFIX: &str = "merged";

#[derive(Debug)]
pub struct ScratchArea {
    dir: TempDir,
}

impl ScratchArea {
    /// Create a scratch area under the system temp directory.
    pub fn create() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("coverage").tempdir()?;
        Ok(Self { dir })
    }

    /// Create a scratch area under `parent`.
    pub fn create_in(parent: &Path) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("coverage")
            .tempdir_in(parent)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Dump this process's metadata and counters into its own subdirectory.
    ///
    /// Only the counter file a peer would receive from our profile endpoint
    /// is kept, so every replica contributes the same way.
    pub fn write_local(
        &self,
        runtime: &dyn CoverageRuntime,
        identity: &InstanceIdentity,
    ) -> io::Result<PathBuf> {
        let sub = tempfile::Builder::new()
            .prefix(&format!("{}-", dir_prefix(identity.as_str())))
            .tempdir_in(self.path())?
            .keep();
        runtime.write_meta_dir(&sub)?;
        runtime.write_counters_dir(&sub)?;
        retain_counter_file(&sub)?;
        Ok(sub)
    }

    /// Every subdirectory, sorted by path. Call before
    /// [`ScratchArea::create_merged_dir`], which adds one more.
    pub fn contributor_dirs(&self) -> io::Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(self.path())? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Create the directory the merge step writes into.
    pub fn create_merged_dir(&self) -> io::Result<PathBuf> {
        Ok(tempfile::Builder::new()
            .prefix(MERGED_PREFIX)
            .tempdir_in(self.path())?
            .keep())
    }
}
