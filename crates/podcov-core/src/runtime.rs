//! Access to the instrumented process's coverage counters and metadata.
//!
//! The counter writer itself lives outside this crate; [`CoverageRuntime`]
//! is the seam it plugs into. [`CoverDirRuntime`] covers the common setup
//! where the instrumented binary keeps its raw files in a coverage directory
//! (for instance the one named by `GOCOVERDIR`).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// File-name prefix of counter dumps.
pub const COUNTERS_PREFIX: &str = "covcounters";
/// File-name prefix of metadata dumps.
pub const META_PREFIX: &str = "covmeta";

/// Dump and reset the current process's coverage data.
pub trait CoverageRuntime: Send + Sync {
    /// Write the static metadata (region ids to source positions) into `dir`.
    fn write_meta_dir(&self, dir: &Path) -> io::Result<()>;

    /// Write the current counter values into `dir`. Writing nothing is not
    /// an error: a freshly reset process has no counters.
    fn write_counters_dir(&self, dir: &Path) -> io::Result<()>;

    /// Zero every counter of this process.
    fn clear_counters(&self) -> io::Result<()>;
}

// Compile-time assertion: CoverageRuntime must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn CoverageRuntime) {}
};

fn counter_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(COUNTERS_PREFIX))
        .map(|entry| entry.path())
        .collect();
    found.sort();
    Ok(found)
}

/// Return the first counter file in `dir`, sorted by name.
///
/// This is the one file a replica ships to its peers, so the local
/// contribution is narrowed to it too (see [`retain_counter_file`]).
pub fn find_counter_file(dir: &Path) -> io::Result<Option<PathBuf>> {
    Ok(counter_files(dir)?.into_iter().next())
}

/// Delete every counter file in `dir` except the one [`find_counter_file`]
/// picks, and return that one.
pub fn retain_counter_file(dir: &Path) -> io::Result<Option<PathBuf>> {
    let mut files = counter_files(dir)?.into_iter();
    let kept = files.next();
    for extra in files {
        fs::remove_file(extra)?;
    }
    Ok(kept)
}

/// Runtime backed by a directory the instrumented process writes into.
#[derive(Debug, Clone)]
pub struct CoverDirRuntime {
    source: PathBuf,
}

impl CoverDirRuntime {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Build from the `GOCOVERDIR` environment variable, if set.
    pub fn from_env() -> Option<Self> {
        std::env::var_os("GOCOVERDIR")
            .filter(|v| !v.is_empty())
            .map(Self::new)
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    fn copy_prefixed(&self, prefix: &str, dest: &Path) -> io::Result<usize> {
        fs::create_dir_all(dest)?;
        let mut copied = 0;
        for entry in fs::read_dir(&self.source)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(prefix) {
                continue;
            }
            fs::copy(entry.path(), dest.join(&name))?;
            copied += 1;
        }
        Ok(copied)
    }
}

impl CoverageRuntime for CoverDirRuntime {
    fn write_meta_dir(&self, dir: &Path) -> io::Result<()> {
        if self.copy_prefixed(META_PREFIX, dir)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no {META_PREFIX}* files in {}", self.source.display()),
            ));
        }
        Ok(())
    }

    fn write_counters_dir(&self, dir: &Path) -> io::Result<()> {
        self.copy_prefixed(COUNTERS_PREFIX, dir).map(|_| ())
    }

    fn clear_counters(&self) -> io::Result<()> {
        for entry in fs::read_dir(&self.source)? {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(COUNTERS_PREFIX)
            {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}
