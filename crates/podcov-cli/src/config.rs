//! Configuration file management for podcov.
//!
//! Provides a TOML-based config file at `~/.config/podcov/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use podcov_core::{CovdataTool, CoverDirRuntime, CoverageConfig, PeerSource, PollPolicy};

pub const ENV_REPLICAS: &str = "PODCOV_REPLICAS";
pub const ENV_ENTRY_URL: &str = "PODCOV_ENTRY_URL";
pub const ENV_COVER_DIR: &str = "PODCOV_COVER_DIR";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub coverage: CoverageSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub tool: ToolSection,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageSection {
    /// Replicas expected to answer, this one included.
    pub replicas: usize,
    /// Load-balanced base URL peers are polled through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_url: Option<String>,
    /// Explicit replica base URLs. Takes precedence over `entry_url`.
    pub peers: Vec<String>,
    pub request_timeout_ms: u64,
    pub total_budget_ms: u64,
}

impl Default for CoverageSection {
    fn default() -> Self {
        Self {
            replicas: CoverageConfig::DEFAULT_REPLICAS,
            entry_url: None,
            peers: Vec::new(),
            request_timeout_ms: PollPolicy::DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            total_budget_ms: PollPolicy::DEFAULT_TOTAL_BUDGET.as_millis() as u64,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Directory the instrumented process writes `covmeta.*` and
    /// `covcounters.*` into.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSection {
    pub program: String,
    pub prefix: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ToolSection {
    fn default() -> Self {
        Self {
            program: "go".to_string(),
            prefix: vec!["tool".to_string()],
            timeout_secs: CovdataTool::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 6060,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the podcov config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/podcov` or `~/.config/podcov`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("podcov");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("podcov")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<ConfigFile> {
    toml::from_str(contents).context("failed to parse config file")
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values given on the `podcov serve` command line.
#[derive(Debug, Default, Clone)]
pub struct ServeOverrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub replicas: Option<usize>,
    pub entry_url: Option<String>,
    pub cover_dir: Option<PathBuf>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct PodcovConfig {
    pub coverage: CoverageConfig,
    pub cover_dir: PathBuf,
    pub tool: CovdataTool,
    pub bind: String,
    pub port: u16,
}

impl PodcovConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Replicas: `--replicas` > `PODCOV_REPLICAS` > `coverage.replicas` > 1
    /// - Entry URL: `--entry-url` > `PODCOV_ENTRY_URL` > `coverage.entry_url` > derived per request
    /// - Cover dir: `--cover-dir` > `PODCOV_COVER_DIR` > `runtime.cover_dir` > `GOCOVERDIR` > error
    pub fn resolve(cli: &ServeOverrides) -> Result<Self> {
        let file_config = load_config().ok();
        Self::resolve_from(cli, file_config, |key| std::env::var(key).ok())
    }

    /// [`PodcovConfig::resolve`] with the config file and environment
    /// supplied by the caller.
    pub fn resolve_from(
        cli: &ServeOverrides,
        file_config: Option<ConfigFile>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let replicas = match (cli.replicas, env(ENV_REPLICAS)) {
            (Some(n), _) => n,
            (None, Some(raw)) => raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_REPLICAS} is not a number: {raw:?}"))?,
            (None, None) => file.coverage.replicas,
        };

        let entry_url = cli
            .entry_url
            .clone()
            .or_else(|| env(ENV_ENTRY_URL))
            .or(file.coverage.entry_url)
            .filter(|url| !url.trim().is_empty());
        if let Some(url) = &entry_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("entry URL must be an http(s) URL, got {url:?}");
            }
        }

        let cover_dir = cli
            .cover_dir
            .clone()
            .or_else(|| env(ENV_COVER_DIR).map(PathBuf::from))
            .or(file.runtime.cover_dir)
            .or_else(|| CoverDirRuntime::from_env().map(|rt| rt.source().to_path_buf()));
        let Some(cover_dir) = cover_dir else {
            bail!(
                "coverage directory not set; pass --cover-dir, set {ENV_COVER_DIR} or GOCOVERDIR, or run `podcov init`"
            );
        };

        let policy = PollPolicy::new(
            Duration::from_millis(file.coverage.request_timeout_ms),
            Duration::from_millis(file.coverage.total_budget_ms),
        )?;
        let peers = PeerSource::static_list(file.coverage.peers)?;

        let mut coverage = CoverageConfig {
            policy,
            peers,
            entry_url,
            ..CoverageConfig::default()
        };
        coverage.set_target_replicas(replicas)?;

        let tool = CovdataTool::new(file.tool.program, file.tool.prefix)
            .with_timeout(Duration::from_secs(file.tool.timeout_secs));

        Ok(Self {
            coverage,
            cover_dir,
            tool,
            bind: cli.bind.clone().unwrap_or(file.server.bind),
            port: cli.port.unwrap_or(file.server.port),
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
