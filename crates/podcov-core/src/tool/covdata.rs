use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::{CoverageTool, ToolError};

/// Drives the `covdata` and `cover` subcommands of an external toolchain,
/// by default `go tool covdata ...` / `go tool cover ...`.
#[derive(Debug, Clone)]
pub struct CovdataTool {
    program: String,
    prefix: Vec<String>,
    timeout: Duration,
}

impl CovdataTool {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Use `program` with `prefix` arguments before each subcommand
    /// (`go` + `["tool"]` for the Go toolchain).
    pub fn new(program: impl Into<String>, prefix: Vec<String>) -> Self {
        Self {
            program: program.into(),
            prefix,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Render the command line for error messages.
    fn describe(&self, args: &[String]) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.prefix.iter().map(String::as_str))
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run one subcommand and return its combined stdout and stderr.
    async fn run(&self, args: Vec<String>) -> Result<String, ToolError> {
        let command = self.describe(&args);
        tracing::debug!(%command, "running coverage tool");

        let mut child = Command::new(&self.program)
            .args(&self.prefix)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                command: command.clone(),
                source,
            })?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let read_stdout = async {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stdout_pipe {
                pipe.read_to_end(&mut buf).await.ok();
            }
            buf
        };
        let read_stderr = async {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stderr_pipe {
                pipe.read_to_end(&mut buf).await.ok();
            }
            buf
        };

        let waited = tokio::time::timeout(self.timeout, async {
            tokio::join!(child.wait(), read_stdout, read_stderr)
        })
        .await;

        match waited {
            Ok((Ok(status), mut stdout, stderr)) => {
                stdout.extend_from_slice(&stderr);
                let output = String::from_utf8_lossy(&stdout).into_owned();
                if status.success() {
                    Ok(output)
                } else {
                    Err(ToolError::Exit {
                        command,
                        code: status.code(),
                        output,
                    })
                }
            }
            Ok((Err(source), _, _)) => Err(ToolError::Spawn { command, source }),
            Err(_) => {
                let _ = child.kill().await;
                Err(ToolError::TimedOut {
                    command,
                    timeout: self.timeout,
                })
            }
        }
    }
}

impl Default for CovdataTool {
    fn default() -> Self {
        Self::new("go", vec!["tool".to_string()])
    }
}

#[async_trait]
impl CoverageTool for CovdataTool {
    fn name(&self) -> &str {
        "covdata"
    }

    async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ToolError> {
        let joined = inputs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.run(vec![
            "covdata".to_string(),
            "merge".to_string(),
            format!("-i={joined}"),
            format!("-o={}", output.display()),
        ])
        .await
        .map(|_| ())
    }

    async fn percent(&self, input: &Path) -> Result<String, ToolError> {
        self.run(vec![
            "covdata".to_string(),
            "percent".to_string(),
            format!("-i={}", input.display()),
        ])
        .await
    }

    async fn render_html(&self, input: &Path, workdir: &Path) -> Result<Vec<u8>, ToolError> {
        let text_profile = workdir.join("coverage.out");
        let html_file = workdir.join("coverage.html");

        self.run(vec![
            "covdata".to_string(),
            "textfmt".to_string(),
            format!("-i={}", input.display()),
            format!("-o={}", text_profile.display()),
        ])
        .await?;

        self.run(vec![
            "cover".to_string(),
            format!("-html={}", text_profile.display()),
            format!("-o={}", html_file.display()),
        ])
        .await?;

        Ok(tokio::fs::read(&html_file).await?)
    }
}
