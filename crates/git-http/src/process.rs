//! Streaming subprocess seam between the gateway and the `git` executable.
//!
//! Handlers only talk to [`GitBackend`]; [`GitCli`] is the production
//! implementation and tests swap in an in-memory fake.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;

use crate::service::Service;

pub type ProcessReader = Pin<Box<dyn AsyncRead + Send>>;
pub type ProcessWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Exit status reported by a finished subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// A running stateless-RPC subprocess.
///
/// Dropping `exit` before it resolves terminates the process.
pub struct ServiceProcess {
    pub stdin: ProcessWriter,
    pub stdout: ProcessReader,
    pub stderr: ProcessReader,
    pub exit: BoxFuture<'static, io::Result<ExitOutcome>>,
}

/// Buffered result of a short-lived git invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit: ExitOutcome,
}

#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub service: Service,
    pub dir: &'a Path,
    /// `KEY=value` pairs added on top of the inherited environment.
    pub env: &'a [String],
}

#[async_trait]
pub trait GitBackend: Send + Sync + 'static {
    /// Starts `<service> --stateless-rpc` with piped stdio.
    fn spawn_rpc(&self, invocation: &Invocation<'_>) -> io::Result<ServiceProcess>;

    /// Runs `<service> --stateless-rpc --advertise-refs` to completion.
    async fn advertise_refs(&self, invocation: &Invocation<'_>) -> io::Result<CommandOutput>;

    /// Regenerates `info/refs` and `objects/info/packs`.
    async fn update_server_info(&self, dir: &Path) -> io::Result<CommandOutput>;

    /// Reads a single repository config value, `None` when unset.
    async fn config_value(&self, dir: &Path, key: &str) -> io::Result<Option<String>>;
}

/// Shells out to the configured `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    executable: PathBuf,
}

impl GitCli {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    fn command(&self, dir: &Path, env: &[String]) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for pair in env {
            if let Some((key, value)) = pair.split_once('=') {
                cmd.env(key, value);
            }
        }
        cmd
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::other(format!("git {name} was not captured"))
}

#[async_trait]
impl GitBackend for GitCli {
    fn spawn_rpc(&self, invocation: &Invocation<'_>) -> io::Result<ServiceProcess> {
        let mut cmd = self.command(invocation.dir, invocation.env);
        cmd.arg(invocation.service.name())
            .arg("--stateless-rpc")
            .arg(invocation.dir)
            .stdin(Stdio::piped());

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        Ok(ServiceProcess {
            stdin: Box::pin(stdin),
            stdout: Box::pin(stdout),
            stderr: Box::pin(stderr),
            exit: Box::pin(async move { child.wait().await.map(ExitOutcome::from) }),
        })
    }

    async fn advertise_refs(&self, invocation: &Invocation<'_>) -> io::Result<CommandOutput> {
        let mut cmd = self.command(invocation.dir, invocation.env);
        cmd.arg(invocation.service.name())
            .arg("--stateless-rpc")
            .arg("--advertise-refs")
            .arg(".");
        let output = cmd.output().await?;
        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit: output.status.into(),
        })
    }

    async fn update_server_info(&self, dir: &Path) -> io::Result<CommandOutput> {
        let output = self.command(dir, &[]).arg("update-server-info").output().await?;
        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit: output.status.into(),
        })
    }

    async fn config_value(&self, dir: &Path, key: &str) -> io::Result<Option<String>> {
        let output = self
            .command(dir, &[])
            .args(["config", "--get", key])
            .output()
            .await?;
        match output.status.code() {
            Some(0) => Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            )),
            // git exits 1 when the key is not set
            Some(1) => Ok(None),
            _ => Err(io::Error::other(format!(
                "git config --get {key} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}
