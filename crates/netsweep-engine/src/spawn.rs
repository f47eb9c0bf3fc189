//! The subprocess seam.
//!
//! The executor talks to the external tool through the [`ToolSpawner`]
//! trait so tests can substitute a scripted double (and count spawns).
//! The real implementation wraps `tokio::process::Command`.

use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::debug;

/// How a tool process ended.
#[derive(Debug, Clone)]
pub struct ToolExit {
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
    /// Everything the tool wrote to stderr.
    pub stderr: String,
}

/// A live tool subprocess.
#[async_trait]
pub trait RunningTool: Send {
    /// Read the next chunk of stdout into `buf`. Returns 0 at end of stream.
    async fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Wait for the process to exit and collect its stderr.
    async fn wait(&mut self) -> io::Result<ToolExit>;

    /// Request a graceful stop (SIGTERM on Unix).
    async fn terminate(&mut self);

    /// Force-kill the process.
    async fn kill(&mut self);
}

/// Spawns tool subprocesses.
#[async_trait]
pub trait ToolSpawner: Send + Sync {
    /// Launch the tool with the given arguments, stdout piped for
    /// incremental consumption, stderr captured.
    async fn spawn(&self, program: &Path, args: &[String]) -> io::Result<Box<dyn RunningTool>>;
}

/// The production spawner: real subprocesses via `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSpawner;

#[async_trait]
impl ToolSpawner for ProcessSpawner {
    async fn spawn(&self, program: &Path, args: &[String]) -> io::Result<Box<dyn RunningTool>> {
        debug!(program = %program.display(), ?args, "spawning scan tool");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout not piped"))?;

        // Drain stderr concurrently so the child never blocks on a full pipe.
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("child stderr not piped"))?;
        let stderr_task = tokio::spawn(async move {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text).await;
            text
        });

        Ok(Box::new(ProcessTool {
            child,
            stdout,
            stderr_task: Some(stderr_task),
        }))
    }
}

struct ProcessTool {
    child: Child,
    stdout: ChildStdout,
    stderr_task: Option<JoinHandle<String>>,
}

#[async_trait]
impl RunningTool for ProcessTool {
    async fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdout.read(buf).await
    }

    async fn wait(&mut self) -> io::Result<ToolExit> {
        let status = self.child.wait().await?;
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        Ok(ToolExit {
            code: status.code(),
            stderr,
        })
    }

    async fn terminate(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            // SAFETY: plain syscall on a pid we own.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            return;
        }
        let _ = self.child.start_kill();
    }

    async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}
