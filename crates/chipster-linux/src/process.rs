use std::process::{ExitStatus, Stdio};

use anyhow::{Context, Result};
use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use chipster_platform::process::{ChildProcess, OutputReader, ProcessSpawner, SpawnSpec};

/// Spawns children in their own process group with piped output.
pub struct TokioProcessSpawner;

impl TokioProcessSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TokioProcessSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSpawner for TokioProcessSpawner {
    fn spawn(&self, spec: &SpawnSpec) -> Result<Box<dyn ChildProcess>> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {}", spec.program.display()))?;
        let pid = child.id();
        info!("spawned {} (pid {:?})", spec.program.display(), pid);

        Ok(Box::new(TokioChild { child, pid }))
    }
}

pub struct TokioChild {
    child: Child,
    /// Also the process group id; kept after the child is reaped
    pid: Option<u32>,
}

#[async_trait]
impl ChildProcess for TokioChild {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    fn take_stdout(&mut self) -> Option<OutputReader> {
        self.child.stdout.take().map(|s| Box::new(s) as OutputReader)
    }

    fn take_stderr(&mut self) -> Option<OutputReader> {
        self.child.stderr.take().map(|s| Box::new(s) as OutputReader)
    }

    fn try_exit_status(&mut self) -> Result<Option<ExitStatus>> {
        self.child.try_wait().context("failed to poll child process")
    }

    async fn terminate(&mut self) -> Result<()> {
        if let Some(status) = self.child.try_wait().context("failed to poll child process")? {
            debug!("process {:?} already exited: {}", self.pid, status);
        } else if let Some(pid) = self.pid {
            // The whole group goes: php-cgi forks its own workers
            let pgid = Pid::from_raw(pid as i32);
            if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                warn!("killpg {} failed: {}, killing leader only", pid, e);
                self.child.start_kill().context("failed to kill child process")?;
            }
        } else {
            self.child.start_kill().context("failed to kill child process")?;
        }

        let status = self.child.wait().await.context("failed to reap child process")?;
        debug!("process {:?} terminated: {}", self.pid, status);
        Ok(())
    }
}
