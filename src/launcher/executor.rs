use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{CancelToken, LaunchError, LaunchRequest};
use crate::state::types::RunStatus;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// What a finished launch reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub status: RunStatus,
    pub output: String,
}

impl ExecutionOutcome {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Success,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            output: output.into(),
        }
    }

    pub fn simulated(output: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Simulated,
            output: output.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Runs the tasks of one launch request to completion.
///
/// Implementations should poll `cancel` and stop early once it is set.
pub trait CommandExecutor: Send + Sync {
    fn execute(
        &self,
        request: &LaunchRequest,
        cancel: &CancelToken,
    ) -> Result<ExecutionOutcome, LaunchError>;
}

/// `<runner> --taskfile "<path>" a b`
pub fn build_command_line(runner: &str, taskfile: Option<&Path>, names: &[String]) -> String {
    let mut line = runner.to_string();
    if let Some(path) = taskfile {
        line.push_str(&format!(" --taskfile \"{}\"", path.display()));
    }
    for name in names {
        line.push(' ');
        line.push_str(name);
    }
    line
}

/// One command line per task, for parallel mode.
pub fn build_parallel_lines(runner: &str, taskfile: Option<&Path>, names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|name| build_command_line(runner, taskfile, std::slice::from_ref(name)))
        .collect()
}

/// Spawns the task runner as a child process and captures its output.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    runner: String,
}

impl ShellExecutor {
    pub fn new(runner: impl Into<String>) -> Self {
        Self {
            runner: runner.into(),
        }
    }

    pub fn runner(&self) -> &str {
        &self.runner
    }

    fn command(&self, request: &LaunchRequest) -> Command {
        let mut command = Command::new(&self.runner);
        if let Some(path) = &request.taskfile {
            command.arg("--taskfile").arg(path);
        }
        command
            .args(&request.task_names)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl CommandExecutor for ShellExecutor {
    fn execute(
        &self,
        request: &LaunchRequest,
        cancel: &CancelToken,
    ) -> Result<ExecutionOutcome, LaunchError> {
        let line = build_command_line(
            &self.runner,
            request.taskfile.as_deref(),
            &request.task_names,
        );
        tracing::info!(target: "launcher", id = %request.id, "Running: {}", line);

        let mut child = self.command(request).spawn().map_err(|source| LaunchError::Spawn {
            command: line.clone(),
            source,
        })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let exit = wait_or_kill(&mut child, cancel);

        let mut output = join_output(stdout);
        let errors = join_output(stderr);
        if !errors.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&errors);
        }

        match exit {
            Some(status) if status.success() => Ok(ExecutionOutcome::succeeded(output)),
            Some(status) => {
                tracing::warn!(target: "launcher", id = %request.id, "Runner exited with {}", status);
                Ok(ExecutionOutcome::failed(output))
            }
            None => {
                tracing::info!(target: "launcher", id = %request.id, "Launch cancelled, runner killed");
                Ok(ExecutionOutcome::failed(output))
            }
        }
    }
}

/// Polls the child until it exits. Returns `None` when it was killed after
/// `cancel` was set or when waiting failed.
fn wait_or_kill(child: &mut Child, cancel: &CancelToken) -> Option<std::process::ExitStatus> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(target: "launcher", "Failed to poll runner: {}", e);
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
        }

        if cancel.is_cancelled() {
            if let Err(e) = child.kill() {
                tracing::warn!(target: "launcher", "Failed to kill runner: {}", e);
            }
            let _ = child.wait();
            return None;
        }

        thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_output(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Reports every launch as simulated without spawning anything.
#[derive(Debug, Clone)]
pub struct DryRunExecutor {
    runner: String,
}

impl DryRunExecutor {
    pub fn new(runner: impl Into<String>) -> Self {
        Self {
            runner: runner.into(),
        }
    }
}

impl Default for DryRunExecutor {
    fn default() -> Self {
        Self::new(crate::core::config::DEFAULT_RUNNER)
    }
}

impl CommandExecutor for DryRunExecutor {
    fn execute(
        &self,
        request: &LaunchRequest,
        _cancel: &CancelToken,
    ) -> Result<ExecutionOutcome, LaunchError> {
        let line = build_command_line(
            &self.runner,
            request.taskfile.as_deref(),
            &request.task_names,
        );
        tracing::debug!(target: "launcher", id = %request.id, "Dry run: {}", line);
        Ok(ExecutionOutcome::simulated(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_command_line_with_taskfile() {
        let line = build_command_line(
            "task",
            Some(Path::new("/work/Taskfile.yml")),
            &names(&["build", "test"]),
        );
        assert_eq!(line, "task --taskfile \"/work/Taskfile.yml\" build test");
    }

    #[test]
    fn test_command_line_without_taskfile() {
        assert_eq!(build_command_line("task", None, &names(&["lint"])), "task lint");
    }

    #[test]
    fn test_parallel_lines_one_per_task() {
        let lines = build_parallel_lines("task", None, &names(&["a", "b"]));
        assert_eq!(lines, vec!["task a", "task b"]);
    }

    #[test]
    fn test_dry_run_is_simulated() {
        let request = LaunchRequest::new(names(&["build"]), None);
        let outcome = DryRunExecutor::default()
            .execute(&request, &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Simulated);
        assert_eq!(outcome.output, "task build");
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_executor_captures_output() {
        let request = LaunchRequest::new(names(&["hello"]), None);
        let outcome = ShellExecutor::new("echo")
            .execute(&request, &CancelToken::new())
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.output.trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_executor_reports_failure() {
        let request = LaunchRequest::new(names(&["ignored"]), None);
        let outcome = ShellExecutor::new("false")
            .execute(&request, &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
    }

    #[test]
    fn test_shell_executor_spawn_error() {
        let request = LaunchRequest::new(names(&["build"]), None);
        let result = ShellExecutor::new("taskhub-no-such-runner-binary")
            .execute(&request, &CancelToken::new());
        assert!(matches!(result, Err(LaunchError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_executor_kills_on_cancel() {
        let request = LaunchRequest::new(names(&["30"]), None);
        let cancel = CancelToken::new();
        cancel.cancel();

        let started = std::time::Instant::now();
        let outcome = ShellExecutor::new("sleep").execute(&request, &cancel).unwrap();

        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
