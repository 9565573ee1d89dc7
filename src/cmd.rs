//! Privileged command execution
//!
//! Provides:
//! - The `Runner` trait, the single seam through which all `ip`/`iptables`
//!   invocations flow
//! - `SystemRunner`, the real implementation with a bounded per-command
//!   timeout
//! - `checked`/`tolerant` helpers mapping exit status to the error taxonomy

use crate::error::{Error, Result};
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Captured result of an external command
#[derive(Debug, Clone)]
pub struct CmdOutput {
    /// Exit code, None when killed by a signal
    pub code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CmdOutput {
    /// True when the command exited with status zero
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Executes external commands on behalf of the core components.
///
/// Every kernel mutation and structured state query goes through this
/// trait, so the components above it can be exercised without root.
pub trait Runner {
    /// Run a command to completion and capture its output
    fn run(&self, program: &str, args: &[&str]) -> Result<CmdOutput>;

    /// Start a long-lived process detached from the caller, in its own
    /// session with stdio closed, and return its pid. The process is
    /// not waited on or supervised.
    fn spawn_detached(&self, program: &str, args: &[&str], envs: &[(String, String)])
    -> Result<u32>;
}

/// Stderr fragments that mean the kernel is already in the requested
/// state. Deleting something absent or creating something present is
/// treated as success throughout.
const TOLERATED: &[&str] = &[
    "File exists",
    "already exists",
    "No such file or directory",
    "No such process",
    "Cannot find device",
    "does not exist",
];

/// Run a command and require a zero exit status
pub fn checked(
    runner: &dyn Runner,
    operation: &str,
    program: &str,
    args: &[&str],
) -> Result<CmdOutput> {
    let output = runner.run(program, args)?;
    if !output.success() {
        return Err(Error::KernelOperation {
            operation: operation.to_string(),
            message: failure_message(&output),
        });
    }
    Ok(output)
}

/// Run a command, accepting "already exists" / "not found" outcomes.
///
/// Returns true when the command performed a change, false when the
/// kernel was already in the requested state. Any other non-zero exit is
/// an error.
pub fn tolerant(
    runner: &dyn Runner,
    operation: &str,
    program: &str,
    args: &[&str],
) -> Result<bool> {
    let output = runner.run(program, args)?;
    if output.success() {
        return Ok(true);
    }
    if TOLERATED.iter().any(|pat| output.stderr.contains(pat)) {
        debug!(operation, stderr = %output.stderr.trim(), "tolerated");
        return Ok(false);
    }
    Err(Error::KernelOperation {
        operation: operation.to_string(),
        message: failure_message(&output),
    })
}

fn failure_message(output: &CmdOutput) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        match output.code {
            Some(code) => format!("exit code {}", code),
            None => "killed by signal".to_string(),
        }
    } else {
        stderr.to_string()
    }
}

/// Real command runner with timeout enforcement
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    /// Create a runner whose commands are killed after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Runner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CmdOutput> {
        let rendered = render(program, args);
        debug!(command = %rendered, "exec");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::KernelOperation {
                operation: rendered.clone(),
                message: e.to_string(),
            })?;

        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let mut stdout = String::new();
                    let mut stderr = String::new();

                    if let Some(mut handle) = child.stdout.take() {
                        let _ = handle.read_to_string(&mut stdout);
                    }
                    if let Some(mut handle) = child.stderr.take() {
                        let _ = handle.read_to_string(&mut stderr);
                    }

                    return Ok(CmdOutput {
                        code: status.code(),
                        stdout,
                        stderr,
                    });
                }
                Ok(None) => {
                    if start.elapsed() > self.timeout {
                        let _ = child.kill();
                        // Reap the killed child before reporting
                        let _ = child.wait();
                        warn!(command = %rendered, "timed out");
                        return Err(Error::CommandTimeout {
                            command: rendered,
                            seconds: self.timeout.as_secs(),
                        });
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    return Err(Error::KernelOperation {
                        operation: rendered,
                        message: format!("Failed to wait on process: {}", e),
                    });
                }
            }
        }
    }

    fn spawn_detached(
        &self,
        program: &str,
        args: &[&str],
        envs: &[(String, String)],
    ) -> Result<u32> {
        let rendered = render(program, args);
        debug!(command = %rendered, "spawn detached");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        Self::detach(&mut cmd);

        let child = cmd.spawn().map_err(|e| Error::LaunchFailed {
            command: rendered,
            message: e.to_string(),
        })?;

        Ok(child.id())
    }
}

impl SystemRunner {
    fn detach(cmd: &mut Command) {
        // New session so the child survives moor exiting
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid()
                    .map(|_| ())
                    .map_err(std::io::Error::from)
            });
        }
    }
}

fn render(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted runner shared by the component tests

    use super::*;
    use std::cell::RefCell;

    /// Records every invocation and replays canned output for matching
    /// command prefixes. Unmatched commands succeed with empty output.
    pub struct ScriptedRunner {
        calls: RefCell<Vec<String>>,
        responses: Vec<(String, CmdOutput)>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                responses: Vec::new(),
            }
        }

        /// Replay `stdout` for commands starting with `prefix`
        pub fn with_stdout(mut self, prefix: &str, stdout: &str) -> Self {
            self.responses.push((
                prefix.to_string(),
                CmdOutput {
                    code: Some(0),
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                },
            ));
            self
        }

        /// Replay a failure with `stderr` for commands starting with `prefix`
        pub fn with_failure(mut self, prefix: &str, stderr: &str) -> Self {
            self.responses.push((
                prefix.to_string(),
                CmdOutput {
                    code: Some(2),
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                },
            ));
            self
        }

        /// Every command issued so far, in order
        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl Runner for ScriptedRunner {
        fn run(&self, program: &str, args: &[&str]) -> Result<CmdOutput> {
            let line = render(program, args);
            self.calls.borrow_mut().push(line.clone());
            for (prefix, output) in &self.responses {
                if line.starts_with(prefix.as_str()) {
                    return Ok(output.clone());
                }
            }
            Ok(CmdOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            })
        }

        fn spawn_detached(
            &self,
            program: &str,
            args: &[&str],
            _envs: &[(String, String)],
        ) -> Result<u32> {
            let line = format!("spawn {}", render(program, args));
            self.calls.borrow_mut().push(line);
            Ok(4242)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testing::ScriptedRunner;

    #[test]
    fn test_tolerant_accepts_not_found() {
        let runner = ScriptedRunner::new()
            .with_failure("ip rule del", "RTNETLINK answers: No such file or directory");
        let changed = tolerant(&runner, "rule delete", "ip", &["rule", "del"]).unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_tolerant_propagates_real_failures() {
        let runner = ScriptedRunner::new().with_failure("ip route add", "Operation not permitted");
        let err = tolerant(&runner, "route add", "ip", &["route", "add"]).unwrap_err();
        assert!(matches!(err, Error::KernelOperation { .. }));
    }

    #[test]
    fn test_checked_requires_zero_exit() {
        let runner = ScriptedRunner::new().with_failure("ip link show", "boom");
        assert!(checked(&runner, "link listing", "ip", &["link", "show"]).is_err());
        let runner = ScriptedRunner::new().with_stdout("ip link show", "[]");
        assert!(checked(&runner, "link listing", "ip", &["link", "show"]).is_ok());
    }
}
