use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use colored::Colorize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::InstallError;

/// One external command: program, argv and an optional time limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
    /// Indices into `args` that are masked whenever the command is shown.
    secrets: Vec<usize>,
}

const MASK: &str = "******";

impl Invocation {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout: None,
            secrets: Vec::new(),
        }
    }

    pub fn kubectl(args: &[&str]) -> Self {
        Self::new("kubectl", args)
    }

    pub fn helm(args: &[&str]) -> Self {
        Self::new("helm", args)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Like `arg`, but never echoed or logged.
    pub fn secret(mut self, value: impl Into<String>) -> Self {
        self.secrets.push(self.args.len());
        self.args.push(value.into());
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// The command line with secret arguments masked. A secret written as
    /// `--flag=value` keeps its flag.
    pub fn redacted(&self) -> String {
        let mut line = self.program.clone();
        for (i, arg) in self.args.iter().enumerate() {
            line.push(' ');
            if !self.secrets.contains(&i) {
                line.push_str(arg);
                continue;
            }
            match arg.split_once('=') {
                Some((flag, _)) if flag.starts_with("--") => {
                    line.push_str(flag);
                    line.push('=');
                    line.push_str(MASK);
                }
                _ => line.push_str(MASK),
            }
        }
        line
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// What came back from a command. Stderr is kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Stdout on success, otherwise a `StepFailed` carrying stderr.
    pub fn into_result(self, step: &str) -> Result<String, InstallError> {
        if self.success {
            Ok(self.stdout)
        } else {
            Err(InstallError::step(step, self.stderr))
        }
    }
}

/// Executes external commands. Callers decide whether to retry.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> CommandOutput;

    /// Point every later cluster command at this kubeconfig.
    fn use_kubeconfig(&mut self, _path: &Path) {}
}

pub struct ShellRunner {
    verbose: bool,
    default_timeout: Option<Duration>,
    kubeconfig: Option<PathBuf>,
}

impl ShellRunner {
    pub fn new(verbose: bool, default_timeout: Option<Duration>) -> Self {
        Self {
            verbose,
            default_timeout,
            kubeconfig: None,
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, invocation: &Invocation) -> CommandOutput {
        let line = invocation.redacted();
        if self.verbose {
            println!("{}", format!("Running: {}", line).cyan());
        }
        debug!(command = %line, "running command");

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.env("KUBECONFIG", kubeconfig);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %line, error = %e, "failed to spawn command");
                return CommandOutput::failed(format!("failed to run {}: {}", line, e));
            }
        };

        // Dropping the wait future on timeout kills the child.
        let waited = match invocation.timeout.or(self.default_timeout) {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(waited) => waited,
                Err(_) => {
                    let message =
                        format!("Command timed out after {} seconds: {}", limit.as_secs_f64(), line);
                    warn!("{}", message);
                    if self.verbose {
                        println!("{}", message.red());
                    }
                    return CommandOutput::failed(message);
                }
            },
            None => child.wait_with_output().await,
        };

        let output = match waited {
            Ok(output) => output,
            Err(e) => return CommandOutput::failed(format!("failed to wait for {}: {}", line, e)),
        };

        let result = CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if self.verbose {
            if !result.stdout.is_empty() {
                println!("{}", result.stdout);
            }
            if !result.stderr.is_empty() {
                println!("{}", result.stderr.yellow());
            }
        }
        debug!(command = %line, success = result.success, stderr = %result.stderr.trim(), "command finished");

        result
    }

    fn use_kubeconfig(&mut self, path: &Path) {
        self.kubeconfig = Some(path.to_path_buf());
    }
}

/// Run a command whose failure ends the current step.
pub async fn run_checked(
    runner: &dyn CommandRunner,
    invocation: Invocation,
    step: &str,
) -> Result<String, InstallError> {
    runner.run(&invocation).await.into_result(step)
}

pub async fn apply_manifest(runner: &dyn CommandRunner, manifest: &Path) -> Result<(), InstallError> {
    let path = manifest.display().to_string();
    run_checked(
        runner,
        Invocation::kubectl(&["apply", "-f", &path]),
        "kubectl apply",
    )
    .await?;
    Ok(())
}
