/// Command execution
///
/// Commands are built as program + argument lists and only rendered to a
/// shell line where a remote shell has to interpret them: on a cluster node
/// through `gnt-cluster command`, or on the repository host through `ssh`.
/// Locally nothing goes through `sh`.
use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

use crate::core::config::RunContext;
use crate::utils::{shell_quote, GNT_CLUSTER};

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
}

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Shell-quoted command line
    pub fn render(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|word| shell_quote(word))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Shell line for a remote shell: quoted commands joined with trusted
/// fragments (the operator's compression pipes)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellLine(String);

impl ShellLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(self, spec: &CommandSpec) -> Self {
        self.push(&spec.render())
    }

    pub fn fragment(self, fragment: &str) -> Self {
        self.push(fragment.trim())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn push(mut self, part: &str) -> Self {
        if !self.0.is_empty() && !part.is_empty() {
            self.0.push(' ');
        }
        self.0.push_str(part);
        self
    }
}

impl From<&CommandSpec> for ShellLine {
    fn from(spec: &CommandSpec) -> Self {
        ShellLine::new().command(spec)
    }
}

impl fmt::Display for ShellLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a command runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The cluster master this tool runs on
    Local(CommandSpec),
    /// A cluster node, through `gnt-cluster command -n <node>`
    Node { node: String, line: ShellLine },
    /// The backup repository host, through ssh
    Repository(ShellLine),
}

/// One command to run, with a label for logs and reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub label: &'static str,
    pub target: Target,
}

impl Invocation {
    pub fn local(label: &'static str, spec: CommandSpec) -> Self {
        Self {
            label,
            target: Target::Local(spec),
        }
    }

    pub fn on_node(label: &'static str, node: impl Into<String>, line: ShellLine) -> Self {
        Self {
            label,
            target: Target::Node {
                node: node.into(),
                line,
            },
        }
    }

    pub fn on_repository(label: &'static str, line: ShellLine) -> Self {
        Self {
            label,
            target: Target::Repository(line),
        }
    }

    /// The argument vector run on this host
    pub fn argv(&self, ctx: &RunContext) -> CommandSpec {
        match &self.target {
            Target::Local(spec) => spec.clone(),
            Target::Node { node, line } => CommandSpec::new(GNT_CLUSTER)
                .args(["command", "-n", node.as_str()])
                .arg(line.as_str()),
            Target::Repository(line) => repository_ssh(ctx).arg(line.as_str()),
        }
    }
}

/// `ssh <options> <login>` towards the repository host
pub fn repository_ssh(ctx: &RunContext) -> CommandSpec {
    CommandSpec::new("ssh")
        .args(ctx.ssh_options().iter().cloned())
        .arg(ctx.login().to_string())
}

/// Exit status and captured output of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// None when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success_with(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. A non-zero exit is an `Ok` output, `Err` means the
    /// command could not be run at all.
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError>;
}

/// Runs commands as child processes
pub struct ProcessRunner {
    ctx: Arc<RunContext>,
}

impl ProcessRunner {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        let spec = invocation.argv(&self.ctx);
        tracing::debug!(step = invocation.label, command = %spec.render(), "running command");

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        let output = match self.ctx.command_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| ExecError::TimedOut {
                    program: spec.program.clone(),
                    timeout,
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|source| ExecError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Debug mode runner: prints and records commands, never runs them
pub struct DryRunRunner {
    ctx: Arc<RunContext>,
    recorded: Mutex<Vec<String>>,
}

impl DryRunRunner {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self {
            ctx,
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// Commands in the order they would have run
    pub fn recorded(&self) -> Vec<String> {
        self.recorded
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        let line = invocation.argv(&self.ctx).render();
        println!("{}", line);
        tracing::debug!(step = invocation.label, command = %line, "debug mode, not executed");

        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.push(line);
        }

        Ok(CommandOutput::success_with(""))
    }
}

/// Runner for the backup and prune commands: `process` normally, a
/// `DryRunRunner` in debug mode
pub fn pipeline_runner(
    ctx: &Arc<RunContext>,
    process: Arc<dyn CommandRunner>,
) -> Arc<dyn CommandRunner> {
    if ctx.debug() {
        Arc::new(DryRunRunner::new(Arc::clone(ctx)))
    } else {
        process
    }
}
