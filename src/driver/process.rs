//! Subprocess driver for the virtualization tool
//!
//! Commands run with `--machine-readable` and have stdout and stderr merged
//! into one pipe, so progress and diagnostics arrive as a single ordered
//! line sequence. The scanner classifies the lines and the last one is
//! decoded as the result.

use super::protocol::{MachineReadableOutput, Status};
use super::scanner::{OutputScanner, ScanItem};
use super::{CommandDriver, GuestExit, GuestOutput, ProgressSink};
use crate::error::{ProvisionError, Result};
use async_trait::async_trait;
use std::os::fd::OwnedFd;
use std::process::Stdio;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Default executable name
pub const DEFAULT_EXECUTABLE: &str = "anka";

/// Drives the tool as a child process
#[derive(Debug, Clone)]
pub struct ProcessDriver {
    /// Tool executable (path or name looked up on PATH)
    executable: String,

    /// Program and arguments placed in front of the executable, e.g. `["sudo", "-n"]`
    launcher: Vec<String>,

    /// Extra environment passed to every child
    envs: Vec<(String, String)>,
}

impl Default for ProcessDriver {
    fn default() -> Self {
        Self::new(DEFAULT_EXECUTABLE)
    }
}

impl ProcessDriver {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            launcher: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Run the executable through another program
    pub fn with_launcher(mut self, launcher: Vec<String>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Set an environment variable for every child process
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn envs(&self) -> &[(String, String)] {
        &self.envs
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = match self.launcher.split_first() {
            Some((program, rest)) => {
                let mut command = Command::new(program);
                command.args(rest).arg(&self.executable);
                command
            }
            None => Command::new(&self.executable),
        };

        command
            .args(args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true);
        command
    }

    fn launch_error(&self, source: std::io::Error) -> ProvisionError {
        ProvisionError::ProcessLaunch {
            program: self.executable.clone(),
            source,
        }
    }

    /// Spawn with stdout and stderr sharing one pipe
    fn spawn_merged(&self, args: &[String]) -> Result<(Child, pipe::Receiver)> {
        let (reader, writer) = std::io::pipe().map_err(|e| self.launch_error(e))?;
        let stderr_writer = writer.try_clone().map_err(|e| self.launch_error(e))?;

        let mut command = self.command(args);
        command
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr_writer);

        let child = command.spawn().map_err(|e| self.launch_error(e))?;

        // The command still holds the write ends; EOF only arrives once they are closed.
        drop(command);

        let receiver =
            pipe::Receiver::from_owned_fd(OwnedFd::from(reader)).map_err(|e| self.launch_error(e))?;

        Ok((child, receiver))
    }

    async fn execute(
        &self,
        args: &[String],
        progress: Option<&ProgressSink<'_>>,
    ) -> Result<MachineReadableOutput> {
        let mut full_args = vec!["--machine-readable".to_string()];
        if progress.is_some() {
            full_args.push("--debug".to_string());
        }
        full_args.extend(args.iter().cloned());

        let command_line = format!("{} {}", self.executable, full_args.join(" "));
        debug!("Executing {}", command_line);

        let (mut child, receiver) = self.spawn_merged(&full_args)?;
        let mut scanner = OutputScanner::new(BufReader::new(receiver));

        let final_line = loop {
            let item = scanner
                .next_item()
                .await
                .map_err(|source| ProvisionError::Io {
                    context: format!("failed to read output of `{}`", command_line),
                    source,
                })?;

            match item {
                ScanItem::Progress(line) => match progress {
                    Some(sink) => sink(&line),
                    None => debug!("{}", line),
                },
                ScanItem::Final(line) => break line,
                ScanItem::Eof => {
                    // Reap the child before reporting.
                    let _ = child.wait().await;
                    return Err(ProvisionError::MissingOutput {
                        command: command_line,
                    });
                }
            }
        };

        debug!("{}", final_line);
        let output = MachineReadableOutput::parse(&final_line)?;

        let status = child.wait().await.map_err(|source| ProvisionError::Io {
            context: format!("failed to wait for `{}`", command_line),
            source,
        })?;

        if !status.success() && output.status == Status::Ok {
            warn!(
                "`{}` reported OK but exited with {}",
                command_line, status
            );
        }

        Ok(output.into_result()?)
    }
}

#[async_trait]
impl CommandDriver for ProcessDriver {
    async fn invoke(&self, args: &[String]) -> Result<MachineReadableOutput> {
        self.execute(args, None).await
    }

    async fn invoke_streaming(
        &self,
        args: &[String],
        progress: &ProgressSink<'_>,
    ) -> Result<MachineReadableOutput> {
        self.execute(args, Some(progress)).await
    }

    async fn run_in_guest(&self, args: &[String], input: &str) -> Result<GuestOutput> {
        let command_line = format!("{} {}", self.executable, args.join(" "));
        info!("Starting command: {}", command_line);
        debug!("Executing on sh: {}", input);

        let started = std::time::Instant::now();
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.launch_error(e))?;

        // Output is drained while stdin is written so neither side can fill its pipe.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // The guest shell may exit before reading everything; its exit code tells the story.
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!("Failed to write guest command to stdin: {}", e);
                }
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|source| ProvisionError::Io {
            context: format!("failed to wait for `{}`", command_line),
            source,
        })?;

        let exit = GuestExit::from_code(output.status.code());
        info!(
            "Command finished in {:?} with {:?}",
            started.elapsed(),
            exit
        );

        Ok(GuestOutput {
            exit,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
