use std::cell::RefCell;
use std::fs::File;
use std::io::Write;
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use indicatif::MultiProgress;
use log::{debug, info, warn};

use crate::command::{OutputMode, ToolCommand};
use crate::error::{PipelineError, Result};
use crate::stage::Stage;
use crate::utils::{create_spinner, read_tail};

const TRANSCRIPT_TAIL_LINES: usize = 50;

/// One external tool run, built per call and dropped once the process exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub stage: Stage,
    pub sample: String,
    pub command: ToolCommand,
    pub log_path: Utf8PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Tool stdout kept by the executor. Empty when it was streamed to a file.
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// The only thing a stage needs from whatever drives it.
pub trait Executor {
    /// Record a message in the master log.
    fn log(&self, message: &str);

    /// Run the invocation to completion. Only failures to start the process are
    /// errors here; exit status is reported in the output.
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput>;

    /// Copy `from` to `to` when `from` exists. Returns whether a copy was made.
    fn copy_if_exists(&self, from: &Utf8Path, to: &Utf8Path) -> Result<bool>;
}

/// Runs tools as child processes inside `workdir`.
///
/// Relative artifact and log paths are resolved against `workdir`, which is
/// also the child's working directory, so names returned by the stages stay
/// valid for the tools that consume them. Tool output is streamed into the
/// stage log while the process runs; `stderr` in the returned output is the
/// tail of that transcript.
pub struct SystemExecutor {
    workdir: Utf8PathBuf,
    progress: Option<MultiProgress>,
}

impl SystemExecutor {
    pub fn new(workdir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    fn resolve(&self, path: &Utf8Path) -> Utf8PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }
}

impl Executor for SystemExecutor {
    fn log(&self, message: &str) {
        info!("{message}");
    }

    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        let command = &invocation.command;
        let log_path = self.resolve(&invocation.log_path);
        let log_err = |e| PipelineError::io(&log_path, e);

        let mut log_file = File::create(&log_path).map_err(log_err)?;
        let header = format!("{command}\n");
        log_file.write_all(header.as_bytes()).map_err(log_err)?;
        log_file.flush().map_err(log_err)?;
        let stderr = Stdio::from(log_file.try_clone().map_err(log_err)?);

        let (stdout, redirect) = match command.output() {
            OutputMode::Stdout(target) => {
                let target = self.resolve(target);
                let file = File::create(&target).map_err(|e| PipelineError::io(&target, e))?;
                (Stdio::from(file), Some(target))
            }
            OutputMode::Managed => (Stdio::from(log_file), None),
        };

        debug!("Spawning {} in {}", command.program(), self.workdir);
        let spawned = Command::new(command.program())
            .args(command.argv())
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                if let Some(target) = redirect {
                    if let Err(e) = std::fs::remove_file(&target) {
                        warn!("Failed to remove {target}: {e}");
                    }
                }
                return Err(PipelineError::Spawn {
                    stage: invocation.stage.name.to_string(),
                    program: command.program().to_string(),
                    source,
                });
            }
        };

        let spinner = create_spinner(
            &format!("Running {} for {}", invocation.stage.label, invocation.sample),
            self.progress.as_ref(),
        );
        let status = child.wait();
        spinner.finish_and_clear();
        let status = status.map_err(log_err)?;

        let transcript =
            read_tail(&log_path, header.len() as u64, TRANSCRIPT_TAIL_LINES).map_err(log_err)?;

        Ok(ProcessOutput {
            exit_code: status.code(),
            stdout: String::new(),
            stderr: transcript,
        })
    }

    fn copy_if_exists(&self, from: &Utf8Path, to: &Utf8Path) -> Result<bool> {
        let from = self.resolve(from);
        let to = self.resolve(to);
        if !from.is_file() {
            return Ok(false);
        }
        std::fs::copy(&from, &to).map_err(|e| PipelineError::io(&to, e))?;
        Ok(true)
    }
}

/// Records invocations and copies instead of performing them. Every run
/// reports success and no copy is ever made.
#[derive(Default)]
pub struct DryRunExecutor {
    invocations: RefCell<Vec<Invocation>>,
    messages: RefCell<Vec<String>>,
    copies: RefCell<Vec<(Utf8PathBuf, Utf8PathBuf)>>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.borrow().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }

    pub fn copies(&self) -> Vec<(Utf8PathBuf, Utf8PathBuf)> {
        self.copies.borrow().clone()
    }
}

impl Executor for DryRunExecutor {
    fn log(&self, message: &str) {
        info!("{message}");
        self.messages.borrow_mut().push(message.to_string());
    }

    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        debug!("Dry run, skipping {}", invocation.command.program());
        self.invocations.borrow_mut().push(invocation.clone());
        Ok(ProcessOutput {
            exit_code: Some(0),
            ..Default::default()
        })
    }

    fn copy_if_exists(&self, from: &Utf8Path, to: &Utf8Path) -> Result<bool> {
        debug!("Dry run, skipping copy of {from} to {to}");
        self.copies
            .borrow_mut()
            .push((from.to_path_buf(), to.to_path_buf()));
        Ok(false)
    }
}
