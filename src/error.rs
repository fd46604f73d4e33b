use camino::Utf8PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid argument for stage '{stage}': {reason}")]
    InvalidArgument { stage: String, reason: String },

    #[error("stage '{stage}' could not start '{program}': {source}")]
    Spawn {
        stage: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "stage '{stage}' failed for sample '{sample}' ({}), see log: {log_path}{}",
        describe_exit(.exit_code),
        stderr_excerpt(.stderr)
    )]
    StageFailed {
        stage: String,
        sample: String,
        exit_code: Option<i32>,
        log_path: Utf8PathBuf,
        stderr: String,
    },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "killed by signal".to_string(),
    }
}

fn stderr_excerpt(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\n{stderr}")
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
