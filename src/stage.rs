use camino::Utf8PathBuf;

use crate::command::ToolCommand;
use crate::error::{PipelineError, Result};
use crate::executor::{Executor, Invocation};
use crate::utils::tail_lines;

const STDERR_TAIL_LINES: usize = 20;

/// Declarative description of one pipeline step: the name used in its log
/// file and the label used in the master log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub name: &'static str,
    pub label: &'static str,
}

impl Stage {
    /// `{sample}.{stage}.log`
    pub fn log_path(&self, sample: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{sample}.{}.log", self.name))
    }
}

/// `{sample}.{suffix}`
pub fn artifact(sample: &str, suffix: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{sample}.{suffix}"))
}

/// Validate, log and run one tool command, failing if the tool does not exit cleanly.
pub fn invoke(
    executor: &dyn Executor,
    stage: Stage,
    sample: &str,
    command: ToolCommand,
) -> Result<()> {
    let invalid = |reason: String| PipelineError::InvalidArgument {
        stage: stage.name.to_string(),
        reason,
    };
    if sample.trim().is_empty() {
        return Err(invalid("sample name is empty".to_string()));
    }
    if sample.contains(std::path::is_separator) {
        return Err(invalid(format!("sample name '{sample}' contains a path separator")));
    }
    command.validate().map_err(invalid)?;

    executor.log(&format!("{} Command: {}", stage.label, command));

    let invocation = Invocation {
        stage,
        sample: sample.to_string(),
        command,
        log_path: stage.log_path(sample),
    };
    let output = executor.run(&invocation)?;

    if !output.success() {
        return Err(PipelineError::StageFailed {
            stage: stage.name.to_string(),
            sample: invocation.sample,
            exit_code: output.exit_code,
            log_path: invocation.log_path,
            stderr: tail_lines(&output.stderr, STDERR_TAIL_LINES),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;
    use crate::executor::{DryRunExecutor, ProcessOutput};

    const STAGE: Stage = Stage {
        name: "snpeff",
        label: "snpEff",
    };

    struct FailingExecutor;

    impl Executor for FailingExecutor {
        fn log(&self, _message: &str) {}

        fn run(&self, _invocation: &Invocation) -> Result<ProcessOutput> {
            let stderr = (1..=30).map(|i| format!("line {i}\n")).collect();
            Ok(ProcessOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr,
            })
        }

        fn copy_if_exists(&self, _from: &Utf8Path, _to: &Utf8Path) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_log_path_convention() {
        assert_eq!(STAGE.log_path("S1"), "S1.snpeff.log");
        assert_eq!(artifact("S1", "dedup.sorted.bam"), "S1.dedup.sorted.bam");
    }

    #[test]
    fn test_invoke_logs_and_runs() {
        let executor = DryRunExecutor::new();
        let cmd = ToolCommand::new("snpEff").positional("in.vcf");
        invoke(&executor, STAGE, "S1", cmd.clone()).unwrap();

        assert_eq!(executor.messages(), vec!["snpEff Command: snpEff in.vcf"]);
        let invocations = executor.invocations();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].command, cmd);
        assert_eq!(invocations[0].log_path, "S1.snpeff.log");
    }

    #[test]
    fn test_invoke_surfaces_failure() {
        let cmd = ToolCommand::new("snpEff").positional("in.vcf");
        let err = invoke(&FailingExecutor, STAGE, "S1", cmd).unwrap_err();
        match err {
            PipelineError::StageFailed {
                stage,
                sample,
                exit_code,
                log_path,
                stderr,
            } => {
                assert_eq!(stage, "snpeff");
                assert_eq!(sample, "S1");
                assert_eq!(exit_code, Some(1));
                assert_eq!(log_path, "S1.snpeff.log");
                assert_eq!(stderr.lines().count(), STDERR_TAIL_LINES);
                assert_eq!(stderr.lines().last(), Some("line 30"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invoke_rejects_malformed_command() {
        let executor = DryRunExecutor::new();
        let cmd = ToolCommand::new("snpEff").positional("");
        let err = invoke(&executor, STAGE, "S1", cmd).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArgument { .. }));
        assert!(executor.invocations().is_empty());
        assert!(executor.messages().is_empty());
    }

    #[test]
    fn test_invoke_rejects_bad_sample() {
        let executor = DryRunExecutor::new();
        for sample in ["", "runs/S1"] {
            let cmd = ToolCommand::new("snpEff");
            let err = invoke(&executor, STAGE, sample, cmd).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidArgument { .. }));
        }
    }
}
