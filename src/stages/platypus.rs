use camino::{Utf8Path, Utf8PathBuf};

use crate::command::ToolCommand;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::executor::Executor;
use crate::stage::{artifact, invoke, Stage};

pub const PLATYPUS: Stage = Stage {
    name: "platypus",
    label: "Platypus",
};

pub fn platypus_single_command(
    config: &PipelineConfig,
    sample: &str,
    input_bam: &Utf8Path,
    threads: Option<usize>,
) -> Result<(ToolCommand, Utf8PathBuf)> {
    let platypus = config.tool("platypus")?;
    let output_vcf = artifact(sample, "platypus.vcf");
    let internal_log = artifact(sample, "platypus_internal.log");

    let cmd = ToolCommand::new(&platypus.bin)
        .literal("callVariants")
        .assign("--refFile", config.text(&["reference"])?)
        .assign("--regions", config.text(&["platypus", "regions"])?)
        .literal("--assemble=1")
        .literal("--assembleBrokenPairs=1")
        .literal("--filterDuplicates=0")
        .assign("--nCPU", platypus.threads(threads))
        .assign("--logFileName", &internal_log)
        .assign("--bamFiles", input_bam)
        .assign("--output", &output_vcf);

    Ok((cmd, output_vcf))
}

/// Call variants on a single sample with Platypus, returning the raw call set.
pub fn platypus_single(
    executor: &dyn Executor,
    config: &PipelineConfig,
    sample: &str,
    input_bam: &Utf8Path,
    threads: Option<usize>,
) -> Result<Utf8PathBuf> {
    let (cmd, output_vcf) = platypus_single_command(config, sample, input_bam, threads)?;
    invoke(executor, PLATYPUS, sample, cmd)?;
    Ok(output_vcf)
}
