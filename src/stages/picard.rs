//! Picard BAM housekeeping: duplicate marking and read group assignment.

use camino::{Utf8Path, Utf8PathBuf};

use crate::command::ToolCommand;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::executor::Executor;
use crate::stage::{artifact, invoke, Stage};

pub const MARK_DUPLICATES: Stage = Stage {
    name: "markduplicates",
    label: "Picard MarkDuplicates",
};
pub const ADD_READ_GROUPS: Stage = Stage {
    name: "addreadgroups",
    label: "Picard AddOrReplaceReadGroups",
};
pub const BUILD_BAM_INDEX: Stage = Stage {
    name: "buildindex",
    label: "Picard BuildBamIndex",
};

const READ_GROUP_PLATFORM: &str = "illumina";
const READ_GROUP_PLATFORM_UNIT: &str = "miseq";

/// `java -Xmx{mem}g -jar {picard.bin} {tool}`. Picard shares the GATK heap
/// size unless `picard.max_mem` is set.
fn picard_tool(config: &PipelineConfig, tool: &str) -> Result<ToolCommand> {
    let picard = config.tool("picard")?;
    let max_mem = match picard.max_mem {
        Some(mem) => mem,
        None => config.integer(&["gatk", "max_mem"])?,
    };
    Ok(ToolCommand::java_jar(max_mem, picard.bin).literal(tool))
}

pub fn mark_duplicates_command(
    config: &PipelineConfig,
    sample: &str,
    input_bam: &Utf8Path,
) -> Result<(ToolCommand, Utf8PathBuf, Utf8PathBuf)> {
    let dedup_bam = artifact(sample, "dedup.sorted.bam");
    let metrics = artifact(sample, "dedup.metrics");

    let cmd = picard_tool(config, "MarkDuplicates")?
        .assign("CREATE_INDEX", "true")
        .assign("INPUT", input_bam)
        .assign("OUTPUT", &dedup_bam)
        .assign("METRICS_FILE", &metrics)
        .assign("VALIDATION_STRINGENCY", "LENIENT");

    Ok((cmd, dedup_bam, metrics))
}

/// Mark PCR and optical duplicates, returning the deduplicated BAM. The
/// duplication metrics are written to `{sample}.dedup.metrics`.
pub fn mark_duplicates(
    executor: &dyn Executor,
    config: &PipelineConfig,
    sample: &str,
    input_bam: &Utf8Path,
) -> Result<Utf8PathBuf> {
    let (cmd, dedup_bam, _) = mark_duplicates_command(config, sample, input_bam)?;
    invoke(executor, MARK_DUPLICATES, sample, cmd)?;
    Ok(dedup_bam)
}

pub fn add_or_replace_readgroups_commands(
    config: &PipelineConfig,
    sample: &str,
    input_bam: &Utf8Path,
) -> Result<(ToolCommand, ToolCommand, Utf8PathBuf)> {
    let output_bam = artifact(sample, "rg.sorted.bam");

    let read_groups = picard_tool(config, "AddOrReplaceReadGroups")?
        .assign("INPUT", input_bam)
        .assign("OUTPUT", &output_bam)
        .assign("RGID", sample)
        .assign("RGSM", sample)
        .assign("RGLB", sample)
        .assign("RGPL", READ_GROUP_PLATFORM)
        .assign("RGPU", READ_GROUP_PLATFORM_UNIT);

    let index = picard_tool(config, "BuildBamIndex")?.assign("INPUT", &output_bam);

    Ok((read_groups, index, output_bam))
}

/// Tag every read with a read group named after the sample, then index the result.
pub fn add_or_replace_readgroups(
    executor: &dyn Executor,
    config: &PipelineConfig,
    sample: &str,
    input_bam: &Utf8Path,
) -> Result<Utf8PathBuf> {
    executor.log(&format!("Running AddOrReplaceReadGroups in sample: {sample}"));

    let (read_groups, index, output_bam) =
        add_or_replace_readgroups_commands(config, sample, input_bam)?;
    invoke(executor, ADD_READ_GROUPS, sample, read_groups)?;
    invoke(executor, BUILD_BAM_INDEX, sample, index)?;

    Ok(output_bam)
}
