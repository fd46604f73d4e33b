//! Annotation of called variants: snpEff effect prediction, vcfanno
//! annotation and loading into a GEMINI database.

use camino::{Utf8Path, Utf8PathBuf};

use crate::command::ToolCommand;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::executor::Executor;
use crate::stage::{artifact, invoke, Stage};

pub const SNPEFF: Stage = Stage {
    name: "snpeff",
    label: "snpEff",
};
pub const GEMINI: Stage = Stage {
    name: "gemini",
    label: "GEMINI",
};
pub const VCFANNO: Stage = Stage {
    name: "vcfanno",
    label: "vcfanno",
};

fn snpeff_reference(config: &PipelineConfig) -> Result<String> {
    Ok(config.text(&["snpeff", "reference"])?)
}

/// `{sample}.snpEff.{reference}.vcf`
pub fn snpeff_vcf(sample: &str, reference: &str) -> Utf8PathBuf {
    artifact(sample, &format!("snpEff.{reference}.vcf"))
}

/// `{sample}.snpEff.{reference}.db`
pub fn gemini_db(sample: &str, reference: &str) -> Utf8PathBuf {
    artifact(sample, &format!("snpEff.{reference}.db"))
}

/// `{sample}.vcfanno.snpEff.{reference}.vcf`
pub fn vcfanno_vcf(sample: &str, reference: &str) -> Utf8PathBuf {
    artifact(sample, &format!("vcfanno.snpEff.{reference}.vcf"))
}

pub fn snpeff_command(
    config: &PipelineConfig,
    sample: &str,
    input_vcf: &Utf8Path,
) -> Result<(ToolCommand, Utf8PathBuf)> {
    let tool = config.tool("snpeff")?;
    let reference = snpeff_reference(config)?;
    let output_vcf = snpeff_vcf(sample, &reference);

    let cmd = ToolCommand::new(&tool.bin)
        .literal(format!("-Xmx{}g", tool.require_max_mem()?))
        .literal("-v")
        .positional(&reference)
        .positional(input_vcf)
        .stdout_to(&output_vcf);

    Ok((cmd, output_vcf))
}

/// Annotate `input_vcf` with snpEff, returning the annotated VCF.
pub fn snpeff(
    executor: &dyn Executor,
    config: &PipelineConfig,
    sample: &str,
    input_vcf: &Utf8Path,
) -> Result<Utf8PathBuf> {
    let (cmd, output_vcf) = snpeff_command(config, sample, input_vcf)?;
    invoke(executor, SNPEFF, sample, cmd)?;
    Ok(output_vcf)
}

pub fn gemini_command(
    config: &PipelineConfig,
    sample: &str,
    input_vcf: &Utf8Path,
) -> Result<(ToolCommand, Utf8PathBuf)> {
    let tool = config.tool("gemini")?;
    let db = gemini_db(sample, &snpeff_reference(config)?);

    let cmd = ToolCommand::new(&tool.bin)
        .literal("load")
        .opt("--cores", tool.require_num_cores()?)
        .literal("--save-info-string")
        .opt("-v", input_vcf)
        .opt("-t", "snpEff")
        .positional(&db);

    Ok((cmd, db))
}

/// Load a snpEff-annotated VCF into a GEMINI database, returning the database path.
pub fn gemini(
    executor: &dyn Executor,
    config: &PipelineConfig,
    sample: &str,
    input_vcf: &Utf8Path,
) -> Result<Utf8PathBuf> {
    let (cmd, db) = gemini_command(config, sample, input_vcf)?;
    invoke(executor, GEMINI, sample, cmd)?;
    Ok(db)
}

pub fn vcfanno_command(
    config: &PipelineConfig,
    sample: &str,
    input_vcf: &Utf8Path,
) -> Result<(ToolCommand, Utf8PathBuf)> {
    let tool = config.tool("vcfanno")?;
    let output_vcf = vcfanno_vcf(sample, &snpeff_reference(config)?);

    let cmd = ToolCommand::new(&tool.bin)
        .opt("-p", tool.require_num_cores()?)
        .opt("--lua", config.text(&["vcfanno", "lua"])?)
        .positional(config.text(&["vcfanno", "conf"])?)
        .positional(input_vcf)
        .stdout_to(&output_vcf);

    Ok((cmd, output_vcf))
}

pub fn vcfanno(
    executor: &dyn Executor,
    config: &PipelineConfig,
    sample: &str,
    input_vcf: &Utf8Path,
) -> Result<Utf8PathBuf> {
    let (cmd, output_vcf) = vcfanno_command(config, sample, input_vcf)?;
    invoke(executor, VCFANNO, sample, cmd)?;
    Ok(output_vcf)
}
