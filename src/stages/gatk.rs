//! GATK 3 walkers: target QC, indel realignment, base recalibration,
//! variant annotation and hard filtering.

use camino::{Utf8Path, Utf8PathBuf};
use log::debug;

use crate::command::ToolCommand;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::executor::Executor;
use crate::stage::{artifact, invoke, Stage};

pub const DIAGNOSE_TARGETS: Stage = Stage {
    name: "diagnose_targets",
    label: "GATK DiagnoseTargets",
};
pub const VARIANT_ANNOTATION: Stage = Stage {
    name: "variantannotation",
    label: "GATK VariantAnnotator",
};
pub const VARIANT_FILTRATION: Stage = Stage {
    name: "variantfiltration",
    label: "GATK VariantFiltration",
};
pub const TARGET_CREATION: Stage = Stage {
    name: "targetcreation",
    label: "GATK RealignerTargetCreator",
};
pub const REALIGN_INDELS: Stage = Stage {
    name: "realignindels",
    label: "GATK IndelRealigner",
};
pub const BASE_RECALIBRATION: Stage = Stage {
    name: "recalibrate",
    label: "GATK BaseRecalibrator",
};
pub const PRINT_READS: Stage = Stage {
    name: "printrecalibrated",
    label: "GATK PrintReads",
};

// DiagnoseTargets always runs with a small fixed heap.
const DIAGNOSE_TARGETS_MEM_GB: u64 = 2;

/// `java -Xmx{mem}g -jar {gatk.bin} -T {walker} -R {reference}`
fn walker(config: &PipelineConfig, name: &str, max_mem: Option<u64>) -> Result<ToolCommand> {
    let gatk = config.tool("gatk")?;
    let max_mem = match max_mem {
        Some(mem) => mem,
        None => gatk.require_max_mem()?,
    };
    Ok(ToolCommand::java_jar(max_mem, gatk.bin)
        .literal("-T")
        .literal(name)
        .opt("-R", config.text(&["reference"])?))
}

fn gatk_threads(config: &PipelineConfig, requested: Option<usize>) -> Result<usize> {
    Ok(config.tool("gatk")?.threads(requested))
}

pub fn diagnose_targets_command(
    config: &PipelineConfig,
    sample: &str,
    input_bam: &Utf8Path,
) -> Result<(ToolCommand, Utf8PathBuf, Utf8PathBuf)> {
    let output_vcf = artifact(sample, "diagnosetargets.vcf");
    let missing_intervals = artifact(sample, "missing.intervals");

    let cmd = walker(config, "DiagnoseTargets", Some(DIAGNOSE_TARGETS_MEM_GB))?
        .opt("-L", config.text(&["regions"])?)
        .opt(
            "--coverage_status_threshold",
            config.text(&["coverage_loci_threshold"])?,
        )
        .opt(
            "--bad_mate_status_threshold",
            config.text(&["bad_mate_threshold"])?,
        )
        .opt("--minimum_coverage", config.text(&["coverage_threshold"])?)
        .opt(
            "--quality_status_threshold",
            config.text(&["quality_loci_threshold"])?,
        )
        .opt("-I", input_bam)
        .opt("-o", &output_vcf)
        .opt("--missing_intervals", &missing_intervals);

    Ok((cmd, output_vcf, missing_intervals))
}

/// Coverage diagnostics over the configured target regions. Returns the
/// per-target VCF; the missing intervals land next to it.
pub fn diagnose_targets(
    executor: &dyn Executor,
    config: &PipelineConfig,
    sample: &str,
    input_bam: &Utf8Path,
) -> Result<Utf8PathBuf> {
    let (cmd, output_vcf, _) = diagnose_targets_command(config, sample, input_bam)?;
    invoke(executor, DIAGNOSE_TARGETS, sample, cmd)?;
    Ok(output_vcf)
}

pub fn annotate_vcf_command(
    config: &PipelineConfig,
    sample: &str,
    input_vcf: &Utf8Path,
    input_bam: &Utf8Path,
    threads: Option<usize>,
) -> Result<(ToolCommand, Utf8PathBuf)> {
    let output_vcf = artifact(sample, "annotated.vcf");

    let cmd = walker(config, "VariantAnnotator", None)?
        .opt("-nt", gatk_threads(config, threads)?)
        .opt("--group", "StandardAnnotation")
        .opt("--dbsnp", config.text(&["dbsnp"])?)
        .opt("-I", input_bam)
        .opt("--variant", input_vcf)
        .opt("-L", input_vcf)
        .opt("-o", &output_vcf);

    Ok((cmd, output_vcf))
}

pub fn annotate_vcf(
    executor: &dyn Executor,
    config: &PipelineConfig,
    sample: &str,
    input_vcf: &Utf8Path,
    input_bam: &Utf8Path,
    threads: Option<usize>,
) -> Result<Utf8PathBuf> {
    let (cmd, output_vcf) = annotate_vcf_command(config, sample, input_vcf, input_bam, threads)?;
    invoke(executor, VARIANT_ANNOTATION, sample, cmd)?;
    Ok(output_vcf)
}

/// Hard filters applied by [`filter_variants`], as (expression, filter name).
pub fn hard_filters(coverage_threshold: &str) -> Vec<(String, &'static str)> {
    vec![
        ("MQ0 > 50".to_string(), "HighMQ0"),
        (format!("DP < {coverage_threshold}"), "LowDepth"),
        ("QUAL < 10".to_string(), "LowQual"),
        ("MQ < 10".to_string(), "LowMappingQual"),
    ]
}

pub fn filter_variants_command(
    config: &PipelineConfig,
    sample: &str,
    input_vcf: &Utf8Path,
) -> Result<(ToolCommand, Utf8PathBuf)> {
    let output_vcf = artifact(sample, "filtered.vcf");
    let coverage_threshold = config.text(&["coverage_threshold"])?;

    let cmd = hard_filters(&coverage_threshold).into_iter().fold(
        walker(config, "VariantFiltration", None)?,
        |cmd, (expression, name)| {
            cmd.opt("--filterExpression", expression)
                .opt("--filterName", name)
        },
    );
    let cmd = cmd.opt("--variant", input_vcf).opt("-o", &output_vcf);

    Ok((cmd, output_vcf))
}

pub fn filter_variants(
    executor: &dyn Executor,
    config: &PipelineConfig,
    sample: &str,
    input_vcf: &Utf8Path,
) -> Result<Utf8PathBuf> {
    let (cmd, output_vcf) = filter_variants_command(config, sample, input_vcf)?;
    invoke(executor, VARIANT_FILTRATION, sample, cmd)?;
    Ok(output_vcf)
}

fn known_indels(cmd: ToolCommand, config: &PipelineConfig) -> Result<ToolCommand> {
    Ok(cmd
        .opt("-known", config.text(&["indel1"])?)
        .opt("-known", config.text(&["indel2"])?))
}

pub fn realign_target_creator_command(
    config: &PipelineConfig,
    sample: &str,
    input_bam: &Utf8Path,
    threads: Option<usize>,
) -> Result<(ToolCommand, Utf8PathBuf)> {
    let targets = artifact(sample, "targets.intervals");

    let cmd = walker(config, "RealignerTargetCreator", None)?
        .opt("-I", input_bam)
        .opt("-o", &targets);
    let cmd = known_indels(cmd, config)?.opt("-nt", gatk_threads(config, threads)?);

    Ok((cmd, targets))
}

/// Find intervals around known and observed indels, returning the interval list.
pub fn realign_target_creator(
    executor: &dyn Executor,
    config: &PipelineConfig,
    sample: &str,
    input_bam: &Utf8Path,
    threads: Option<usize>,
) -> Result<Utf8PathBuf> {
    let (cmd, targets) = realign_target_creator_command(config, sample, input_bam, threads)?;
    invoke(executor, TARGET_CREATION, sample, cmd)?;
    Ok(targets)
}

pub fn realign_indels_command(
    config: &PipelineConfig,
    sample: &str,
    input_bam: &Utf8Path,
    targets: &Utf8Path,
) -> Result<(ToolCommand, Utf8PathBuf)> {
    let output_bam = artifact(sample, "realigned.sorted.bam");

    let cmd = walker(config, "IndelRealigner", None)?.opt("-I", input_bam);
    let cmd = known_indels(cmd, config)?
        .opt("-targetIntervals", targets)
        .opt("--read_filter", "NotPrimaryAlignment")
        .opt("-o", &output_bam);

    Ok((cmd, output_bam))
}

pub fn realign_indels(
    executor: &dyn Executor,
    config: &PipelineConfig,
    sample: &str,
    input_bam: &Utf8Path,
    targets: &Utf8Path,
) -> Result<Utf8PathBuf> {
    let (cmd, output_bam) = realign_indels_command(config, sample, input_bam, targets)?;
    invoke(executor, REALIGN_INDELS, sample, cmd)?;
    Ok(output_bam)
}

/// The two commands behind [`recalibrator`], in execution order.
pub struct RecalibrationCommands {
    pub base_recalibrator: ToolCommand,
    pub print_reads: ToolCommand,
    pub recal_table: Utf8PathBuf,
    pub output_bam: Utf8PathBuf,
}

pub fn recalibrator_commands(
    config: &PipelineConfig,
    sample: &str,
    input_bam: &Utf8Path,
    threads: Option<usize>,
) -> Result<RecalibrationCommands> {
    let output_bam = artifact(sample, "recalibrated.sorted.bam");
    let recal_table = artifact(sample, "recal");
    let threads = gatk_threads(config, threads)?;

    let base_recalibrator = walker(config, "BaseRecalibrator", None)?
        .opt("-I", input_bam)
        .opt("-o", &recal_table)
        .opt("--knownSites", config.text(&["dbsnp"])?)
        .opt("-nct", threads);

    let print_reads = walker(config, "PrintReads", None)?
        .opt("-I", input_bam)
        .opt("-o", &output_bam)
        .opt("-BQSR", &recal_table)
        .opt("-nct", threads);

    Ok(RecalibrationCommands {
        base_recalibrator,
        print_reads,
        recal_table,
        output_bam,
    })
}

/// Base quality score recalibration: model covariates with BaseRecalibrator,
/// then write the recalibrated BAM with PrintReads.
///
/// GATK names the BAM index `{sample}.recalibrated.sorted.bai`; when that file
/// exists it is also copied to `{sample}.recalibrated.sorted.bam.bai` for tools
/// that expect the longer name.
pub fn recalibrator(
    executor: &dyn Executor,
    config: &PipelineConfig,
    sample: &str,
    input_bam: &Utf8Path,
    threads: Option<usize>,
) -> Result<Utf8PathBuf> {
    let commands = recalibrator_commands(config, sample, input_bam, threads)?;

    invoke(executor, BASE_RECALIBRATION, sample, commands.base_recalibrator)?;
    invoke(executor, PRINT_READS, sample, commands.print_reads)?;

    alias_bam_index(executor, sample)?;

    Ok(commands.output_bam)
}

fn alias_bam_index(executor: &dyn Executor, sample: &str) -> Result<()> {
    let index = artifact(sample, "recalibrated.sorted.bai");
    let alias = artifact(sample, "recalibrated.sorted.bam.bai");

    if executor.copy_if_exists(&index, &alias)? {
        executor.log(&format!("Copied BAM index {index} to {alias}"));
    } else {
        debug!("No index copied from {index} to {alias}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::error::PipelineError;
    use crate::executor::{DryRunExecutor, SystemExecutor};
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn config() -> PipelineConfig {
        PipelineConfig::from_json_str(
            r#"{
                "reference": "ref.fa",
                "dbsnp": "dbsnp.vcf",
                "indel1": "mills.vcf",
                "indel2": "1000g_indels.vcf",
                "regions": "targets.bed",
                "coverage_threshold": 20,
                "coverage_loci_threshold": 0.8,
                "bad_mate_threshold": 0.5,
                "quality_loci_threshold": "0.5",
                "gatk": { "bin": "GenomeAnalysisTK.jar", "max_mem": 8, "num_cores": 4 }
            }"#,
        )
        .unwrap()
    }

    fn head(walker: &str, mem: &str) -> Vec<String> {
        [mem, "-jar", "GenomeAnalysisTK.jar", "-T", walker, "-R", "ref.fa"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn expect(walker: &str, mem: &str, tail: &[&str]) -> Vec<String> {
        let mut argv = head(walker, mem);
        argv.extend(tail.iter().map(|s| s.to_string()));
        argv
    }

    #[rstest]
    fn test_diagnose_targets(config: PipelineConfig) {
        let executor = DryRunExecutor::new();
        let vcf = diagnose_targets(&executor, &config, "S1", Utf8Path::new("S1.bam")).unwrap();
        assert_eq!(vcf, "S1.diagnosetargets.vcf");

        let invocations = executor.invocations();
        assert_eq!(invocations[0].log_path, "S1.diagnose_targets.log");
        assert_eq!(
            invocations[0].command.argv(),
            expect(
                "DiagnoseTargets",
                "-Xmx2g",
                &[
                    "-L",
                    "targets.bed",
                    "--coverage_status_threshold",
                    "0.8",
                    "--bad_mate_status_threshold",
                    "0.5",
                    "--minimum_coverage",
                    "20",
                    "--quality_status_threshold",
                    "0.5",
                    "-I",
                    "S1.bam",
                    "-o",
                    "S1.diagnosetargets.vcf",
                    "--missing_intervals",
                    "S1.missing.intervals",
                ]
            )
        );
    }

    #[rstest]
    fn test_annotate_vcf(config: PipelineConfig) {
        let executor = DryRunExecutor::new();
        let vcf = annotate_vcf(
            &executor,
            &config,
            "S1",
            Utf8Path::new("S1.platypus.vcf"),
            Utf8Path::new("S1.recalibrated.sorted.bam"),
            Some(2),
        )
        .unwrap();
        assert_eq!(vcf, "S1.annotated.vcf");

        let invocations = executor.invocations();
        assert_eq!(invocations[0].log_path, "S1.variantannotation.log");
        assert_eq!(
            invocations[0].command.argv(),
            expect(
                "VariantAnnotator",
                "-Xmx8g",
                &[
                    "-nt",
                    "2",
                    "--group",
                    "StandardAnnotation",
                    "--dbsnp",
                    "dbsnp.vcf",
                    "-I",
                    "S1.recalibrated.sorted.bam",
                    "--variant",
                    "S1.platypus.vcf",
                    "-L",
                    "S1.platypus.vcf",
                    "-o",
                    "S1.annotated.vcf",
                ]
            )
        );
    }

    #[rstest]
    fn test_filter_variants(config: PipelineConfig) {
        let executor = DryRunExecutor::new();
        let vcf =
            filter_variants(&executor, &config, "S1", Utf8Path::new("S1.annotated.vcf")).unwrap();
        assert_eq!(vcf, "S1.filtered.vcf");

        let invocations = executor.invocations();
        assert_eq!(invocations[0].log_path, "S1.variantfiltration.log");
        assert_eq!(
            invocations[0].command.argv(),
            expect(
                "VariantFiltration",
                "-Xmx8g",
                &[
                    "--filterExpression",
                    "MQ0 > 50",
                    "--filterName",
                    "HighMQ0",
                    "--filterExpression",
                    "DP < 20",
                    "--filterName",
                    "LowDepth",
                    "--filterExpression",
                    "QUAL < 10",
                    "--filterName",
                    "LowQual",
                    "--filterExpression",
                    "MQ < 10",
                    "--filterName",
                    "LowMappingQual",
                    "--variant",
                    "S1.annotated.vcf",
                    "-o",
                    "S1.filtered.vcf",
                ]
            )
        );
    }

    #[rstest]
    fn test_realignment_chain(config: PipelineConfig) {
        let executor = DryRunExecutor::new();
        let bam = Utf8Path::new("S1.dedup.sorted.bam");
        let targets = realign_target_creator(&executor, &config, "S1", bam, None).unwrap();
        assert_eq!(targets, "S1.targets.intervals");
        let realigned = realign_indels(&executor, &config, "S1", bam, &targets).unwrap();
        assert_eq!(realigned, "S1.realigned.sorted.bam");

        let invocations = executor.invocations();
        assert_eq!(invocations.len(), 2);
        assert_eq!(invocations[0].log_path, "S1.targetcreation.log");
        assert_eq!(
            invocations[0].command.argv(),
            expect(
                "RealignerTargetCreator",
                "-Xmx8g",
                &[
                    "-I",
                    "S1.dedup.sorted.bam",
                    "-o",
                    "S1.targets.intervals",
                    "-known",
                    "mills.vcf",
                    "-known",
                    "1000g_indels.vcf",
                    "-nt",
                    "4",
                ]
            )
        );
        assert_eq!(invocations[1].log_path, "S1.realignindels.log");
        assert_eq!(
            invocations[1].command.argv(),
            expect(
                "IndelRealigner",
                "-Xmx8g",
                &[
                    "-I",
                    "S1.dedup.sorted.bam",
                    "-known",
                    "mills.vcf",
                    "-known",
                    "1000g_indels.vcf",
                    "-targetIntervals",
                    "S1.targets.intervals",
                    "--read_filter",
                    "NotPrimaryAlignment",
                    "-o",
                    "S1.realigned.sorted.bam",
                ]
            )
        );
    }

    #[rstest]
    fn test_recalibrator_runs_two_tools_in_order(config: PipelineConfig) {
        let executor = DryRunExecutor::new();
        let bam = recalibrator(
            &executor,
            &config,
            "S1",
            Utf8Path::new("S1.realigned.sorted.bam"),
            Some(3),
        )
        .unwrap();
        assert_eq!(bam, "S1.recalibrated.sorted.bam");

        let invocations = executor.invocations();
        assert_eq!(invocations.len(), 2);
        assert_eq!(invocations[0].stage, BASE_RECALIBRATION);
        assert_eq!(invocations[0].log_path, "S1.recalibrate.log");
        assert_eq!(
            invocations[0].command.argv(),
            expect(
                "BaseRecalibrator",
                "-Xmx8g",
                &[
                    "-I",
                    "S1.realigned.sorted.bam",
                    "-o",
                    "S1.recal",
                    "--knownSites",
                    "dbsnp.vcf",
                    "-nct",
                    "3",
                ]
            )
        );
        assert_eq!(invocations[1].stage, PRINT_READS);
        assert_eq!(invocations[1].log_path, "S1.printrecalibrated.log");
        assert_eq!(
            invocations[1].command.argv(),
            expect(
                "PrintReads",
                "-Xmx8g",
                &[
                    "-I",
                    "S1.realigned.sorted.bam",
                    "-o",
                    "S1.recalibrated.sorted.bam",
                    "-BQSR",
                    "S1.recal",
                    "-nct",
                    "3",
                ]
            )
        );
        assert_eq!(
            executor.copies(),
            vec![(
                Utf8PathBuf::from("S1.recalibrated.sorted.bai"),
                Utf8PathBuf::from("S1.recalibrated.sorted.bam.bai"),
            )]
        );
    }

    #[test]
    fn test_alias_bam_index_copies_existing_index() {
        let dir = TempDir::new().unwrap();
        let workdir = Utf8Path::from_path(dir.path()).unwrap();
        let executor = SystemExecutor::new(workdir);

        alias_bam_index(&executor, "S1").unwrap();
        assert!(!dir.path().join("S1.recalibrated.sorted.bam.bai").exists());

        std::fs::write(dir.path().join("S1.recalibrated.sorted.bai"), b"index").unwrap();
        alias_bam_index(&executor, "S1").unwrap();
        let alias = std::fs::read(dir.path().join("S1.recalibrated.sorted.bam.bai")).unwrap();
        assert_eq!(alias, b"index");
    }

    #[rstest]
    fn test_rendered_commands_are_reproducible(config: PipelineConfig) {
        let bam = Utf8Path::new("S1.bam");
        let first = recalibrator_commands(&config, "S1", bam, None).unwrap();
        let second = recalibrator_commands(&config, "S1", bam, None).unwrap();
        assert_eq!(
            first.base_recalibrator.to_string(),
            second.base_recalibrator.to_string()
        );
        assert_eq!(first.print_reads.to_string(), second.print_reads.to_string());
    }

    #[test]
    fn test_missing_known_indels() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "reference": "ref.fa",
                "indel1": "mills.vcf",
                "gatk": { "bin": "GenomeAnalysisTK.jar", "max_mem": 8 }
            }"#,
        )
        .unwrap();
        let executor = DryRunExecutor::new();
        let err = realign_indels(
            &executor,
            &config,
            "S1",
            Utf8Path::new("S1.bam"),
            Utf8Path::new("S1.targets.intervals"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Config(ConfigError::MissingKey(ref key)) if key == "indel2"
        ));
        assert!(executor.invocations().is_empty());
    }
}
